use crate::inventory::Dispatch;
use crate::inventory::vm::Vm;
use crate::prelude::Result;
use crate::session::Session;
use crate::vim::types::MoRef;
use std::time::Duration;

#[derive(Debug, clap::Parser)]
#[command(
    name = "vcenter",
    version = "0.1.0",
    about = "Command-line client for vCenter inventory and tasks"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// List the datacenters of the inventory.
    Datacenters,
    /// Read or change a vCenter advanced setting.
    Setting {
        #[command(subcommand)]
        action: SettingAction,
    },
    /// Wait for a task and print its status.
    Task {
        #[arg(help = "Task identifier, e.g. task-42")]
        id: String,
        #[arg(short, long, help = "Give up after this many seconds")]
        timeout: Option<u64>,
    },
    /// Operate on a virtual machine.
    Vm {
        #[arg(help = "VM identifier, e.g. vm-42")]
        id: String,
        #[arg(long, help = "Submit the job and wait for it only before exiting")]
        no_wait: bool,
        #[command(subcommand)]
        action: VmAction,
    },
}

#[derive(Debug, clap::Subcommand)]
pub enum SettingAction {
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Debug, clap::Subcommand)]
pub enum VmAction {
    PowerOn,
    PowerOff,
    Suspend,
    Rename { name: String },
}

impl Command {
    /// Executes the command against an open session.
    ///
    /// Jobs submitted with `--no-wait` stay registered with the session;
    /// the caller drains them before exiting.
    ///
    #[tracing::instrument(level = "debug", target = "cli", skip(session))]
    pub async fn run(self, session: &Session) -> Result<()> {
        match self {
            Command::Datacenters => {
                for datacenter in session.datacenters().await? {
                    println!("{}\t{}", datacenter.moref().value, datacenter.name());
                }
            }
            Command::Setting { action } => match action {
                SettingAction::Get { key } => {
                    for value in session.setting(&key).await? {
                        println!("{value}");
                    }
                }
                SettingAction::Set { key, value } => session.change_setting(&key, &value).await?,
            },
            Command::Task { id, timeout } => {
                let handle = session.handle(MoRef::task(&id));
                handle
                    .wait_timeout(timeout.map(Duration::from_secs))
                    .await?;
                println!("{}", handle.describe());
            }
            Command::Vm {
                id,
                no_wait,
                action,
            } => {
                let moref = MoRef::new("VirtualMachine", &id);
                let folder = session.property(&moref, "parent").await?;
                let mut vm = Vm::load(session.clone(), moref, folder).await?;
                let dispatch = Dispatch::from(!no_wait);

                let handle = match action {
                    VmAction::PowerOn => vm.power_on(dispatch).await?,
                    VmAction::PowerOff => vm.power_off(dispatch).await?,
                    VmAction::Suspend => vm.suspend(dispatch).await?,
                    VmAction::Rename { name } => Some(vm.rename(&name, dispatch).await?),
                };
                match handle {
                    Some(handle) => println!("{}", handle.describe()),
                    None => println!("{} is already in that state", vm.name()),
                }
            }
        }
        Ok(())
    }

    /// Runs the command, waits for the jobs it deferred and closes the
    /// session.
    ///
    /// The command's own error wins over a failed drain. A failed logout
    /// is only logged.
    ///
    pub async fn run_to_completion(self, session: &Session) -> Result<()> {
        let outcome = self.run(session).await;
        let drained = session.wait_for_all().await;
        match session.disconnect().await {
            Ok(()) => tracing::info!(target: "cli", "Session closed."),
            Err(error) => tracing::error!(target: "cli", %error, "Failed to close the session."),
        }

        outcome?;
        drained?;
        Ok(())
    }
}
