pub mod cli;
pub mod config;
pub mod error;
pub mod inventory;
pub mod registry;
pub mod retry;
pub mod session;
pub mod task;
pub mod telemetry;
pub mod vim;

#[cfg(test)]
pub(crate) mod testing;

pub mod prelude {
    pub use crate::error::{Error, Result, VimError};
    pub use crate::session::{Session, SessionSettings};
    pub use crate::task::{MissingObjectPolicy, TaskErrorPolicy, TaskHandle, WaitPolicy};
    pub use crate::vim::Vim;

    pub use crate::inventory::{Dispatch, Submitted};
}
