//! In-memory `Vim` used by the unit tests.

use crate::prelude::{Error, Result};
use crate::vim::Vim;
use crate::vim::types::{MoRef, ServiceContent, TaskInfo, TaskState};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One scripted answer to a task poll.
///
#[derive(Debug, Clone)]
pub enum Step {
    State(TaskState),
    /// Terminal state carrying a payload (result for success, fault for error).
    Finished(TaskState, Value),
    /// The task object was garbage-collected.
    Missing,
    /// Transport failure unrelated to the task.
    Broken,
}

/// Scripted remote: every task follows its own list of steps, the last
/// step repeats forever.
///
#[derive(Default)]
pub struct ScriptedVim {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    polls: Mutex<HashMap<String, usize>>,
    methods: Mutex<HashMap<String, MoRef>>,
    properties: Mutex<HashMap<String, Value>>,
    invocations: Mutex<Vec<(MoRef, String, Value)>>,
    content: Mutex<Option<Value>>,
    logins: AtomicUsize,
    logouts: AtomicUsize,
    logout_fails: AtomicBool,
}

impl ScriptedVim {
    pub fn script(&self, task: &str, steps: impl IntoIterator<Item = Step>) -> MoRef {
        self.scripts
            .lock()
            .unwrap()
            .insert(task.to_owned(), steps.into_iter().collect());
        MoRef::task(task)
    }

    /// Makes `method` return the given task when invoked on any object.
    ///
    pub fn on_invoke(&self, method: &str, task: &MoRef) {
        self.methods
            .lock()
            .unwrap()
            .insert(method.to_owned(), task.clone());
    }

    pub fn set_property(&self, object: &MoRef, name: &str, value: Value) {
        self.properties
            .lock()
            .unwrap()
            .insert(format!("{}/{}", object.value, name), value);
    }

    pub fn set_content(&self, content: Value) {
        *self.content.lock().unwrap() = Some(content);
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Makes every logout fail.
    ///
    pub fn fail_logout(&self) {
        self.logout_fails.store(true, Ordering::SeqCst);
    }

    pub fn polls(&self, task: &str) -> usize {
        self.polls.lock().unwrap().get(task).copied().unwrap_or(0)
    }

    pub fn total_polls(&self) -> usize {
        self.polls.lock().unwrap().values().sum()
    }

    pub fn invocations(&self) -> Vec<(MoRef, String, Value)> {
        self.invocations.lock().unwrap().clone()
    }

    fn info(task: &str, state: TaskState, payload: Option<Value>) -> TaskInfo {
        let mut info = json!({"key": task, "state": state, "descriptionId": "scripted"});
        match (state, payload) {
            (TaskState::Error, Some(fault)) => info["error"] = fault,
            (_, Some(result)) => info["result"] = result,
            (_, None) => {}
        }
        serde_json::from_value(info).unwrap()
    }
}

#[async_trait]
impl Vim for ScriptedVim {
    async fn login(&self) -> Result<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        match self.logout_fails.load(Ordering::SeqCst) {
            true => Err(Error::Any("session already expired".to_owned())),
            false => Ok(()),
        }
    }

    async fn content(&self) -> Result<ServiceContent> {
        match self.content.lock().unwrap().clone() {
            Some(content) => Ok(serde_json::from_value(content)?),
            None => Err(Error::NotSupported("content".to_owned())),
        }
    }

    async fn invoke(&self, object: &MoRef, method: &str, args: Value) -> Result<Value> {
        self.invocations
            .lock()
            .unwrap()
            .push((object.clone(), method.to_owned(), args));
        match self.methods.lock().unwrap().get(method) {
            Some(task) => Ok(serde_json::to_value(task)?),
            None => Ok(Value::Null),
        }
    }

    async fn property(&self, object: &MoRef, name: &str) -> Result<Value> {
        self.properties
            .lock()
            .unwrap()
            .get(&format!("{}/{}", object.value, name))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{object}.{name}")))
    }

    async fn task_info(&self, task: &MoRef) -> Result<TaskInfo> {
        *self
            .polls
            .lock()
            .unwrap()
            .entry(task.value.clone())
            .or_default() += 1;

        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            let steps = scripts
                .get_mut(&task.value)
                .ok_or_else(|| Error::NotFound(task.to_string()))?;
            match steps.len() {
                0 => return Err(Error::NotFound(task.to_string())),
                1 => steps[0].clone(),
                _ => steps.pop_front().unwrap(),
            }
        };

        match step {
            Step::State(state) => Ok(Self::info(&task.value, state, None)),
            Step::Finished(state, payload) => Ok(Self::info(&task.value, state, Some(payload))),
            Step::Missing => Err(Error::NotFound(task.to_string())),
            Step::Broken => Err(Error::Any("connection reset by peer".to_owned())),
        }
    }
}
