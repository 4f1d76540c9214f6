//! Entity handles over the vCenter inventory.
//!
//! Every handle keeps the managed object reference, a clone of the
//! [`Session`](crate::session::Session) and a snapshot of the properties it
//! was loaded with. Snapshots go stale as soon as the remote changes; the
//! documented post-condition refreshes and `update()` re-fetch them.

pub mod cluster;
pub mod datacenter;
pub mod datastore;
pub mod dvportgroup;
pub mod dvs;
pub mod host;
pub mod network;
pub mod vm;

// -----------------------------------------------------------------------------

use crate::prelude::{Error, Result};
use crate::task::TaskHandle;
use crate::vim::types::MoRef;

/// Whether a façade method blocks until the job it submitted is terminal.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// Wait for the job, then refresh what it changed.
    #[default]
    Wait,
    /// Register the job with the session's pending tasks and return at once.
    Defer,
}

impl From<bool> for Dispatch {
    fn from(wait: bool) -> Self {
        match wait {
            true => Dispatch::Wait,
            false => Dispatch::Defer,
        }
    }
}

/// Outcome of a façade method that yields a new child entity once its job
/// completed.
///
#[derive(Debug)]
pub enum Submitted<T> {
    Finished(T),
    Pending(TaskHandle),
}

impl<T> Submitted<T> {
    pub fn finished(self) -> Option<T> {
        match self {
            Submitted::Finished(entity) => Some(entity),
            Submitted::Pending(_) => None,
        }
    }

    pub fn pending(self) -> Option<TaskHandle> {
        match self {
            Submitted::Finished(_) => None,
            Submitted::Pending(handle) => Some(handle),
        }
    }
}

/// Error for a child entity that should exist after `handle` completed.
///
/// A failed job is the more useful diagnosis, so it wins over the plain
/// lookup failure.
///
pub(crate) fn missing_child(handle: &TaskHandle, what: &str) -> Error {
    match handle.error() {
        Some(_) => Error::TaskFailed(handle.describe()),
        None => Error::NotFound(what.to_owned()),
    }
}

/// Reference to the object a job created, when the job reports one.
///
pub(crate) fn created_object(handle: &TaskHandle) -> Option<MoRef> {
    handle
        .result()
        .and_then(|result| serde_json::from_value(result).ok())
}
