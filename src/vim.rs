pub mod client;
pub mod specs;
pub mod types;

// -----------------------------------------------------------------------------

use crate::prelude::Result;
use crate::vim::types::{MoRef, ServiceContent, TaskInfo};
use async_trait::async_trait;
use serde_json::Value;

/// Boundary to the remote virtualization platform.
///
/// Everything the façade needs from vCenter fits in these primitives:
/// invoke a method on a managed object, read one of its properties, and
/// read the status object of a task.
///
#[async_trait]
pub trait Vim {
    /// Authenticates the connection, replacing any previous session.
    async fn login(&self) -> Result<()>;
    /// Terminates the current session.
    async fn logout(&self) -> Result<()>;
    /// Fetches the root `ServiceContent` of the API.
    async fn content(&self) -> Result<ServiceContent>;
    /// Invokes `method` on `object` with named arguments. Returns the raw
    /// method result, `Value::Null` for void methods.
    async fn invoke(&self, object: &MoRef, method: &str, args: Value) -> Result<Value>;
    /// Reads a single top-level property of `object`.
    async fn property(&self, object: &MoRef, name: &str) -> Result<Value>;
    /// Reads the status object of a task.
    async fn task_info(&self, task: &MoRef) -> Result<TaskInfo>;
}
