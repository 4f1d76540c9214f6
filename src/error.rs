use derive_more::Display;
use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Fault type the vSphere API reports when a managed object no longer exists.
///
const MISSING_OBJECT_FAULT: &str = "ManagedObjectNotFound";

/// Defines the library's custom error types.
///
#[derive(Debug, Error)]
pub enum Error {
    #[error("Error: {0}")]
    Any(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Timeout after: {0} seconds")]
    Timeout(f32),
    #[error("Task failed: {0}")]
    TaskFailed(String),
    #[error("vSphere API error: {0} failed: status {1}, body: {2}")]
    Vim(VimError, StatusCode, String),
    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(#[from] serde_json::Error),
    #[error("Header convert error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to set logger: {0}")]
    Logger(#[from] tracing::log::SetLoggerError),
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tracing::dispatcher::SetGlobalDefaultError),
    #[error("IO error: {0}")]
    InputOutput(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// Whether the remote side reported that the addressed managed object
    /// does not exist (anymore).
    ///
    /// Completed tasks are garbage-collected by vCenter, so a poll may hit
    /// this long after the job itself has finished.
    ///
    pub fn is_missing_object(&self) -> bool {
        match self {
            Error::Vim(_, status, body) => {
                *status == StatusCode::NOT_FOUND || body.contains(MISSING_OBJECT_FAULT)
            }
            Error::NotFound(_) => true,
            _ => false,
        }
    }
}

/// Represents the remote vSphere operation that failed.
///
#[derive(Debug, Display, Clone, Copy, PartialEq)]
pub enum VimError {
    Content,
    Login,
    Logout,
    Invoke,
    Property,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_status_is_missing_object() {
        let error = Error::Vim(VimError::Property, StatusCode::NOT_FOUND, String::new());
        assert!(error.is_missing_object());
    }

    #[test]
    fn missing_object_fault_is_missing_object() {
        let body = r#"{"_typeName":"ManagedObjectNotFound","obj":{"type":"Task","value":"task-1"}}"#;
        let error = Error::Vim(
            VimError::Property,
            StatusCode::INTERNAL_SERVER_ERROR,
            body.to_owned(),
        );
        assert!(error.is_missing_object());
    }

    #[test]
    fn other_faults_are_not_missing_object() {
        let body = r#"{"_typeName":"NotAuthenticated"}"#;
        let error = Error::Vim(
            VimError::Invoke,
            StatusCode::INTERNAL_SERVER_ERROR,
            body.to_owned(),
        );
        assert!(!error.is_missing_object());
        assert!(!Error::Timeout(1.0).is_missing_object());
    }
}
