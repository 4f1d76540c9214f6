use crate::prelude::Result;
use std::future::Future;
use std::time::Duration;

/// Number of times [`retry`] runs an operation at most.
///
pub const ATTEMPTS: usize = 3;

/// Fixed pause between two attempts.
///
pub const PAUSE: Duration = Duration::from_secs(10);

/// Runs `operation` until it succeeds, at most [`ATTEMPTS`] times, sleeping
/// [`PAUSE`] between two attempts.
///
/// Failures are logged and swallowed: the caller only learns whether one
/// of the attempts produced a value.
///
/// # Arguments
///
/// * `name`: What is being attempted, for the log.
/// * `operation`: Produces a fresh future for every attempt.
///
pub async fn retry<T, F, Fut>(name: &str, mut operation: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=ATTEMPTS {
        match operation().await {
            Ok(value) => return Some(value),
            Err(error) => {
                tracing::warn!(target: "retry", name, attempt, %error, "Attempt failed");
                if attempt < ATTEMPTS {
                    tokio::time::sleep(PAUSE).await;
                }
            }
        }
    }

    tracing::error!(target: "retry", name, "Giving up after {ATTEMPTS} attempts");
    None
}
