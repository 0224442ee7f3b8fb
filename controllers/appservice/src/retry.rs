//! Optimistic-concurrency retry.
//!
//! Writes that replace a whole object carry its `resourceVersion`; if another
//! writer got there first the API server answers 409 Conflict. The closure
//! passed to [`retry_on_conflict`] must re-read the object on every attempt,
//! otherwise each retry conflicts again.

use crate::error::ControllerError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attempts made before a conflict is surfaced to the caller.
pub const DEFAULT_RETRY_STEPS: u32 = 5;

/// Pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Runs `op`, retrying with the default budget while it fails with a conflict.
pub async fn retry_on_conflict<T, F, Fut>(op: F) -> Result<T, ControllerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControllerError>>,
{
    retry_on_conflict_with(DEFAULT_RETRY_STEPS, DEFAULT_RETRY_DELAY, op).await
}

/// Runs `op` up to `steps` times, sleeping `delay` after each conflict.
///
/// Success and non-conflict errors return immediately; the last conflict is
/// returned once the budget is spent.
pub async fn retry_on_conflict_with<T, F, Fut>(
    steps: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, ControllerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControllerError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < steps => {
                debug!("Write conflict on attempt {}/{}, retrying", attempt, steps);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}
