use std::fmt::Display;
use std::future::Future;

use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Runs `operation` until it succeeds or `max_attempts` attempts have failed,
/// returning the last error in that case. Attempts follow each other
/// immediately.
pub async fn with_retries<T, E, F, Fut>(
    max_attempts: u32,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                warn!(%label, attempt, max_attempts, error = %err, "attempt failed, retrying");
                attempt += 1;
            }
            Err(err) => {
                warn!(%label, attempt, max_attempts, error = %err, "attempt failed, giving up");
                return Err(err);
            }
        }
    }
}
