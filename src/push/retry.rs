use std::future::Future;
use std::time::Duration;

/// Errors that may succeed when tried again
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` up to `1 + max_retries` times with exponential backoff
/// between attempts. Non-retryable errors are returned immediately.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    max_retries: u32,
    initial_backoff: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let backoff = initial_backoff * 2u32.saturating_pow(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Operation failed, will retry"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
