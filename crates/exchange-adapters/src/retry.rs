use std::future::Future;
use std::time::Duration;

use crate::error::AdapterError;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF: Duration = Duration::from_secs(1);

/// Retries `op` up to [`MAX_ATTEMPTS`] times with a flat 1s backoff whenever
/// it returns a retriable [`AdapterError`] (HTTP 429 / exchange rate-limit or
/// transient-internal-error codes). Non-retriable errors return immediately.
pub async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.retriable() => {
                tracing::warn!(what, attempt, error = %e, "retriable exchange error, backing off");
                last_err = Some(e);
                tokio::time::sleep(BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| AdapterError::RetriesExhausted(MAX_ATTEMPTS, what.to_string())))
}
