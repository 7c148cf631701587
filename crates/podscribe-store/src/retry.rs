use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff: base 200ms, cap ~60s, max 5 attempts, per
/// spec.md §4.1. `is_transient` decides whether a given error is worth
/// retrying; persistent errors bubble up immediately.
pub async fn with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_transient(&err) => {
                let backoff_ms = (200u64 * 2u64.pow(attempt - 1)).min(60_000);
                tracing::warn!(attempt, backoff_ms, "transient store error, retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
