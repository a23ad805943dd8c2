use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::DriverError;

/// Retry `attempt` every `interval` until it yields a value.
///
/// `Ok(None)` and retryable errors keep the loop going; anything else aborts it.
/// The loop ends with `Timeout` once `timeout` has elapsed, or `Cancelled` as soon as the
/// token fires, even mid-sleep.
pub(crate) async fn poll_until<T, F, Fut>(
    waiting_for: &str,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    attempt: F,
) -> Result<T, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, DriverError>>,
{
    poll_with(waiting_for, interval, timeout, cancel, DriverError::is_retryable, attempt).await
}

/// Re-send a write only while the coordinator cannot be reached at all.
///
/// Any other failure, including one after the request went out, is returned as-is.
pub(crate) async fn retry_unreachable<T, F, Fut>(
    sending: &str,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    poll_with(sending, interval, timeout, cancel, DriverError::is_unreachable, || {
        let sent = attempt();
        async move { sent.await.map(Some) }
    })
    .await
}

async fn poll_with<T, F, Fut>(
    waiting_for: &str,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    retryable: fn(&DriverError) -> bool,
    mut attempt: F,
) -> Result<T, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, DriverError>>,
{
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut attempts: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        attempts += 1;
        match attempt().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if retryable(&e) => {
                debug!(waiting_for, attempts, error = %e, "still waiting");
            }
            Err(e) => return Err(e),
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(DriverError::Timeout {
                        waiting_for: waiting_for.to_string(),
                    });
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(DriverError::Cancelled),
            _ = sleep(pause) => {}
        }
    }
}
