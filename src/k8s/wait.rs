//! Bounded polling for asynchronous cluster-side state changes

use crate::utils::progress::WaitProgress;
use crate::{Error, Result};
use kube::Api;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Interval between checks for short-lived conditions such as deletion
pub const SHORT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of a single check inside [`poll_until`]
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Ready(T),
    /// Not there yet; the message describes the current state
    Pending(String),
}

/// Run `check` every `interval` until it reports ready, returns a
/// non-retryable error, or `timeout` elapses. Retryable API errors count as
/// pending.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let start = Instant::now();
    let progress = WaitProgress::new(what, "ready");
    let mut last_status = String::from("no status observed");

    loop {
        match check().await {
            Ok(PollStatus::Ready(value)) => {
                progress.finish();
                debug!("{} ready after {:?}", what, start.elapsed());
                return Ok(value);
            }
            Ok(PollStatus::Pending(status)) => {
                debug!("Still waiting for {}: {}", what, status);
                progress.update(&status);
                last_status = status;
            }
            Err(err) if err.is_retryable() => {
                warn!("Retrying {} after error: {}", what, err);
                last_status = err.to_string();
            }
            Err(err) => {
                progress.finish_error(&err.to_string());
                return Err(err);
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            progress.finish_error("timed out");
            return Err(Error::Timeout {
                what: what.to_string(),
                elapsed,
                last_status,
            });
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Retry `op` while it fails with retryable errors
pub async fn retry<T, F, Fut>(what: &str, timeout: Duration, interval: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    poll_until(what, timeout, interval, || {
        let fut = op();
        async move { fut.await.map(PollStatus::Ready) }
    })
    .await
}

/// Wait until `name` is gone from the API
pub async fn wait_for_deletion<K>(api: &Api<K>, name: &str, timeout: Duration) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    let what = format!("deletion of {}", name);
    poll_until(&what, timeout, SHORT_POLL_INTERVAL, move || async move {
        match api.get_opt(name).await? {
            None => Ok(PollStatus::Ready(())),
            Some(_) => Ok(PollStatus::Pending("object still present".to_string())),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_until_ready() {
        let calls = AtomicUsize::new(0);
        let result = poll_until("counter", Duration::from_secs(5), Duration::from_millis(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Ok(PollStatus::Pending(format!("attempt {}", n)))
                } else {
                    Ok(PollStatus::Ready(n))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_timeout_keeps_last_status() {
        let err = poll_until::<(), _, _>(
            "load balancer",
            Duration::from_millis(30),
            Duration::from_millis(10),
            || async { Ok(PollStatus::Pending("no ingress yet".to_string())) },
        )
        .await
        .unwrap_err();
        match err {
            Error::Timeout { what, last_status, .. } => {
                assert_eq!(what, "load balancer");
                assert_eq!(last_status, "no ingress yet");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_fatal_error_stops_polling() {
        let calls = AtomicUsize::new(0);
        let result = tokio_test::block_on(poll_until::<(), _, _>(
            "rollout",
            Duration::from_secs(5),
            Duration::from_millis(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Config("broken".to_string())) }
            },
        ));
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_returns_value() {
        let value = retry("create", Duration::from_secs(1), Duration::from_millis(5), || async {
            Ok::<_, Error>(42)
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
    }
}
