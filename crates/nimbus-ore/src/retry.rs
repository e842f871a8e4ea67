//! Bounded-exponential retry, built on the `backoff` crate.
//!
//! The cluster KV driver and the installer's operation FSM both need to
//! retry transient failures a bounded number of times before giving up;
//! this module centralizes that policy so every caller retries the same
//! way and only [`crate::error::ErrorKind::ConnectionProblem`]-flavored
//! failures get retried at all.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

use crate::error::ErrorKind;

/// Tuning knobs for [`retry`]. The defaults match the teacher workspace's
/// storage retry policy: a short initial backoff, capped growth, and a
/// firm ceiling on total elapsed time so a caller never blocks forever.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn build(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed_time),
            multiplier: self.multiplier,
            ..ExponentialBackoff::default()
        }
    }
}

/// The outcome of an attempt: either a final value, or a classified
/// error that `retry` uses to decide whether to try again.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Retries `op` with bounded exponential backoff until it succeeds,
/// returns a non-retryable error, or exceeds `config.max_elapsed_time`.
///
/// `op` is re-invoked from scratch on every attempt; callers that need
/// to re-read state before retrying (e.g. a compare-and-swap loop)
/// should do that inside the closure itself.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, E>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut backoff = config.build();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.kind().is_retryable() {
                    return Err(err);
                }
                match backoff.next_backoff() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky(ErrorKind);

    impl Classify for Flaky {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed_time: Duration::from_secs(1),
            multiplier: 2.0,
        };
        let result: Result<u32, Flaky> = retry(&config, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Flaky(ErrorKind::ConnectionProblem))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn never_retries_permanent_errors() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<u32, Flaky> = retry(&config, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(ErrorKind::BadParameter))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
