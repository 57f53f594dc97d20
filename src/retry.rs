//! Retry with exponential backoff
//!
//! [`Backoff`] yields the delay schedule for one operation and
//! [`retry_transient`] drives an async operation through it. Only errors
//! whose [`IsRetryable::is_retryable`] returns `true` are retried.
//!
//! ```no_run
//! use drive_relay::config::RetryConfig;
//! use drive_relay::retry::retry_transient;
//! use drive_relay::FetchFailure;
//!
//! # async fn example() -> Result<(), FetchFailure> {
//! let config = RetryConfig::default();
//! let bytes = retry_transient(&config, "file abc", || async {
//!     Ok::<_, FetchFailure>(vec![0u8; 4])
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FetchFailure};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as worth another attempt
pub trait IsRetryable {
    /// `true` for transient conditions such as timeouts and rate limits
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchFailure {
    fn is_retryable(&self) -> bool {
        matches!(self, FetchFailure::Transient(_))
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Fetch(failure) => failure.is_retryable(),
            // A send failure sends the whole release back to the next scan pass
            _ => false,
        }
    }
}

/// Delay schedule for a single retried operation
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
    remaining: u32,
}

impl Backoff {
    /// Fresh schedule allowing `config.max_attempts` retries
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            remaining: config.max_attempts,
        }
    }

    /// Delay before the next retry, or `None` once retries are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.next.min(self.max);
        self.next = Duration::from_secs_f64(base.as_secs_f64() * self.multiplier).min(self.max);

        Some(if self.jitter { spread(base) } else { base })
    }
}

/// Somewhere between half of `delay` and all of it
fn spread(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    delay.mul_f64(factor)
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries
///
/// `label` names the operation in log lines. A transient failure is tried at
/// most `config.max_attempts + 1` times in total; the last error is returned.
pub async fn retry_transient<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut retries = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::debug!(operation = label, retries, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(operation = label, retries, error = %err, "Giving up after retries");
            return Err(err);
        };

        retries += 1;
        tracing::warn!(
            operation = label,
            retry = retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
