//! Bounded retry loop for shared egress objects.
//!
//! Shared objects (the egress DestinationRule, gateway servers) are written by
//! many packages at once, so a create can race another create and a patch can
//! race a delete. Callers wrap the whole find-or-create-or-patch operation in
//! [`retry_with_backoff`] and surface the last error once attempts run out.
//!
//! ```ignore
//! use uds_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let dr = retry_with_backoff(
//!     &RetryConfig::immediate(3),
//!     "ensure_destination_rule",
//!     || async { manager.try_ensure_destination_rule(&packages, generation).await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Attempt budget and delay curve for a retried operation.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry up to `attempts` times with no delay between tries
    pub fn immediate(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Whether another attempt is allowed after `attempt` failures
    fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// Between attempts the delay grows by `backoff_multiplier` and is jittered
/// to 0.5x-1.5x. A zero delay skips sleeping entirely. Returns the last error
/// when `max_attempts` is reached.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !config.allows_retry_after(attempt) {
            error!(
                operation = %operation_name,
                attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(e);
        }

        if delay.is_zero() {
            warn!(operation = %operation_name, attempt, error = %e, "Operation failed, retrying");
            continue;
        }

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = jittered.as_millis(),
            "Operation failed, retrying"
        );
        tokio::time::sleep(jittered).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_failures(
        count: Arc<AtomicU32>,
        fail_times: u32,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u32, String>>>>
    {
        move || {
            let c = count.clone();
            Box::pin(async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < fail_times {
                    Err(format!("conflict on attempt {}", n + 1))
                } else {
                    Ok(n + 1)
                }
            })
        }
    }

    #[tokio::test]
    async fn first_success_makes_one_call() {
        let count = Arc::new(AtomicU32::new(0));
        let result =
            retry_with_backoff(&RetryConfig::immediate(3), "op", counting_failures(count.clone(), 0))
                .await;
        assert_eq!(result, Ok(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn immediate_retries_until_success() {
        let count = Arc::new(AtomicU32::new(0));
        let result =
            retry_with_backoff(&RetryConfig::immediate(3), "op", counting_failures(count.clone(), 2))
                .await;
        assert_eq!(result, Ok(3));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_attempts_run_out() {
        let count = Arc::new(AtomicU32::new(0));
        let result =
            retry_with_backoff(&RetryConfig::immediate(3), "op", counting_failures(count.clone(), 10))
                .await;
        assert_eq!(result, Err("conflict on attempt 3".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleeps_between_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        };
        let started = tokio::time::Instant::now();
        let result = retry_with_backoff(&config, "op", counting_failures(count.clone(), 3)).await;
        assert_eq!(result, Ok(4));
        // 10 + 20 + 40ms, each jittered by at least 0.5x
        assert!(started.elapsed() >= Duration::from_millis(35));
    }

    #[test]
    fn zero_attempts_means_infinite() {
        let config = RetryConfig::default();
        assert!(config.allows_retry_after(1_000));
        assert!(!RetryConfig::immediate(2).allows_retry_after(2));
    }
}
