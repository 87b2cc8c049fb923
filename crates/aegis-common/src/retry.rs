//! Bounded retry helpers with backoff
//!
//! Transient externals (embedding server, database bring-up) retry at
//! the point of origin; the delay grows linearly with the attempt
//! number, which matches the operational profile of co-located
//! services coming back after a restart.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Retry configuration
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay; attempt `n` sleeps `base_delay * n` before retrying
    pub base_delay: Duration,
}

impl RetryConfig {
    /// Embedding-server profile: 3 attempts, 5 s * attempt
    pub fn embedding() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }

    /// Database bring-up profile: 10 attempts, flat 5 s
    pub fn database_init() -> Self {
        RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
        }
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// The last error is returned when every attempt fails.
pub async fn retry<T, E, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    linear_backoff: bool,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(
                    "{} failed on attempt {}/{}: {}",
                    operation_name, attempt, config.max_attempts, e
                );
                last_error = Some(e);
                if attempt < config.max_attempts {
                    let delay = if linear_backoff {
                        config.base_delay * attempt
                    } else {
                        config.base_delay
                    };
                    sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_first_try() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<i32, String> = retry("op", config, false, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<u32, String> = retry("op", config, true, || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let config = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<(), String> =
            retry("op", config, false, || async { Err("still broken".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "still broken");
    }
}
