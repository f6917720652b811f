//! Retry logic with exponential backoff for transient errors.

use crate::error::{Error, Result};
use reconcile::CallBudget;
use std::thread;
use std::time::{Duration, Instant};

/// How often a backoff sleep looks at the cancel token
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Current attempt number (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration);
}

/// Callback that reports retries through the `log` facade.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration) {
        log::warn!(
            "Attempt {}/{} failed ({}): {}. Retrying in {:.1}s",
            attempt,
            max_attempts,
            error.category().description(),
            error,
            delay.as_secs_f64()
        );
    }
}

/// Execute an operation with retry logic.
///
/// Retries the operation while it returns a retryable error (network
/// failures, a locked package database), sleeping with exponential backoff
/// between attempts. Any other error is returned immediately.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt + 1 >= config.max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, config.max_attempts, &e, delay);
                }
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Execute an operation with retry logic, inside a call budget.
///
/// Like [`with_retry`], but each attempt is handed the time left in
/// `budget` and no attempt starts past its deadline. A backoff that would
/// outlast the deadline ends with `Error::Timeout`; a cancellation during
/// the backoff returns the error of the last attempt.
pub fn with_retry_within<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    budget: &CallBudget,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(Duration) -> Result<T>,
{
    let out_of_time = || Error::Timeout {
        command: label.to_string(),
        timeout: budget.timeout(),
    };

    let mut attempt = 0;
    loop {
        let Some(left) = budget.remaining() else {
            return Err(out_of_time());
        };
        match operation(left) {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt + 1 >= config.max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                if budget.remaining().is_none_or(|left| left <= delay) {
                    log::warn!("{label}: no time left to retry after: {e}");
                    return Err(out_of_time());
                }
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, config.max_attempts, &e, delay);
                }
                if !sleep_unless_cancelled(delay, budget) {
                    log::info!("{label}: cancelled, not retrying");
                    return Err(e);
                }
                attempt += 1;
            }
        }
    }
}

/// Sleep for `delay`; false when the budget was cancelled meanwhile
fn sleep_unless_cancelled(delay: Duration, budget: &CallBudget) -> bool {
    let start = Instant::now();
    loop {
        if budget.is_cancelled() {
            return false;
        }
        let elapsed = start.elapsed();
        if elapsed >= delay {
            return true;
        }
        thread::sleep((delay - elapsed).min(CANCEL_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use reconcile::CancelToken;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    fn failure(category: ErrorCategory) -> Error {
        Error::CommandFailed {
            command: "pacman -S git".to_string(),
            code: Some(1),
            stderr: "boom".to_string(),
            category,
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::new(5, Duration::from_secs(2), 2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
        // Capped at max_delay
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let config = RetryConfig::no_retry();
        let result = with_retry(&config, None, || Ok::<_, Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_retry_non_retryable_error() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<()> = with_retry(&fast(), None, || {
            attempts_clone.set(attempts_clone.get() + 1);
            Err(failure(ErrorCategory::NotFound))
        });

        assert!(result.is_err());
        // Should only try once since NotFound is not retryable
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry(&fast(), None, || {
            let current = attempts_clone.get();
            attempts_clone.set(current + 1);
            if current < 2 {
                Err(failure(ErrorCategory::Locked))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_with_retry_all_attempts_fail() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<()> = with_retry(&fast(), None, || {
            attempts_clone.set(attempts_clone.get() + 1);
            Err(failure(ErrorCategory::Transient))
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_callback_invoked() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingCallback(Arc<AtomicU32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, _: &Error, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let callback_count = Arc::new(AtomicU32::new(0));
        let callback = CountingCallback(callback_count.clone());

        let _: Result<()> = with_retry(&fast(), Some(&callback), || {
            Err(failure(ErrorCategory::Transient))
        });

        // Called for each retry, not for the final failure
        assert_eq!(callback_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_within_hands_remaining_time_to_each_attempt() {
        let budget = CallBudget::with_timeout(Duration::from_secs(30));
        let mut granted = Vec::new();

        let result = with_retry_within(&fast(), None, &budget, "pacman -S git", |left| {
            granted.push(left);
            if granted.len() < 2 {
                Err(failure(ErrorCategory::Locked))
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(granted.len(), 2);
        assert!(granted[1] <= granted[0]);
        assert!(granted[0] <= Duration::from_secs(30));
    }

    #[test]
    fn test_within_backoff_past_deadline_is_timeout() {
        let config = RetryConfig::new(3, Duration::from_secs(5), 2.0);
        let budget = CallBudget::with_timeout(Duration::from_millis(200));
        let started = Instant::now();

        let result: Result<()> = with_retry_within(&config, None, &budget, "pacman -S git", |_| {
            Err(failure(ErrorCategory::Transient))
        });

        assert!(matches!(
            result,
            Err(Error::Timeout { timeout, .. }) if timeout == Duration::from_millis(200)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_within_cancel_interrupts_backoff() {
        let config = RetryConfig::new(3, Duration::from_secs(20), 1.0);
        let token = CancelToken::new();
        let budget = CallBudget::new(Duration::from_secs(60), token.clone());
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            token.cancel();
        });
        let attempts = Cell::new(0);
        let started = Instant::now();

        let result: Result<()> = with_retry_within(&config, None, &budget, "pacman -S git", |_| {
            attempts.set(attempts.get() + 1);
            Err(failure(ErrorCategory::Locked))
        });
        canceller.join().unwrap();

        assert!(matches!(
            result,
            Err(Error::CommandFailed {
                category: ErrorCategory::Locked,
                ..
            })
        ));
        assert_eq!(attempts.get(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
