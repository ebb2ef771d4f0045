//! Transient failure classification and bounded retry.
//!
//! Classification is name-based: an error is transient when it belongs to the
//! timeout category, or when its kind name contains one of
//! [`TRANSIENT_MARKERS`] (case-insensitive). This is a heuristic, not a closed
//! taxonomy. It works the same across provider error hierarchies, and any new
//! provider error kind must match one of the markers to be retried.

use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Substrings that mark an error kind name as transient.
pub const TRANSIENT_MARKERS: &[&str] = &["deadlock", "timeout", "transient", "connection"];

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Describes an error for transient classification.
pub trait FailureKind {
    /// Name of the error kind, comparable to an exception class name.
    fn kind_name(&self) -> Cow<'_, str>;

    /// Whether the error belongs to the timeout category.
    fn is_timeout(&self) -> bool {
        false
    }
}

/// Decide whether an error is worth retrying unchanged.
pub fn is_transient<E: FailureKind + ?Sized>(error: Option<&E>) -> bool {
    let Some(error) = error else {
        return false;
    };
    if error.is_timeout() {
        return true;
    }
    let name = error.kind_name().to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Bounded retry with a constant delay.
///
/// Total attempts are `max_retries + 1`. Only transient failures are retried;
/// everything else is returned unchanged after the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u64 {
        u64::from(self.max_retries) + 1
    }

    fn should_retry<E: FailureKind + Display>(&self, retries_so_far: u32, err: &E) -> bool {
        if retries_so_far >= self.max_retries || !is_transient(Some(err)) {
            return false;
        }
        warn!(
            attempt = retries_so_far + 1,
            max_retries = self.max_retries,
            delay_ms = self.delay.as_millis() as u64,
            kind = %err.kind_name(),
            error = %err,
            "Transient failure, retrying"
        );
        true
    }

    /// Run a blocking operation, sleeping the calling thread between attempts.
    pub fn execute<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: FailureKind + Display,
    {
        let mut retries = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(retries, &err) => {
                    retries += 1;
                    std::thread::sleep(self.delay);
                }
                Err(err) => {
                    debug!(attempts = retries + 1, "Giving up");
                    return Err(err);
                }
            }
        }
    }

    /// Run an async operation, suspending between attempts.
    pub async fn execute_async<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureKind + Display,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(retries, &err) => {
                    retries += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => {
                    debug!(attempts = retries + 1, "Giving up");
                    return Err(err);
                }
            }
        }
    }

    /// Blocking variant for side-effect-only operations.
    pub fn run<E, F>(&self, op: F) -> Result<(), E>
    where
        F: FnMut() -> Result<(), E>,
        E: FailureKind + Display,
    {
        self.execute(op)
    }

    /// Async variant for side-effect-only operations.
    pub async fn run_async<E, F, Fut>(&self, op: F) -> Result<(), E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: FailureKind + Display,
    {
        self.execute_async(op).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct NamedError {
        kind: &'static str,
        timeout: bool,
    }

    impl NamedError {
        fn kind(kind: &'static str) -> Self {
            Self {
                kind,
                timeout: false,
            }
        }
    }

    impl Display for NamedError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{} raised", self.kind)
        }
    }

    impl FailureKind for NamedError {
        fn kind_name(&self) -> Cow<'_, str> {
            Cow::Borrowed(self.kind)
        }

        fn is_timeout(&self) -> bool {
            self.timeout
        }
    }

    #[test]
    fn test_classifier_matches_markers_case_insensitively() {
        assert!(is_transient(Some(&NamedError::kind("DeadlockException"))));
        assert!(is_transient(Some(&NamedError::kind("SqlTIMEOUTError"))));
        assert!(is_transient(Some(&NamedError::kind("TransientFault"))));
        assert!(is_transient(Some(&NamedError::kind("ConnectionResetError"))));
        assert!(!is_transient(Some(&NamedError::kind("UniqueViolation"))));
    }

    #[test]
    fn test_classifier_timeout_category_wins() {
        let err = NamedError {
            kind: "OperationCanceled",
            timeout: true,
        };
        assert!(is_transient(Some(&err)));
    }

    #[test]
    fn test_classifier_absent_error_is_not_transient() {
        assert!(!is_transient::<NamedError>(None));
    }

    #[test]
    fn test_deadlock_twice_then_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50));
        let calls = Cell::new(0);
        let result = policy.execute(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(NamedError::kind("DeadlockException"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_persistent_transient_failure_makes_n_plus_one_attempts() {
        for max_retries in 0..4 {
            let policy = RetryPolicy::new(max_retries, Duration::ZERO);
            let calls = Cell::new(0u32);
            let result: Result<(), _> = policy.execute(|| {
                calls.set(calls.get() + 1);
                Err(NamedError::kind("TimeoutError"))
            });
            assert!(result.is_err());
            assert_eq!(calls.get(), max_retries + 1);
        }
    }

    #[test]
    fn test_non_transient_failure_makes_one_attempt() {
        for max_retries in [0, 1, 5] {
            let policy = RetryPolicy::new(max_retries, Duration::ZERO);
            let calls = Cell::new(0u32);
            let result: Result<(), _> = policy.execute(|| {
                calls.set(calls.get() + 1);
                Err(NamedError::kind("SyntaxError"))
            });
            let err = result.unwrap_err();
            assert_eq!(err.kind, "SyntaxError");
            assert_eq!(calls.get(), 1);
        }
    }

    #[test]
    fn test_none_policy_single_attempt() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts(), 1);
        let calls = Cell::new(0u32);
        let _ = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(NamedError::kind("DeadlockException"))
        });
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_async_retry_counts_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, NamedError> = policy
            .execute_async(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NamedError::kind("ConnectionLost"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_async_retry_recovers() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy
            .execute_async(move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(NamedError::kind("DeadlockException"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_async_delay_is_applied() {
        let policy = RetryPolicy::new(1, Duration::from_millis(30));
        let start = std::time::Instant::now();
        let _: Result<(), NamedError> = policy
            .run_async(|| async { Err(NamedError::kind("TimeoutError")) })
            .await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
