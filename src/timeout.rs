//! Bounded waits for counter backend calls

use crate::error::{BackendError, CounterError};
use std::future::Future;
use std::time::{Duration, Instant};

/// Default bound on a single counter backend round trip.
pub const DEFAULT_COUNTER_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound accepted for a counter timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);

/// Rejected timeout configuration.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("timeout must be non-zero and at most {max:?} (got {provided:?})")]
pub struct TimeoutError {
    provided: Duration,
    max: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { duration: DEFAULT_COUNTER_TIMEOUT }
    }
}

impl TimeoutPolicy {
    /// Create a timeout policy; zero and overlong durations are rejected.
    pub fn new(duration: Duration) -> Result<Self, TimeoutError> {
        if duration.is_zero() || duration > MAX_TIMEOUT {
            return Err(TimeoutError { provided: duration, max: MAX_TIMEOUT });
        }
        Ok(Self { duration })
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run one backend call, mapping its failure or its lateness into [`CounterError`].
    pub async fn execute<T, Fut>(&self, operation: Fut) -> Result<T, CounterError>
    where
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation).await {
            Ok(result) => result.map_err(CounterError::Backend),
            Err(_) => {
                let elapsed = start.elapsed();
                Err(CounterError::Timeout { elapsed, timeout: self.duration })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn rejects_zero_and_overlong() {
        assert!(TimeoutPolicy::new(Duration::ZERO).is_err());
        assert!(TimeoutPolicy::new(Duration::from_secs(3600)).is_err());
        let err = TimeoutPolicy::new(Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("non-zero"));
        assert_eq!(TimeoutPolicy::default().duration(), DEFAULT_COUNTER_TIMEOUT);
    }

    #[tokio::test]
    async fn test_completes_before_timeout() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(100)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = timeout
            .execute(async move {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, BackendError>(42_i64)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_long_operation() {
        let timeout_duration = Duration::from_millis(50);
        let timeout = TimeoutPolicy::new(timeout_duration).unwrap();

        let result = timeout
            .execute(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, BackendError>(42_i64)
            })
            .await;

        match result.unwrap_err() {
            CounterError::Timeout { timeout, .. } => assert_eq!(timeout, timeout_duration),
            e => panic!("Expected Timeout error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_propagates_backend_errors() {
        let timeout = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();

        let result = timeout
            .execute(async { Err::<i64, BackendError>("connection refused".into()) })
            .await;

        match result.unwrap_err() {
            CounterError::Backend(e) => assert_eq!(e.to_string(), "connection refused"),
            e => panic!("Expected Backend error, got {:?}", e),
        }
    }
}
