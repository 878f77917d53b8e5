//! Bounded retry counter shared by the task loop and the feature test loop.

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Budget remains; `attempt` is the number of the next attempt.
    Retry { attempt: u32 },
    /// The cap was reached.
    Exhausted { failures: u32 },
}

/// Counts failures against a fixed cap. The count never exceeds the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedRetry {
    cap: u32,
    failures: u32,
}

impl BoundedRetry {
    pub fn new(cap: u32) -> Self {
        Self { cap, failures: 0 }
    }

    /// Continue counting from a persisted failure count.
    pub fn resume(cap: u32, failures: u32) -> Self {
        Self {
            cap,
            failures: failures.min(cap),
        }
    }

    /// Record a failure and decide whether another attempt is allowed.
    pub fn register_failure(&mut self) -> RetryDecision {
        if self.failures < self.cap {
            self.failures += 1;
        }
        if self.failures >= self.cap {
            RetryDecision::Exhausted {
                failures: self.failures,
            }
        } else {
            RetryDecision::Retry {
                attempt: self.failures + 1,
            }
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_until_cap() {
        let mut retry = BoundedRetry::new(3);
        assert_eq!(retry.register_failure(), RetryDecision::Retry { attempt: 2 });
        assert_eq!(retry.register_failure(), RetryDecision::Retry { attempt: 3 });
        assert_eq!(
            retry.register_failure(),
            RetryDecision::Exhausted { failures: 3 }
        );
        assert!(retry.is_exhausted());
    }

    #[test]
    fn test_count_never_exceeds_cap() {
        let mut retry = BoundedRetry::new(1);
        for _ in 0..5 {
            retry.register_failure();
        }
        assert_eq!(retry.failures(), 1);
    }

    #[test]
    fn test_zero_cap_is_exhausted_immediately() {
        let mut retry = BoundedRetry::new(0);
        assert!(retry.is_exhausted());
        assert_eq!(
            retry.register_failure(),
            RetryDecision::Exhausted { failures: 0 }
        );
    }

    #[test]
    fn test_resume_clamps_persisted_count() {
        let retry = BoundedRetry::resume(3, 7);
        assert_eq!(retry.failures(), 3);
        assert!(retry.is_exhausted());
    }
}
