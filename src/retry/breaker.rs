//! Feature-scoped circuit breaker.
//!
//! Every failed attempt in a feature contributes a signature (action,
//! target, digest of the failure payload). The breaker trips when the same
//! signature repeats `identical_failures` times in a row, or when the recent
//! history forms a short cycle such as A -> B -> A.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt;

use crate::engine_config::BreakerSection;
use crate::project::TaskAction;

/// Identity of one failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureSignature {
    pub action: TaskAction,
    pub target: String,
    /// Hex SHA-256 of the failure payload.
    pub digest: String,
}

impl FailureSignature {
    pub fn new(action: TaskAction, target: &str, payload: &str) -> Self {
        let digest = Sha256::digest(payload.as_bytes());
        Self {
            action,
            target: target.to_string(),
            digest: format!("{:x}", digest),
        }
    }
}

impl fmt::Display for FailureSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.action, self.target, &self.digest[..12.min(self.digest.len())])
    }
}

/// Outcome of recording a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerVerdict {
    Continue,
    /// The same failure repeated `count` times in a row.
    RepeatedFailure { count: usize, signature: FailureSignature },
    /// The last failures repeat with the given period.
    Cycle { period: usize, signature: FailureSignature },
}

impl BreakerVerdict {
    pub fn is_tripped(&self) -> bool {
        !matches!(self, Self::Continue)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Continue => "no repetition".to_string(),
            Self::RepeatedFailure { count, signature } => {
                format!("repeated failure: {} failed identically {} times in a row", signature, count)
            }
            Self::Cycle { period, signature } => {
                format!("repeated failure cycle of length {} returning to {}", period, signature)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    settings: BreakerSection,
    history: VecDeque<FailureSignature>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSection) -> Self {
        Self {
            settings,
            history: VecDeque::new(),
        }
    }

    /// Record a failure and check both trip conditions.
    pub fn record(&mut self, signature: FailureSignature) -> BreakerVerdict {
        self.history.push_back(signature.clone());
        let keep = self
            .settings
            .history
            .max(self.settings.identical_failures)
            .max(self.settings.cycle_period + 1);
        while self.history.len() > keep {
            self.history.pop_front();
        }

        let identical = self
            .history
            .iter()
            .rev()
            .take_while(|s| **s == signature)
            .count();
        if self.settings.identical_failures > 0 && identical >= self.settings.identical_failures {
            tracing::warn!(signature = %signature, count = identical, "circuit breaker tripped on identical failures");
            return BreakerVerdict::RepeatedFailure {
                count: identical,
                signature,
            };
        }

        let period = self.settings.cycle_period;
        let n = self.history.len();
        if period >= 2 && n > period {
            let last = &self.history[n - 1];
            let recent_differs = self.history.range(n - period..n).any(|s| s != last);
            if self.history[n - 1 - period] == *last && recent_differs {
                tracing::warn!(signature = %signature, period, "circuit breaker tripped on failure cycle");
                return BreakerVerdict::Cycle { period, signature };
            }
        }

        BreakerVerdict::Continue
    }

    /// Forget history; called whenever a task completes.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(target: &str, payload: &str) -> FailureSignature {
        FailureSignature::new(TaskAction::RunCommand, target, payload)
    }

    #[test]
    fn test_three_identical_failures_trip() {
        let mut breaker = CircuitBreaker::new(BreakerSection::default());
        assert_eq!(breaker.record(sig("make", "boom")), BreakerVerdict::Continue);
        assert_eq!(breaker.record(sig("make", "boom")), BreakerVerdict::Continue);
        let verdict = breaker.record(sig("make", "boom"));
        assert!(matches!(verdict, BreakerVerdict::RepeatedFailure { count: 3, .. }));
        assert!(verdict.describe().contains("repeated failure"));
    }

    #[test]
    fn test_different_payload_resets_identical_run() {
        let mut breaker = CircuitBreaker::new(BreakerSection {
            cycle_period: 0,
            ..BreakerSection::default()
        });
        breaker.record(sig("make", "boom"));
        breaker.record(sig("make", "boom"));
        assert_eq!(breaker.record(sig("make", "bang")), BreakerVerdict::Continue);
        assert_eq!(breaker.record(sig("make", "boom")), BreakerVerdict::Continue);
    }

    #[test]
    fn test_aba_cycle_trips() {
        let mut breaker = CircuitBreaker::new(BreakerSection::default());
        breaker.record(sig("a", "x"));
        breaker.record(sig("b", "y"));
        let verdict = breaker.record(sig("a", "x"));
        assert!(matches!(verdict, BreakerVerdict::Cycle { period: 2, .. }));
    }

    #[test]
    fn test_cycle_detection_can_be_disabled() {
        let mut breaker = CircuitBreaker::new(BreakerSection {
            cycle_period: 0,
            ..BreakerSection::default()
        });
        breaker.record(sig("a", "x"));
        breaker.record(sig("b", "y"));
        assert_eq!(breaker.record(sig("a", "x")), BreakerVerdict::Continue);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut breaker = CircuitBreaker::new(BreakerSection::default());
        breaker.record(sig("make", "boom"));
        breaker.record(sig("make", "boom"));
        breaker.reset();
        assert!(breaker.is_empty());
        assert_eq!(breaker.record(sig("make", "boom")), BreakerVerdict::Continue);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut breaker = CircuitBreaker::new(BreakerSection::default());
        for i in 0..20 {
            breaker.record(sig(&format!("t{i}"), "x"));
        }
        assert_eq!(breaker.len(), 8);
    }

    #[test]
    fn test_signature_digest_is_stable() {
        assert_eq!(sig("a", "payload"), sig("a", "payload"));
        assert_ne!(sig("a", "payload"), sig("a", "payload!"));
    }
}
