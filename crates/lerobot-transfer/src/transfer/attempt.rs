//! Per-unit attempt bookkeeping
//!
//! Every failure a worker sees is fed to [`AttemptRecord::on_error`], which
//! updates the counters and returns the next step. Keeping the policy here
//! lets the retry/renegotiate/requeue rules be tested without any I/O.

use rand::Rng;
use std::time::Duration;

use crate::transfer::core::{ErrorKind, FailureReason, TransferError};

/// Limits applied to a single unit
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Transient failures tolerated before the unit is exhausted
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub max_renegotiations: u32,
    pub integrity_retries: u32,
    pub requeue_on_exhaustion: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        crate::transfer::config::TransferConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows the `failure`-th transient failure
    pub fn backoff(&self, failure: u32) -> Duration {
        let exponent = failure.saturating_sub(1).min(31);
        let base = self.base_delay.as_millis() as u64;
        let delay = base.saturating_mul(1_u64 << exponent).min(self.max_delay.as_millis() as u64);

        if self.jitter && delay > 0 {
            let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
            Duration::from_millis((delay as f64 * factor) as u64)
        } else {
            Duration::from_millis(delay)
        }
    }
}

/// What the worker should do after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Sleep, negotiate a fresh location and try again
    Retry { delay: Duration },
    /// The location expired; negotiate again without spending a retry
    Renegotiate,
    /// The bytes arrived but did not verify; transfer the whole file again
    Retransfer,
    /// Local retries are spent; push the unit to the back of the queue once
    Requeue,
    /// The whole operation must stop
    Abort,
    Fail(FailureReason),
}

/// Attempt history of one transfer unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptRecord {
    /// Attempts started, including ones that failed during negotiation
    pub attempts: u32,
    pub transient_failures: u32,
    pub renegotiations: u32,
    pub integrity_failures: u32,
    pub requeued: bool,
    pub last_error: Option<ErrorKind>,
}

impl AttemptRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn on_error(&mut self, error: &TransferError, policy: &RetryPolicy) -> NextStep {
        let kind = error.kind();
        self.last_error = Some(kind);

        match kind {
            ErrorKind::Authentication => NextStep::Abort,
            ErrorKind::Cancelled => NextStep::Fail(FailureReason::Cancelled),
            ErrorKind::LocationExpired => {
                if self.renegotiations < policy.max_renegotiations {
                    self.renegotiations += 1;
                    NextStep::Renegotiate
                } else {
                    NextStep::Fail(FailureReason::from_error(error))
                }
            }
            ErrorKind::IntegrityMismatch => {
                self.integrity_failures += 1;
                if self.integrity_failures <= policy.integrity_retries {
                    NextStep::Retransfer
                } else {
                    NextStep::Fail(FailureReason::from_error(error))
                }
            }
            ErrorKind::Transport => {
                self.transient_failures += 1;
                if self.transient_failures < policy.max_attempts {
                    NextStep::Retry { delay: policy.backoff(self.transient_failures) }
                } else if policy.requeue_on_exhaustion && !self.requeued {
                    self.requeued = true;
                    self.transient_failures = 0;
                    NextStep::Requeue
                } else {
                    NextStep::Fail(FailureReason::from_error(error))
                }
            }
            ErrorKind::Validation | ErrorKind::Rejected | ErrorKind::LocalIo => {
                NextStep::Fail(FailureReason::from_error(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::core::ValidationType;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
            max_renegotiations: 2,
            integrity_retries: 1,
            requeue_on_exhaustion: true,
        }
    }

    fn transient() -> TransferError {
        TransferError::HttpStatus { url: "http://s".into(), status: 503, body: String::new() }
    }

    fn expired() -> TransferError {
        TransferError::LocationExpired { path: "data/a.parquet".into() }
    }

    fn mismatch() -> TransferError {
        TransferError::IntegrityMismatch {
            path: "data/a.parquet".into(),
            check: ValidationType::Size,
            expected: "10".into(),
            actual: "9".into(),
        }
    }

    #[test]
    fn test_transient_retries_then_requeue_then_fail() {
        let policy = policy();
        let mut record = AttemptRecord::new();

        assert_eq!(record.on_error(&transient(), &policy), NextStep::Retry { delay: Duration::from_millis(100) });
        assert_eq!(record.on_error(&transient(), &policy), NextStep::Retry { delay: Duration::from_millis(200) });
        assert_eq!(record.on_error(&transient(), &policy), NextStep::Requeue);
        assert!(record.requeued);

        assert!(matches!(record.on_error(&transient(), &policy), NextStep::Retry { .. }));
        assert!(matches!(record.on_error(&transient(), &policy), NextStep::Retry { .. }));
        assert!(matches!(
            record.on_error(&transient(), &policy),
            NextStep::Fail(FailureReason::Transport(_))
        ));
        assert_eq!(record.last_error, Some(ErrorKind::Transport));
    }

    #[test]
    fn test_no_requeue_when_disabled() {
        let policy = RetryPolicy { requeue_on_exhaustion: false, ..policy() };
        let mut record = AttemptRecord::new();
        record.on_error(&transient(), &policy);
        record.on_error(&transient(), &policy);
        assert!(matches!(record.on_error(&transient(), &policy), NextStep::Fail(_)));
    }

    #[test]
    fn test_expiry_does_not_spend_transient_budget() {
        let policy = policy();
        let mut record = AttemptRecord::new();
        assert_eq!(record.on_error(&expired(), &policy), NextStep::Renegotiate);
        assert_eq!(record.on_error(&expired(), &policy), NextStep::Renegotiate);
        assert_eq!(record.transient_failures, 0);
        assert!(matches!(
            record.on_error(&expired(), &policy),
            NextStep::Fail(FailureReason::LocationExpired(_))
        ));
    }

    #[test]
    fn test_integrity_gets_one_retransfer() {
        let policy = policy();
        let mut record = AttemptRecord::new();
        assert_eq!(record.on_error(&mismatch(), &policy), NextStep::Retransfer);
        assert!(matches!(
            record.on_error(&mismatch(), &policy),
            NextStep::Fail(FailureReason::IntegrityMismatch(_))
        ));
    }

    #[test]
    fn test_fatal_and_terminal_kinds() {
        let policy = policy();
        let mut record = AttemptRecord::new();
        let auth = TransferError::Authentication { message: "expired".into() };
        assert_eq!(record.on_error(&auth, &policy), NextStep::Abort);

        let rejected = TransferError::HttpStatus { url: "u".into(), status: 403, body: "denied".into() };
        assert!(matches!(record.on_error(&rejected, &policy), NextStep::Fail(FailureReason::Rejected(_))));

        let cancelled = TransferError::cancelled(Some("data/a.parquet"));
        assert_eq!(record.on_error(&cancelled, &policy), NextStep::Fail(FailureReason::Cancelled));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let policy = RetryPolicy { jitter: true, ..policy() };
        for _ in 0..50 {
            let delay = policy.backoff(2);
            assert!(delay >= Duration::from_millis(150) && delay <= Duration::from_millis(250));
        }
        let capped = RetryPolicy { jitter: false, ..policy };
        assert_eq!(capped.backoff(10), Duration::from_secs(1));
    }
}
