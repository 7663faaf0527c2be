//! Caller-owned cancellation for storage calls.
//!
//! RULE: The pipeline never starts its own timers. It only checks the
//! token the caller handed in, before each storage call.

use crate::error::{ClaimError, ClaimResult};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<(Instant, Duration)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also expires `budget` from now.
    pub fn with_deadline(budget: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some((Instant::now() + budget, budget)),
        }
    }

    /// Visible to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> ClaimResult<()> {
        if self.is_cancelled() {
            return Err(ClaimError::Cancelled);
        }
        if let Some((deadline, budget)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ClaimError::DeadlineExceeded {
                    budget_ms: budget.as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_across_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(token.check().is_ok());
        handle.cancel();
        assert!(matches!(token.check(), Err(ClaimError::Cancelled)));
    }

    #[test]
    fn zero_budget_is_already_expired() {
        let token = CancelToken::with_deadline(Duration::ZERO);
        assert!(matches!(
            token.check(),
            Err(ClaimError::DeadlineExceeded { budget_ms: 0 })
        ));
    }

    #[test]
    fn generous_budget_passes() {
        assert!(CancelToken::with_deadline(Duration::from_secs(3600)).check().is_ok());
    }
}
