//! Resource budgets and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::runtime::ResourceUsage;

/// Shared cancellation flag
///
/// Cancellation is cooperative: the runtime checks the flag before running
/// the transport, and transports are expected to poll it while working.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Limits on one call attempt
#[derive(Debug, Clone, Default)]
pub struct ResourceBudget {
    pub deadline: Option<Instant>,
    pub max_tokens: Option<u64>,
    pub max_cost: Option<f64>,
}

impl ResourceBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline relative to now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Reason the usage breaches this budget, if it does
    pub fn check_usage(&self, usage: &ResourceUsage) -> Option<String> {
        if let (Some(max), Some(used)) = (self.max_tokens, usage.tokens) {
            if used > max {
                return Some(format!("used {} tokens, budget is {}", used, max));
            }
        }
        if let (Some(max), Some(used)) = (self.max_cost, usage.cost) {
            if used > max {
                return Some(format!("cost {:.4} exceeds budget {:.4}", used, max));
            }
        }
        if self.is_expired() {
            return Some(format!(
                "deadline passed after {}ms",
                usage.duration_ms
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_usage_ceilings() {
        let budget = ResourceBudget::new().with_max_tokens(100).with_max_cost(0.5);

        let within = ResourceUsage {
            duration_ms: 5,
            tokens: Some(100),
            cost: Some(0.5),
        };
        assert!(budget.check_usage(&within).is_none());

        let over = ResourceUsage {
            duration_ms: 5,
            tokens: Some(101),
            cost: None,
        };
        assert!(budget.check_usage(&over).unwrap().contains("101 tokens"));
    }

    #[test]
    fn test_deadline() {
        let expired = ResourceBudget::new().with_deadline(Instant::now());
        assert!(expired.is_expired());
        assert_eq!(expired.remaining(), Some(Duration::ZERO));

        let open = ResourceBudget::new().with_timeout(Duration::from_secs(60));
        assert!(!open.is_expired());
        assert!(ResourceBudget::new().remaining().is_none());
    }
}
