//! Resource limits capability
//!
//! The policy itself is external: the core only threads a `Limits` object
//! through the evaluation context so host callables can charge against it.
//! Limits objects are not shared into spawned workers.

use crate::object::ErrorValue;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Limits: Send + Sync {
    /// Charge the given number of cost units; an error means the budget
    /// is exhausted and evaluation should stop.
    fn track_cost(&self, units: usize) -> Result<(), ErrorValue>;
}

/// A simple fixed-budget policy
pub struct CostLimit {
    remaining: AtomicI64,
}

impl CostLimit {
    pub fn new(budget: i64) -> Self {
        Self {
            remaining: AtomicI64::new(budget),
        }
    }
}

impl Limits for CostLimit {
    fn track_cost(&self, units: usize) -> Result<(), ErrorValue> {
        let left = self
            .remaining
            .fetch_sub(units as i64, Ordering::Relaxed);
        if left < units as i64 {
            return Err(ErrorValue::new("limit error: cost budget exceeded"));
        }
        Ok(())
    }
}
