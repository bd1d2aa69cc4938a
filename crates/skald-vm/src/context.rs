//! Evaluation context
//!
//! A context travels with every evaluation: it carries the external
//! cancellation signal and an optional resource-limits policy. Cloning is
//! cheap and clones observe the same cancellation.
//!
//! Cancellation is delivered by dropping the sender half of the signal
//! channel, which wakes every receiver clone at once. Dropping a
//! [`CancelHandle`] cancels its context, so hold the handle for as long as
//! the work should keep running.

use crate::error::VmError;
use crate::limits::Limits;
use crate::sync::{Arc, Mutex};
use crossbeam_channel::{bounded, Receiver, Sender};

const DEFAULT_CAUSE: &str = "context canceled";

#[derive(Debug)]
struct CancelState {
    cause: Mutex<Option<String>>,
}

/// Evaluation context. `Context::new()` can never be cancelled;
/// [`Context::with_cancel`] attaches a cancellation signal.
#[derive(Clone, Default)]
pub struct Context {
    done: Option<Receiver<()>>,
    cancel: Option<Arc<CancelState>>,
    limits: Option<Arc<dyn Limits>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cancellable context and the handle that cancels it
    pub fn with_cancel() -> (Context, CancelHandle) {
        let (tx, rx) = bounded::<()>(0);
        let state = Arc::new(CancelState {
            cause: Mutex::new(None),
        });
        let ctx = Context {
            done: Some(rx),
            cancel: Some(state.clone()),
            limits: None,
        };
        let handle = CancelHandle {
            _tx: tx,
            state,
        };
        (ctx, handle)
    }

    /// Attach a limits policy, replacing any existing one
    pub fn with_limits(mut self, limits: Arc<dyn Limits>) -> Context {
        self.limits = Some(limits);
        self
    }

    /// Detach the limits policy (spawned workers do this: limits objects
    /// are not guaranteed thread-safe)
    pub fn without_limits(mut self) -> Context {
        self.limits = None;
        self
    }

    /// The cancellation receiver, when one is attached. Selecting on it
    /// wakes as soon as the context is cancelled.
    pub fn done(&self) -> Option<&Receiver<()>> {
        self.done.as_ref()
    }

    pub fn limits(&self) -> Option<&Arc<dyn Limits>> {
        self.limits.as_ref()
    }

    /// The error describing why this context was cancelled
    pub fn cancel_cause(&self) -> VmError {
        let cause = self
            .cancel
            .as_ref()
            .and_then(|state| state.cause.lock().clone())
            .unwrap_or_else(|| DEFAULT_CAUSE.to_string());
        VmError::Cancelled { cause }
    }
}

/// Cancels its [`Context`] when dropped or when [`CancelHandle::cancel`]
/// is called.
pub struct CancelHandle {
    _tx: Sender<()>,
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Cancel with the default cause
    pub fn cancel(self) {
        drop(self);
    }

    /// Cancel with a specific cause string
    pub fn cancel_with(self, cause: impl Into<String>) {
        *self.state.cause.lock() = Some(cause.into());
        drop(self);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        let mut cause = self.state.cause.lock();
        if cause.is_none() {
            *cause = Some(DEFAULT_CAUSE.to_string());
        }
        // The sender drops with self, waking every receiver clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_context_has_no_signal() {
        let ctx = Context::new();
        assert!(ctx.done().is_none());
    }

    #[test]
    fn test_cancel_wakes_receiver() {
        let (ctx, handle) = Context::with_cancel();
        let done = ctx.done().unwrap().clone();
        handle.cancel();
        assert!(done.recv().is_err());
        match ctx.cancel_cause() {
            VmError::Cancelled { cause } => assert_eq!(cause, "context canceled"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cancel_with_custom_cause() {
        let (ctx, handle) = Context::with_cancel();
        handle.cancel_with("deadline exceeded");
        match ctx.cancel_cause() {
            VmError::Cancelled { cause } => assert_eq!(cause, "deadline exceeded"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
