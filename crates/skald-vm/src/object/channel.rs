//! Channels: FIFO value queues connecting worker VMs
//!
//! Send and receive block the dispatching thread, so both operations
//! select on the context's cancellation signal when one is attached.
//! Cloning a channel value clones the crossbeam halves; all clones refer
//! to the same queue and compare equal by identity.

use crate::context::Context;
use crate::error::VmError;
use crate::object::{ErrorValue, Value};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct Channel {
    id: u64,
    capacity: Option<usize>,
    tx: Sender<Value>,
    rx: Receiver<Value>,
}

impl Channel {
    /// A bounded channel. Capacity zero rendezvouses: send blocks until a
    /// receiver is ready.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            capacity: Some(capacity),
            tx,
            rx,
        }
    }

    pub fn unbounded() -> Self {
        let (tx, rx) = unbounded();
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            capacity: None,
            tx,
            rx,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Blocking send, interrupted by context cancellation
    pub fn send(&self, ctx: &Context, value: Value) -> Result<(), VmError> {
        match ctx.done() {
            Some(done) => {
                let tx = &self.tx;
                crossbeam_channel::select! {
                    send(tx, value) -> res => {
                        res.map_err(|_| VmError::from(ErrorValue::new(
                            "channel error: send on closed channel",
                        )))
                    }
                    recv(done) -> _ => Err(ctx.cancel_cause()),
                }
            }
            None => self.tx.send(value).map_err(|_| {
                VmError::from(ErrorValue::new("channel error: send on closed channel"))
            }),
        }
    }

    /// Blocking receive, interrupted by context cancellation
    pub fn recv(&self, ctx: &Context) -> Result<Value, VmError> {
        match ctx.done() {
            Some(done) => {
                let rx = &self.rx;
                crossbeam_channel::select! {
                    recv(rx) -> res => {
                        res.map_err(|_| VmError::from(ErrorValue::new(
                            "channel error: receive on closed channel",
                        )))
                    }
                    recv(done) -> _ => Err(ctx.cancel_cause()),
                }
            }
            None => self.rx.recv().map_err(|_| {
                VmError::from(ErrorValue::new(
                    "channel error: receive on closed channel",
                ))
            }),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_then_recv() {
        let ctx = Context::new();
        let ch = Channel::bounded(1);
        ch.send(&ctx, Value::Int(5)).unwrap();
        assert_eq!(ch.recv(&ctx).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_recv_observes_cancellation() {
        let (ctx, handle) = Context::with_cancel();
        let ch = Channel::bounded(0);
        let worker = std::thread::spawn(move || ch.recv(&ctx));
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.cancel();
        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, VmError::Cancelled { .. }));
    }

    #[test]
    fn test_clones_share_the_queue() {
        let ctx = Context::new();
        let a = Channel::unbounded();
        let b = a.clone();
        a.send(&ctx, Value::Int(9)).unwrap();
        assert_eq!(b.recv(&ctx).unwrap(), Value::Int(9));
        assert_eq!(a, b);
    }
}
