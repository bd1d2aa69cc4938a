//! Handles for spawned worker VMs

use crate::error::VmError;
use crate::object::Value;
use crate::sync::{Mutex, Arc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// A joinable handle to a spawned worker VM. Cloning shares the handle;
/// the first join consumes it and later joins fail.
#[derive(Clone)]
pub struct ThreadHandle {
    id: u64,
    inner: Arc<Mutex<Option<JoinHandle<Result<Value, VmError>>>>>,
}

impl ThreadHandle {
    pub fn new(handle: JoinHandle<Result<Value, VmError>>) -> Self {
        Self {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Wait for the worker to finish and return its result
    pub fn join(&self) -> Result<Value, VmError> {
        let handle = self.inner.lock().take().ok_or_else(|| {
            VmError::from(crate::object::ErrorValue::new(
                "thread error: thread already joined",
            ))
        })?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(VmError::Panic {
                detail: "worker thread panicked".to_string(),
            }),
        }
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle").field("id", &self.id).finish()
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
