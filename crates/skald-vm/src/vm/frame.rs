//! Call frames
//!
//! A fixed array of frames is reused across activations: activating a
//! frame overwrites every field, so stale state from the previous tenant
//! never leaks. Locals start inline; the first `MakeCell` against a frame
//! performs the capture transition, moving the locals into a heap-pinned
//! shared vector that outlives the frame. Cells index into that vector,
//! which is what lets an inner closure observe the outer frame's writes
//! after the outer frame has popped.

use crate::object::{Function, Partial, Value};
use crate::sync::{shared, Shared};
use crate::vm::loaded::LoadedCode;
use std::sync::Arc;

/// Maximum call frame depth
pub const MAX_FRAME_DEPTH: usize = 1024;

/// Sentinel return address: `ReturnValue` on a frame carrying it ends the
/// current dispatcher invocation instead of jumping.
pub const STOP_SIGNAL: isize = -1;

#[derive(Debug)]
pub(crate) enum Locals {
    Inline(Vec<Value>),
    Captured(Shared<Vec<Value>>),
}

#[derive(Debug)]
pub(crate) struct Frame {
    pub code: Option<Arc<LoadedCode>>,
    pub function: Option<Arc<Function>>,
    pub locals: Locals,
    pub defers: Vec<Arc<Partial>>,
    pub return_addr: isize,
    pub return_sp: isize,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            code: None,
            function: None,
            locals: Locals::Inline(Vec::new()),
            defers: Vec::new(),
            return_addr: STOP_SIGNAL,
            return_sp: -1,
        }
    }
}

impl Frame {
    /// Activate for an entrypoint or module body: no function bound,
    /// end-of-code falls through to the caller.
    pub fn activate_code(&mut self, code: Arc<LoadedCode>) {
        let local_count = code.code.local_count();
        self.code = Some(code);
        self.function = None;
        self.locals = Locals::Inline(vec![Value::Nil; local_count]);
        self.defers.clear();
        self.return_addr = STOP_SIGNAL;
        self.return_sp = -1;
    }

    /// Activate for a function call. `locals` holds the bound arguments
    /// (and the callee itself for named functions); missing slots are
    /// padded to the code's local count.
    pub fn activate_function(
        &mut self,
        function: Arc<Function>,
        code: Arc<LoadedCode>,
        return_addr: isize,
        return_sp: isize,
        mut locals: Vec<Value>,
    ) {
        let local_count = code.code.local_count();
        if locals.len() < local_count {
            locals.resize(local_count, Value::Nil);
        }
        self.code = Some(code);
        self.function = Some(function);
        self.locals = Locals::Inline(locals);
        self.defers.clear();
        self.return_addr = return_addr;
        self.return_sp = return_sp;
    }

    pub fn local(&self, idx: usize) -> Value {
        match &self.locals {
            Locals::Inline(slots) => slots[idx].clone(),
            Locals::Captured(slots) => slots.read()[idx].clone(),
        }
    }

    pub fn set_local(&mut self, idx: usize, value: Value) {
        match &mut self.locals {
            Locals::Inline(slots) => slots[idx] = value,
            Locals::Captured(slots) => slots.write()[idx] = value,
        }
    }

    /// The capture transition: pin the locals on the heap and hand out
    /// the shared vector cells index into. Idempotent.
    pub fn capture_locals(&mut self) -> Shared<Vec<Value>> {
        if let Locals::Inline(slots) = &mut self.locals {
            let pinned = shared(std::mem::take(slots));
            self.locals = Locals::Captured(pinned);
        }
        match &self.locals {
            Locals::Captured(slots) => slots.clone(),
            Locals::Inline(_) => unreachable!("locals were just captured"),
        }
    }

    pub fn push_defer(&mut self, partial: Arc<Partial>) {
        self.defers.push(partial);
    }

    /// Take the deferred calls in registration order; callers fire them
    /// in reverse.
    pub fn take_defers(&mut self) -> Vec<Arc<Partial>> {
        std::mem::take(&mut self.defers)
    }
}
