//! Virtual machine execution core
//!
//! The dispatcher is a dense match over the opcode tag, driven by three
//! registers: the instruction pointer, the operand stack pointer, and the
//! frame pointer. The instruction pointer advances *before* an opcode
//! executes, so relative jumps measure from the opcode's own address.
//! Function calls and module loads re-enter the dispatcher on a fresh
//! frame; the `STOP_SIGNAL` return address ends the nested invocation at
//! `ReturnValue`.

mod frame;
mod loaded;
mod stack;

pub use frame::{MAX_FRAME_DEPTH, STOP_SIGNAL};
pub use stack::MAX_STACK_DEPTH;

use crate::code::Code;
use crate::context::Context;
use crate::error::VmError;
use crate::importer::Importer;
use crate::limits::Limits;
use crate::object::{Function, Module, Partial, ThreadHandle, Value, ValueIter};
use crate::op::{BinaryOpType, CompareOpType, Opcode};
use crate::sync::shared;
use frame::Frame;
use loaded::{CodeRegistry, LoadedCode};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Maximum number of arguments in a single call
pub const MAX_ARGS: usize = 255;

/// The Skald virtual machine
pub struct Vm {
    ip: usize,
    fp: usize,
    offset: usize,
    stack: stack::OperandStack,
    frames: Vec<Frame>,
    active_code: Option<Arc<LoadedCode>>,
    halt: Arc<AtomicI32>,
    main: Arc<Code>,
    importer: Option<Arc<dyn Importer>>,
    limits: Option<Arc<dyn Limits>>,
    modules: HashMap<String, Arc<Module>>,
    input_globals: HashMap<String, Value>,
    globals: HashMap<String, Value>,
    registry: CodeRegistry,
    running: bool,
    conc_allowed: bool,
}

/// Configures and constructs a [`Vm`]
pub struct VmBuilder {
    main: Arc<Code>,
    offset: usize,
    importer: Option<Arc<dyn Importer>>,
    limits: Option<Arc<dyn Limits>>,
    globals: HashMap<String, Value>,
    conc_allowed: bool,
}

impl VmBuilder {
    /// Initial instruction offset for the entrypoint
    pub fn instruction_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Importer used by `Import`/`FromImport`; without one, imports fail
    pub fn importer(mut self, importer: Arc<dyn Importer>) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Limits policy propagated through the evaluation context
    pub fn limits(mut self, limits: Arc<dyn Limits>) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Bind a host value to a global name
    pub fn global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Allow the `Go` opcode to spawn worker VMs
    pub fn with_concurrency(mut self) -> Self {
        self.conc_allowed = true;
        self
    }

    pub fn build(self) -> Vm {
        Vm {
            ip: self.offset,
            fp: 0,
            offset: self.offset,
            stack: stack::OperandStack::new(),
            frames: (0..MAX_FRAME_DEPTH).map(|_| Frame::default()).collect(),
            active_code: None,
            halt: Arc::new(AtomicI32::new(0)),
            main: self.main,
            importer: self.importer,
            limits: self.limits,
            modules: HashMap::new(),
            input_globals: self.globals,
            globals: HashMap::new(),
            registry: CodeRegistry::new(),
            running: false,
            conc_allowed: self.conc_allowed,
        }
    }
}

impl Vm {
    pub fn builder(main: Arc<Code>) -> VmBuilder {
        VmBuilder {
            main,
            offset: 0,
            importer: None,
            limits: None,
            globals: HashMap::new(),
            conc_allowed: false,
        }
    }

    pub fn new(main: Arc<Code>) -> Vm {
        Vm::builder(main).build()
    }

    /// Execute the entrypoint and return the top-of-stack value, or nil
    /// when the program leaves the stack empty.
    pub fn run(&mut self, ctx: &Context) -> Result<Value, VmError> {
        self.halt.store(0, Ordering::Relaxed);
        let _watch = self.watch_cancellation(ctx);
        let ctx = match &self.limits {
            Some(limits) => ctx.clone().with_limits(limits.clone()),
            None => ctx.clone(),
        };

        // Resolve host globals; module-valued globals seed the module cache
        self.globals = self.input_globals.clone();
        for (name, value) in self.globals.clone() {
            if let Value::Module(module) = value {
                self.modules.insert(name, module);
            }
        }

        self.running = true;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_main(&ctx)));
        self.running = false;
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(VmError::Panic {
                detail: panic_detail(payload),
            }),
        }
    }

    fn run_main(&mut self, ctx: &Context) -> Result<Value, VmError> {
        // Load the code of any function constants up front, so the set of
        // loaded code is fixed once execution has begun.
        let main = self.main.clone();
        for constant in main.constants() {
            if let Value::Function(function) = constant {
                self.registry.load(function.code(), &self.globals);
            }
        }

        let code = if self.registry.is_empty() {
            self.registry.load(&main, &self.globals)
        } else {
            self.registry.reload(&main, &self.globals)
        };
        self.stack.truncate(-1);
        self.activate_code(0, self.offset, code);
        debug!(code = main.name(), "running");
        self.eval(ctx)?;
        Ok(self.stack.tos().cloned().unwrap_or(Value::Nil))
    }

    /// Invoke a compiled function on this VM. Refused while the VM is
    /// running; host callables re-enter through [`Vm::call_function`]
    /// instead.
    pub fn call(
        &mut self,
        ctx: &Context,
        function: &Arc<Function>,
        args: &[Value],
    ) -> Result<Value, VmError> {
        if self.running {
            return Err(VmError::CallWhileRunning);
        }
        self.call_function(ctx, function, args.to_vec())
    }

    /// Read a global of the active code by name
    pub fn get(&self, name: &str) -> Result<Value, VmError> {
        let code = self.active_code.as_ref().ok_or(VmError::NoActiveCode)?;
        match code.code.global_index(name) {
            Some(idx) => Ok(code.globals.read()[idx].clone()),
            None => Err(VmError::GlobalNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Names of all globals declared by the active code
    pub fn global_names(&self) -> Vec<String> {
        match &self.active_code {
            Some(code) => (0..code.code.globals_count())
                .map(|i| code.code.global_name(i).to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Top-of-stack value, if any
    pub fn tos(&self) -> Option<Value> {
        self.stack.tos().cloned()
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn set_ip(&mut self, ip: usize) {
        self.ip = ip;
    }

    /// Clone this VM into an independent executor. The clone has fresh
    /// registers, stack, and frames, but shares globals, modules, and
    /// loaded code with the original by reference. The importer and
    /// limits are not carried over.
    pub fn clone_vm(&self) -> Vm {
        let mut clone = Vm {
            ip: 0,
            fp: 0,
            offset: 0,
            stack: stack::OperandStack::new(),
            frames: (0..MAX_FRAME_DEPTH).map(|_| Frame::default()).collect(),
            active_code: None,
            halt: Arc::new(AtomicI32::new(0)),
            main: self.main.clone(),
            importer: None,
            limits: None,
            modules: self.modules.clone(),
            input_globals: self.input_globals.clone(),
            globals: self.globals.clone(),
            registry: self.registry.snapshot(),
            running: false,
            conc_allowed: self.conc_allowed,
        };
        let code = clone.registry.load(&clone.main, &clone.globals);
        clone.activate_code(0, 0, code);
        clone
    }

    /// Spawn a callable on a worker VM cloned from this one. The worker
    /// shares globals and modules with this VM; its context has no limits
    /// attached because limits objects are not guaranteed thread-safe.
    pub fn spawn(
        &mut self,
        ctx: &Context,
        callee: Value,
        args: Vec<Value>,
    ) -> Result<ThreadHandle, VmError> {
        if !self.conc_allowed {
            return Err(VmError::ConcurrencyDisabled);
        }
        let mut worker = self.clone_vm();
        worker.conc_allowed = true;
        let ctx = ctx.clone().without_limits();
        debug!(callee = callee.type_name(), "spawning worker vm");
        let handle = thread::spawn(move || -> Result<Value, VmError> {
            worker.call_value(&ctx, callee, args)?;
            Ok(worker.stack.pop())
        });
        Ok(ThreadHandle::new(handle))
    }

    // ===== Dispatcher =====

    fn eval(&mut self, ctx: &Context) -> Result<(), VmError> {
        while self.ip < self.instructions_len() {
            // Honor external cancellation at every instruction boundary
            if self.halt.load(Ordering::Relaxed) == 1 {
                return Err(ctx.cancel_cause());
            }

            // Advance past the opcode before executing it; relative jumps
            // account for this.
            let word = self.fetch();
            let opcode = Opcode::from_u16(word).ok_or(VmError::UnknownOpcode { opcode: word })?;

            match opcode {
                Opcode::Nop => {}
                Opcode::Halt => return Ok(()),

                // ===== Loads =====
                Opcode::LoadConst => {
                    let idx = self.fetch() as usize;
                    let value = self.active().code.constants()[idx].clone();
                    self.stack.push(value);
                }
                Opcode::LoadFast => {
                    let idx = self.fetch() as usize;
                    let value = self.frames[self.fp].local(idx);
                    self.stack.push(value);
                }
                Opcode::LoadGlobal => {
                    let idx = self.fetch() as usize;
                    let value = self.active().globals.read()[idx].clone();
                    self.stack.push(value);
                }
                Opcode::LoadFree => {
                    let idx = self.fetch() as usize;
                    let function = self.frames[self.fp]
                        .function
                        .clone()
                        .expect("load_free outside a function frame");
                    let value = function.free_vars()[idx].value();
                    self.stack.push(value);
                }
                Opcode::LoadAttr => {
                    let idx = self.fetch() as usize;
                    let obj = self.stack.pop();
                    let name = self.active().code.name_at(idx).to_string();
                    match obj.get_attr(&name) {
                        Some(Value::Resolver(resolver)) => {
                            let value = resolver.resolve_attr(ctx, &name)?;
                            self.stack.push(value);
                        }
                        Some(value) => self.stack.push(value),
                        None => {
                            return Err(VmError::AttributeNotFound {
                                name,
                                type_name: obj.type_name(),
                            })
                        }
                    }
                }
                Opcode::Copy => {
                    let offset = self.fetch() as usize;
                    let value = self.stack.peek(offset);
                    self.stack.push(value);
                }

                // ===== Stores =====
                Opcode::StoreFast => {
                    let idx = self.fetch() as usize;
                    let value = self.stack.pop();
                    self.frames[self.fp].set_local(idx, value);
                }
                Opcode::StoreGlobal => {
                    let idx = self.fetch() as usize;
                    let value = self.stack.pop();
                    self.active().globals.write()[idx] = value;
                }
                Opcode::StoreFree => {
                    let idx = self.fetch() as usize;
                    let value = self.stack.pop();
                    let function = self.frames[self.fp]
                        .function
                        .clone()
                        .expect("store_free outside a function frame");
                    function.free_vars()[idx].set(value);
                }
                Opcode::StoreAttr => {
                    let idx = self.fetch() as usize;
                    let obj = self.stack.pop();
                    let value = self.stack.pop();
                    let name = self.active().code.name_at(idx).to_string();
                    obj.set_attr(&name, value)?;
                }

                // ===== Closures & cells =====
                Opcode::LoadClosure => {
                    let const_idx = self.fetch() as usize;
                    let free_count = self.fetch() as usize;
                    let mut free = Vec::with_capacity(free_count);
                    free.resize(free_count, None);
                    for i in 0..free_count {
                        match self.stack.pop() {
                            // The first popped cell is the last free slot
                            Value::Cell(cell) => free[free_count - 1 - i] = Some(cell),
                            _ => return Err(VmError::ExpectedCell),
                        }
                    }
                    let function = match &self.active().code.constants()[const_idx] {
                        Value::Function(f) => f.clone(),
                        other => {
                            return Err(VmError::NotCallable {
                                type_name: other.type_name(),
                            })
                        }
                    };
                    let free = free.into_iter().map(|c| c.expect("cell set")).collect();
                    self.stack.push(Value::Function(Function::closure(&function, free)));
                }
                Opcode::MakeCell => {
                    let symbol_idx = self.fetch() as usize;
                    let frames_back = self.fetch() as usize;
                    let frame_idx = self
                        .fp
                        .checked_sub(frames_back)
                        .ok_or(VmError::NoFrameAtDepth { depth: frames_back })?;
                    let slots = self.frames[frame_idx].capture_locals();
                    self.stack
                        .push(Value::Cell(crate::object::Cell::new(slots, symbol_idx)));
                }

                // ===== Literals =====
                Opcode::Nil => self.stack.push(Value::Nil),
                Opcode::True => self.stack.push(Value::Bool(true)),
                Opcode::False => self.stack.push(Value::Bool(false)),
                Opcode::BuildList => {
                    let count = self.fetch() as usize;
                    let mut items = vec![Value::Nil; count];
                    for i in 0..count {
                        items[count - 1 - i] = self.stack.pop();
                    }
                    self.stack.push(Value::list(items));
                }
                Opcode::BuildMap => {
                    let count = self.fetch() as usize;
                    let mut entries = std::collections::BTreeMap::new();
                    for _ in 0..count {
                        let value = self.stack.pop();
                        let key = self.stack.pop();
                        match key {
                            Value::String(key) => {
                                entries.insert(key.as_ref().clone(), value);
                            }
                            other => {
                                return Err(VmError::NotString {
                                    type_name: other.type_name(),
                                })
                            }
                        }
                    }
                    self.stack.push(Value::map(entries));
                }
                Opcode::BuildSet => {
                    let count = self.fetch() as usize;
                    let mut members = std::collections::BTreeMap::new();
                    for _ in 0..count {
                        let item = self.stack.pop();
                        let key = item.hash_key()?;
                        members.insert(key, item);
                    }
                    self.stack.push(Value::Set(shared(members)));
                }
                Opcode::BuildString => {
                    let count = self.fetch() as usize;
                    let mut parts = vec![String::new(); count];
                    for i in 0..count {
                        let dst = count - 1 - i;
                        match self.stack.pop() {
                            Value::Error(err) => return Err(VmError::Raised(err)),
                            Value::String(s) => parts[dst] = s.as_ref().clone(),
                            other => parts[dst] = other.inspect(),
                        }
                    }
                    self.stack.push(Value::string(parts.concat()));
                }

                // ===== Operators =====
                Opcode::BinaryOp => {
                    let selector = self.fetch();
                    let op = BinaryOpType::from_u16(selector)
                        .ok_or(VmError::InvalidOperator { selector })?;
                    let b = self.stack.pop();
                    let a = self.stack.pop();
                    self.stack.push(crate::object::ops::binary_op(op, &a, &b));
                }
                Opcode::CompareOp => {
                    let selector = self.fetch();
                    let op = CompareOpType::from_u16(selector)
                        .ok_or(VmError::InvalidOperator { selector })?;
                    let b = self.stack.pop();
                    let a = self.stack.pop();
                    self.stack.push(crate::object::ops::compare(op, &a, &b));
                }
                Opcode::UnaryNegative => {
                    let obj = self.stack.pop();
                    match obj {
                        Value::Int(i) => self.stack.push(Value::Int(-i)),
                        Value::Float(f) => self.stack.push(Value::Float(-f)),
                        other => {
                            return Err(VmError::NotNumber {
                                type_name: other.type_name(),
                            })
                        }
                    }
                }
                Opcode::UnaryNot => {
                    let obj = self.stack.pop();
                    self.stack.push(Value::Bool(!obj.is_truthy()));
                }
                Opcode::ContainsOp => {
                    let item = self.stack.pop();
                    let container = self.stack.pop();
                    let invert = self.fetch() == 1;
                    if !container.is_container() {
                        return Err(VmError::NotContainer {
                            type_name: container.type_name(),
                        });
                    }
                    let result = container.contains(&item)?;
                    let result = if invert {
                        Value::Bool(!result.is_truthy())
                    } else {
                        result
                    };
                    self.stack.push(result);
                }

                // ===== Subscripting =====
                Opcode::BinarySubscr => {
                    let index = self.stack.pop();
                    let container = self.stack.pop();
                    if !container.is_container() {
                        return Err(VmError::NotContainer {
                            type_name: container.type_name(),
                        });
                    }
                    let value = container.get_item(&index)?;
                    self.stack.push(value);
                }
                Opcode::StoreSubscr => {
                    let index = self.stack.pop();
                    let container = self.stack.pop();
                    let value = self.stack.pop();
                    if !container.is_container() {
                        return Err(VmError::NotContainer {
                            type_name: container.type_name(),
                        });
                    }
                    container.set_item(&index, value)?;
                }
                Opcode::Slice => {
                    let start = self.stack.pop();
                    let stop = self.stack.pop();
                    let container = self.stack.pop();
                    if !container.is_container() {
                        return Err(VmError::NotContainer {
                            type_name: container.type_name(),
                        });
                    }
                    let slice = container.get_slice(&start, &stop)?;
                    self.stack.push(slice);
                }
                Opcode::Length => {
                    let container = self.stack.pop();
                    match container.length() {
                        Some(len) => self.stack.push(Value::Int(len)),
                        None => {
                            return Err(VmError::NotContainer {
                                type_name: container.type_name(),
                            })
                        }
                    }
                }

                // ===== Control flow =====
                Opcode::PopJumpForwardIfTrue => {
                    let tos = self.stack.pop();
                    let delta = self.fetch() as isize - 2;
                    if tos.is_truthy() {
                        self.ip = (self.ip as isize + delta) as usize;
                    }
                }
                Opcode::PopJumpForwardIfFalse => {
                    let tos = self.stack.pop();
                    let delta = self.fetch() as isize - 2;
                    if !tos.is_truthy() {
                        self.ip = (self.ip as isize + delta) as usize;
                    }
                }
                Opcode::PopJumpBackwardIfTrue => {
                    let tos = self.stack.pop();
                    let delta = self.fetch() as isize - 2;
                    if tos.is_truthy() {
                        self.ip = (self.ip as isize - delta) as usize;
                    }
                }
                Opcode::PopJumpBackwardIfFalse => {
                    let tos = self.stack.pop();
                    let delta = self.fetch() as isize - 2;
                    if !tos.is_truthy() {
                        self.ip = (self.ip as isize - delta) as usize;
                    }
                }
                Opcode::JumpForward => {
                    let base = self.ip - 1;
                    let delta = self.fetch() as usize;
                    self.ip = base + delta;
                }
                Opcode::JumpBackward => {
                    let base = self.ip - 1;
                    let delta = self.fetch() as usize;
                    self.ip = base - delta;
                }
                Opcode::ForIter => {
                    let base = self.ip - 1;
                    let jump = self.fetch() as usize;
                    let name_count = self.fetch();
                    let iter = match self.stack.pop() {
                        Value::Iterator(iter) => iter,
                        other => {
                            return Err(VmError::NotIterable {
                                type_name: other.type_name(),
                            })
                        }
                    };
                    let next = iter.write().next();
                    match next {
                        None => self.ip = base + jump,
                        Some(_) => {
                            let entry = iter
                                .read()
                                .entry()
                                .cloned()
                                .expect("iterator entry after next");
                            self.stack.push(Value::Iterator(iter));
                            match name_count {
                                0 => {}
                                1 => self.stack.push(entry.key),
                                2 => {
                                    self.stack.push(entry.value);
                                    self.stack.push(entry.key);
                                }
                                _ => return Err(VmError::InvalidIteration),
                            }
                        }
                    }
                }
                Opcode::GetIter => {
                    let obj = self.stack.pop();
                    match obj {
                        Value::Iterator(iter) => self.stack.push(Value::Iterator(iter)),
                        other => match ValueIter::for_value(&other) {
                            Some(iter) => self.stack.push(Value::Iterator(shared(iter))),
                            None => {
                                return Err(VmError::NotIterable {
                                    type_name: other.type_name(),
                                })
                            }
                        },
                    }
                }
                Opcode::Range => {
                    let obj = self.stack.pop();
                    match ValueIter::for_value(&obj) {
                        Some(iter) => self.stack.push(Value::Iterator(shared(iter))),
                        None => {
                            return Err(VmError::NotIterable {
                                type_name: obj.type_name(),
                            })
                        }
                    }
                }
                Opcode::Unpack => {
                    let container = self.stack.pop();
                    let want = self.fetch() as i64;
                    if !container.is_container() {
                        return Err(VmError::NotContainer {
                            type_name: container.type_name(),
                        });
                    }
                    let got = container.length().unwrap_or(0);
                    if got != want {
                        return Err(VmError::UnpackMismatch { got, want });
                    }
                    let mut iter =
                        ValueIter::for_value(&container).ok_or(VmError::NotIterable {
                            type_name: container.type_name(),
                        })?;
                    while let Some(value) = iter.next() {
                        self.stack.push(value);
                    }
                }

                // ===== Calls & returns =====
                Opcode::Call => {
                    let argc = self.fetch() as usize;
                    let mut args = vec![Value::Nil; argc];
                    for i in (0..argc).rev() {
                        args[i] = self.stack.pop();
                    }
                    let callee = self.stack.pop();
                    self.call_value(ctx, callee, args)?;
                }
                Opcode::Partial => {
                    let argc = self.fetch() as usize;
                    let mut args = vec![Value::Nil; argc];
                    for i in (0..argc).rev() {
                        args[i] = self.stack.pop();
                    }
                    let callee = self.stack.pop();
                    self.stack
                        .push(Value::Partial(Arc::new(Partial::new(callee, args))));
                }
                Opcode::ReturnValue => {
                    let (return_addr, return_sp) = {
                        let frame = &self.frames[self.fp];
                        (frame.return_addr, frame.return_sp)
                    };
                    if self.fp == 0 {
                        // Top-level return: fall through with the value on
                        // the stack
                        return Ok(());
                    }
                    let return_fp = self.fp - 1;
                    let ip = if return_addr == STOP_SIGNAL {
                        0
                    } else {
                        return_addr as usize
                    };
                    self.resume_frame(return_fp, ip, return_sp);
                    if return_addr == STOP_SIGNAL {
                        // The nested dispatcher invocation for this call
                        // is done
                        return Ok(());
                    }
                }

                // ===== Modules =====
                Opcode::Import => {
                    let name = match self.stack.pop() {
                        Value::String(name) => name,
                        other => {
                            return Err(VmError::NotString {
                                type_name: other.type_name(),
                            })
                        }
                    };
                    let module = self.load_module(ctx, &name)?;
                    self.stack.push(Value::Module(module));
                }
                Opcode::FromImport => {
                    let parent_len = self.fetch() as usize;
                    let imports_count = self.fetch();
                    if imports_count > MAX_ARGS as u16 {
                        return Err(VmError::InvalidImportsCount {
                            count: imports_count,
                        });
                    }
                    let mut names = Vec::with_capacity(imports_count as usize);
                    for _ in 0..imports_count {
                        match self.stack.pop() {
                            Value::String(name) => names.push(name.as_ref().clone()),
                            other => {
                                return Err(VmError::NotString {
                                    type_name: other.type_name(),
                                })
                            }
                        }
                    }
                    let mut from = vec![String::new(); parent_len];
                    for i in (0..parent_len).rev() {
                        match self.stack.pop() {
                            Value::String(segment) => from[i] = segment.as_ref().clone(),
                            other => {
                                return Err(VmError::NotString {
                                    type_name: other.type_name(),
                                })
                            }
                        }
                    }
                    let parent = from.join("/");
                    for name in &names {
                        // A name is either a submodule of the parent path
                        // or a symbol exported by the parent module
                        let submodule = if parent.is_empty() {
                            name.clone()
                        } else {
                            format!("{}/{}", parent, name)
                        };
                        match self.load_module(ctx, &submodule) {
                            Ok(module) => self.stack.push(Value::Module(module)),
                            Err(_) => {
                                let module = self.load_module(ctx, &parent)?;
                                match module.get_attr(name) {
                                    Some(value) => self.stack.push(value),
                                    None => {
                                        return Err(VmError::ImportNameNotFound {
                                            name: name.clone(),
                                            module: module.name().to_string(),
                                        })
                                    }
                                }
                            }
                        }
                    }
                }

                // ===== Concurrency =====
                Opcode::Go => {
                    let obj = self.stack.pop();
                    let partial = match obj {
                        Value::Partial(partial) => partial,
                        other => {
                            return Err(VmError::NotPartial {
                                type_name: other.type_name(),
                            })
                        }
                    };
                    self.spawn(ctx, partial.callee().clone(), partial.args().to_vec())?;
                }
                Opcode::Defer => {
                    let obj = self.stack.pop();
                    let partial = match obj {
                        Value::Partial(partial) => partial,
                        other => {
                            return Err(VmError::NotPartial {
                                type_name: other.type_name(),
                            })
                        }
                    };
                    self.frames[self.fp].push_defer(partial);
                }
                Opcode::Send => {
                    let value = self.stack.pop();
                    let channel = match self.stack.pop() {
                        Value::Chan(channel) => channel,
                        other => {
                            return Err(VmError::NotChannel {
                                type_name: other.type_name(),
                            })
                        }
                    };
                    channel.send(ctx, value)?;
                }
                Opcode::Receive => {
                    let channel = match self.stack.pop() {
                        Value::Chan(channel) => channel,
                        other => {
                            return Err(VmError::NotChannel {
                                type_name: other.type_name(),
                            })
                        }
                    };
                    let value = channel.recv(ctx)?;
                    self.stack.push(value);
                }

                // ===== Stack manipulation =====
                Opcode::PopTop => {
                    self.stack.pop();
                }
                Opcode::Swap => {
                    let offset = self.fetch() as usize;
                    self.stack.swap(offset);
                }
            }
        }
        Ok(())
    }

    // ===== Call protocol =====

    /// Dispatch a call against any callee shape, pushing the result
    fn call_value(&mut self, ctx: &Context, callee: Value, args: Vec<Value>) -> Result<(), VmError> {
        match callee {
            Value::Function(function) => {
                let result = self.call_function(ctx, &function, args)?;
                self.stack.push(result);
                Ok(())
            }
            Value::Partial(partial) => {
                let total = partial.args().len() + args.len();
                if total > MAX_ARGS {
                    return Err(VmError::TooManyArgs { count: total });
                }
                // Bound arguments come first, call-site arguments after
                let mut expanded = Vec::with_capacity(total);
                expanded.extend(partial.args().iter().cloned());
                expanded.extend(args);
                self.call_value(ctx, partial.callee().clone(), expanded)
            }
            Value::Builtin(builtin) => {
                let result = builtin.call(self, ctx, &args)?;
                if let Value::Error(err) = result {
                    return Err(VmError::Raised(err));
                }
                self.stack.push(result);
                Ok(())
            }
            other => Err(VmError::NotCallable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Call a compiled function, running its body in a nested dispatcher
    /// invocation. This is the host re-entry capability: builtins may call
    /// it through their `&mut Vm` parameter.
    pub fn call_function(
        &mut self,
        ctx: &Context,
        function: &Arc<Function>,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        let base_fp = self.fp;
        let base_ip = self.ip;
        let base_sp = self.stack.sp();

        let params = function.code().params().len();
        let argc = args.len();
        check_call_args(function, argc)?;

        // Frame locals: parameters first, then the function itself when
        // the function is named
        let mut locals = args;
        if argc < params {
            for idx in argc..params {
                locals.push(function.defaults()[idx].clone().unwrap_or(Value::Nil));
            }
        }
        if function.code().is_named() {
            locals.push(Value::Function(function.clone()));
        }

        self.activate_function(base_fp + 1, 0, function.clone(), locals);
        // The nested dispatcher invocation ends at ReturnValue
        self.frames[self.fp].return_addr = STOP_SIGNAL;

        let mut outcome = match self.eval(ctx) {
            Ok(()) => Ok(self.stack.pop()),
            Err(err) => Err(err),
        };

        // Fire defers in reverse registration order; the last failing
        // defer's error replaces the result
        let defers = self.frames[base_fp + 1].take_defers();
        for partial in defers.into_iter().rev() {
            match self.call_value(ctx, partial.callee().clone(), partial.args().to_vec()) {
                Ok(()) => {
                    self.stack.pop();
                }
                Err(err) => outcome = Err(err),
            }
        }

        self.restore_frame(base_fp, base_ip, base_sp);
        outcome
    }

    // ===== Module loader =====

    fn load_module(&mut self, ctx: &Context, name: &str) -> Result<Arc<Module>, VmError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        let importer = self
            .importer
            .clone()
            .ok_or(VmError::ImportsDisabled)?;
        debug!(module = name, "importing module");
        let module = importer.import(ctx, name)?;

        let base_fp = self.fp;
        let base_ip = self.ip;
        let base_sp = self.stack.sp();
        let loaded = self.registry.load(module.code(), &self.globals);
        self.activate_code(base_fp + 1, 0, loaded.clone());
        let result = self.eval(ctx);
        // Restore the caller's registers on every exit path
        self.restore_frame(base_fp, base_ip, base_sp);
        result?;

        module.use_globals(loaded.globals.clone());
        self.modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    // ===== Frame activation & teardown =====

    fn activate_code(&mut self, fp: usize, ip: usize, code: Arc<LoadedCode>) {
        self.frames[fp].activate_code(code.clone());
        self.fp = fp;
        self.ip = ip;
        self.active_code = Some(code);
    }

    fn activate_function(&mut self, fp: usize, ip: usize, function: Arc<Function>, locals: Vec<Value>) {
        let code = self.registry.load(function.code(), &self.globals);
        let return_addr = self.ip as isize;
        let return_sp = self.stack.sp();
        self.frames[fp].activate_function(function, code.clone(), return_addr, return_sp, locals);
        self.fp = fp;
        self.ip = ip;
        self.active_code = Some(code);
    }

    /// Restore a caller frame, keeping the returning frame's TOS as the
    /// single value above the caller's watermark
    fn resume_frame(&mut self, fp: usize, ip: usize, sp: isize) {
        let result = if self.stack.sp() > sp {
            Some(self.stack.pop())
        } else {
            None
        };
        self.stack.truncate(sp);
        if let Some(value) = result {
            self.stack.push(value);
        }
        self.restore_registers(fp, ip);
    }

    /// Restore a caller frame, discarding everything above its watermark
    fn restore_frame(&mut self, fp: usize, ip: usize, sp: isize) {
        self.stack.truncate(sp);
        self.restore_registers(fp, ip);
    }

    fn restore_registers(&mut self, fp: usize, ip: usize) {
        self.fp = fp;
        self.ip = ip;
        self.active_code = self.frames[fp].code.clone();
    }

    // ===== Cancellation =====

    /// Start a watcher that stores the halt flag when the context's
    /// cancellation signal fires. Dropping the returned sender stops the
    /// watcher.
    fn watch_cancellation(&self, ctx: &Context) -> Option<crossbeam_channel::Sender<()>> {
        let done = ctx.done()?.clone();
        let halt = self.halt.clone();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        thread::spawn(move || {
            crossbeam_channel::select! {
                recv(done) -> _ => {
                    halt.store(1, Ordering::Relaxed);
                    debug!("cancellation observed; halting");
                }
                recv(stop_rx) -> _ => {}
            }
        });
        Some(stop_tx)
    }

    // ===== Register access =====

    #[inline]
    fn active(&self) -> &Arc<LoadedCode> {
        self.active_code.as_ref().expect("no active code")
    }

    #[inline]
    fn instructions_len(&self) -> usize {
        self.active().code.instructions().len()
    }

    /// Fetch the next instruction word and advance the instruction pointer
    #[inline]
    fn fetch(&mut self) -> u16 {
        let word = self.active().code.instructions()[self.ip];
        self.ip += 1;
        word
    }
}

fn check_call_args(function: &Function, argc: usize) -> Result<(), VmError> {
    let params = function.code().params().len();
    let required = function.required_args_count();
    if argc > params || argc < required {
        return Err(VmError::ArityMismatch {
            params,
            given: argc,
        });
    }
    Ok(())
}

fn panic_detail(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run compiled code in a fresh VM and return the result
pub fn run_code(ctx: &Context, main: Arc<Code>) -> Result<Value, VmError> {
    Vm::new(main).run(ctx)
}
