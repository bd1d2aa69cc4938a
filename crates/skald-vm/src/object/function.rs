//! Callable values: compiled functions, partials, and host builtins

use crate::code::Code;
use crate::context::Context;
use crate::error::VmError;
use crate::object::{Cell, Value};
use crate::vm::Vm;
use std::fmt;
use std::sync::Arc;

/// A compiled function, optionally closed over free-variable cells.
///
/// A closure is not a separate kind: it is a `Function` whose `free`
/// vector is populated by `LoadClosure`.
#[derive(Debug)]
pub struct Function {
    code: Arc<Code>,
    free: Vec<Cell>,
}

impl Function {
    pub fn new(code: Arc<Code>) -> Self {
        Self {
            code,
            free: Vec::new(),
        }
    }

    /// Close the given function over a vector of free-variable cells
    pub fn closure(base: &Arc<Function>, free: Vec<Cell>) -> Arc<Function> {
        Arc::new(Self {
            code: base.code.clone(),
            free,
        })
    }

    pub fn name(&self) -> &str {
        self.code.name()
    }

    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    pub fn free_vars(&self) -> &[Cell] {
        &self.free
    }

    /// Defaults are index-aligned with parameters; `None` marks required
    pub fn defaults(&self) -> &[Option<Value>] {
        self.code.defaults()
    }

    /// Number of arguments that must be supplied at the call site
    pub fn required_args_count(&self) -> usize {
        self.code.defaults().iter().filter(|d| d.is_none()).count()
    }
}

/// A callable pre-bound to some arguments
#[derive(Debug)]
pub struct Partial {
    callee: Value,
    args: Vec<Value>,
}

impl Partial {
    pub fn new(callee: Value, args: Vec<Value>) -> Self {
        Self { callee, args }
    }

    pub fn callee(&self) -> &Value {
        &self.callee
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Signature of a host callable. The `&mut Vm` parameter is the host's
/// re-entry capability: builtins may call `Vm::call_function` or
/// `Vm::spawn` through it.
pub type BuiltinFn =
    Arc<dyn Fn(&mut Vm, &Context, &[Value]) -> Result<Value, VmError> + Send + Sync>;

/// A named host callable
#[derive(Clone)]
pub struct BuiltinFunction {
    name: String,
    func: BuiltinFn,
}

impl BuiltinFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Vm, &Context, &[Value]) -> Result<Value, VmError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, vm: &mut Vm, ctx: &Context, args: &[Value]) -> Result<Value, VmError> {
        (self.func)(vm, ctx, args)
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .finish()
    }
}
