//! Error types for the VM

use crate::object::ErrorValue;
use std::fmt;
use std::sync::Arc;

/// Execution errors surfaced by the VM.
///
/// Variants carry the data needed to render the canonical diagnostic for
/// each failure; the `Display` impl is the single source of wording.
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Receiver does not implement the call protocol
    NotCallable { type_name: &'static str },

    /// Receiver does not implement the container protocol
    NotContainer { type_name: &'static str },

    /// Receiver cannot produce an iterator
    NotIterable { type_name: &'static str },

    /// Unary negation on a non-numeric receiver
    NotNumber { type_name: &'static str },

    /// A string operand was required (map key, import name)
    NotString { type_name: &'static str },

    /// Send/Receive on a non-channel receiver
    NotChannel { type_name: &'static str },

    /// Go/Defer on a non-partial operand
    NotPartial { type_name: &'static str },

    /// Missing named attribute on a receiver
    AttributeNotFound {
        name: String,
        type_name: &'static str,
    },

    /// Wrong number of call arguments for a function signature
    ArityMismatch { params: usize, given: usize },

    /// Partial expansion exceeded the argument limit
    TooManyArgs { count: usize },

    /// Unpack over a container whose length does not match the bind count
    UnpackMismatch { got: i64, want: i64 },

    /// MakeCell referenced a caller frame that does not exist
    NoFrameAtDepth { depth: usize },

    /// LoadClosure popped something other than a cell
    ExpectedCell,

    /// ForIter with an unsupported name count
    InvalidIteration,

    /// FromImport with an out-of-range imports count
    InvalidImportsCount { count: u16 },

    /// Operator instruction with an unknown selector operand
    InvalidOperator { selector: u16 },

    /// Instruction stream contained an undefined opcode word
    UnknownOpcode { opcode: u16 },

    /// Import executed without an importer configured
    ImportsDisabled,

    /// Go executed on a VM built without concurrency
    ConcurrencyDisabled,

    /// Re-entrant `Vm::call` while the VM is running
    CallWhileRunning,

    /// FromImport name not resolvable as submodule or module attribute
    ImportNameNotFound { name: String, module: String },

    /// Importer could not resolve a module name
    ModuleNotFound { name: String },

    /// `Vm::get` with a name absent from the active globals
    GlobalNotFound { name: String },

    /// `Vm::get` before any code was activated
    NoActiveCode,

    /// The context was cancelled; carries the cancellation cause
    Cancelled { cause: String },

    /// An error value raised by user code or a host capability
    Raised(Arc<ErrorValue>),

    /// Unrecovered fault caught at the `run` boundary
    Panic { detail: String },
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::NotCallable { type_name } => {
                write!(f, "type error: object is not callable (got {})", type_name)
            }
            VmError::NotContainer { type_name } => {
                write!(
                    f,
                    "type error: object is not a container (got {})",
                    type_name
                )
            }
            VmError::NotIterable { type_name } => {
                write!(f, "type error: object is not iterable (got {})", type_name)
            }
            VmError::NotNumber { type_name } => {
                write!(f, "type error: object is not a number (got {})", type_name)
            }
            VmError::NotString { type_name } => {
                write!(f, "type error: object is not a string (got {})", type_name)
            }
            VmError::NotChannel { type_name } => {
                write!(f, "type error: object is not a channel (got {})", type_name)
            }
            VmError::NotPartial { type_name } => {
                write!(f, "type error: object is not a partial (got {})", type_name)
            }
            VmError::AttributeNotFound { name, type_name } => {
                write!(
                    f,
                    "exec error: attribute {:?} not found on {} object",
                    name, type_name
                )
            }
            VmError::ArityMismatch { params, given } => match params {
                0 => write!(f, "type error: function takes no arguments ({} given)", given),
                1 => write!(f, "type error: function takes 1 argument ({} given)", given),
                n => write!(
                    f,
                    "type error: function takes {} arguments ({} given)",
                    n, given
                ),
            },
            VmError::TooManyArgs { count } => {
                write!(
                    f,
                    "exec error: max arguments limit of {} exceeded (got {})",
                    crate::vm::MAX_ARGS,
                    count
                )
            }
            VmError::UnpackMismatch { got, want } => {
                write!(f, "exec error: unpack count mismatch: {} != {}", got, want)
            }
            VmError::NoFrameAtDepth { depth } => {
                write!(f, "exec error: no frame at depth {}", depth)
            }
            VmError::ExpectedCell => write!(f, "exec error: expected cell"),
            VmError::InvalidIteration => write!(f, "exec error: invalid iteration"),
            VmError::InvalidImportsCount { count } => {
                write!(f, "exec error: invalid imports count: {}", count)
            }
            VmError::InvalidOperator { selector } => {
                write!(f, "exec error: invalid operator selector: {}", selector)
            }
            VmError::UnknownOpcode { opcode } => {
                write!(f, "exec error: unknown opcode: {}", opcode)
            }
            VmError::ImportsDisabled => write!(f, "exec error: imports are disabled"),
            VmError::ConcurrencyDisabled => {
                write!(f, "exec error: concurrency is disabled")
            }
            VmError::CallWhileRunning => {
                write!(
                    f,
                    "exec error: cannot call function while the vm is running"
                )
            }
            VmError::ImportNameNotFound { name, module } => {
                write!(
                    f,
                    "import error: cannot import name {:?} from {:?}",
                    name, module
                )
            }
            VmError::ModuleNotFound { name } => {
                write!(f, "import error: module {:?} not found", name)
            }
            VmError::GlobalNotFound { name } => {
                write!(f, "global with name {:?} not found", name)
            }
            VmError::NoActiveCode => write!(f, "no active code"),
            VmError::Cancelled { cause } => write!(f, "{}", cause),
            VmError::Raised(err) => write!(f, "{}", err),
            VmError::Panic { detail } => write!(f, "panic: {}", detail),
        }
    }
}

impl std::error::Error for VmError {}

impl From<ErrorValue> for VmError {
    fn from(err: ErrorValue) -> Self {
        VmError::Raised(Arc::new(err))
    }
}

impl From<Arc<ErrorValue>> for VmError {
    fn from(err: Arc<ErrorValue>) -> Self {
        VmError::Raised(err)
    }
}
