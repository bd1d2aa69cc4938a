//! Skald Virtual Machine
//!
//! This crate implements the execution core of the Skald scripting
//! language: a stack-based bytecode virtual machine for an embedded,
//! dynamically-typed language with first-class functions, closures over
//! lexical cells, deferred calls, module imports, cooperative
//! cancellation, and channel-connected worker VMs.
//!
//! The compiler is a separate concern. The VM consumes immutable
//! [`Code`] objects; [`CodeBuilder`] is the assembly surface front-ends,
//! embedders, and tests use to produce them.
//!
//! # Modules
//!
//! - `op`: instruction set (16-bit opcode + inline operand words)
//! - `code`: compiled code objects and the builder
//! - `object`: runtime values and their capability protocols
//! - `vm`: registers, dispatcher, call protocol, modules, spawn
//! - `context`: cancellation signal and limits propagation
//! - `importer`: module name resolution seam
//!
//! # Example
//!
//! ```
//! use skald_vm::{Code, Context, Opcode, Value, Vm};
//! use skald_vm::op::BinaryOpType;
//!
//! let mut b = Code::builder("main");
//! let three = b.constant(Value::Int(3));
//! let four = b.constant(Value::Int(4));
//! b.emit(Opcode::LoadConst, &[three]);
//! b.emit(Opcode::LoadConst, &[four]);
//! b.emit(Opcode::BinaryOp, &[BinaryOpType::Add as u16]);
//!
//! let mut vm = Vm::new(b.build());
//! let result = vm.run(&Context::new()).unwrap();
//! assert_eq!(result, Value::Int(7));
//! ```

pub mod code;
pub mod context;
pub mod error;
pub mod importer;
pub mod limits;
pub mod object;
pub mod op;
pub mod sync;
pub mod vm;

pub use code::{Code, CodeBuilder};
pub use context::{CancelHandle, Context};
pub use error::VmError;
pub use importer::{Importer, MemoryImporter};
pub use limits::Limits;
pub use object::{
    AttrResolver, BuiltinFunction, Channel, ErrorValue, Function, HostObject, Module, Partial,
    ThreadHandle, Value,
};
pub use op::Opcode;
pub use vm::{run_code, Vm, VmBuilder, MAX_ARGS, MAX_FRAME_DEPTH, MAX_STACK_DEPTH};

#[cfg(test)]
mod tests;
