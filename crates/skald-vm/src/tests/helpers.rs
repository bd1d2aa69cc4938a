//! Shared helpers for the end-to-end tests

use crate::code::CodeBuilder;
use crate::context::Context;
use crate::error::VmError;
use crate::object::Value;
use crate::vm::Vm;

/// Assemble and run a program in a fresh VM with a plain context
pub fn run(builder: CodeBuilder) -> Result<Value, VmError> {
    Vm::new(builder.build()).run(&Context::new())
}

/// Like [`run`], asserting success
pub fn run_ok(builder: CodeBuilder) -> Value {
    run(builder).expect("program failed")
}

/// Like [`run`], asserting failure and returning the rendered error
pub fn run_err(builder: CodeBuilder) -> String {
    run(builder).expect_err("program succeeded").to_string()
}
