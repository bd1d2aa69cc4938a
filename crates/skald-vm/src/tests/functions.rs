use super::helpers::{run_err, run_ok};
use crate::code::{Code, CodeBuilder};
use crate::context::Context;
use crate::object::Value;
use crate::op::{BinaryOpType, Opcode};
use crate::vm::Vm;
use crate::BuiltinFunction;
use std::sync::Arc;

fn add_fn() -> CodeBuilder {
    let mut f = Code::builder("add");
    let a = f.param("a");
    let b = f.param("b");
    f.emit(Opcode::LoadFast, &[a]);
    f.emit(Opcode::LoadFast, &[b]);
    f.emit(Opcode::BinaryOp, &[BinaryOpType::Add as u16]);
    f.emit(Opcode::ReturnValue, &[]);
    f
}

#[test]
fn test_call_function() {
    let mut b = Code::builder("main");
    let f = b.function(add_fn());
    let three = b.constant(Value::Int(3));
    let four = b.constant(Value::Int(4));
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::LoadConst, &[three]);
    b.emit(Opcode::LoadConst, &[four]);
    b.emit(Opcode::Call, &[2]);
    assert_eq!(run_ok(b), Value::Int(7));
}

#[test]
fn test_call_leaves_a_balanced_stack() {
    let mut b = Code::builder("main");
    let f = b.function(add_fn());
    let one = b.constant(Value::Int(1));
    let two = b.constant(Value::Int(2));
    // A sentinel below the call; the call must leave exactly one result
    b.emit(Opcode::LoadConst, &[one]);
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::LoadConst, &[one]);
    b.emit(Opcode::LoadConst, &[two]);
    b.emit(Opcode::Call, &[2]);
    b.emit(Opcode::BinaryOp, &[BinaryOpType::Add as u16]);
    assert_eq!(run_ok(b), Value::Int(4));
}

#[test]
fn test_default_arguments_fill_missing() {
    let mut f = Code::builder("add");
    let a = f.param("a");
    let b_slot = f.param_with_default("b", Value::Int(10));
    f.emit(Opcode::LoadFast, &[a]);
    f.emit(Opcode::LoadFast, &[b_slot]);
    f.emit(Opcode::BinaryOp, &[BinaryOpType::Add as u16]);
    f.emit(Opcode::ReturnValue, &[]);

    let mut b = Code::builder("main");
    let f = b.function(f);
    let three = b.constant(Value::Int(3));
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::LoadConst, &[three]);
    b.emit(Opcode::Call, &[1]);
    assert_eq!(run_ok(b), Value::Int(13));
}

#[test]
fn test_arity_errors() {
    let mut b = Code::builder("main");
    let f = b.function(add_fn());
    let one = b.constant(Value::Int(1));
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::LoadConst, &[one]);
    b.emit(Opcode::Call, &[1]);
    assert_eq!(run_err(b), "type error: function takes 2 arguments (1 given)");

    let mut nullary = Code::builder("nullary");
    nullary.emit(Opcode::Nil, &[]);
    nullary.emit(Opcode::ReturnValue, &[]);
    let mut b = Code::builder("main");
    let f = b.function(nullary);
    let one = b.constant(Value::Int(1));
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::LoadConst, &[one]);
    b.emit(Opcode::Call, &[1]);
    assert_eq!(run_err(b), "type error: function takes no arguments (1 given)");

    let mut unary = Code::builder("unary");
    unary.param("a");
    unary.emit(Opcode::Nil, &[]);
    unary.emit(Opcode::ReturnValue, &[]);
    let mut b = Code::builder("main");
    let f = b.function(unary);
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::Call, &[0]);
    assert_eq!(run_err(b), "type error: function takes 1 argument (0 given)");
}

#[test]
fn test_named_function_recursion() {
    // sum(n) = n + sum(n - 1), with sum(0) = 0
    let mut f = Code::builder("sum");
    let n = f.param("n");
    let self_slot = f.named();
    let one = f.constant(Value::Int(1));
    let zero = f.constant(Value::Int(0));
    f.emit(Opcode::LoadFast, &[n]); // 0
    f.emit(Opcode::PopJumpForwardIfFalse, &[17]); // 2: to address 19
    f.emit(Opcode::LoadFast, &[n]); // 4
    f.emit(Opcode::LoadFast, &[self_slot]); // 6
    f.emit(Opcode::LoadFast, &[n]); // 8
    f.emit(Opcode::LoadConst, &[one]); // 10
    f.emit(Opcode::BinaryOp, &[BinaryOpType::Subtract as u16]); // 12
    f.emit(Opcode::Call, &[1]); // 14
    f.emit(Opcode::BinaryOp, &[BinaryOpType::Add as u16]); // 16
    f.emit(Opcode::ReturnValue, &[]); // 18
    f.emit(Opcode::LoadConst, &[zero]); // 19
    f.emit(Opcode::ReturnValue, &[]); // 21

    let mut b = Code::builder("main");
    let f = b.function(f);
    let five = b.constant(Value::Int(5));
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::LoadConst, &[five]);
    b.emit(Opcode::Call, &[1]);
    assert_eq!(run_ok(b), Value::Int(15));
}

#[test]
fn test_partial_prepends_bound_arguments() {
    // sub(a, b) = a - b; partial binds a = 10, call supplies b = 3
    let mut f = Code::builder("sub");
    let a = f.param("a");
    let b_slot = f.param("b");
    f.emit(Opcode::LoadFast, &[a]);
    f.emit(Opcode::LoadFast, &[b_slot]);
    f.emit(Opcode::BinaryOp, &[BinaryOpType::Subtract as u16]);
    f.emit(Opcode::ReturnValue, &[]);

    let mut b = Code::builder("main");
    let f = b.function(f);
    let ten = b.constant(Value::Int(10));
    let three = b.constant(Value::Int(3));
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::LoadConst, &[ten]);
    b.emit(Opcode::Partial, &[1]);
    b.emit(Opcode::LoadConst, &[three]);
    b.emit(Opcode::Call, &[1]);
    assert_eq!(run_ok(b), Value::Int(7));
}

#[test]
fn test_partial_expansion_respects_max_args() {
    let mut f = Code::builder("variadic-ish");
    for i in 0..255 {
        f.param(format!("p{}", i));
    }
    f.emit(Opcode::Nil, &[]);
    f.emit(Opcode::ReturnValue, &[]);

    let mut b = Code::builder("main");
    let f = b.function(f);
    let one = b.constant(Value::Int(1));
    b.emit(Opcode::LoadConst, &[f]);
    for _ in 0..255 {
        b.emit(Opcode::LoadConst, &[one]);
    }
    b.emit(Opcode::Partial, &[255]);
    b.emit(Opcode::LoadConst, &[one]);
    b.emit(Opcode::Call, &[1]);
    assert_eq!(
        run_err(b),
        "exec error: max arguments limit of 255 exceeded (got 256)"
    );
}

#[test]
fn test_call_on_non_callable() {
    let mut b = Code::builder("main");
    let five = b.constant(Value::Int(5));
    b.emit(Opcode::LoadConst, &[five]);
    b.emit(Opcode::Call, &[0]);
    assert_eq!(run_err(b), "type error: object is not callable (got int)");
}

#[test]
fn test_builtin_call() {
    let double = BuiltinFunction::new("double", |_vm, _ctx, args| match &args[0] {
        Value::Int(n) => Ok(Value::Int(n * 2)),
        other => Ok(Value::error(format!(
            "type error: expected an int (got {})",
            other.type_name()
        ))),
    });
    let mut b = Code::builder("main");
    let g = b.global("double");
    let n = b.constant(Value::Int(21));
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::LoadConst, &[n]);
    b.emit(Opcode::Call, &[1]);

    let mut vm = Vm::builder(b.build())
        .global("double", Value::Builtin(Arc::new(double)))
        .build();
    assert_eq!(vm.run(&Context::new()).unwrap(), Value::Int(42));
}

#[test]
fn test_builtin_error_value_propagates() {
    let fail = BuiltinFunction::new("fail", |_vm, _ctx, _args| Ok(Value::error("boom")));
    let mut b = Code::builder("main");
    let g = b.global("fail");
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::Call, &[0]);

    let mut vm = Vm::builder(b.build())
        .global("fail", Value::Builtin(Arc::new(fail)))
        .build();
    let err = vm.run(&Context::new()).unwrap_err();
    assert_eq!(err.to_string(), "boom");
}
