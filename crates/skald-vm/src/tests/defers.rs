use crate::code::Code;
use crate::context::Context;
use crate::object::Value;
use crate::op::Opcode;
use crate::sync::{shared, Shared};
use crate::vm::Vm;
use crate::BuiltinFunction;
use std::sync::Arc;

fn recorder(log: Shared<Vec<Value>>) -> Value {
    Value::Builtin(Arc::new(BuiltinFunction::new(
        "record",
        move |_vm, _ctx, args| {
            log.write().push(args[0].clone());
            Ok(Value::Nil)
        },
    )))
}

#[test]
fn test_defers_fire_in_reverse_order() {
    let mut f = Code::builder("f");
    let a = f.constant(Value::string("a"));
    let b_const = f.constant(Value::string("b"));
    f.emit(Opcode::LoadGlobal, &[0]);
    f.emit(Opcode::LoadConst, &[a]);
    f.emit(Opcode::Partial, &[1]);
    f.emit(Opcode::Defer, &[]);
    f.emit(Opcode::LoadGlobal, &[0]);
    f.emit(Opcode::LoadConst, &[b_const]);
    f.emit(Opcode::Partial, &[1]);
    f.emit(Opcode::Defer, &[]);
    f.emit(Opcode::Nil, &[]);
    f.emit(Opcode::ReturnValue, &[]);

    let mut b = Code::builder("main");
    b.global("record");
    let f = b.function(f);
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::Call, &[0]);

    let log = shared(Vec::new());
    let mut vm = Vm::builder(b.build())
        .global("record", recorder(log.clone()))
        .build();
    vm.run(&Context::new()).unwrap();
    assert_eq!(
        log.read().clone(),
        vec![Value::string("b"), Value::string("a")]
    );
}

#[test]
fn test_defers_fire_when_the_function_errors() {
    let mut f = Code::builder("f");
    let a = f.constant(Value::string("a"));
    let one = f.constant(Value::Int(1));
    f.emit(Opcode::LoadGlobal, &[0]);
    f.emit(Opcode::LoadConst, &[a]);
    f.emit(Opcode::Partial, &[1]);
    f.emit(Opcode::Defer, &[]);
    // subscript an int: a type error aborts the body
    f.emit(Opcode::LoadConst, &[one]);
    f.emit(Opcode::LoadConst, &[one]);
    f.emit(Opcode::BinarySubscr, &[]);
    f.emit(Opcode::ReturnValue, &[]);

    let mut b = Code::builder("main");
    b.global("record");
    let f = b.function(f);
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::Call, &[0]);

    let log = shared(Vec::new());
    let mut vm = Vm::builder(b.build())
        .global("record", recorder(log.clone()))
        .build();
    let err = vm.run(&Context::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "type error: object is not a container (got int)"
    );
    assert_eq!(log.read().clone(), vec![Value::string("a")]);
}

#[test]
fn test_defer_error_supersedes_the_result() {
    let fail = Value::Builtin(Arc::new(BuiltinFunction::new("fail", |_vm, _ctx, _args| {
        Ok(Value::error("deferred boom"))
    })));

    let mut f = Code::builder("f");
    let one = f.constant(Value::Int(1));
    f.emit(Opcode::LoadGlobal, &[0]);
    f.emit(Opcode::Partial, &[0]);
    f.emit(Opcode::Defer, &[]);
    f.emit(Opcode::LoadConst, &[one]);
    f.emit(Opcode::ReturnValue, &[]);

    let mut b = Code::builder("main");
    b.global("fail");
    let f = b.function(f);
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::Call, &[0]);

    let mut vm = Vm::builder(b.build()).global("fail", fail).build();
    let err = vm.run(&Context::new()).unwrap_err();
    assert_eq!(err.to_string(), "deferred boom");
}

#[test]
fn test_defer_requires_a_partial() {
    let mut f = Code::builder("f");
    let one = f.constant(Value::Int(1));
    f.emit(Opcode::LoadConst, &[one]);
    f.emit(Opcode::Defer, &[]);
    f.emit(Opcode::Nil, &[]);
    f.emit(Opcode::ReturnValue, &[]);

    let mut b = Code::builder("main");
    let f = b.function(f);
    b.emit(Opcode::LoadConst, &[f]);
    b.emit(Opcode::Call, &[0]);

    let err = super::helpers::run_err(b);
    assert_eq!(err, "type error: object is not a partial (got int)");
}
