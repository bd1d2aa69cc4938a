use crate::code::Code;
use crate::context::Context;
use crate::limits::CostLimit;
use crate::object::{AttrResolver, ErrorValue, HostObject, Value};
use crate::op::{BinaryOpType, Opcode};
use crate::vm::Vm;
use crate::BuiltinFunction;
use std::sync::Arc;

#[test]
fn test_tos_and_ip_probes() {
    let mut b = Code::builder("main");
    let one = b.constant(Value::Int(1));
    b.emit(Opcode::LoadConst, &[one]);
    let mut vm = Vm::new(b.build());
    assert_eq!(vm.tos(), None);
    vm.run(&Context::new()).unwrap();
    assert_eq!(vm.tos(), Some(Value::Int(1)));
    let ip = vm.ip();
    vm.set_ip(0);
    assert_eq!(vm.ip(), 0);
    vm.set_ip(ip);
}

#[test]
fn test_instruction_offset_skips_a_prologue() {
    let mut b = Code::builder("main");
    let one = b.constant(Value::Int(1));
    let two = b.constant(Value::Int(2));
    b.emit(Opcode::LoadConst, &[one]); // 0: skipped by the offset
    b.emit(Opcode::LoadConst, &[two]); // 2
    let mut vm = Vm::builder(b.build()).instruction_offset(2).build();
    assert_eq!(vm.run(&Context::new()).unwrap(), Value::Int(2));
}

#[test]
fn test_get_and_global_names() {
    let mut b = Code::builder("main");
    let g = b.global("x");
    let seven = b.constant(Value::Int(7));
    b.emit(Opcode::LoadConst, &[seven]);
    b.emit(Opcode::StoreGlobal, &[g]);
    let mut vm = Vm::new(b.build());

    // Before any code is active there is nothing to read
    assert!(vm.get("x").is_err());

    vm.run(&Context::new()).unwrap();
    assert_eq!(vm.get("x").unwrap(), Value::Int(7));
    assert_eq!(
        vm.get("missing").unwrap_err().to_string(),
        "global with name \"missing\" not found"
    );
    assert_eq!(vm.global_names(), vec!["x".to_string()]);
}

#[test]
fn test_call_api() {
    let mut f = Code::builder("add");
    let a = f.param("a");
    let b_slot = f.param("b");
    f.emit(Opcode::LoadFast, &[a]);
    f.emit(Opcode::LoadFast, &[b_slot]);
    f.emit(Opcode::BinaryOp, &[BinaryOpType::Add as u16]);
    f.emit(Opcode::ReturnValue, &[]);

    let mut b = Code::builder("main");
    let f_idx = b.function(f);
    b.emit(Opcode::Nil, &[]);
    let code = b.build();
    let function = match &code.constants()[f_idx as usize] {
        Value::Function(function) => function.clone(),
        _ => unreachable!(),
    };

    let mut vm = Vm::new(code);
    let result = vm
        .call(&Context::new(), &function, &[Value::Int(2), Value::Int(3)])
        .unwrap();
    assert_eq!(result, Value::Int(5));
}

#[test]
fn test_call_is_refused_while_running() {
    // A builtin attempts to re-enter through Vm::call mid-run
    let mut f = Code::builder("f");
    f.emit(Opcode::Nil, &[]);
    f.emit(Opcode::ReturnValue, &[]);
    let standalone = Arc::new(crate::object::Function::new(f.build()));

    let probe = BuiltinFunction::new("probe", move |vm, ctx, _args| {
        match vm.call(ctx, &standalone, &[]) {
            Err(err) => Ok(Value::string(err.to_string())),
            Ok(_) => Ok(Value::string("unexpectedly allowed")),
        }
    });

    let mut b = Code::builder("main");
    let g = b.global("probe");
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::Call, &[0]);

    let mut vm = Vm::builder(b.build())
        .global("probe", Value::Builtin(Arc::new(probe)))
        .build();
    assert_eq!(
        vm.run(&Context::new()).unwrap(),
        Value::string("exec error: cannot call function while the vm is running")
    );
}

#[test]
fn test_builtin_reenters_through_call_function() {
    // The supported host re-entry path: Vm::call_function
    let mut f = Code::builder("triple");
    let x = f.param("x");
    let three = f.constant(Value::Int(3));
    f.emit(Opcode::LoadFast, &[x]);
    f.emit(Opcode::LoadConst, &[three]);
    f.emit(Opcode::BinaryOp, &[BinaryOpType::Multiply as u16]);
    f.emit(Opcode::ReturnValue, &[]);

    let apply = BuiltinFunction::new("apply", |vm, ctx, args| {
        let function = match &args[0] {
            Value::Function(function) => function.clone(),
            other => return Ok(Value::error(format!("not callable: {}", other.type_name()))),
        };
        vm.call_function(ctx, &function, vec![args[1].clone()])
    });

    let mut b = Code::builder("main");
    let g = b.global("apply");
    let f_idx = b.function(f);
    let seven = b.constant(Value::Int(7));
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::LoadConst, &[f_idx]);
    b.emit(Opcode::LoadConst, &[seven]);
    b.emit(Opcode::Call, &[2]);

    let mut vm = Vm::builder(b.build())
        .global("apply", Value::Builtin(Arc::new(apply)))
        .build();
    assert_eq!(vm.run(&Context::new()).unwrap(), Value::Int(21));
}

#[test]
fn test_clone_shares_globals() {
    let mut b = Code::builder("main");
    let g = b.global("x");
    let one = b.constant(Value::Int(1));
    b.emit(Opcode::LoadConst, &[one]);
    b.emit(Opcode::StoreGlobal, &[g]);
    let mut vm = Vm::new(b.build());
    vm.run(&Context::new()).unwrap();

    let clone = vm.clone_vm();
    assert_eq!(clone.get("x").unwrap(), Value::Int(1));
}

struct Point {
    x: i64,
}

impl HostObject for Point {
    fn type_name(&self) -> &'static str {
        "point"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "x" => Some(Value::Int(self.x)),
            _ => None,
        }
    }
}

#[test]
fn test_host_object_attribute_access() {
    let mut b = Code::builder("main");
    let g = b.global("p");
    let x = b.name("x");
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::LoadAttr, &[x]);

    let mut vm = Vm::builder(b.build())
        .global("p", Value::Host(Arc::new(Point { x: 9 })))
        .build();
    assert_eq!(vm.run(&Context::new()).unwrap(), Value::Int(9));
}

#[test]
fn test_missing_attribute_error() {
    let mut b = Code::builder("main");
    let g = b.global("p");
    let y = b.name("y");
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::LoadAttr, &[y]);

    let mut vm = Vm::builder(b.build())
        .global("p", Value::Host(Arc::new(Point { x: 9 })))
        .build();
    assert_eq!(
        vm.run(&Context::new()).unwrap_err().to_string(),
        "exec error: attribute \"y\" not found on point object"
    );
}

#[test]
fn test_store_attr_error_propagates() {
    let mut b = Code::builder("main");
    let g = b.global("p");
    let x = b.name("x");
    let one = b.constant(Value::Int(1));
    b.emit(Opcode::LoadConst, &[one]);
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::StoreAttr, &[x]);

    let mut vm = Vm::builder(b.build())
        .global("p", Value::Host(Arc::new(Point { x: 9 })))
        .build();
    assert_eq!(
        vm.run(&Context::new()).unwrap_err().to_string(),
        "attribute error: cannot set attribute \"x\" on point object"
    );
}

struct Lazy;

impl AttrResolver for Lazy {
    fn resolve_attr(&self, _ctx: &Context, name: &str) -> Result<Value, ErrorValue> {
        Ok(Value::string(format!("resolved:{}", name)))
    }
}

struct WithLazyAttr;

impl HostObject for WithLazyAttr {
    fn type_name(&self) -> &'static str {
        "lazy-holder"
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "field" => Some(Value::Resolver(Arc::new(Lazy))),
            _ => None,
        }
    }
}

#[test]
fn test_attr_resolver_binds_at_access_time() {
    let mut b = Code::builder("main");
    let g = b.global("h");
    let field = b.name("field");
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::LoadAttr, &[field]);

    let mut vm = Vm::builder(b.build())
        .global("h", Value::Host(Arc::new(WithLazyAttr)))
        .build();
    assert_eq!(
        vm.run(&Context::new()).unwrap(),
        Value::string("resolved:field")
    );
}

#[test]
fn test_limits_reach_host_callables_through_the_context() {
    let charge = BuiltinFunction::new("charge", |_vm, ctx, _args| {
        let limits = ctx.limits().expect("limits attached");
        match limits.track_cost(100) {
            Ok(()) => Ok(Value::Bool(true)),
            Err(err) => Ok(Value::Error(Arc::new(err))),
        }
    });

    let mut b = Code::builder("main");
    let g = b.global("charge");
    b.emit(Opcode::LoadGlobal, &[g]);
    b.emit(Opcode::Call, &[0]);

    let mut vm = Vm::builder(b.build())
        .global("charge", Value::Builtin(Arc::new(charge)))
        .limits(Arc::new(CostLimit::new(10)))
        .build();
    let err = vm.run(&Context::new()).unwrap_err();
    assert_eq!(err.to_string(), "limit error: cost budget exceeded");
}
