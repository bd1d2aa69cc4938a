//! Runtime values for the Skald VM
//!
//! One tagged sum covers every value shape the dispatcher can touch.
//! Payloads sit behind `Arc`/[`Shared`] so cloning a value is cheap and
//! the whole model is `Send + Sync`, which is what lets spawned worker
//! VMs share globals and modules by reference.

mod cell;
mod channel;
pub mod container;
mod function;
mod iterator;
mod module;
pub mod ops;
mod thread;

pub use cell::Cell;
pub use channel::Channel;
pub use function::{BuiltinFn, BuiltinFunction, Function, Partial};
pub use iterator::{IterEntry, ValueIter};
pub use module::Module;
pub use thread::ThreadHandle;

use crate::context::Context;
use crate::sync::{shared, Shared};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An error carried as a value. Distinct from [`crate::VmError`]: error
/// values flow along the operand stack until an instruction that cannot
/// tolerate them converts them into an execution failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    message: String,
}

impl ErrorValue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// An opaque host object participating in the attribute protocol
pub trait HostObject: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn get_attr(&self, name: &str) -> Option<Value>;

    fn set_attr(&self, name: &str, _value: Value) -> Result<(), ErrorValue> {
        Err(ErrorValue::new(format!(
            "attribute error: cannot set attribute {:?} on {} object",
            name,
            self.type_name()
        )))
    }
}

/// An attribute whose value is resolved lazily, at access time
pub trait AttrResolver: Send + Sync {
    fn resolve_attr(&self, ctx: &Context, name: &str) -> Result<Value, ErrorValue>;
}

/// Hashable projection of a value, used as the set member key. Ordered so
/// set iteration is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum HashKey {
    Nil,
    Bool(bool),
    Int(i64),
    Float(u64),
    String(String),
}

/// A Skald runtime value
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<String>),
    List(Shared<Vec<Value>>),
    Map(Shared<BTreeMap<String, Value>>),
    Set(Shared<BTreeMap<HashKey, Value>>),
    Error(Arc<ErrorValue>),
    Function(Arc<Function>),
    Partial(Arc<Partial>),
    Cell(Cell),
    Chan(Channel),
    Module(Arc<Module>),
    Thread(ThreadHandle),
    Builtin(Arc<BuiltinFunction>),
    Iterator(Shared<ValueIter>),
    Host(Arc<dyn HostObject>),
    Resolver(Arc<dyn AttrResolver>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Arc::new(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(shared(items))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Value {
        Value::Map(shared(entries))
    }

    pub fn error(message: impl Into<String>) -> Value {
        Value::Error(Arc::new(ErrorValue::new(message)))
    }

    /// The published type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Error(_) => "error",
            Value::Function(_) => "function",
            Value::Partial(_) => "partial",
            Value::Cell(_) => "cell",
            Value::Chan(_) => "chan",
            Value::Module(_) => "module",
            Value::Thread(_) => "thread",
            Value::Builtin(_) => "builtin",
            Value::Iterator(_) => "iterator",
            Value::Host(h) => h.type_name(),
            Value::Resolver(_) => "resolver",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.read().is_empty(),
            Value::Map(entries) => !entries.read().is_empty(),
            Value::Set(members) => !members.read().is_empty(),
            Value::Error(_) => false,
            _ => true,
        }
    }

    /// Hashable projection, or a type error value for unhashable shapes
    pub fn hash_key(&self) -> Result<HashKey, ErrorValue> {
        match self {
            Value::Nil => Ok(HashKey::Nil),
            Value::Bool(b) => Ok(HashKey::Bool(*b)),
            Value::Int(i) => Ok(HashKey::Int(*i)),
            Value::Float(f) => Ok(HashKey::Float(f.to_bits())),
            Value::String(s) => Ok(HashKey::String(s.as_ref().clone())),
            other => Err(ErrorValue::new(format!(
                "type error: unhashable type: {}",
                other.type_name()
            ))),
        }
    }

    /// Attribute lookup. `None` means the attribute does not exist; the
    /// dispatcher renders that as an execution error.
    pub fn get_attr(&self, name: &str) -> Option<Value> {
        match self {
            Value::Module(m) => m.get_attr(name),
            Value::Map(entries) => entries.read().get(name).cloned(),
            Value::Error(e) => match name {
                "message" => Some(Value::string(e.message())),
                _ => None,
            },
            Value::Host(h) => h.get_attr(name),
            _ => None,
        }
    }

    /// Attribute store. Failures are error values produced by the
    /// receiver's setter.
    pub fn set_attr(&self, name: &str, value: Value) -> Result<(), ErrorValue> {
        match self {
            Value::Map(entries) => {
                entries.write().insert(name.to_string(), value);
                Ok(())
            }
            Value::Module(_) => Err(ErrorValue::new(format!(
                "attribute error: cannot modify module attribute {:?}",
                name
            ))),
            Value::Host(h) => h.set_attr(name, value),
            other => Err(ErrorValue::new(format!(
                "attribute error: cannot set attribute {:?} on {} object",
                name,
                other.type_name()
            ))),
        }
    }

    /// Canonical source-like representation (strings are quoted)
    pub fn inspect(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => format!("{:?}", s.as_str()),
            Value::List(items) => {
                let parts: Vec<String> = items.read().iter().map(Value::inspect).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(entries) => {
                let parts: Vec<String> = entries
                    .read()
                    .iter()
                    .map(|(k, v)| format!("{:?}: {}", k, v.inspect()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(members) => {
                let parts: Vec<String> = members.read().values().map(Value::inspect).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Error(e) => format!("error({:?})", e.message()),
            Value::Function(f) => format!("func {}()", f.name()),
            Value::Partial(p) => format!("partial({})", p.callee().inspect()),
            Value::Cell(_) => "cell".to_string(),
            Value::Chan(_) => "chan".to_string(),
            Value::Module(m) => format!("module({})", m.name()),
            Value::Thread(_) => "thread".to_string(),
            Value::Builtin(b) => format!("builtin({})", b.name()),
            Value::Iterator(_) => "iterator".to_string(),
            Value::Host(h) => format!("<{}>", h.type_name()),
            Value::Resolver(_) => "resolver".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            other => f.write_str(&other.inspect()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self.inspect())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        ops::values_equal(self, other)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::string(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::list(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::map(v)
    }
}

impl From<Channel> for Value {
    fn from(v: Channel) -> Self {
        Value::Chan(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::string("x").is_truthy());
        assert!(Value::list(vec![Value::Nil]).is_truthy());
    }

    #[test]
    fn test_inspect() {
        assert_eq!(Value::Nil.inspect(), "nil");
        assert_eq!(Value::string("hi").inspect(), "\"hi\"");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::string("a")]).inspect(),
            "[1, \"a\"]"
        );
    }

    #[test]
    fn test_hash_key_rejects_mutable_shapes() {
        assert!(Value::Int(1).hash_key().is_ok());
        let err = Value::list(vec![]).hash_key().unwrap_err();
        assert_eq!(err.message(), "type error: unhashable type: list");
    }
}
