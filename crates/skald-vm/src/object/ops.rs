//! Binary and comparison operator evaluation
//!
//! Operator results are always values; failures come back as error
//! values and flow through the stack until an instruction rejects them.

use crate::object::Value;
use crate::op::{BinaryOpType, CompareOpType};
use crate::sync::Arc;

/// Evaluate a binary operator over two operands
pub fn binary_op(op: BinaryOpType, a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_op(op, *x, *y),
        (Value::Float(x), Value::Float(y)) => float_op(op, *x, *y, a, b),
        (Value::Int(x), Value::Float(y)) => float_op(op, *x as f64, *y, a, b),
        (Value::Float(x), Value::Int(y)) => float_op(op, *x, *y as f64, a, b),
        (Value::String(x), Value::String(y)) if op == BinaryOpType::Add => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Value::string(s)
        }
        (Value::List(x), Value::List(y)) if op == BinaryOpType::Add => {
            let mut items = x.read().clone();
            items.extend(y.read().iter().cloned());
            Value::list(items)
        }
        _ => unsupported(op, a, b),
    }
}

fn int_op(op: BinaryOpType, x: i64, y: i64) -> Value {
    match op {
        BinaryOpType::Add => Value::Int(x.wrapping_add(y)),
        BinaryOpType::Subtract => Value::Int(x.wrapping_sub(y)),
        BinaryOpType::Multiply => Value::Int(x.wrapping_mul(y)),
        BinaryOpType::Divide => {
            if y == 0 {
                Value::error("value error: division by zero")
            } else {
                Value::Int(x.wrapping_div(y))
            }
        }
        BinaryOpType::Modulo => {
            if y == 0 {
                Value::error("value error: division by zero")
            } else {
                Value::Int(x.wrapping_rem(y))
            }
        }
        BinaryOpType::Power => {
            if y >= 0 {
                Value::Int(x.wrapping_pow(y.min(u32::MAX as i64) as u32))
            } else {
                Value::Float((x as f64).powi(y as i32))
            }
        }
        BinaryOpType::LShift => Value::Int(x.wrapping_shl(y as u32)),
        BinaryOpType::RShift => Value::Int(x.wrapping_shr(y as u32)),
        BinaryOpType::BitwiseAnd => Value::Int(x & y),
        BinaryOpType::BitwiseOr => Value::Int(x | y),
        BinaryOpType::BitwiseXor => Value::Int(x ^ y),
    }
}

fn float_op(op: BinaryOpType, x: f64, y: f64, a: &Value, b: &Value) -> Value {
    match op {
        BinaryOpType::Add => Value::Float(x + y),
        BinaryOpType::Subtract => Value::Float(x - y),
        BinaryOpType::Multiply => Value::Float(x * y),
        BinaryOpType::Divide => {
            if y == 0.0 {
                Value::error("value error: division by zero")
            } else {
                Value::Float(x / y)
            }
        }
        BinaryOpType::Modulo => {
            if y == 0.0 {
                Value::error("value error: division by zero")
            } else {
                Value::Float(x % y)
            }
        }
        BinaryOpType::Power => Value::Float(x.powf(y)),
        _ => unsupported(op, a, b),
    }
}

fn unsupported(op: BinaryOpType, a: &Value, b: &Value) -> Value {
    Value::error(format!(
        "type error: unsupported operand types for {}: {} and {}",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

/// Evaluate a comparison over two operands
pub fn compare(op: CompareOpType, a: &Value, b: &Value) -> Value {
    match op {
        CompareOpType::Equal => Value::Bool(values_equal(a, b)),
        CompareOpType::NotEqual => Value::Bool(!values_equal(a, b)),
        _ => match ordering(a, b) {
            Some(ord) => Value::Bool(match op {
                CompareOpType::LessThan => ord.is_lt(),
                CompareOpType::LessThanOrEqual => ord.is_le(),
                CompareOpType::GreaterThan => ord.is_gt(),
                CompareOpType::GreaterThanOrEqual => ord.is_ge(),
                _ => unreachable!(),
            }),
            None => Value::error(format!(
                "type error: unsupported comparison between {} and {}",
                a.type_name(),
                b.type_name()
            )),
        },
    }
}

fn ordering(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Structural equality for data values, identity for opaque values.
/// Int and Float compare numerically across the two shapes.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let x = x.read();
            let y = y.read();
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let x = x.read();
            let y = y.read();
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        (Value::Set(x), Value::Set(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let x = x.read();
            let y = y.read();
            x.len() == y.len() && x.keys().zip(y.keys()).all(|(a, b)| a == b)
        }
        (Value::Error(x), Value::Error(y)) => x.message() == y.message(),
        (Value::Function(x), Value::Function(y)) => Arc::ptr_eq(x, y),
        (Value::Partial(x), Value::Partial(y)) => Arc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => Arc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Arc::ptr_eq(x, y),
        (Value::Cell(x), Value::Cell(y)) => x == y,
        (Value::Chan(x), Value::Chan(y)) => x == y,
        (Value::Thread(x), Value::Thread(y)) => x == y,
        (Value::Iterator(x), Value::Iterator(y)) => Arc::ptr_eq(x, y),
        (Value::Host(x), Value::Host(y)) => Arc::ptr_eq(x, y),
        (Value::Resolver(x), Value::Resolver(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}
