//! Container protocol: length, indexed access, slicing, membership
//!
//! Lists, maps, sets, and strings are containers. Protocol failures are
//! error values: the dispatcher decides whether they abort execution.

use crate::object::{ErrorValue, Value};

impl Value {
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Value::List(_) | Value::Map(_) | Value::Set(_) | Value::String(_)
        )
    }

    /// Container length. `None` for non-containers.
    pub fn length(&self) -> Option<i64> {
        match self {
            Value::List(items) => Some(items.read().len() as i64),
            Value::Map(entries) => Some(entries.read().len() as i64),
            Value::Set(members) => Some(members.read().len() as i64),
            Value::String(s) => Some(s.chars().count() as i64),
            _ => None,
        }
    }

    /// Indexed read. Lists and strings take integer indexes (negative
    /// counts from the end), maps take string keys.
    pub fn get_item(&self, index: &Value) -> Result<Value, ErrorValue> {
        match self {
            Value::List(items) => {
                let items = items.read();
                let idx = normalize_index(index, items.len(), "list")?;
                Ok(items[idx].clone())
            }
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = normalize_index(index, chars.len(), "string")?;
                Ok(Value::string(chars[idx].to_string()))
            }
            Value::Map(entries) => {
                let key = map_key(index)?;
                entries
                    .read()
                    .get(key)
                    .cloned()
                    .ok_or_else(|| ErrorValue::new(format!("key error: {:?}", key)))
            }
            Value::Set(_) => Err(ErrorValue::new(
                "type error: set does not support indexing",
            )),
            other => Err(ErrorValue::new(format!(
                "type error: object is not a container (got {})",
                other.type_name()
            ))),
        }
    }

    /// Indexed write. Strings and sets are immutable under this protocol.
    pub fn set_item(&self, index: &Value, value: Value) -> Result<(), ErrorValue> {
        match self {
            Value::List(items) => {
                let mut items = items.write();
                let len = items.len();
                let idx = normalize_index(index, len, "list")?;
                items[idx] = value;
                Ok(())
            }
            Value::Map(entries) => {
                let key = map_key(index)?;
                entries.write().insert(key.to_string(), value);
                Ok(())
            }
            Value::Set(_) => Err(ErrorValue::new(
                "type error: set does not support item assignment",
            )),
            Value::String(_) => Err(ErrorValue::new(
                "type error: string does not support item assignment",
            )),
            other => Err(ErrorValue::new(format!(
                "type error: object is not a container (got {})",
                other.type_name()
            ))),
        }
    }

    /// Half-open slice. Nil bounds default to the container ends;
    /// negative bounds count from the end.
    pub fn get_slice(&self, start: &Value, stop: &Value) -> Result<Value, ErrorValue> {
        match self {
            Value::List(items) => {
                let items = items.read();
                let (lo, hi) = slice_bounds(start, stop, items.len())?;
                Ok(Value::list(items[lo..hi].to_vec()))
            }
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (lo, hi) = slice_bounds(start, stop, chars.len())?;
                Ok(Value::string(chars[lo..hi].iter().collect::<String>()))
            }
            other => Err(ErrorValue::new(format!(
                "type error: {} does not support slice operations",
                other.type_name()
            ))),
        }
    }

    /// Membership test. Maps test keys, strings test substrings.
    pub fn contains(&self, item: &Value) -> Result<Value, ErrorValue> {
        match self {
            Value::List(items) => Ok(Value::Bool(items.read().iter().any(|v| v == item))),
            Value::Map(entries) => match item {
                Value::String(key) => Ok(Value::Bool(entries.read().contains_key(key.as_str()))),
                _ => Ok(Value::Bool(false)),
            },
            Value::Set(members) => match item.hash_key() {
                Ok(key) => Ok(Value::Bool(members.read().contains_key(&key))),
                Err(_) => Ok(Value::Bool(false)),
            },
            Value::String(s) => match item {
                Value::String(needle) => Ok(Value::Bool(s.contains(needle.as_str()))),
                _ => Ok(Value::Bool(false)),
            },
            other => Err(ErrorValue::new(format!(
                "type error: object is not a container (got {})",
                other.type_name()
            ))),
        }
    }
}

fn map_key(index: &Value) -> Result<&str, ErrorValue> {
    match index {
        Value::String(s) => Ok(s.as_str()),
        other => Err(ErrorValue::new(format!(
            "type error: map key must be a string (got {})",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize, container: &str) -> Result<usize, ErrorValue> {
    let idx = match index {
        Value::Int(i) => *i,
        other => {
            return Err(ErrorValue::new(format!(
                "type error: {} index must be an int (got {})",
                container,
                other.type_name()
            )))
        }
    };
    let adjusted = if idx < 0 { idx + len as i64 } else { idx };
    if adjusted < 0 || adjusted >= len as i64 {
        return Err(ErrorValue::new(format!(
            "index error: index out of range: {}",
            idx
        )));
    }
    Ok(adjusted as usize)
}

fn slice_bounds(start: &Value, stop: &Value, len: usize) -> Result<(usize, usize), ErrorValue> {
    let resolve = |bound: &Value, default: i64| -> Result<i64, ErrorValue> {
        match bound {
            Value::Nil => Ok(default),
            Value::Int(i) => Ok(if *i < 0 { *i + len as i64 } else { *i }),
            other => Err(ErrorValue::new(format!(
                "type error: slice index must be an int (got {})",
                other.type_name()
            ))),
        }
    };
    let lo = resolve(start, 0)?.clamp(0, len as i64);
    let hi = resolve(stop, len as i64)?.clamp(0, len as i64);
    if lo > hi {
        return Err(ErrorValue::new(
            "slice error: start index is greater than stop index",
        ));
    }
    Ok((lo as usize, hi as usize))
}
