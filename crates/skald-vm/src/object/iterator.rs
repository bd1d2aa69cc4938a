//! Iterator values
//!
//! Every iterator yields (key, value) entries: lists and strings key by
//! position, maps by key, sets by member. `next` returns the primary
//! element (the one `Unpack` pushes) and caches the full entry for
//! `ForIter`'s one- and two-name shapes.

use crate::object::Value;
use crate::sync::Shared;

#[derive(Debug, Clone)]
pub struct IterEntry {
    pub key: Value,
    pub value: Value,
}

#[derive(Debug)]
pub enum ValueIter {
    List {
        items: Shared<Vec<Value>>,
        pos: usize,
        entry: Option<IterEntry>,
    },
    Map {
        // Snapshot of the entries at iterator creation, in key order
        entries: Vec<(String, Value)>,
        pos: usize,
        entry: Option<IterEntry>,
    },
    Set {
        members: Vec<Value>,
        pos: usize,
        entry: Option<IterEntry>,
    },
    Str {
        chars: Vec<char>,
        pos: usize,
        entry: Option<IterEntry>,
    },
}

impl ValueIter {
    /// Build an iterator for an iterable value. `None` when the value is
    /// not iterable.
    pub fn for_value(value: &Value) -> Option<ValueIter> {
        match value {
            Value::List(items) => Some(ValueIter::List {
                items: items.clone(),
                pos: 0,
                entry: None,
            }),
            Value::Map(entries) => Some(ValueIter::Map {
                entries: entries
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                pos: 0,
                entry: None,
            }),
            Value::Set(members) => Some(ValueIter::Set {
                members: members.read().values().cloned().collect(),
                pos: 0,
                entry: None,
            }),
            Value::String(s) => Some(ValueIter::Str {
                chars: s.chars().collect(),
                pos: 0,
                entry: None,
            }),
            _ => None,
        }
    }

    /// Advance and return the primary element, or `None` at the end
    pub fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::List { items, pos, entry } => {
                let item = items.read().get(*pos).cloned()?;
                *entry = Some(IterEntry {
                    key: Value::Int(*pos as i64),
                    value: item.clone(),
                });
                *pos += 1;
                Some(item)
            }
            ValueIter::Map { entries, pos, entry } => {
                let (k, v) = entries.get(*pos)?.clone();
                let key = Value::string(k);
                *entry = Some(IterEntry {
                    key: key.clone(),
                    value: v,
                });
                *pos += 1;
                Some(key)
            }
            ValueIter::Set { members, pos, entry } => {
                let member = members.get(*pos)?.clone();
                *entry = Some(IterEntry {
                    key: member.clone(),
                    value: member.clone(),
                });
                *pos += 1;
                Some(member)
            }
            ValueIter::Str { chars, pos, entry } => {
                let ch = *chars.get(*pos)?;
                let item = Value::string(ch.to_string());
                *entry = Some(IterEntry {
                    key: Value::Int(*pos as i64),
                    value: item.clone(),
                });
                *pos += 1;
                Some(item)
            }
        }
    }

    /// The entry produced by the most recent `next`
    pub fn entry(&self) -> Option<&IterEntry> {
        match self {
            ValueIter::List { entry, .. }
            | ValueIter::Map { entry, .. }
            | ValueIter::Set { entry, .. }
            | ValueIter::Str { entry, .. } => entry.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_list_iteration_keys_by_position() {
        let list = Value::list(vec![Value::Int(10), Value::Int(20)]);
        let mut iter = ValueIter::for_value(&list).unwrap();
        assert_eq!(iter.next(), Some(Value::Int(10)));
        let entry = iter.entry().unwrap();
        assert_eq!(entry.key, Value::Int(0));
        assert_eq!(entry.value, Value::Int(10));
        assert_eq!(iter.next(), Some(Value::Int(20)));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_map_iteration_is_key_ordered() {
        let mut entries = BTreeMap::new();
        entries.insert("b".to_string(), Value::Int(2));
        entries.insert("a".to_string(), Value::Int(1));
        let map = Value::map(entries);
        let mut iter = ValueIter::for_value(&map).unwrap();
        assert_eq!(iter.next(), Some(Value::string("a")));
        assert_eq!(iter.entry().unwrap().value, Value::Int(1));
        assert_eq!(iter.next(), Some(Value::string("b")));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_string_iteration_yields_chars() {
        let s = Value::string("ok");
        let mut iter = ValueIter::for_value(&s).unwrap();
        assert_eq!(iter.next(), Some(Value::string("o")));
        assert_eq!(iter.next(), Some(Value::string("k")));
        assert_eq!(iter.next(), None);
    }
}
