//! Modules: named, lazily-evaluated code objects exposing their globals
//! as attributes

use crate::code::Code;
use crate::object::Value;
use crate::sync::{RwLock, Shared};
use std::fmt;
use std::sync::Arc;

pub struct Module {
    name: String,
    code: Arc<Code>,
    // Bound by the module loader once the module body has evaluated
    globals: RwLock<Option<Shared<Vec<Value>>>>,
}

impl Module {
    pub fn new(name: impl Into<String>, code: Arc<Code>) -> Self {
        Self {
            name: name.into(),
            code,
            globals: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    /// Bind the evaluated globals view. Called by the module loader after
    /// the module body ran to completion.
    pub fn use_globals(&self, globals: Shared<Vec<Value>>) {
        *self.globals.write() = Some(globals);
    }

    /// Look up an exported symbol by name
    pub fn get_attr(&self, name: &str) -> Option<Value> {
        let idx = self.code.global_index(name)?;
        let bound = self.globals.read();
        let globals = bound.as_ref()?;
        let value = globals.read().get(idx).cloned();
        value
    }

    /// Names of all symbols the module exports
    pub fn attr_names(&self) -> Vec<String> {
        (0..self.code.globals_count())
            .map(|i| self.code.global_name(i).to_string())
            .collect()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("name", &self.name).finish()
    }
}
