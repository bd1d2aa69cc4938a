//! Loaded code registry
//!
//! Compiled code is immutable; loading pairs it with the per-VM mutable
//! state: the globals vector. The registry memoizes by code identity so a
//! root and all of its children observe exactly one globals vector.

use crate::code::Code;
use crate::object::Value;
use crate::sync::{shared, Shared};
use std::collections::HashMap;
use std::sync::Arc;

/// A compiled code object bound to this VM's globals
#[derive(Debug)]
pub(crate) struct LoadedCode {
    pub code: Arc<Code>,
    pub globals: Shared<Vec<Value>>,
}

impl LoadedCode {
    fn root(code: Arc<Code>, input_globals: &HashMap<String, Value>) -> Self {
        let mut globals = vec![Value::Nil; code.globals_count()];
        for (idx, slot) in globals.iter_mut().enumerate() {
            if let Some(value) = input_globals.get(code.global_name(idx)) {
                *slot = value.clone();
            }
        }
        Self {
            code,
            globals: shared(globals),
        }
    }

    fn child(code: Arc<Code>, root: &LoadedCode) -> Self {
        Self {
            code,
            globals: root.globals.clone(),
        }
    }
}

/// Identity-keyed memo of loaded code
#[derive(Default)]
pub(crate) struct CodeRegistry {
    loaded: HashMap<usize, Arc<LoadedCode>>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    fn key(code: &Arc<Code>) -> usize {
        Arc::as_ptr(code) as usize
    }

    /// Load a code object, reusing the existing wrapper on identity.
    /// Roots allocate a fresh globals vector pre-populated from the input
    /// globals; children share their root's vector.
    pub fn load(
        &mut self,
        code: &Arc<Code>,
        input_globals: &HashMap<String, Value>,
    ) -> Arc<LoadedCode> {
        if let Some(loaded) = self.loaded.get(&Self::key(code)) {
            return loaded.clone();
        }
        let root = Code::root_of(code);
        let loaded = if Arc::ptr_eq(&root, code) {
            Arc::new(LoadedCode::root(code.clone(), input_globals))
        } else {
            let root_loaded = self.load(&root, input_globals);
            Arc::new(LoadedCode::child(code.clone(), &root_loaded))
        };
        self.loaded.insert(Self::key(code), loaded.clone());
        loaded
    }

    /// Reload main, preserving the contents of its previous globals
    /// vector. Every other loaded wrapper is discarded.
    pub fn reload(
        &mut self,
        main: &Arc<Code>,
        input_globals: &HashMap<String, Value>,
    ) -> Arc<LoadedCode> {
        let previous = self.loaded.get(&Self::key(main)).cloned();
        self.loaded.clear();
        let fresh = self.load(main, input_globals);
        if let Some(previous) = previous {
            let old = previous.globals.read();
            let mut new = fresh.globals.write();
            let n = old.len().min(new.len());
            new[..n].clone_from_slice(&old[..n]);
        }
        fresh
    }

    /// Shallow snapshot for VM cloning: the wrappers (and so the globals
    /// vectors) are shared with the clone.
    pub fn snapshot(&self) -> CodeRegistry {
        CodeRegistry {
            loaded: self.loaded.clone(),
        }
    }
}
