//! Module importers
//!
//! The VM resolves `Import`/`FromImport` through this seam. How a name
//! maps to compiled code is the embedder's business; [`MemoryImporter`]
//! covers embedding and testing with a preassembled name table.

use crate::code::Code;
use crate::context::Context;
use crate::error::VmError;
use crate::object::Module;
use std::collections::HashMap;
use std::sync::Arc;

pub trait Importer: Send + Sync {
    /// Resolve a module name to an unevaluated module
    fn import(&self, ctx: &Context, name: &str) -> Result<Arc<Module>, VmError>;
}

/// Importer over a fixed name → code table
#[derive(Default)]
pub struct MemoryImporter {
    modules: HashMap<String, Arc<Code>>,
}

impl MemoryImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, code: Arc<Code>) {
        self.modules.insert(name.into(), code);
    }

    pub fn with_module(mut self, name: impl Into<String>, code: Arc<Code>) -> Self {
        self.insert(name, code);
        self
    }
}

impl Importer for MemoryImporter {
    fn import(&self, _ctx: &Context, name: &str) -> Result<Arc<Module>, VmError> {
        match self.modules.get(name) {
            Some(code) => Ok(Arc::new(Module::new(name, code.clone()))),
            None => Err(VmError::ModuleNotFound {
                name: name.to_string(),
            }),
        }
    }
}
