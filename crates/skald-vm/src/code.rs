//! Compiled code objects
//!
//! A [`Code`] is the immutable unit the VM executes: a flat stream of 16-bit
//! instruction words, a constant pool, attribute-name and global symbol
//! tables, and a parameter descriptor when the code body is a function.
//! Code objects form a tree: function constants embed their own `Code`,
//! and every node keeps a backpointer to the tree's root so that all code
//! compiled from one unit shares the root's globals when loaded.
//!
//! The VM does not include a compiler. [`CodeBuilder`] is the assembly
//! surface used by front-ends, embedders, and the test suite.

use crate::object::{Function, Value};
use crate::op::Opcode;
use std::sync::{Arc, Weak};

/// Immutable compiled code
#[derive(Debug)]
pub struct Code {
    name: String,
    params: Vec<String>,
    defaults: Vec<Option<Value>>,
    named: bool,
    local_count: usize,
    instructions: Vec<u16>,
    constants: Vec<Value>,
    names: Vec<String>,
    globals: Vec<String>,
    root: Option<Weak<Code>>,
}

impl Code {
    pub fn builder(name: impl Into<String>) -> CodeBuilder {
        CodeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter names, in declaration order
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Default values, index-aligned with [`Code::params`]. `None` marks a
    /// required parameter.
    pub fn defaults(&self) -> &[Option<Value>] {
        &self.defaults
    }

    /// Whether the function stores its own value in the local slot after
    /// the last parameter (self-reference for recursion)
    pub fn is_named(&self) -> bool {
        self.named
    }

    /// Number of local slots a frame executing this code needs
    pub fn local_count(&self) -> usize {
        self.local_count
    }

    pub fn instructions(&self) -> &[u16] {
        &self.instructions
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Attribute name at the given names-table index
    pub fn name_at(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn globals_count(&self) -> usize {
        self.globals.len()
    }

    /// Global symbol name for the given globals slot
    pub fn global_name(&self, idx: usize) -> &str {
        &self.globals[idx]
    }

    /// Slot index of a global symbol, if declared
    pub fn global_index(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|g| g == name)
    }

    /// The root of this code's tree. Top-level code is its own root;
    /// function code resolves the backpointer installed at build time.
    pub fn root_of(code: &Arc<Code>) -> Arc<Code> {
        match &code.root {
            Some(weak) => weak.upgrade().expect("root code dropped"),
            None => code.clone(),
        }
    }
}

enum Constant {
    Value(Value),
    Function(Box<CodeBuilder>),
}

/// Assembles a [`Code`] tree
pub struct CodeBuilder {
    name: String,
    params: Vec<String>,
    defaults: Vec<Option<Value>>,
    named: bool,
    extra_locals: usize,
    instructions: Vec<u16>,
    constants: Vec<Constant>,
    names: Vec<String>,
    globals: Vec<String>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            defaults: Vec::new(),
            named: false,
            extra_locals: 0,
            instructions: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Declare a required parameter; returns its local slot
    pub fn param(&mut self, name: impl Into<String>) -> u16 {
        self.params.push(name.into());
        self.defaults.push(None);
        (self.params.len() - 1) as u16
    }

    /// Declare a parameter with a default value; returns its local slot.
    /// Defaults stay aligned with parameter positions by construction.
    pub fn param_with_default(&mut self, name: impl Into<String>, value: Value) -> u16 {
        self.params.push(name.into());
        self.defaults.push(Some(value));
        (self.params.len() - 1) as u16
    }

    /// Mark the function as named: its own value is bound to the local
    /// slot after the last parameter at call time. Returns that slot.
    pub fn named(&mut self) -> u16 {
        self.named = true;
        self.params.len() as u16
    }

    /// Reserve additional local slots beyond parameters; returns the index
    /// of the first reserved slot.
    pub fn locals(&mut self, count: usize) -> u16 {
        let first = self.params.len() + usize::from(self.named) + self.extra_locals;
        self.extra_locals += count;
        first as u16
    }

    /// Intern a constant; returns its pool index
    pub fn constant(&mut self, value: Value) -> u16 {
        self.constants.push(Constant::Value(value));
        (self.constants.len() - 1) as u16
    }

    /// Add a function constant assembled by a nested builder
    pub fn function(&mut self, builder: CodeBuilder) -> u16 {
        self.constants.push(Constant::Function(Box::new(builder)));
        (self.constants.len() - 1) as u16
    }

    /// Intern an attribute name; returns its names-table index
    pub fn name(&mut self, name: impl Into<String>) -> u16 {
        let name = name.into();
        if let Some(idx) = self.names.iter().position(|n| *n == name) {
            return idx as u16;
        }
        self.names.push(name);
        (self.names.len() - 1) as u16
    }

    /// Declare (or look up) a global symbol; returns its globals slot
    pub fn global(&mut self, name: impl Into<String>) -> u16 {
        let name = name.into();
        if let Some(idx) = self.globals.iter().position(|g| *g == name) {
            return idx as u16;
        }
        self.globals.push(name);
        (self.globals.len() - 1) as u16
    }

    /// Append an opcode and its inline operands; returns the opcode address
    pub fn emit(&mut self, op: Opcode, operands: &[u16]) -> usize {
        debug_assert_eq!(op.operand_count(), operands.len(), "{} operands", op.name());
        let at = self.instructions.len();
        self.instructions.push(op as u16);
        self.instructions.extend_from_slice(operands);
        at
    }

    /// Current instruction offset (the address the next emit will use)
    pub fn here(&self) -> usize {
        self.instructions.len()
    }

    /// Overwrite an instruction word, typically to patch a jump delta
    pub fn patch(&mut self, at: usize, word: u16) {
        self.instructions[at] = word;
    }

    /// Finish assembly. The produced code is the root of its tree; any
    /// function constants nested beneath it point back at it.
    pub fn build(self) -> Arc<Code> {
        Arc::new_cyclic(|root| {
            let root = root.clone();
            self.into_code(None, &root)
        })
    }

    fn into_code(self, root: Option<Weak<Code>>, tree_root: &Weak<Code>) -> Code {
        let local_count = self.params.len() + usize::from(self.named) + self.extra_locals;
        let constants = self
            .constants
            .into_iter()
            .map(|c| match c {
                Constant::Value(v) => v,
                Constant::Function(builder) => {
                    let code = Arc::new(builder.into_code(Some(tree_root.clone()), tree_root));
                    Value::Function(Arc::new(Function::new(code)))
                }
            })
            .collect();
        Code {
            name: self.name,
            params: self.params,
            defaults: self.defaults,
            named: self.named,
            local_count,
            instructions: self.instructions,
            constants,
            names: self.names,
            globals: self.globals,
            root,
        }
    }
}
