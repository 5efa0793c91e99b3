//! Label-based assembler for code objects.
//!
//! Used by tests and embedders that want to hand the interpreter bytecode
//! without going through a real compiler. Jumps name a [`Label`]; `build()`
//! resolves labels to instruction indices and partitions the instruction
//! stream into basic blocks.
//!
//! ```
//! use pyflow_bytecode::{CodeBuilder, Constant, OpName};
//!
//! let mut b = CodeBuilder::module("example.py");
//! b.load_const(Constant::Int(1))
//!     .name_op(OpName::StoreName, "x")
//!     .load_const(Constant::None)
//!     .op(OpName::ReturnValue);
//! let code = b.build().unwrap();
//! assert_eq!(code.names, vec!["x".to_string()]);
//! ```

use std::collections::BTreeSet;

use crate::code::{flags, Block, CodeObject, Constant};
use crate::error::BytecodeError;
use crate::opcode::{OpName, Opcode};

/// A jump destination that is bound to an instruction later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Clone)]
struct PendingOp {
    name: OpName,
    arg: Option<u32>,
    line: u32,
    label: Option<Label>,
}

/// Incremental builder for a [`CodeObject`].
#[derive(Debug, Clone)]
pub struct CodeBuilder {
    code: CodeObject,
    ops: Vec<PendingOp>,
    labels: Vec<Option<usize>>,
    line: u32,
}

impl CodeBuilder {
    fn empty(name: &str) -> Self {
        Self {
            code: CodeObject {
                name: name.to_string(),
                filename: String::new(),
                first_line: 1,
                arg_count: 0,
                kwonly_arg_count: 0,
                flags: 0,
                varnames: Vec::new(),
                names: Vec::new(),
                consts: Vec::new(),
                cellvars: Vec::new(),
                freevars: Vec::new(),
                blocks: Vec::new(),
            },
            ops: Vec::new(),
            labels: Vec::new(),
            line: 1,
        }
    }

    /// Top-level module code. Locals and globals are the same namespace.
    pub fn module(filename: &str) -> Self {
        let mut b = Self::empty("<module>");
        b.code.filename = filename.to_string();
        b
    }

    /// Function body with the given positional parameters.
    pub fn function(name: &str, params: &[&str]) -> Self {
        let mut b = Self::empty(name);
        b.code.flags = flags::OPTIMIZED | flags::NEWLOCALS;
        b.code.arg_count = params.len();
        b.code.varnames = params.iter().map(|p| p.to_string()).collect();
        b
    }

    /// Class body code (Python 2 style: ends with `LOAD_LOCALS`).
    pub fn class_body(name: &str) -> Self {
        let mut b = Self::empty(name);
        b.code.flags = flags::NEWLOCALS;
        b
    }

    pub fn filename(mut self, filename: &str) -> Self {
        self.code.filename = filename.to_string();
        self
    }

    pub fn first_line(mut self, line: u32) -> Self {
        self.code.first_line = line;
        self.line = line;
        self
    }

    pub fn flag(mut self, flag: u32) -> Self {
        self.code.flags |= flag;
        self
    }

    /// Keyword-only parameters. Must be declared before `varargs`/`varkw`.
    pub fn kwonly(mut self, names: &[&str]) -> Self {
        self.code.kwonly_arg_count += names.len();
        self.code.varnames.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// A `*args` parameter. Must be declared before `varkw`.
    pub fn varargs(mut self, name: &str) -> Self {
        self.code.flags |= flags::VARARGS;
        self.code.varnames.push(name.to_string());
        self
    }

    /// A `**kwargs` parameter.
    pub fn varkw(mut self, name: &str) -> Self {
        self.code.flags |= flags::VARKEYWORDS;
        self.code.varnames.push(name.to_string());
        self
    }

    pub fn cellvars(mut self, names: &[&str]) -> Self {
        self.code.cellvars = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn freevars(mut self, names: &[&str]) -> Self {
        self.code.freevars = names.iter().map(|n| n.to_string()).collect();
        self.code.flags |= flags::NESTED;
        self
    }

    /// Source line attached to the instructions emitted from now on.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    fn push(&mut self, name: OpName, arg: Option<u32>, label: Option<Label>) -> &mut Self {
        self.ops.push(PendingOp {
            name,
            arg,
            line: self.line,
            label,
        });
        self
    }

    /// Emit an instruction without an argument.
    pub fn op(&mut self, name: OpName) -> &mut Self {
        self.push(name, None, None)
    }

    /// Emit an instruction with a raw integer argument.
    pub fn op_arg(&mut self, name: OpName, arg: u32) -> &mut Self {
        self.push(name, Some(arg), None)
    }

    /// Index of `constant` in `co_consts`, appending it if needed.
    pub fn const_index(&mut self, constant: Constant) -> u32 {
        let index = match self.code.consts.iter().position(|c| *c == constant) {
            Some(index) => index,
            None => {
                self.code.consts.push(constant);
                self.code.consts.len() - 1
            }
        };
        index as u32
    }

    pub fn load_const(&mut self, constant: Constant) -> &mut Self {
        let index = self.const_index(constant);
        self.op_arg(OpName::LoadConst, index)
    }

    /// Emit an instruction whose argument indexes `co_names`.
    pub fn name_op(&mut self, name: OpName, ident: &str) -> &mut Self {
        let index = intern(&mut self.code.names, ident);
        self.op_arg(name, index)
    }

    /// Emit an instruction whose argument indexes `co_varnames`.
    pub fn fast_op(&mut self, name: OpName, ident: &str) -> &mut Self {
        let index = intern(&mut self.code.varnames, ident);
        self.op_arg(name, index)
    }

    /// Emit an instruction whose argument indexes the cell and free
    /// variables.
    pub fn deref_op(&mut self, name: OpName, ident: &str) -> &mut Self {
        let index = match self.code.cellvars.iter().position(|c| c == ident) {
            Some(i) => i,
            None => match self.code.freevars.iter().position(|c| c == ident) {
                Some(i) => self.code.cellvars.len() + i,
                None => {
                    self.code.cellvars.push(ident.to_string());
                    self.code.cellvars.len() - 1
                }
            },
        };
        self.op_arg(name, index as u32)
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Emit a jump (or handler setup) targeting `label`.
    pub fn jump(&mut self, name: OpName, label: Label) -> &mut Self {
        self.push(name, Some(0), Some(label))
    }

    /// Bind `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.ops.len());
        }
        self
    }

    /// Resolve labels, split into blocks and validate.
    pub fn build(self) -> Result<CodeObject, BytecodeError> {
        let CodeBuilder {
            mut code,
            ops,
            labels,
            ..
        } = self;
        let mut resolved = Vec::with_capacity(ops.len());
        for (index, pending) in ops.into_iter().enumerate() {
            let mut op = Opcode::new(index, pending.name, pending.arg, pending.line);
            if let Some(label) = pending.label {
                let target = labels
                    .get(label.0)
                    .copied()
                    .flatten()
                    .ok_or_else(|| BytecodeError::UnboundLabel {
                        code: code.name.clone(),
                        label: label.0,
                    })?;
                op.target = Some(target);
                op.arg = Some(target as u32);
            }
            resolved.push(op);
        }
        code.blocks = partition(resolved);
        code.validate()?;
        Ok(code)
    }
}

fn intern(table: &mut Vec<String>, ident: &str) -> u32 {
    let index = match table.iter().position(|n| n == ident) {
        Some(i) => i,
        None => {
            table.push(ident.to_string());
            table.len() - 1
        }
    };
    index as u32
}

/// Split a flat instruction stream into basic blocks.
///
/// A block starts at the first instruction, at every jump target, and after
/// every jump or terminator.
pub fn partition(ops: Vec<Opcode>) -> Vec<Block> {
    let mut leaders = BTreeSet::new();
    leaders.insert(0);
    for op in &ops {
        if let Some(target) = op.target {
            leaders.insert(target);
        }
        if op.name.has_target() || op.name.is_terminator() {
            leaders.insert(op.index + 1);
        }
    }

    let mut blocks: Vec<Block> = Vec::new();
    for op in ops {
        let starts_block = leaders.contains(&op.index) || blocks.is_empty();
        if starts_block {
            blocks.push(Block {
                id: blocks.len(),
                ops: Vec::new(),
            });
        }
        if let Some(block) = blocks.last_mut() {
            block.ops.push(op);
        }
    }
    blocks
}
