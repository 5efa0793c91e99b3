//! Code objects, constants and basic blocks.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BytecodeError;
use crate::opcode::{OpName, Opcode};

/// `co_flags` bits the interpreter looks at.
pub mod flags {
    pub const OPTIMIZED: u32 = 0x1;
    pub const NEWLOCALS: u32 = 0x2;
    pub const VARARGS: u32 = 0x4;
    pub const VARKEYWORDS: u32 = 0x8;
    pub const NESTED: u32 = 0x10;
    pub const GENERATOR: u32 = 0x20;
}

/// An entry of `co_consts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Str(String),
    Unicode(String),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<Constant>),
    Code(Arc<CodeObject>),
}

impl Constant {
    /// Python truthiness of the literal.
    pub fn truthy(&self) -> bool {
        match self {
            Constant::None => false,
            Constant::Bool(b) => *b,
            Constant::Int(i) => *i != 0,
            Constant::Float(f) => *f != 0.0,
            Constant::Complex(re, im) => *re != 0.0 || *im != 0.0,
            Constant::Str(s) | Constant::Unicode(s) => !s.is_empty(),
            Constant::Bytes(b) => !b.is_empty(),
            Constant::Ellipsis | Constant::Code(_) => true,
            Constant::Tuple(items) => !items.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) | Constant::Unicode(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(i) => Some(*i),
            Constant::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Whether the constant contains a nested code object.
    pub fn contains_code(&self) -> bool {
        match self {
            Constant::Code(_) => true,
            Constant::Tuple(items) => items.iter().any(Constant::contains_code),
            _ => false,
        }
    }
}

/// A maximal straight-line run of instructions. Control only enters at the
/// first instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: usize,
    pub ops: Vec<Opcode>,
}

impl Block {
    /// Index of the first instruction.
    pub fn start(&self) -> Option<usize> {
        self.ops.first().map(|op| op.index)
    }

    pub fn last(&self) -> Option<&Opcode> {
        self.ops.last()
    }
}

/// A decoded code object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub first_line: u32,
    #[serde(default)]
    pub arg_count: usize,
    #[serde(default)]
    pub kwonly_arg_count: usize,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub varnames: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub consts: Vec<Constant>,
    #[serde(default)]
    pub cellvars: Vec<String>,
    #[serde(default)]
    pub freevars: Vec<String>,
    pub blocks: Vec<Block>,
}

impl CodeObject {
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn is_generator(&self) -> bool {
        self.has_flag(flags::GENERATOR)
    }

    /// Names of the positional parameters.
    pub fn positional_params(&self) -> &[String] {
        let end = self.arg_count.min(self.varnames.len());
        &self.varnames[..end]
    }

    /// Names of the keyword-only parameters (Python 3).
    pub fn kwonly_params(&self) -> &[String] {
        let start = self.arg_count.min(self.varnames.len());
        let end = (self.arg_count + self.kwonly_arg_count).min(self.varnames.len());
        &self.varnames[start..end]
    }

    /// Name of the `*args` parameter, if the code takes one.
    pub fn varargs_name(&self) -> Option<&str> {
        if !self.has_flag(flags::VARARGS) {
            return None;
        }
        self.varnames
            .get(self.arg_count + self.kwonly_arg_count)
            .map(String::as_str)
    }

    /// Name of the `**kwargs` parameter, if the code takes one.
    pub fn varkw_name(&self) -> Option<&str> {
        if !self.has_flag(flags::VARKEYWORDS) {
            return None;
        }
        let mut index = self.arg_count + self.kwonly_arg_count;
        if self.has_flag(flags::VARARGS) {
            index += 1;
        }
        self.varnames.get(index).map(String::as_str)
    }

    /// Name of cell or free variable `index` (`co_cellvars + co_freevars`).
    pub fn cell_name(&self, index: usize) -> Option<&str> {
        if index < self.cellvars.len() {
            self.cellvars.get(index).map(String::as_str)
        } else {
            self.freevars
                .get(index - self.cellvars.len())
                .map(String::as_str)
        }
    }

    pub fn first_op(&self) -> Option<&Opcode> {
        self.blocks.first().and_then(|b| b.ops.first())
    }

    pub fn ops(&self) -> impl Iterator<Item = &Opcode> {
        self.blocks.iter().flat_map(|b| b.ops.iter())
    }

    /// Check the structural invariants the interpreter relies on, recursing
    /// into nested code objects.
    pub fn validate(&self) -> Result<(), BytecodeError> {
        if self.blocks.is_empty() {
            return Err(BytecodeError::EmptyCode {
                code: self.name.clone(),
            });
        }
        let mut starts = HashSet::new();
        for block in &self.blocks {
            match block.start() {
                Some(start) => {
                    starts.insert(start);
                }
                None => {
                    return Err(BytecodeError::EmptyBlock {
                        code: self.name.clone(),
                        block: block.id,
                    })
                }
            }
        }

        let cell_count = self.cellvars.len() + self.freevars.len();
        for (expected, op) in self.ops().enumerate() {
            if op.index != expected {
                return Err(BytecodeError::NonSequentialIndex {
                    code: self.name.clone(),
                    expected,
                    found: op.index,
                });
            }
            if op.name.has_arg() && op.arg.is_none() {
                return Err(BytecodeError::MissingArgument {
                    code: self.name.clone(),
                    index: op.index,
                    op: op.name,
                });
            }
            if op.name.has_target() {
                match op.target {
                    Some(target) if starts.contains(&target) => {}
                    target => {
                        return Err(BytecodeError::BadJumpTarget {
                            code: self.name.clone(),
                            index: op.index,
                            target,
                        })
                    }
                }
            }
            let arg = op.arg.unwrap_or(0) as usize;
            let limit = if op.name.uses_name() {
                Some(("names", self.names.len()))
            } else if op.name.uses_local() {
                Some(("varnames", self.varnames.len()))
            } else if op.name.uses_const() {
                Some(("consts", self.consts.len()))
            } else if op.name.uses_free() {
                Some(("cells", cell_count))
            } else {
                None
            };
            if let Some((table, len)) = limit {
                if arg >= len {
                    return Err(BytecodeError::IndexOutOfRange {
                        code: self.name.clone(),
                        index: op.index,
                        table,
                        arg,
                        len,
                    });
                }
            }
        }

        for constant in &self.consts {
            validate_nested(constant)?;
        }
        Ok(())
    }

    /// The block whose first instruction is `index`.
    pub fn block_starting_at(&self, index: usize) -> Option<&Block> {
        self.blocks.iter().find(|b| b.start() == Some(index))
    }

    pub fn op_at(&self, index: usize) -> Option<&Opcode> {
        self.ops().find(|op| op.index == index)
    }

    pub fn count_ops(&self, name: OpName) -> usize {
        self.ops().filter(|op| op.name == name).count()
    }
}

fn validate_nested(constant: &Constant) -> Result<(), BytecodeError> {
    match constant {
        Constant::Code(code) => code.validate(),
        Constant::Tuple(items) => items.iter().try_for_each(validate_nested),
        _ => Ok(()),
    }
}
