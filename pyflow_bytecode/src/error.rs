//! Bytecode loading and validation errors

use thiserror::Error;

use crate::opcode::OpName;

/// Errors raised while loading, assembling or validating bytecode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BytecodeError {
    /// The code object has no blocks at all
    #[error("code object '{code}' has no instructions")]
    EmptyCode { code: String },

    /// A block without instructions
    #[error("block {block} of '{code}' is empty")]
    EmptyBlock { code: String, block: usize },

    /// Instruction indices must count up from zero without gaps
    #[error("instruction {found} of '{code}' is out of sequence, expected {expected}")]
    NonSequentialIndex {
        code: String,
        expected: usize,
        found: usize,
    },

    /// An opcode that needs an argument was given none
    #[error("instruction {index} of '{code}' ({op}) is missing its argument")]
    MissingArgument {
        code: String,
        index: usize,
        op: OpName,
    },

    /// A jump that does not land on the first instruction of a block
    #[error("instruction {index} of '{code}' jumps to {target:?}, which does not start a block")]
    BadJumpTarget {
        code: String,
        index: usize,
        target: Option<usize>,
    },

    /// Argument indexes past the end of one of the code object's tables
    #[error("instruction {index} of '{code}' refers to {table}[{arg}] but the table has {len} entries")]
    IndexOutOfRange {
        code: String,
        index: usize,
        table: &'static str,
        arg: usize,
        len: usize,
    },

    /// A label used by the assembler was never bound
    #[error("label {label} in '{code}' was never bound")]
    UnboundLabel { code: String, label: usize },

    /// Malformed JSON input
    #[error("invalid bytecode JSON: {message}")]
    Json { message: String },
}

impl From<serde_json::Error> for BytecodeError {
    fn from(err: serde_json::Error) -> Self {
        BytecodeError::Json {
            message: err.to_string(),
        }
    }
}
