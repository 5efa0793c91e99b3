//! Fatal analysis errors.
//!
//! These abort the analysis of the current program. Recoverable findings
//! (wrong argument counts, missing attributes, ...) are not errors in this
//! sense; they go through [`crate::errorlog::ErrorReporter`].

use thiserror::Error;

use pyflow_bytecode::{BytecodeError, OpName};

use crate::config::ConfigError;
use crate::stubs::StubError;

/// An error that stops the interpreter.
#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
    /// The typegraph grew past the configured ceiling
    #[error("program too complex: cost {cost} exceeds limit {limit}")]
    ComplexityLimit { limit: u64, cost: u64 },

    /// Popped from an empty operand stack
    #[error("stack underflow at {opcode}: needed {needed}, have {have}")]
    StackUnderflow {
        opcode: String,
        needed: usize,
        have: usize,
    },

    /// An opcode the interpreter has no handler for
    #[error("unknown opcode {0}")]
    UnknownOpcode(OpName),

    /// An opcode reached the interpreter without its argument
    #[error("{0} is missing its argument")]
    MissingArgument(String),

    /// An argument indexed past the end of a code object table
    #[error("{table} index {index} out of range in {opcode}")]
    IndexOutOfRange {
        opcode: String,
        table: &'static str,
        index: usize,
    },

    /// Two states reaching the same instruction cannot be merged
    #[error("cannot merge states at instruction {index}: {reason}")]
    StateMismatch { index: usize, reason: String },

    /// `COMPARE_OP` with an argument outside the known comparisons
    #[error("invalid comparison operator {0}")]
    BadCompareOp(u32),

    /// An interpreter invariant did not hold
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Bytecode(#[from] BytecodeError),

    #[error(transparent)]
    Stub(#[from] StubError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AnalysisError {
    /// Whether the error is the complexity circuit breaker, which callers may
    /// answer by retrying with coarser settings.
    pub fn is_complexity_limit(&self) -> bool {
        matches!(self, AnalysisError::ComplexityLimit { .. })
    }

    /// Name the failing opcode in errors raised below the dispatcher.
    pub(crate) fn at_opcode(self, op: &str) -> Self {
        match self {
            AnalysisError::StackUnderflow {
                opcode,
                needed,
                have,
            } if opcode.is_empty() => AnalysisError::StackUnderflow {
                opcode: op.to_string(),
                needed,
                have,
            },
            AnalysisError::IndexOutOfRange {
                opcode,
                table,
                index,
            } if opcode.is_empty() => AnalysisError::IndexOutOfRange {
                opcode: op.to_string(),
                table,
                index,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_limit_message() {
        let err = AnalysisError::ComplexityLimit {
            limit: 10,
            cost: 12,
        };
        assert!(err.is_complexity_limit());
        assert_eq!(
            err.to_string(),
            "program too complex: cost 12 exceeds limit 10"
        );
    }

    #[test]
    fn test_at_opcode_fills_missing_name() {
        let err = AnalysisError::StackUnderflow {
            opcode: String::new(),
            needed: 2,
            have: 1,
        }
        .at_opcode("ROT_TWO");
        assert_eq!(err.to_string(), "stack underflow at ROT_TWO: needed 2, have 1");
        let named = AnalysisError::StackUnderflow {
            opcode: "POP_TOP".to_string(),
            needed: 1,
            have: 0,
        }
        .at_opcode("ROT_TWO");
        assert_eq!(named.to_string(), "stack underflow at POP_TOP: needed 1, have 0");
    }

    #[test]
    fn test_bytecode_errors_convert() {
        let err: AnalysisError = BytecodeError::EmptyCode {
            code: "f".to_string(),
        }
        .into();
        assert!(matches!(err, AnalysisError::Bytecode(_)));
        assert!(!err.is_complexity_limit());
    }
}
