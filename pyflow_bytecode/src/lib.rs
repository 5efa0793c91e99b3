//! Decoded Python bytecode.
//!
//! This crate is the boundary between a bytecode decoder and the pyflow
//! interpreter: code objects whose instructions are already partitioned
//! into basic blocks, with jump targets resolved to instruction indices.
//!
//! # Module structure
//!
//! - `opcode`: opcode names and single instructions
//! - `code`: code objects, constants and blocks, plus validation
//! - `builder`: label-based assembler used by tests and embedders
//! - `error`: loading and validation errors

pub mod builder;
pub mod code;
pub mod error;
pub mod opcode;

pub use builder::{partition, CodeBuilder, Label};
pub use code::{flags, Block, CodeObject, Constant};
pub use error::BytecodeError;
pub use opcode::{compare, OpName, Opcode};

/// Load a pre-decoded code object from JSON and validate it.
pub fn load_code_json(json: &str) -> Result<CodeObject, BytecodeError> {
    let code: CodeObject = serde_json::from_str(json)?;
    code.validate()?;
    Ok(code)
}

/// Serialize a code object to pretty-printed JSON.
pub fn code_to_json(code: &CodeObject) -> Result<String, BytecodeError> {
    Ok(serde_json::to_string_pretty(code)?)
}
