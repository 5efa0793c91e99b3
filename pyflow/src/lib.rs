//! Whole-program abstract interpreter for Python bytecode.
//!
//! Code objects from `pyflow_bytecode` are executed over abstract values
//! instead of concrete ones. Every value an expression may take is recorded
//! as a binding in a provenance-tracked typegraph, so the types a name may
//! hold can be asked for at any point of the control-flow graph.

// The library reports through `ErrorReporter` and `tracing`, never stderr.
#![deny(clippy::print_stderr)]

// Graph core
pub mod typegraph;

// Abstract values and the constant converter
pub mod abstract_value;
pub mod convert;

// Frames and per-path state
pub mod frame;

// Interpreter driver
pub mod vm;

// Supporting modules
pub mod config;
pub mod error;
pub mod errorlog;
pub mod stubs;

// Rust API for programmatic use
pub mod api;
pub use api::{analyze_code, analyze_json, AnalysisReport};

pub use config::{AnalysisOptions, ConfigError};
pub use error::AnalysisError;
pub use errorlog::{ErrorKind, ErrorLog, ErrorRecord, ErrorReporter};
pub use typegraph::{BindingId, DataId, NodeId, Program, VariableId};
pub use vm::{FrameInfo, FunctionArgs, OpcodeProfile, ProgramResult, VirtualMachine};
