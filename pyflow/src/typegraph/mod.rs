//! Provenance-tracked control-flow graph.
//!
//! The [`Program`] is an arena of CFG nodes, variables and bindings. A
//! binding pairs a variable with one candidate value (an opaque [`DataId`])
//! and records, through its origins, where the value comes into existence
//! and which other bindings it depends on. Visibility queries
//! (`Program::bindings`) walk the graph backwards from a node to decide which
//! bindings of a variable can hold there.
//!
//! This module knows nothing about the interpreter. Values live in
//! `crate::abstract_value::ValueStore` and are referenced by id.

mod program;
mod solver;


pub use program::{
    Binding, BindingId, CfgNode, DataId, NodeId, Origin, Program, SourceSet, Variable, VariableId,
};
