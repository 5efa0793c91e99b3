//! The abstract interpreter.
//!
//! [`VirtualMachine`] runs code objects block by block over abstract values,
//! recording every value in the typegraph. The opcode handlers live in
//! `exec/`; calls, attribute access and operators are split into their own
//! modules the same way.
//!
//! # Module structure
//!
//! - `run`: frame execution, state storage at jump targets, unwinding
//! - `exec`: one module per opcode family
//! - `call`: argument mapping and calls of every callable kind
//! - `native`: signature matching for library functions
//! - `attribute`: attribute lookup and assignment
//! - `operators`: dunder tables and operator dispatch
//! - `class_builder`: class creation and MRO computation
//! - `profiler`: opcode counters

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod attribute;
mod call;
pub(crate) mod class_builder;
mod exec;
mod native;
mod operators;
pub mod profiler;
mod run;


use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use pyflow_bytecode::{flags, CodeObject, Constant};

use crate::abstract_value::{AbstractValue, NamespaceId, ValueStore};
use crate::config::AnalysisOptions;
use crate::convert::Converter;
use crate::error::AnalysisError;
use crate::errorlog::{ErrorLog, ErrorRecord, ErrorReporter};
use crate::frame::Frame;
use crate::stubs::{self, StubTable};
use crate::typegraph::{BindingId, DataId, NodeId, Program, VariableId};

pub use call::FunctionArgs;
pub use profiler::OpcodeProfile;

/// Outcome of [`VirtualMachine::run_program`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramResult {
    /// Node after the module body.
    pub final_node: NodeId,
    /// The module's globals.
    pub exported_names: BTreeMap<String, VariableId>,
    /// Names that came from `entry_globals`.
    pub builtin_names: BTreeSet<String>,
}

/// A frame on the interpreter's call stack, for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    pub function: String,
    pub filename: String,
    pub line: u32,
}

pub struct VirtualMachine<E: ErrorReporter = ErrorLog> {
    pub(crate) options: AnalysisOptions,
    pub(crate) program: Program,
    pub(crate) values: ValueStore,
    pub(crate) convert: Converter,
    pub(crate) stubs: Arc<StubTable>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) root: NodeId,
    /// Where the next module starts: the root, or the end of the last prelude.
    entry: NodeId,
    builtins: NamespaceId,
    errorlog: E,
    current_node: Option<NodeId>,
    profile: OpcodeProfile,
}

impl<E: ErrorReporter> fmt::Debug for VirtualMachine<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("python_version", &self.options.python_version)
            .field("frames", &self.frames.len())
            .field("nodes", &self.program.nodes().len())
            .field("variables", &self.program.variable_count())
            .field("values", &self.values.len())
            .field("cost", &self.program.cost())
            .finish()
    }
}

impl VirtualMachine<ErrorLog> {
    pub fn new(options: AnalysisOptions) -> Result<Self, AnalysisError> {
        Self::with_reporter(options, ErrorLog::new())
    }
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub fn with_reporter(options: AnalysisOptions, errorlog: E) -> Result<Self, AnalysisError> {
        options.validate()?;
        let stubs = stubs::builtins()?;
        let mut program = Program::new(options.complexity_limit);
        let root = program.new_node("root")?;
        let mut values = ValueStore::new();
        let convert = Converter::new(&mut values);
        let builtins = values.new_namespace();
        let profile = OpcodeProfile::new(
            options.profile_opcodes || crate::config::trace_opcodes_enabled(),
        );
        Ok(Self {
            options,
            program,
            values,
            convert,
            stubs,
            frames: Vec::new(),
            root,
            entry: root,
            builtins,
            errorlog,
            current_node: None,
            profile,
        })
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn errorlog(&self) -> &E {
        &self.errorlog
    }

    pub fn into_errorlog(self) -> E {
        self.errorlog
    }

    pub fn profile(&self) -> &OpcodeProfile {
        &self.profile
    }

    pub fn profile_mut(&mut self) -> &mut OpcodeProfile {
        &mut self.profile
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The interpreted call stack, outermost first.
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.frames
            .iter()
            .map(|f| FrameInfo {
                function: f.name().to_string(),
                filename: f.code.filename.clone(),
                line: f.line(),
            })
            .collect()
    }

    /// Node of the opcode being interpreted, with its name.
    pub fn current_node(&self) -> Option<(NodeId, String)> {
        self.current_node
            .map(|n| (n, self.program.node(n).name.clone()))
    }

    pub fn remaining_depth(&self) -> usize {
        self.options.max_depth.saturating_sub(self.frames.len())
    }

    /// True once the frame stack is deeper than `max_depth`, so that no
    /// further interpreted call is entered.
    pub fn is_at_maximum_depth(&self) -> bool {
        self.frames.len() > self.options.max_depth
    }

    /// Run module code. `entry_globals` become the builtins namespace.
    pub fn run_program(
        &mut self,
        code: Arc<CodeObject>,
        entry_globals: Option<&BTreeMap<String, VariableId>>,
    ) -> Result<ProgramResult, AnalysisError> {
        let mut builtin_names = BTreeSet::new();
        if let Some(entry) = entry_globals {
            if let Some(ns) = self.values.namespace_mut(self.builtins) {
                for (name, var) in entry {
                    ns.insert(name.clone(), *var);
                    builtin_names.insert(name.clone());
                }
            }
        }
        let (final_node, globals) = self.run_module(code)?;
        let exported_names = self.values.namespace(globals).cloned().unwrap_or_default();
        Ok(ProgramResult {
            final_node,
            exported_names,
            builtin_names,
        })
    }

    /// Run a prelude and return its globals, for use as `entry_globals`.
    pub fn preload(
        &mut self,
        code: Arc<CodeObject>,
    ) -> Result<BTreeMap<String, VariableId>, AnalysisError> {
        let (end, globals) = self.run_module(code)?;
        self.entry = end;
        Ok(self.values.namespace(globals).cloned().unwrap_or_default())
    }

    fn run_module(&mut self, code: Arc<CodeObject>) -> Result<(NodeId, NamespaceId), AnalysisError> {
        let node = self.program.connect_new(self.entry, "init", None)?;
        let globals = self.values.new_namespace();
        let name = self.convert_constant(&Constant::Str("__main__".to_string()))?;
        let module_name = self.program.new_variable("__name__");
        self.program.paste_variable(module_name, name, node);
        if let Some(ns) = self.values.namespace_mut(globals) {
            ns.insert("__name__".to_string(), module_name);
        }
        let frame = self.make_frame(code, globals, Some(globals), &[], &BTreeMap::new(), node)?;
        let (end, _) = self.run_frame(frame, node)?;
        Ok((end, globals))
    }

    /// A frame for `code`. Code with `NEWLOCALS` gets a fresh namespace;
    /// `args` are copied into it.
    pub(crate) fn make_frame(
        &mut self,
        code: Arc<CodeObject>,
        globals: NamespaceId,
        locals: Option<NamespaceId>,
        closure: &[VariableId],
        args: &BTreeMap<String, VariableId>,
        node: NodeId,
    ) -> Result<Frame, AnalysisError> {
        let locals = match locals {
            Some(ns) if !code.has_flag(flags::NEWLOCALS) => ns,
            _ => self.values.new_namespace(),
        };
        let mut cells = Vec::with_capacity(code.cellvars.len() + code.freevars.len());
        for name in &code.cellvars {
            let cell = self.program.new_variable(name);
            if let Some(arg) = args.get(name) {
                self.program.paste_variable(cell, *arg, node);
            }
            cells.push(cell);
        }
        for (i, name) in code.freevars.iter().enumerate() {
            let cell = match closure.get(i) {
                Some(var) => *var,
                None => self.program.new_variable(name),
            };
            cells.push(cell);
        }
        for (name, arg) in args {
            let local = self.program.new_variable(name);
            self.program.paste_variable(local, *arg, node);
            if let Some(ns) = self.values.namespace_mut(locals) {
                ns.insert(name.clone(), local);
            }
        }
        debug!(function = %code.name, depth = self.frames.len(), "new frame");
        Ok(Frame {
            return_var: self.program.new_variable("return"),
            yield_var: self.program.new_variable("yield"),
            code,
            globals,
            locals,
            builtins: self.builtins,
            cells,
            states: Default::default(),
            handler_states: Default::default(),
            executed: Default::default(),
            current_op: None,
        })
    }

    pub(crate) fn frame(&self) -> Result<&Frame, AnalysisError> {
        self.frames
            .last()
            .ok_or_else(|| AnalysisError::Internal("no active frame".to_string()))
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut Frame, AnalysisError> {
        self.frames
            .last_mut()
            .ok_or_else(|| AnalysisError::Internal("no active frame".to_string()))
    }

    /// Report a finding at the current opcode.
    pub(crate) fn report(&mut self, mut record: ErrorRecord) {
        if let Some(frame) = self.frames.last() {
            record.filename = frame.code.filename.clone();
            record.function = frame.code.name.clone();
            record.line = frame.line();
            if let Some(op) = &frame.current_op {
                record.opcode = op.name.to_string();
            }
        }
        debug!(kind = %record.kind, message = %record.message, "reporting error");
        self.errorlog.report(record);
    }

    pub(crate) fn errorlog_checkpoint(&self) -> usize {
        self.errorlog.checkpoint()
    }

    pub(crate) fn errorlog_revert(&mut self, checkpoint: usize) {
        self.errorlog.revert_to(checkpoint);
    }

    /// A new variable holding `data` from `node`.
    pub(crate) fn variable_with(
        &mut self,
        name: &str,
        data: DataId,
        sources: impl IntoIterator<Item = BindingId>,
        node: NodeId,
    ) -> VariableId {
        let var = self.program.new_variable(name);
        self.program.add_binding(var, data, sources, node);
        var
    }

    /// A new variable holding the give-up sentinel.
    pub(crate) fn new_unsolvable(&mut self, node: NodeId) -> VariableId {
        let data = self.convert.unsolvable();
        self.variable_with("unsolvable", data, [], node)
    }

    /// A new variable holding a fresh unknown.
    pub(crate) fn new_unknown(&mut self, node: NodeId) -> VariableId {
        let data = self.values.add(AbstractValue::unknown());
        self.variable_with("unknown", data, [], node)
    }

    /// A new variable holding `None`.
    pub(crate) fn new_none(&mut self, node: NodeId) -> Result<VariableId, AnalysisError> {
        let none = self.constant_data(&Constant::None)?;
        Ok(self.variable_with("None", none, [], node))
    }

    /// A fresh bool whose value is not known.
    pub(crate) fn bool_instance(&mut self) -> Result<DataId, AnalysisError> {
        self.plain_instance("bool")
    }

    pub(crate) fn bool_constant(&mut self, value: bool) -> Result<DataId, AnalysisError> {
        self.constant_data(&Constant::Bool(value))
    }

    /// Single successor of several nodes.
    pub(crate) fn join_cfg_nodes(&mut self, nodes: &[NodeId]) -> Result<NodeId, AnalysisError> {
        let mut unique: Vec<NodeId> = Vec::with_capacity(nodes.len());
        for n in nodes {
            if !unique.contains(n) {
                unique.push(*n);
            }
        }
        match unique.as_slice() {
            [] => Err(AnalysisError::Internal("joining no nodes".to_string())),
            [only] => Ok(*only),
            _ => {
                let join = self.program.new_node("join")?;
                for n in unique {
                    self.program.connect(n, join)?;
                }
                Ok(join)
            }
        }
    }

    /// Copy the visible bindings of `var` into a fresh variable, each
    /// justified by its original.
    pub(crate) fn copy_visible(&mut self, var: VariableId, node: NodeId) -> VariableId {
        let name = self.program.variable(var).name.clone();
        let copy = self.program.new_variable(&name);
        for b in self.program.bindings(var, node) {
            let data = self.program.binding_data(b);
            self.program.add_binding(copy, data, [b], node);
        }
        copy
    }

    /// Type names of the values `var` may hold at `node`. Instances of one
    /// class are folded together, with their type parameters unioned.
    pub fn display_type(&self, var: VariableId, node: NodeId) -> String {
        let mut entries: Vec<(String, Vec<Vec<String>>)> = Vec::new();
        for data in self.program.data(var, node) {
            let (base, params) = self.type_parts(data);
            match entries.iter_mut().find(|(b, _)| *b == base) {
                Some((_, existing)) => {
                    for (slot, names) in existing.iter_mut().zip(params) {
                        for n in names {
                            if !slot.contains(&n) {
                                slot.push(n);
                            }
                        }
                    }
                }
                None => entries.push((base, params)),
            }
        }
        if entries.is_empty() {
            return "nothing".to_string();
        }
        entries
            .into_iter()
            .map(|(base, params)| {
                if params.is_empty() {
                    base
                } else {
                    let shown: Vec<String> = params
                        .into_iter()
                        .map(|p| if p.is_empty() { "nothing".to_string() } else { p.join(" or ") })
                        .collect();
                    format!("{}[{}]", base, shown.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join(" or ")
    }

    fn type_parts(&self, data: DataId) -> (String, Vec<Vec<String>>) {
        let base = self.values.type_name(data);
        let Some(instance) = self.values.instance(data) else {
            return (base, Vec::new());
        };
        let template = self.class_template(instance.cls);
        let params = template
            .iter()
            .filter_map(|t| instance.type_params.get(t))
            .map(|var| {
                let mut names: Vec<String> = Vec::new();
                for d in self.program.all_data(*var) {
                    let n = self.values.type_name(d);
                    if !names.contains(&n) {
                        names.push(n);
                    }
                }
                names
            })
            .collect();
        (base, params)
    }
}
