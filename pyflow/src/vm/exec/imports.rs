//! `IMPORT_NAME`, `IMPORT_FROM` and `IMPORT_STAR`.
//!
//! Only modules the signature table declares can be imported. Everything
//! else is reported and continues as the give-up sentinel.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use tracing::debug;

use pyflow_bytecode::{OpName, Opcode};

use crate::abstract_value::AbstractValue;
use crate::error::AnalysisError;
use crate::errorlog::{ErrorKind, ErrorRecord, ErrorReporter};
use crate::frame::FrameState;
use crate::typegraph::{NodeId, VariableId};

use super::super::VirtualMachine;

pub(super) enum ImportResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_imports(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<ImportResult, AnalysisError> {
        let state = match op.name {
            OpName::ImportName => {
                let name = self.name_arg(op)?;
                // Stack: level, fromlist (top).
                let (state, items) = state.popn(2)?;
                let level = self.int_constant(items[0], state.node).unwrap_or(0);
                let from_import = !self
                    .program
                    .data(items[1], state.node)
                    .into_iter()
                    .all(|d| self.values.is_none(d));
                let module = self.import_module(state.node, &name, level, from_import)?;
                state.push(module)
            }
            OpName::ImportFrom => {
                let name = self.name_arg(op)?;
                let module = state.top()?;
                let member = self.import_from(state.node, module, &name)?;
                state.push(member)
            }
            OpName::ImportStar => {
                let (state, module) = state.pop()?;
                self.import_star(state.node, module)?;
                state.forward_cfg_node(&mut self.program)?
            }
            _ => return Ok(ImportResult::NotHandled(state)),
        };
        Ok(ImportResult::Handled(state))
    }

    fn int_constant(&self, var: VariableId, node: NodeId) -> Option<i64> {
        self.program
            .data(var, node)
            .into_iter()
            .find_map(|d| self.values.get(d).constant().and_then(|c| c.as_int()))
    }

    /// `import a.b.c` yields `a`; `from a.b.c import x` yields `a.b.c`.
    fn import_module(
        &mut self,
        node: NodeId,
        name: &str,
        level: i64,
        from_import: bool,
    ) -> Result<VariableId, AnalysisError> {
        let resolved = if level > 0 {
            None
        } else {
            self.library_module(name)
        };
        let Some(module) = resolved else {
            debug!(module = name, level, "unresolved import");
            self.report(ErrorRecord::new(
                ErrorKind::ImportError,
                format!("Can't find module '{}'.", name),
            ));
            return Ok(self.new_unsolvable(node));
        };
        let data = if from_import {
            module
        } else {
            let top = name.split('.').next().unwrap_or(name);
            self.library_module(top).unwrap_or(module)
        };
        let shown = match self.values.get(data) {
            AbstractValue::Module(m) => m.name.clone(),
            _ => name.to_string(),
        };
        Ok(self.variable_with(&shown, data, [], node))
    }

    fn import_from(&mut self, node: NodeId, module: VariableId, name: &str) -> Result<VariableId, AnalysisError> {
        let result = self.program.new_variable(name);
        let mut found = false;
        let mut module_names = Vec::new();
        for b in self.program.bindings(module, node) {
            let data = self.program.binding_data(b);
            if self.values.get(data).is_opaque() {
                let unsolvable = self.convert.unsolvable();
                self.program.add_binding(result, unsolvable, [b], node);
                found = true;
                continue;
            }
            if let AbstractValue::Module(m) = self.values.get(data) {
                module_names.push(m.name.clone());
            }
            let Some(attr) = self.get_attribute(node, data, name, Some(b))? else {
                continue;
            };
            for ab in self.program.bindings(attr, node) {
                let value = self.program.binding_data(ab);
                self.program.add_binding(result, value, [ab, b], node);
                found = true;
            }
        }
        if found {
            return Ok(result);
        }
        let module_name = module_names.first().cloned().unwrap_or_else(|| "?".to_string());
        self.report(ErrorRecord::new(
            ErrorKind::ImportError,
            format!("Can't find module '{}.{}'.", module_name, name),
        ));
        Ok(self.new_unsolvable(node))
    }

    /// Bind every public member of `module` in the current locals.
    fn import_star(&mut self, node: NodeId, module: VariableId) -> Result<(), AnalysisError> {
        let locals = self.frame()?.locals;
        let stubs = Arc::clone(&self.stubs);
        for data in self.program.data(module, node) {
            let AbstractValue::Module(m) = self.values.get(data) else {
                debug!("import * from an unresolved module");
                continue;
            };
            let Some(stub) = stubs.module(&m.name) else {
                continue;
            };
            for name in stub.members.keys().filter(|n| !n.starts_with('_')) {
                if let Some(value) = self.get_attribute(node, data, name, None)? {
                    self.store_value(node, locals, name, value);
                }
            }
        }
        Ok(())
    }
}
