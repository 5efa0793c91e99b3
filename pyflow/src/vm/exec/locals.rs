//! Name loads, stores and deletes: locals, globals, builtins and cells.
//!
//! A store pastes into the namespace's variable for the name and moves the
//! path to a fresh node, so the new bindings shadow the old ones from there
//! on while other paths keep seeing theirs.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use tracing::debug;

use pyflow_bytecode::{Constant, OpName, Opcode};

use crate::abstract_value::{AbstractValue, NamespaceId, SpecialForm};
use crate::error::AnalysisError;
use crate::errorlog::{ErrorKind, ErrorRecord, ErrorReporter};
use crate::frame::{ExceptionTriple, FrameState, Why};
use crate::typegraph::{NodeId, VariableId};

use super::super::VirtualMachine;

pub(super) enum LocalsResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

/// Which namespaces a load consults before the builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Name,
    Global,
    Fast,
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_locals(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<LocalsResult, AnalysisError> {
        let state = match op.name {
            OpName::LoadName => {
                let name = self.name_arg(op)?;
                self.load_name(state, &name, Scope::Name)?
            }
            OpName::LoadGlobal => {
                let name = self.name_arg(op)?;
                self.load_name(state, &name, Scope::Global)?
            }
            OpName::LoadFast => {
                let name = self.local_name(op)?;
                self.load_name(state, &name, Scope::Fast)?
            }
            OpName::StoreName => {
                let name = self.name_arg(op)?;
                let ns = self.frame()?.locals;
                self.store_name(state, ns, &name)?
            }
            OpName::StoreFast => {
                let name = self.local_name(op)?;
                let ns = self.frame()?.locals;
                self.store_name(state, ns, &name)?
            }
            OpName::StoreGlobal => {
                let name = self.name_arg(op)?;
                let ns = self.frame()?.globals;
                self.store_name(state, ns, &name)?
            }
            OpName::DeleteName => {
                let name = self.name_arg(op)?;
                self.delete_name(&name);
                state
            }
            OpName::DeleteFast => {
                let name = self.local_name(op)?;
                self.delete_name(&name);
                state
            }
            OpName::DeleteGlobal => {
                let name = self.name_arg(op)?;
                self.delete_name(&name);
                state
            }
            OpName::LoadClosure => {
                let cell = self.cell_arg(op)?;
                state.push(cell)
            }
            OpName::LoadDeref => {
                let cell = self.cell_arg(op)?;
                let var = self.copy_visible(cell, state.node);
                state.push(var)
            }
            OpName::StoreDeref => {
                let cell = self.cell_arg(op)?;
                let (state, value) = state.pop()?;
                self.program.paste_variable(cell, value, state.node);
                state.forward_cfg_node(&mut self.program)?
            }
            OpName::LoadLocals => {
                let ns = self.frame()?.locals;
                let members = self.values.namespace(ns).cloned().unwrap_or_default();
                let cls = self.library_class("dict")?;
                let dict = self.new_instance(cls, None)?;
                if let Some(AbstractValue::Instance(instance)) = self.values.get_mut(dict) {
                    instance.members = members;
                }
                let var = self.variable_with("locals", dict, [], state.node);
                state.push(var)
            }
            OpName::StoreLocals => {
                let (state, dict) = state.pop()?;
                let members = self
                    .program
                    .data(dict, state.node)
                    .into_iter()
                    .find_map(|d| self.values.instance(d).map(|i| i.members.clone()))
                    .unwrap_or_default();
                let ns = self.values.new_namespace();
                if let Some(map) = self.values.namespace_mut(ns) {
                    *map = members;
                }
                self.frame_mut()?.locals = ns;
                state
            }
            _ => return Ok(LocalsResult::NotHandled(state)),
        };
        Ok(LocalsResult::Handled(state))
    }

    fn load_name(&mut self, state: FrameState, name: &str, scope: Scope) -> Result<FrameState, AnalysisError> {
        let frame = self.frame()?;
        let namespaces: Vec<NamespaceId> = match scope {
            Scope::Name => vec![frame.locals, frame.globals],
            Scope::Global => vec![frame.globals],
            Scope::Fast => vec![frame.locals],
        };
        let node = state.node;
        for ns in namespaces {
            if let Some(var) = self.visible_in(ns, name, node) {
                return Ok(state.push(var));
            }
        }
        if scope == Scope::Fast {
            debug!(name, "local referenced before assignment");
            let exc_type = self.library_class_var("UnboundLocalError")?;
            let exception = ExceptionTriple {
                exc_type,
                value: self.new_unknown(node),
                traceback: self.new_unknown(node),
            };
            return Ok(state.set_exception(Some(exception)).set_why(Some(Why::Exception)));
        }
        match self.load_builtin(node, name)? {
            Some(var) => Ok(state.push(var)),
            None => {
                self.report(ErrorRecord::new(
                    ErrorKind::NameError,
                    format!("Name '{}' is not defined", name),
                ));
                let unsolvable = self.new_unsolvable(node);
                Ok(state.push(unsolvable))
            }
        }
    }

    /// A copy of `name` in `ns` if it has bindings visible at `node`.
    fn visible_in(&mut self, ns: NamespaceId, name: &str, node: NodeId) -> Option<VariableId> {
        let var = self.values.lookup(ns, name)?;
        let copy = self.copy_visible(var, node);
        if self.program.all_bindings(copy).is_empty() {
            return None;
        }
        Some(copy)
    }

    /// Special names, then the builtins namespace, then the signature table.
    pub(crate) fn load_builtin(&mut self, node: NodeId, name: &str) -> Result<Option<VariableId>, AnalysisError> {
        let special = match name {
            "True" => Some(self.convert_constant(&Constant::Bool(true))?),
            "False" => Some(self.convert_constant(&Constant::Bool(false))?),
            "None" => Some(self.convert_constant(&Constant::None)?),
            "isinstance" => Some(self.special_form(SpecialForm::IsInstance)),
            "super" => Some(self.special_form(SpecialForm::Super)),
            "__random__" => {
                let data = self.bool_instance()?;
                Some(self.variable_with(name, data, [], node))
            }
            "__any_object__" => Some(self.new_unknown(node)),
            _ => None,
        };
        if special.is_some() {
            return Ok(special);
        }
        let builtins = self.frame()?.builtins;
        if let Some(var) = self.visible_in(builtins, name, node) {
            return Ok(Some(var));
        }
        Ok(self
            .library_builtin(name)?
            .map(|data| self.variable_with(name, data, [], self.root)))
    }

    pub(crate) fn special_form(&mut self, form: SpecialForm) -> VariableId {
        let data = self.values.add(AbstractValue::Special(form));
        self.variable_with(form.name(), data, [], self.root)
    }

    /// Bind `name` in `ns` to the top of the stack.
    pub(crate) fn store_name(
        &mut self,
        state: FrameState,
        ns: NamespaceId,
        name: &str,
    ) -> Result<FrameState, AnalysisError> {
        let (state, value) = state.pop()?;
        self.store_value(state.node, ns, name, value);
        state.forward_cfg_node(&mut self.program)
    }

    pub(crate) fn store_value(&mut self, node: NodeId, ns: NamespaceId, name: &str, value: VariableId) {
        let slot = match self.values.lookup(ns, name) {
            Some(var) => var,
            None => {
                let var = self.program.new_variable(name);
                if let Some(map) = self.values.namespace_mut(ns) {
                    map.insert(name.to_string(), var);
                }
                var
            }
        };
        self.program.paste_variable(slot, value, node);
    }

    /// Namespaces are shared by every path through the frame; the name
    /// stays bound on all of them.
    fn delete_name(&self, name: &str) {
        debug!(name, "ignoring delete of a name");
    }
}
