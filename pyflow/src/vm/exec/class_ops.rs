//! `BUILD_CLASS` and `LOAD_BUILD_CLASS`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::BTreeMap;

use pyflow_bytecode::{OpName, Opcode};

use crate::abstract_value::{PyValue, SpecialForm};
use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;
use crate::typegraph::VariableId;

use super::super::VirtualMachine;

pub(super) enum ClassResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_class_ops(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<ClassResult, AnalysisError> {
        let state = match op.name {
            OpName::BuildClass => {
                // Stack: name, bases tuple, class-body locals (top).
                let (state, items) = state.popn(3)?;
                let node = state.node;
                let name = self.class_name_of(node, items[0]);
                let bases: Vec<VariableId> = self
                    .program
                    .data(items[1], node)
                    .into_iter()
                    .find_map(|d| match self.values.get(d).pyval() {
                        Some(PyValue::Tuple(items)) => Some(items.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                let members: BTreeMap<String, VariableId> = self
                    .program
                    .data(items[2], node)
                    .into_iter()
                    .find_map(|d| self.values.instance(d).map(|i| i.members.clone()))
                    .unwrap_or_default();
                let class = self.make_class(node, &name, &bases, members)?;
                state.push(class)
            }
            OpName::LoadBuildClass => {
                let builder = self.special_form(SpecialForm::BuildClass);
                state.push(builder)
            }
            _ => return Ok(ClassResult::NotHandled(state)),
        };
        Ok(ClassResult::Handled(state))
    }
}
