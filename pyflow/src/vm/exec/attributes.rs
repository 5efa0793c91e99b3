//! `LOAD_ATTR`, `STORE_ATTR`, `DELETE_ATTR`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;

use super::super::VirtualMachine;

pub(super) enum AttributeResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_attributes(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<AttributeResult, AnalysisError> {
        let state = match op.name {
            OpName::LoadAttr => {
                let name = self.name_arg(op)?;
                let (state, obj) = state.pop()?;
                let attr = self.load_attr(state.node, obj, &name)?;
                state.push(attr)
            }
            OpName::StoreAttr => {
                // Stack: value, obj (top).
                let name = self.name_arg(op)?;
                let (state, items) = state.popn(2)?;
                self.store_attr(state.node, items[1], &name, items[0]);
                state.forward_cfg_node(&mut self.program)?
            }
            OpName::DeleteAttr => {
                let name = self.name_arg(op)?;
                let (state, _obj) = state.pop()?;
                self.del_attr(&name);
                state
            }
            _ => return Ok(AttributeResult::NotHandled(state)),
        };
        Ok(AttributeResult::Handled(state))
    }
}
