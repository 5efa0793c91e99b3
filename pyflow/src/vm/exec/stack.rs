//! Operand stack manipulation and constant loads.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;

use super::super::VirtualMachine;

pub(super) enum StackResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_stack(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<StackResult, AnalysisError> {
        let state = match op.name {
            OpName::Nop => state,
            OpName::PopTop => state.pop_and_discard()?,
            OpName::DupTop => {
                let top = state.top()?;
                state.push(top)
            }
            OpName::DupTopx => {
                let n = Self::arg(op)? as usize;
                let (state, items) = state.popn(n)?;
                state.push_all(items.iter().copied()).push_all(items)
            }
            OpName::DupTopTwo => {
                let (state, items) = state.popn(2)?;
                state.push_all(items.iter().copied()).push_all(items)
            }
            OpName::RotTwo => rotate(state, 2)?,
            OpName::RotThree => rotate(state, 3)?,
            OpName::RotFour => rotate(state, 4)?,
            OpName::LoadConst => {
                let constant = self.const_arg(op)?;
                let var = self.convert_constant(&constant)?;
                state.push(var)
            }
            _ => return Ok(StackResult::NotHandled(state)),
        };
        Ok(StackResult::Handled(state))
    }
}

/// Move the top of the stack `n - 1` places down.
fn rotate(state: FrameState, n: usize) -> Result<FrameState, AnalysisError> {
    let (state, mut items) = state.popn(n)?;
    items.rotate_right(1);
    Ok(state.push_all(items))
}
