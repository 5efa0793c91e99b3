//! `RETURN_VALUE` and `YIELD_VALUE`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::{FrameState, Why};

use super::super::VirtualMachine;

pub(super) enum ReturnResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_return(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<ReturnResult, AnalysisError> {
        let state = match op.name {
            OpName::ReturnValue => {
                let (state, value) = state.pop()?;
                let return_var = self.frame()?.return_var;
                self.program.paste_variable(return_var, value, state.node);
                state.set_why(Some(Why::Return))
            }
            OpName::YieldValue => {
                // The path ends at the first yield; the generator's element
                // type is what was yielded.
                let (state, value) = state.pop()?;
                let yield_var = self.frame()?.yield_var;
                self.program.paste_variable(yield_var, value, state.node);
                state.set_why(Some(Why::Yield))
            }
            _ => return Ok(ReturnResult::NotHandled(state)),
        };
        Ok(ReturnResult::Handled(state))
    }
}
