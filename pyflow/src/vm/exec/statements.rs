//! Python 2 statements with no effect on types: `print` and `exec`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;

use super::super::VirtualMachine;

pub(super) enum StatementResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_statements(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<StatementResult, AnalysisError> {
        let consumed = match op.name {
            OpName::PrintExpr | OpName::PrintItem | OpName::PrintNewlineTo => 1,
            OpName::PrintItemTo => 2,
            OpName::PrintNewline => 0,
            OpName::ExecStmt => 3,
            _ => return Ok(StatementResult::NotHandled(state)),
        };
        Ok(StatementResult::Handled(state.popn(consumed)?.0))
    }
}
