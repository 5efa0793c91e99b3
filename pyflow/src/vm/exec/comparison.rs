//! `COMPARE_OP`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;

use super::super::VirtualMachine;

pub(super) enum ComparisonResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_comparison(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<ComparisonResult, AnalysisError> {
        match op.name {
            OpName::CompareOp => {
                let cmp = Self::arg(op)?;
                Ok(ComparisonResult::Handled(self.compare_op(state, cmp)?))
            }
            _ => Ok(ComparisonResult::NotHandled(state)),
        }
    }
}
