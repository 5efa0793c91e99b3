//! Unary, binary and in-place operators.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;

use super::super::operators::{BINARY_OPERATORS, INPLACE_OPERATORS};
use super::super::VirtualMachine;

pub(super) enum ArithmeticResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_arithmetic(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<ArithmeticResult, AnalysisError> {
        let state = match op.name {
            OpName::UnaryNot => self.unary_not(state)?,
            OpName::UnaryNegative => self.unary_operator(state, "__neg__")?,
            OpName::UnaryPositive => self.unary_operator(state, "__pos__")?,
            OpName::UnaryInvert => self.unary_operator(state, "__invert__")?,
            OpName::UnaryConvert => self.unary_convert(state)?,
            OpName::BinarySubscr => self.binary_subscr(state)?,
            name => {
                if let Some(method) = BINARY_OPERATORS.get(&name) {
                    self.binary_operator(state, method)?
                } else if let Some((inplace, binary)) = INPLACE_OPERATORS.get(&name) {
                    self.inplace_operator(state, inplace, binary)?
                } else {
                    return Ok(ArithmeticResult::NotHandled(state));
                }
            }
        };
        Ok(ArithmeticResult::Handled(state))
    }
}
