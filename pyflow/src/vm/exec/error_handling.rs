//! `RAISE_VARARGS`.
//!
//! Raising ends the path with a pending exception; `unwind` routes it to
//! the innermost handler.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::{ExceptionTriple, FrameState, Why};

use super::super::VirtualMachine;

pub(super) enum ErrorResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_error_handling(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<ErrorResult, AnalysisError> {
        match op.name {
            OpName::RaiseVarargs => {
                let n = Self::arg(op)? as usize;
                Ok(ErrorResult::Handled(self.raise(state, n)?))
            }
            _ => Ok(ErrorResult::NotHandled(state)),
        }
    }

    fn raise(&mut self, state: FrameState, n: usize) -> Result<FrameState, AnalysisError> {
        let node = state.node;
        if n == 0 {
            let exception = match state.exception {
                Some(triple) => triple,
                None => self.unknown_exception(node),
            };
            return Ok(state
                .set_exception(Some(exception))
                .set_why(Some(Why::Reraise)));
        }
        let (state, items) = state.popn(n)?;
        let mut exception = self.unknown_exception(node);
        if self.options.is_python3() {
            // raise exc [from cause]
            exception.exc_type = items[0];
            exception.value = items[0];
        } else {
            // raise type [, value [, traceback]]
            exception.exc_type = items[0];
            if let Some(value) = items.get(1) {
                exception.value = *value;
            }
            if let Some(traceback) = items.get(2) {
                exception.traceback = *traceback;
            }
        }
        let why = if n == 3 && !self.options.is_python3() {
            Why::Reraise
        } else {
            Why::Exception
        };
        Ok(state.set_exception(Some(exception)).set_why(Some(why)))
    }

    fn unknown_exception(&mut self, node: crate::typegraph::NodeId) -> ExceptionTriple {
        ExceptionTriple {
            exc_type: self.new_unknown(node),
            value: self.new_unknown(node),
            traceback: self.new_unknown(node),
        }
    }
}
