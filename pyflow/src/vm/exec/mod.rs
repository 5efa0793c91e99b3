//! Opcode dispatch.
//!
//! Each submodule handles one family of opcodes and hands back the state
//! unchanged (`NotHandled`) for anything outside its family. The dispatcher
//! tries them in turn; an opcode no family claims is a stack-machine fault.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod arithmetic;
mod attributes;
mod blocks;
mod call;
mod class_ops;
mod collections;
mod comparison;
mod error_handling;
mod imports;
mod iterator;
mod jump;
mod locals;
mod return_ops;
mod stack;
mod statements;

use pyflow_bytecode::{Constant, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;
use crate::typegraph::VariableId;

use super::VirtualMachine;

use arithmetic::ArithmeticResult;
use attributes::AttributeResult;
use blocks::BlockResult;
use call::CallResult;
use class_ops::ClassResult;
use collections::CollectionResult;
use comparison::ComparisonResult;
use error_handling::ErrorResult;
use imports::ImportResult;
use iterator::IteratorResult;
use jump::JumpResult;
use locals::LocalsResult;
use return_ops::ReturnResult;
use stack::StackResult;
use statements::StatementResult;

impl<E: ErrorReporter> VirtualMachine<E> {
    /// Run one opcode on `state`.
    pub(super) fn dispatch_instr(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<FrameState, AnalysisError> {
        let state = match self.execute_stack(op, state)? {
            StackResult::Handled(s) => return Ok(s),
            StackResult::NotHandled(s) => s,
        };
        let state = match self.execute_locals(op, state)? {
            LocalsResult::Handled(s) => return Ok(s),
            LocalsResult::NotHandled(s) => s,
        };
        let state = match self.execute_arithmetic(op, state)? {
            ArithmeticResult::Handled(s) => return Ok(s),
            ArithmeticResult::NotHandled(s) => s,
        };
        let state = match self.execute_comparison(op, state)? {
            ComparisonResult::Handled(s) => return Ok(s),
            ComparisonResult::NotHandled(s) => s,
        };
        let state = match self.execute_attributes(op, state)? {
            AttributeResult::Handled(s) => return Ok(s),
            AttributeResult::NotHandled(s) => s,
        };
        let state = match self.execute_collections(op, state)? {
            CollectionResult::Handled(s) => return Ok(s),
            CollectionResult::NotHandled(s) => s,
        };
        let state = match self.execute_jump(op, state)? {
            JumpResult::Handled(s) => return Ok(s),
            JumpResult::NotHandled(s) => s,
        };
        let state = match self.execute_iterator(op, state)? {
            IteratorResult::Handled(s) => return Ok(s),
            IteratorResult::NotHandled(s) => s,
        };
        let state = match self.execute_blocks(op, state)? {
            BlockResult::Handled(s) => return Ok(s),
            BlockResult::NotHandled(s) => s,
        };
        let state = match self.execute_error_handling(op, state)? {
            ErrorResult::Handled(s) => return Ok(s),
            ErrorResult::NotHandled(s) => s,
        };
        let state = match self.execute_call(op, state)? {
            CallResult::Handled(s) => return Ok(s),
            CallResult::NotHandled(s) => s,
        };
        let state = match self.execute_return(op, state)? {
            ReturnResult::Handled(s) => return Ok(s),
            ReturnResult::NotHandled(s) => s,
        };
        let state = match self.execute_imports(op, state)? {
            ImportResult::Handled(s) => return Ok(s),
            ImportResult::NotHandled(s) => s,
        };
        let state = match self.execute_class_ops(op, state)? {
            ClassResult::Handled(s) => return Ok(s),
            ClassResult::NotHandled(s) => s,
        };
        match self.execute_statements(op, state)? {
            StatementResult::Handled(s) => Ok(s),
            StatementResult::NotHandled(_) => Err(AnalysisError::UnknownOpcode(op.name)),
        }
    }

    fn arg(op: &Opcode) -> Result<u32, AnalysisError> {
        op.arg
            .ok_or_else(|| AnalysisError::MissingArgument(op.name.to_string()))
    }

    fn target(op: &Opcode) -> Result<usize, AnalysisError> {
        op.target
            .ok_or_else(|| AnalysisError::MissingArgument(op.name.to_string()))
    }

    /// Entry of `co_names` named by the argument.
    fn name_arg(&self, op: &Opcode) -> Result<String, AnalysisError> {
        let index = Self::arg(op)? as usize;
        self.frame()?
            .code
            .names
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(op, "names", index))
    }

    /// Entry of `co_varnames` named by the argument.
    fn local_name(&self, op: &Opcode) -> Result<String, AnalysisError> {
        let index = Self::arg(op)? as usize;
        self.frame()?
            .code
            .varnames
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(op, "varnames", index))
    }

    fn const_arg(&self, op: &Opcode) -> Result<Constant, AnalysisError> {
        let index = Self::arg(op)? as usize;
        self.frame()?
            .code
            .consts
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(op, "consts", index))
    }

    /// Cell or free variable named by the argument.
    fn cell_arg(&self, op: &Opcode) -> Result<VariableId, AnalysisError> {
        let index = Self::arg(op)? as usize;
        self.frame()?
            .cells
            .get(index)
            .copied()
            .ok_or_else(|| out_of_range(op, "cells", index))
    }
}

fn out_of_range(op: &Opcode, table: &'static str, index: usize) -> AnalysisError {
    AnalysisError::IndexOutOfRange {
        opcode: op.name.to_string(),
        table,
        index,
    }
}
