//! Conditional and unconditional jumps.
//!
//! A conditional jump splits the path on the truthiness of the top of the
//! stack. Each side continues only under the bindings that agree with it;
//! a side no binding agrees with is dropped.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::{split_conditions, Condition, FrameState, Why};

use super::super::VirtualMachine;

pub(super) enum JumpResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

/// When a conditional jump pops the value it tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PopMode {
    /// Both successors see the value popped.
    Always,
    /// Neither successor pops.
    Never,
    /// Only the fall-through successor pops.
    OrPop,
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_jump(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<JumpResult, AnalysisError> {
        let state = match op.name {
            OpName::JumpIfTrue => self.jump_if(op, state, true, PopMode::Never)?,
            OpName::JumpIfFalse => self.jump_if(op, state, false, PopMode::Never)?,
            OpName::PopJumpIfTrue => self.jump_if(op, state, true, PopMode::Always)?,
            OpName::PopJumpIfFalse => self.jump_if(op, state, false, PopMode::Always)?,
            OpName::JumpIfTrueOrPop => self.jump_if(op, state, true, PopMode::OrPop)?,
            OpName::JumpIfFalseOrPop => self.jump_if(op, state, false, PopMode::OrPop)?,
            OpName::JumpForward | OpName::JumpAbsolute => {
                let target = Self::target(op)?;
                let state = state.forward_cfg_node(&mut self.program)?;
                self.store_jump(target, state.clone())?;
                // Control never falls through; the state only carries the node.
                state
            }
            _ => return Ok(JumpResult::NotHandled(state)),
        };
        Ok(JumpResult::Handled(state))
    }

    fn jump_if(
        &mut self,
        op: &Opcode,
        state: FrameState,
        jump_when: bool,
        pop: PopMode,
    ) -> Result<FrameState, AnalysisError> {
        let target = Self::target(op)?;
        let value = state.top()?;
        let (if_true, if_false) = split_conditions(
            &mut self.program,
            &self.values,
            state.node,
            state.condition,
            value,
        );
        let (jump_condition, fall_condition) = if jump_when {
            (if_true, if_false)
        } else {
            (if_false, if_true)
        };

        if jump_condition != Condition::Unsatisfiable {
            let jump_state = match pop {
                PopMode::Always => state.clone().pop_and_discard()?,
                PopMode::Never | PopMode::OrPop => state.clone(),
            };
            let jump_state = jump_state
                .set_condition(jump_condition)
                .forward_cfg_node(&mut self.program)?;
            self.store_jump(target, jump_state)?;
        }

        let state = match pop {
            PopMode::Always | PopMode::OrPop => state.pop_and_discard()?,
            PopMode::Never => state,
        };
        if fall_condition == Condition::Unsatisfiable {
            return Ok(state.set_why(Some(Why::Unsatisfiable)));
        }
        state
            .set_condition(fall_condition)
            .forward_cfg_node(&mut self.program)
    }
}
