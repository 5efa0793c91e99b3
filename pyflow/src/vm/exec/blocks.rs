//! The block stack: loops, `try`, `finally` and `with`.
//!
//! Handlers get their entry state when the block is set up, so they are
//! analysed even if nothing in the protected body can raise. `unwind` in
//! `run` adds the states of paths that actually leave the body abnormally.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::{BlockKind, FrameState, Why};
use crate::typegraph::VariableId;

use super::super::{FunctionArgs, VirtualMachine};

pub(super) enum BlockResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_blocks(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<BlockResult, AnalysisError> {
        let state = match op.name {
            OpName::SetupLoop => state.push_block(BlockKind::Loop, Self::target(op)?),
            OpName::SetupExcept => {
                let target = Self::target(op)?;
                let handler = self.push_exception(state.clone())?;
                self.store_jump(target, handler)?;
                state.push_block(BlockKind::SetupExcept, target)
            }
            OpName::SetupFinally => {
                let target = Self::target(op)?;
                let none = self.new_none(state.node)?;
                self.store_jump(target, state.clone().push(none))?;
                state.push_block(BlockKind::Finally, target)
            }
            OpName::SetupWith => self.setup_with(op, state)?,
            OpName::PopBlock => state.pop_block()?.0,
            OpName::BreakLoop => state.set_why(Some(Why::Break)),
            OpName::ContinueLoop => state.set_why(Some(Why::Continue)),
            OpName::WithCleanup => self.with_cleanup(state)?,
            OpName::EndFinally => {
                let (state, top) = state.pop()?;
                if self.all_none(top, &state) {
                    state
                } else {
                    // An exception triple: the type was on top.
                    state.popn(2)?.0
                }
            }
            OpName::PopExcept => state,
            _ => return Ok(BlockResult::NotHandled(state)),
        };
        Ok(BlockResult::Handled(state))
    }

    /// Stack after: `__exit__`, then the result of `__enter__`. The cleanup
    /// target sees `__exit__` and `None` on the normal path.
    fn setup_with(&mut self, op: &Opcode, state: FrameState) -> Result<FrameState, AnalysisError> {
        let target = Self::target(op)?;
        let (state, ctx) = state.pop()?;
        let exit = self.load_attr(state.node, ctx, "__exit__")?;
        let state = state.push(exit);
        let none = self.new_none(state.node)?;
        self.store_jump(target, state.clone().push(none))?;
        let kind = if self.options.is_python3() {
            BlockKind::Finally
        } else {
            BlockKind::With
        };
        let state = state.push_block(kind, target);
        let (node, entered) = self.call_method(state.node, ctx, "__enter__", Vec::new())?;
        Ok(state.change_cfg_node(node).push(entered))
    }

    fn with_cleanup(&mut self, state: FrameState) -> Result<FrameState, AnalysisError> {
        let top = state.top()?;
        let (state, exit, args) = if self.all_none(top, &state) {
            let (state, items) = state.popn(2)?;
            let none = items[1];
            let state = state.push(none);
            (state, items[0], vec![none, none, none])
        } else {
            // Stack: exit, traceback, value, type (top).
            let (state, triple) = state.popn(3)?;
            let (state, exit) = state.pop()?;
            let state = state.push_all(triple.iter().copied());
            (state, exit, vec![triple[2], triple[1], triple[0]])
        };
        let (node, _) = self.call_function(state.node, exit, &FunctionArgs::positional(args), true)?;
        Ok(state.change_cfg_node(node))
    }

    fn all_none(&self, var: VariableId, state: &FrameState) -> bool {
        self.program
            .data(var, state.node)
            .into_iter()
            .all(|d| self.values.is_none(d))
    }
}
