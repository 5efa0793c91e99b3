//! `GET_ITER` and `FOR_ITER`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;

use super::super::{FunctionArgs, VirtualMachine};

pub(super) enum IteratorResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_iterator(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<IteratorResult, AnalysisError> {
        let state = match op.name {
            OpName::GetIter => self.get_iter(state)?,
            OpName::ForIter => {
                let target = Self::target(op)?;
                // The exhausted path leaves the loop with the iterator popped.
                self.store_jump(target, state.clone().pop_and_discard()?)?;
                let method = if self.options.is_python3() { "__next__" } else { "next" };
                let iter = state.top()?;
                let (node, item) = self.call_method(state.node, iter, method, Vec::new())?;
                state.change_cfg_node(node).push(item)
            }
            _ => return Ok(IteratorResult::NotHandled(state)),
        };
        Ok(IteratorResult::Handled(state))
    }

    fn get_iter(&mut self, state: FrameState) -> Result<FrameState, AnalysisError> {
        let (state, seq) = state.pop()?;
        let node = state.node;
        if let Some(method) = self.load_attr_noerror(node, seq, "__iter__")? {
            let (node, iter) = self.call_function(node, method, &FunctionArgs::default(), true)?;
            return Ok(state.change_cfg_node(node).push(iter));
        }
        if self.load_attr_noerror(node, seq, "__getitem__")?.is_some() {
            // Old-style sequence protocol; the element type is not tracked.
            let unsolvable = self.new_unsolvable(node);
            return Ok(state.push(unsolvable));
        }
        let iter = self.load_attr(node, seq, "__iter__")?;
        Ok(state.push(iter))
    }
}
