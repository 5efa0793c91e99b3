//! Frame execution.
//!
//! Blocks run once, in program order. A block's entry state is whatever
//! earlier blocks stored at its first instruction; blocks nobody jumped to are
//! skipped. Jumps back into a block that already ran connect the CFG instead
//! of re-running it.
//!
//! A `finally` or `with` handler is the one exception: it is entered with
//! `None` on the normal path and with the exception triple when the body
//! raises. The two stack shapes cannot merge, so the handler block runs once
//! for each.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use tracing::{debug, info, trace, Level};

use pyflow_bytecode::{Block, CodeObject, Opcode};

use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::{check_compatible, BlockKind, ExceptionTriple, Frame, FrameState, Why};
use crate::typegraph::{NodeId, VariableId};

use super::VirtualMachine;

impl<E: ErrorReporter> VirtualMachine<E> {
    /// Run `frame` starting at `node`. Returns the node after the frame and
    /// the frame's return variable.
    pub(crate) fn run_frame(
        &mut self,
        frame: Frame,
        node: NodeId,
    ) -> Result<(NodeId, VariableId), AnalysisError> {
        let code = Arc::clone(&frame.code);
        let return_var = frame.return_var;
        let first = code
            .first_op()
            .map(|op| op.index)
            .ok_or_else(|| AnalysisError::Internal(format!("{} has no instructions", code.name)))?;
        self.frames.push(frame);
        if let Some(frame) = self.frames.last_mut() {
            frame.states.insert(first, FrameState::init(node));
        }
        let result = self.run_blocks(&code);
        self.frames.pop();
        let return_nodes = result?;
        if return_nodes.is_empty() {
            // Every path raised.
            return Ok((node, return_var));
        }
        Ok((self.join_cfg_nodes(&return_nodes)?, return_var))
    }

    fn run_blocks(&mut self, code: &CodeObject) -> Result<Vec<NodeId>, AnalysisError> {
        let mut return_nodes = Vec::new();
        for block in &code.blocks {
            let Some(start) = block.start() else {
                continue;
            };
            let frame = self.frame()?;
            let entries: Vec<FrameState> = [frame.states.get(&start), frame.handler_states.get(&start)]
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            if entries.is_empty() {
                debug!(block = block.id, function = %code.name, "skipping unreached block");
                continue;
            }
            self.frame_mut()?.executed.insert(start);
            for state in entries {
                self.run_block(block, state, &mut return_nodes)?;
            }
        }
        Ok(return_nodes)
    }

    fn run_block(
        &mut self,
        block: &Block,
        mut state: FrameState,
        return_nodes: &mut Vec<NodeId>,
    ) -> Result<(), AnalysisError> {
        let mut last: Option<&Opcode> = None;
        for op in &block.ops {
            state = self.run_instruction(op, state)?;
            last = Some(op);
            if state.why.is_some() {
                break;
            }
        }
        let Some(op) = last else {
            return Ok(());
        };
        match state.why {
            Some(Why::Return) | Some(Why::Yield) => return_nodes.push(state.node),
            Some(Why::Exception) | Some(Why::Reraise) | Some(Why::Break) | Some(Why::Continue) => {
                self.unwind(op, state)?
            }
            Some(Why::Unsatisfiable) => {}
            None => {
                if op.carry_on_to_next() {
                    self.store_jump(op.next(), state)?;
                }
            }
        }
        Ok(())
    }

    fn run_instruction(&mut self, op: &Opcode, state: FrameState) -> Result<FrameState, AnalysisError> {
        self.profile.record(op.name);
        self.current_node = Some(state.node);
        if let Some(frame) = self.frames.last_mut() {
            frame.current_op = Some(op.clone());
        }
        if crate::config::trace_opcodes_enabled() {
            info!(
                index = op.index,
                line = op.line,
                opcode = %op.name,
                stack = state.stack.len(),
                node = %state.node,
                "opcode"
            );
        } else if tracing::enabled!(Level::TRACE) {
            trace!(index = op.index, opcode = %op.name, node = %state.node, "opcode");
        }
        let state = self
            .dispatch_instr(op, state)
            .map_err(|e| e.at_opcode(&op.name.to_string()))?;
        if state.why == Some(Why::Reraise) {
            return Ok(state.set_why(Some(Why::Exception)));
        }
        Ok(state)
    }

    /// Record `state` as (part of) the entry state of instruction `target`.
    pub(crate) fn store_jump(&mut self, target: usize, state: FrameState) -> Result<(), AnalysisError> {
        let state = state.set_why(None);
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| AnalysisError::Internal("no active frame".to_string()))?;
        if frame.executed.contains(&target) {
            // Back-edge into a block that already ran.
            let Some(stored) = frame.states.get(&target) else {
                return Ok(());
            };
            check_compatible(stored, &state, target)?;
            self.program.connect(state.node, stored.node)?;
            for (dst, src) in stored.stack.iter().zip(state.stack.iter()) {
                self.program.paste_variable(*dst, *src, state.node);
            }
            return Ok(());
        }
        let merged = match frame.states.remove(&target) {
            None => state,
            Some(existing) => state.merge_into(existing, &mut self.program, target)?,
        };
        frame.states.insert(target, merged);
        Ok(())
    }

    /// Record `state`, which carries the exception triple, as the
    /// exceptional entry of the `finally` or `with` handler at `target`.
    fn store_handler(&mut self, target: usize, state: FrameState) -> Result<(), AnalysisError> {
        let state = state.set_why(None);
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| AnalysisError::Internal("no active frame".to_string()))?;
        if frame.executed.contains(&target) {
            debug!(target, "exception reaches a handler that already ran");
            return Ok(());
        }
        let merged = match frame.handler_states.remove(&target) {
            None => state,
            Some(existing) => state.merge_into(existing, &mut self.program, target)?,
        };
        frame.handler_states.insert(target, merged);
        Ok(())
    }

    /// Pop blocks until one takes over the path, or the path leaves the frame.
    fn unwind(&mut self, op: &Opcode, mut state: FrameState) -> Result<(), AnalysisError> {
        let why = state.why;
        loop {
            let Some(block) = state.blocks.last().copied() else {
                let function = self.frame()?.name().to_string();
                debug!(why = ?why, function = %function, "path leaves the frame");
                return Ok(());
            };
            match (why, block.kind) {
                (Some(Why::Continue), BlockKind::Loop) => {
                    let target = op
                        .target
                        .ok_or_else(|| AnalysisError::MissingArgument(op.name.to_string()))?;
                    return self.store_jump(target, state);
                }
                (Some(Why::Break), BlockKind::Loop) => {
                    let (popped, block) = state.pop_block()?;
                    return self.store_jump(block.handler, popped.truncate(block.level));
                }
                (Some(Why::Exception), BlockKind::SetupExcept) => {
                    let (popped, block) = state.pop_block()?;
                    let popped = popped.truncate(block.level);
                    let handler = self.push_exception(popped)?;
                    return self.store_jump(block.handler, handler);
                }
                (Some(Why::Exception), BlockKind::Finally | BlockKind::With) => {
                    let (popped, block) = state.pop_block()?;
                    let handler = self.push_exception(popped.truncate(block.level))?;
                    return self.store_handler(block.handler, handler);
                }
                _ => {
                    state = state.pop_block()?.0;
                }
            }
        }
    }

    /// Push the pending exception as (traceback, value, type), using
    /// unknowns for the parts that are not known.
    pub(crate) fn push_exception(&mut self, state: FrameState) -> Result<FrameState, AnalysisError> {
        let node = state.node;
        let triple = match state.exception {
            Some(triple) => triple,
            None => {
                let list = self.plain_instance("list")?;
                ExceptionTriple {
                    traceback: self.variable_with("tb", list, [], node),
                    value: self.new_unknown(node),
                    exc_type: self.new_unknown(node),
                }
            }
        };
        Ok(state
            .set_exception(None)
            .push_all([triple.traceback, triple.value, triple.exc_type]))
    }
}
