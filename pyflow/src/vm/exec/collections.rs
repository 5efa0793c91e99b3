//! Container construction, subscript stores and slices.
//!
//! Containers are instances of the library classes whose type parameters
//! collect the element variables. Tuples also keep the exact elements, so
//! unpacking a tuple of known length yields each element separately.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use pyflow_bytecode::{OpName, Opcode};

use crate::abstract_value::{AbstractValue, PyValue};
use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::frame::FrameState;
use crate::typegraph::{NodeId, VariableId};

use super::super::VirtualMachine;

pub(super) enum CollectionResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_collections(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<CollectionResult, AnalysisError> {
        let state = match op.name {
            OpName::BuildTuple => {
                let n = Self::arg(op)? as usize;
                let (state, items) = state.popn(n)?;
                let tuple = self.build_tuple_value(&items, state.node)?;
                let var = self.variable_with("tuple", tuple, [], state.node);
                state.push(var)
            }
            OpName::BuildList => self.build_container(op, state, "list")?,
            OpName::BuildSet => self.build_container(op, state, "set")?,
            OpName::BuildMap => {
                let cls = self.library_class("dict")?;
                let dict = self.new_instance(cls, None)?;
                let var = self.variable_with("dict", dict, [], state.node);
                state.push(var)
            }
            OpName::StoreMap => {
                // Stack: dict, value, key (top). The dict stays.
                let (state, items) = state.popn(2)?;
                let dict = state.top()?;
                let node = self.store_subscr(state.node, dict, items[1], items[0])?;
                state.change_cfg_node(node)
            }
            OpName::StoreSubscr => {
                // Stack: value, obj, key (top).
                let (state, items) = state.popn(3)?;
                let node = self.store_subscr(state.node, items[1], items[2], items[0])?;
                state.change_cfg_node(node).forward_cfg_node(&mut self.program)?
            }
            OpName::DeleteSubscr => {
                let (state, items) = state.popn(2)?;
                let (node, _) = self.call_method(state.node, items[0], "__delitem__", vec![items[1]])?;
                state.change_cfg_node(node)
            }
            OpName::ListAppend => {
                let (state, value) = state.pop()?;
                let list = state.peek(Self::arg(op)? as usize)?;
                let (node, _) = self.call_method(state.node, list, "append", vec![value])?;
                state.change_cfg_node(node)
            }
            OpName::SetAdd => {
                let (state, value) = state.pop()?;
                let set = state.peek(Self::arg(op)? as usize)?;
                let (node, _) = self.call_method(state.node, set, "add", vec![value])?;
                state.change_cfg_node(node)
            }
            OpName::MapAdd => {
                // Stack: ..., dict, ..., value, key (top).
                let (state, items) = state.popn(2)?;
                let dict = state.peek(Self::arg(op)? as usize)?;
                let node = self.store_subscr(state.node, dict, items[1], items[0])?;
                state.change_cfg_node(node)
            }
            OpName::UnpackSequence => {
                let n = Self::arg(op)? as usize;
                let (state, seq) = state.pop()?;
                let items = self.unpack(state.node, seq, n)?;
                state.push_all(items.into_iter().rev())
            }
            OpName::BuildSlice => {
                let n = Self::arg(op)? as usize;
                let (state, _) = state.popn(n)?;
                let slice = self.plain_instance("slice")?;
                let var = self.variable_with("slice", slice, [], state.node);
                state.push(var)
            }
            OpName::Slice0 | OpName::Slice1 | OpName::Slice2 | OpName::Slice3 => {
                let (state, obj) = self.pop_slice_operands(op.name, state)?;
                let slice = self.slice_var(state.node)?;
                let (node, result) = self.call_binary_operator(state.node, "__getitem__", obj, slice, true)?;
                state.change_cfg_node(node).push(result)
            }
            OpName::StoreSlice0 | OpName::StoreSlice1 | OpName::StoreSlice2 | OpName::StoreSlice3 => {
                let (state, obj) = self.pop_slice_operands(op.name, state)?;
                let (state, value) = state.pop()?;
                let slice = self.slice_var(state.node)?;
                let (node, _) = self.call_method(state.node, obj, "__setitem__", vec![slice, value])?;
                state.change_cfg_node(node)
            }
            OpName::DeleteSlice0 | OpName::DeleteSlice1 | OpName::DeleteSlice2 | OpName::DeleteSlice3 => {
                let (state, obj) = self.pop_slice_operands(op.name, state)?;
                let slice = self.slice_var(state.node)?;
                let (node, _) = self.call_method(state.node, obj, "__delitem__", vec![slice])?;
                state.change_cfg_node(node)
            }
            _ => return Ok(CollectionResult::NotHandled(state)),
        };
        Ok(CollectionResult::Handled(state))
    }

    /// `BUILD_LIST` / `BUILD_SET`: a fresh instance whose `T` holds the items.
    fn build_container(&mut self, op: &Opcode, state: FrameState, class: &str) -> Result<FrameState, AnalysisError> {
        let n = Self::arg(op)? as usize;
        let (state, items) = state.popn(n)?;
        let cls = self.library_class(class)?;
        let data = self.new_instance(cls, None)?;
        self.fill_type_param(data, "T", &items, state.node);
        let var = self.variable_with(class, data, [], state.node);
        Ok(state.push(var))
    }

    /// `obj[key] = value`.
    fn store_subscr(
        &mut self,
        node: NodeId,
        obj: VariableId,
        key: VariableId,
        value: VariableId,
    ) -> Result<NodeId, AnalysisError> {
        let (node, _) = self.call_method(node, obj, "__setitem__", vec![key, value])?;
        Ok(node)
    }

    /// Element variables for unpacking `seq` into `n` targets.
    fn unpack(&mut self, node: NodeId, seq: VariableId, n: usize) -> Result<Vec<VariableId>, AnalysisError> {
        let outputs: Vec<VariableId> = (0..n).map(|_| self.program.new_variable("item")).collect();
        for b in self.program.bindings(seq, node) {
            let data = self.program.binding_data(b);
            match self.values.get(data).clone() {
                AbstractValue::Instance(instance) => match instance.pyval {
                    Some(PyValue::Tuple(items)) if items.len() == n => {
                        for (out, item) in outputs.iter().zip(items) {
                            self.paste_with_source(*out, item, b, node);
                        }
                    }
                    _ => match instance.type_params.get("T") {
                        Some(elements) => {
                            for out in &outputs {
                                self.paste_with_source(*out, *elements, b, node);
                            }
                        }
                        None => {
                            let unsolvable = self.convert.unsolvable();
                            for out in &outputs {
                                self.program.add_binding(*out, unsolvable, [b], node);
                            }
                        }
                    },
                },
                _ => {
                    let unsolvable = self.convert.unsolvable();
                    for out in &outputs {
                        self.program.add_binding(*out, unsolvable, [b], node);
                    }
                }
            }
        }
        Ok(outputs)
    }

    /// Copy the bindings of `src` into `dst`, each also depending on `via`.
    fn paste_with_source(&mut self, dst: VariableId, src: VariableId, via: crate::typegraph::BindingId, node: NodeId) {
        for b in self.program.all_bindings(src).to_vec() {
            let data = self.program.binding_data(b);
            self.program.add_binding(dst, data, [b, via], node);
        }
    }

    /// Pop the bounds of a Python 2 slice opcode, then the sliced object.
    fn pop_slice_operands(&mut self, name: OpName, state: FrameState) -> Result<(FrameState, VariableId), AnalysisError> {
        let bounds = match name {
            OpName::Slice0 | OpName::StoreSlice0 | OpName::DeleteSlice0 => 0,
            OpName::Slice3 | OpName::StoreSlice3 | OpName::DeleteSlice3 => 2,
            _ => 1,
        };
        let (state, _) = state.popn(bounds)?;
        state.pop()
    }

    fn slice_var(&mut self, node: NodeId) -> Result<VariableId, AnalysisError> {
        let slice = self.plain_instance("slice")?;
        Ok(self.variable_with("slice", slice, [], node))
    }
}
