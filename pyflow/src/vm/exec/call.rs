//! Calls and function creation.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::BTreeMap;

use tracing::debug;

use pyflow_bytecode::{OpName, Opcode};

use crate::abstract_value::{AbstractValue, InterpreterFunction, PyValue};
use crate::error::AnalysisError;
use crate::errorlog::{ErrorKind, ErrorRecord, ErrorReporter};
use crate::frame::FrameState;
use crate::typegraph::{DataId, NodeId, VariableId};

use super::super::VirtualMachine;

pub(super) enum CallResult {
    NotHandled(FrameState),
    Handled(FrameState),
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(super) fn execute_call(
        &mut self,
        op: &Opcode,
        state: FrameState,
    ) -> Result<CallResult, AnalysisError> {
        let state = match op.name {
            OpName::CallFunction => {
                let arg = Self::arg(op)?;
                self.call_function_from_stack(state, arg, None, None)?
            }
            OpName::CallFunctionVar => {
                let arg = Self::arg(op)?;
                let (state, star) = state.pop()?;
                self.call_function_from_stack(state, arg, Some(star), None)?
            }
            OpName::CallFunctionKw => {
                let arg = Self::arg(op)?;
                let (state, kw) = state.pop()?;
                self.call_function_from_stack(state, arg, None, Some(kw))?
            }
            OpName::CallFunctionVarKw => {
                let arg = Self::arg(op)?;
                let (state, kw) = state.pop()?;
                let (state, star) = state.pop()?;
                self.call_function_from_stack(state, arg, Some(star), Some(kw))?
            }
            OpName::MakeFunction => self.make_function(op, state, false)?,
            OpName::MakeClosure => self.make_function(op, state, true)?,
            _ => return Ok(CallResult::NotHandled(state)),
        };
        Ok(CallResult::Handled(state))
    }

    /// Stack, Python 2: defaults, (closure), code.
    /// Python 3: defaults, keyword-only pairs, annotations, (closure), code,
    /// qualified name.
    fn make_function(&mut self, op: &Opcode, state: FrameState, closure: bool) -> Result<FrameState, AnalysisError> {
        let arg = Self::arg(op)?;
        let python3 = self.options.is_python3();
        let state = if python3 { state.pop_and_discard()? } else { state };
        let (state, code_var) = state.pop()?;
        let (state, cells) = if closure {
            let (state, tuple) = state.pop()?;
            let cells = self.tuple_items(tuple, state.node).unwrap_or_default();
            (state, cells)
        } else {
            (state, Vec::new())
        };

        let (state, annotations, kw_defaults) = if python3 {
            let num_annotations = (arg >> 16) as usize;
            let num_kw = ((arg >> 8) & 0xff) as usize;
            let (state, annotations) = self.pop_annotations(state, num_annotations)?;
            let (state, pairs) = state.popn(num_kw * 2)?;
            let mut kw_defaults = BTreeMap::new();
            for pair in pairs.chunks(2) {
                if let [key, value] = pair {
                    kw_defaults.insert(self.class_name_of(state.node, *key), *value);
                }
            }
            (state, annotations, kw_defaults)
        } else {
            (state, BTreeMap::new(), BTreeMap::new())
        };
        let num_defaults = (if python3 { arg & 0xff } else { arg }) as usize;
        let (state, defaults) = state.popn(num_defaults)?;

        let code = self
            .program
            .data(code_var, state.node)
            .into_iter()
            .find_map(|d| self.code_of(d));
        let Some(code) = code else {
            debug!("MAKE_FUNCTION without a code object");
            let unsolvable = self.new_unsolvable(state.node);
            return Ok(state.push(unsolvable));
        };
        let globals = self.frame()?.globals;
        let name = code.name.clone();
        let function = self.values.add(AbstractValue::InterpreterFunction(InterpreterFunction {
            name: name.clone(),
            code,
            globals,
            defaults,
            kw_defaults,
            closure: cells,
            annotations,
            members: BTreeMap::new(),
        }));
        let var = self.variable_with(&name, function, [], state.node);
        Ok(state.push(var))
    }

    /// Pop the annotation names tuple and its values. Only classes are
    /// usable as annotations; anything else is reported and dropped.
    fn pop_annotations(
        &mut self,
        state: FrameState,
        count: usize,
    ) -> Result<(FrameState, BTreeMap<String, DataId>), AnalysisError> {
        let mut annotations = BTreeMap::new();
        if count == 0 {
            return Ok((state, annotations));
        }
        let (state, names_var) = state.pop()?;
        let (state, values) = state.popn(count - 1)?;
        let names: Vec<String> = self
            .tuple_items(names_var, state.node)
            .unwrap_or_default()
            .into_iter()
            .map(|item| self.class_name_of(state.node, item))
            .collect();
        for (name, value) in names.into_iter().zip(values) {
            if name == "return" {
                continue;
            }
            let data = self.program.data(value, state.node);
            match data.as_slice() {
                [cls] if self.values.class(*cls).is_some() => {
                    annotations.insert(name, *cls);
                }
                [other] if self.values.get(*other).is_opaque() => {}
                _ => self.report(
                    ErrorRecord::new(
                        ErrorKind::InvalidAnnotation,
                        format!("Invalid type annotation for parameter '{}'", name),
                    )
                    .with_details("Must be a single class")
                    .with_variables(vec![value]),
                ),
            }
        }
        Ok((state, annotations))
    }

    /// The elements of the tuple `var` holds, when it holds exactly one.
    fn tuple_items(&self, var: VariableId, node: NodeId) -> Option<Vec<VariableId>> {
        let data = self.program.data(var, node);
        let [only] = data.as_slice() else {
            return None;
        };
        match self.values.get(*only).pyval() {
            Some(PyValue::Tuple(items)) => Some(items.clone()),
            _ => None,
        }
    }
}
