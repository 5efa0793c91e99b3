//! Operator dispatch.
//!
//! Binary and unary operators become calls of the matching dunder method on
//! the left operand. In-place operators try `__iadd__` and friends first and
//! fall back to the binary form.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::HashMap;

use once_cell::sync::Lazy;

use pyflow_bytecode::{compare, OpName};

use crate::abstract_value::AbstractValue;
use crate::error::AnalysisError;
use crate::errorlog::{ErrorKind, ErrorRecord, ErrorReporter};
use crate::frame::FrameState;
use crate::typegraph::{BindingId, NodeId, VariableId};

use super::call::FunctionArgs;
use super::VirtualMachine;

/// Binary opcode to the method that implements it.
pub(crate) static BINARY_OPERATORS: Lazy<HashMap<OpName, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (OpName::BinaryPower, "__pow__"),
        (OpName::BinaryMultiply, "__mul__"),
        (OpName::BinaryDivide, "__div__"),
        (OpName::BinaryModulo, "__mod__"),
        (OpName::BinaryAdd, "__add__"),
        (OpName::BinarySubtract, "__sub__"),
        (OpName::BinarySubscr, "__getitem__"),
        (OpName::BinaryFloorDivide, "__floordiv__"),
        (OpName::BinaryTrueDivide, "__truediv__"),
        (OpName::BinaryLshift, "__lshift__"),
        (OpName::BinaryRshift, "__rshift__"),
        (OpName::BinaryAnd, "__and__"),
        (OpName::BinaryXor, "__xor__"),
        (OpName::BinaryOr, "__or__"),
    ])
});

/// In-place opcode to its own method and the binary fallback.
pub(crate) static INPLACE_OPERATORS: Lazy<HashMap<OpName, (&'static str, &'static str)>> =
    Lazy::new(|| {
        HashMap::from([
            (OpName::InplacePower, ("__ipow__", "__pow__")),
            (OpName::InplaceMultiply, ("__imul__", "__mul__")),
            (OpName::InplaceDivide, ("__idiv__", "__div__")),
            (OpName::InplaceModulo, ("__imod__", "__mod__")),
            (OpName::InplaceAdd, ("__iadd__", "__add__")),
            (OpName::InplaceSubtract, ("__isub__", "__sub__")),
            (OpName::InplaceFloorDivide, ("__ifloordiv__", "__floordiv__")),
            (OpName::InplaceTrueDivide, ("__itruediv__", "__truediv__")),
            (OpName::InplaceLshift, ("__ilshift__", "__lshift__")),
            (OpName::InplaceRshift, ("__irshift__", "__rshift__")),
            (OpName::InplaceAnd, ("__iand__", "__and__")),
            (OpName::InplaceXor, ("__ixor__", "__xor__")),
            (OpName::InplaceOr, ("__ior__", "__or__")),
        ])
    });

/// `__add__` -> `__radd__`. `None` for methods without a reflected form.
pub(crate) fn reflected(name: &str) -> Option<String> {
    if name == "__getitem__" {
        return None;
    }
    name.strip_prefix("__").map(|rest| format!("__r{}", rest))
}

/// Method behind a rich comparison.
fn comparison_method(op: u32) -> Option<&'static str> {
    match op {
        compare::LT => Some("__lt__"),
        compare::LE => Some("__le__"),
        compare::EQ => Some("__eq__"),
        compare::NE => Some("__ne__"),
        compare::GT => Some("__gt__"),
        compare::GE => Some("__ge__"),
        _ => None,
    }
}

impl<E: ErrorReporter> VirtualMachine<E> {
    /// Pop two operands, apply `method`, push the result.
    pub(crate) fn binary_operator(&mut self, state: FrameState, method: &str) -> Result<FrameState, AnalysisError> {
        let (state, operands) = state.popn(2)?;
        let (x, y) = (operands[0], operands[1]);
        let (node, result) = self.call_binary_operator(state.node, method, x, y, true)?;
        Ok(state.change_cfg_node(node).push(result))
    }

    pub(crate) fn inplace_operator(
        &mut self,
        state: FrameState,
        inplace: &str,
        binary: &str,
    ) -> Result<FrameState, AnalysisError> {
        let (state, operands) = state.popn(2)?;
        let (x, y) = (operands[0], operands[1]);
        if let Some(attr) = self.load_attr_noerror(state.node, x, inplace)? {
            let (node, result) = self.call_function(state.node, attr, &FunctionArgs::positional(vec![y]), false)?;
            if !self.program.all_bindings(result).is_empty() {
                return Ok(state.change_cfg_node(node).push(result));
            }
        }
        let (node, result) = self.call_binary_operator(state.node, binary, x, y, true)?;
        Ok(state.change_cfg_node(node).push(result))
    }

    /// `x[y]`. Findings of a lookup that produced nothing are dropped.
    pub(crate) fn binary_subscr(&mut self, state: FrameState) -> Result<FrameState, AnalysisError> {
        let (state, operands) = state.popn(2)?;
        let (x, y) = (operands[0], operands[1]);
        let checkpoint = self.errorlog_checkpoint();
        let (node, result) = self.call_binary_operator(state.node, "__getitem__", x, y, true)?;
        if self.program.all_bindings(result).is_empty() {
            self.errorlog_revert(checkpoint);
            let unsolvable = self.new_unsolvable(state.node);
            return Ok(state.push(unsolvable));
        }
        Ok(state.change_cfg_node(node).push(result))
    }

    /// Call `x.method(y)`, then `y.__rmethod__(x)` when enabled. With
    /// `report`, unsupported operands are reported and give up.
    pub(crate) fn call_binary_operator(
        &mut self,
        node: NodeId,
        method: &str,
        x: VariableId,
        y: VariableId,
        report: bool,
    ) -> Result<(NodeId, VariableId), AnalysisError> {
        if let Some(attr) = self.load_attr_noerror(node, x, method)? {
            let (end, result) = self.call_function(node, attr, &FunctionArgs::positional(vec![y]), false)?;
            if !self.program.all_bindings(result).is_empty() {
                return Ok((end, result));
            }
        }
        if self.options.reverse_operators {
            if let Some(rmethod) = reflected(method) {
                if let Some(attr) = self.load_attr_noerror(node, y, &rmethod)? {
                    let (end, result) =
                        self.call_function(node, attr, &FunctionArgs::positional(vec![x]), false)?;
                    if !self.program.all_bindings(result).is_empty() {
                        return Ok((end, result));
                    }
                }
            }
        }
        let has_x = !self.program.bindings(x, node).is_empty();
        let has_y = !self.program.bindings(y, node).is_empty();
        if !report {
            return Ok((node, self.program.new_variable(method)));
        }
        if has_x && has_y {
            let record = ErrorRecord::new(
                ErrorKind::UnsupportedOperands,
                format!(
                    "Unsupported operands for {}: '{}' and '{}'",
                    method,
                    self.type_names(x, node),
                    self.type_names(y, node)
                ),
            )
            .with_variables(vec![x, y]);
            self.report(record);
        }
        Ok((node, self.new_unsolvable(node)))
    }

    /// `not x`: a bool per binding, decided where the binding's truth is.
    pub(crate) fn unary_not(&mut self, state: FrameState) -> Result<FrameState, AnalysisError> {
        let (state, x) = state.pop()?;
        let result = self.program.new_variable("not");
        for b in self.program.bindings(x, state.node) {
            let data = self.program.binding_data(b);
            let can_be_true = self.values.compatible_with(&self.program, data, true);
            let can_be_false = self.values.compatible_with(&self.program, data, false);
            let value = match (can_be_true, can_be_false) {
                (true, false) => self.bool_constant(false)?,
                (false, true) => self.bool_constant(true)?,
                _ => self.bool_instance()?,
            };
            self.program.add_binding(result, value, [b], state.node);
        }
        Ok(state.push(result))
    }

    /// `-x`, `+x`, `~x`.
    pub(crate) fn unary_operator(&mut self, state: FrameState, method: &str) -> Result<FrameState, AnalysisError> {
        let (state, x) = state.pop()?;
        let (node, result) = self.call_method(state.node, x, method, Vec::new())?;
        Ok(state.change_cfg_node(node).push(result))
    }

    /// Python 2 backticks.
    pub(crate) fn unary_convert(&mut self, state: FrameState) -> Result<FrameState, AnalysisError> {
        let (state, _) = state.pop()?;
        let s = self.plain_instance("str")?;
        let var = self.variable_with("repr", s, [], state.node);
        Ok(state.push(var))
    }

    pub(crate) fn compare_op(&mut self, state: FrameState, op: u32) -> Result<FrameState, AnalysisError> {
        let (state, operands) = state.popn(2)?;
        let (x, y) = (operands[0], operands[1]);
        let node = state.node;
        if let Some(method) = comparison_method(op) {
            let (end, result) = self.call_binary_operator(node, method, x, y, false)?;
            if !self.program.all_bindings(result).is_empty() {
                return Ok(state.change_cfg_node(end).push(result));
            }
            let var = self.ambiguous_bool(node, [x, y])?;
            return Ok(state.push(var));
        }
        let var = match op {
            compare::IS | compare::IS_NOT => self.identity_compare(node, x, y, op == compare::IS_NOT)?,
            compare::IN | compare::NOT_IN | compare::EXC_MATCH => self.ambiguous_bool(node, [x, y])?,
            other => return Err(AnalysisError::BadCompareOp(other)),
        };
        Ok(state.push(var))
    }

    /// A bool of unknown value, depending on the visible bindings of `vars`.
    fn ambiguous_bool(
        &mut self,
        node: NodeId,
        vars: [VariableId; 2],
    ) -> Result<VariableId, AnalysisError> {
        let data = self.bool_instance()?;
        let var = self.program.new_variable("bool");
        let sources: Vec<BindingId> = vars
            .iter()
            .filter_map(|v| match self.program.bindings(*v, node).as_slice() {
                [only] => Some(*only),
                _ => None,
            })
            .collect();
        self.program.add_binding(var, data, sources, node);
        Ok(var)
    }

    /// `x is y`: decided for `None` against `None` or against a value that
    /// cannot be `None`.
    fn identity_compare(
        &mut self,
        node: NodeId,
        x: VariableId,
        y: VariableId,
        negate: bool,
    ) -> Result<VariableId, AnalysisError> {
        let result = self.program.new_variable("is");
        let xs = self.program.bindings(x, node);
        let ys = self.program.bindings(y, node);
        for xb in &xs {
            for yb in &ys {
                let xd = self.program.binding_data(*xb);
                let yd = self.program.binding_data(*yb);
                let x_none = self.values.is_none(xd);
                let y_none = self.values.is_none(yd);
                let decided = if x_none && y_none {
                    Some(true)
                } else if (x_none && self.cannot_be_none(yd)) || (y_none && self.cannot_be_none(xd)) {
                    Some(false)
                } else {
                    None
                };
                let data = match decided {
                    Some(same) => self.bool_constant(same != negate)?,
                    None => self.bool_instance()?,
                };
                self.program.add_binding(result, data, [*xb, *yb], node);
            }
        }
        Ok(result)
    }

    fn cannot_be_none(&self, data: crate::typegraph::DataId) -> bool {
        match self.values.get(data) {
            AbstractValue::Unknown { .. } | AbstractValue::Unsolvable => false,
            AbstractValue::Instance(_) => !self.values.is_none(data),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_cover_every_operator() {
        assert_eq!(BINARY_OPERATORS.len(), 14);
        assert_eq!(BINARY_OPERATORS.get(&OpName::BinaryAdd), Some(&"__add__"));
        assert_eq!(INPLACE_OPERATORS.len(), 13);
        for (inplace, binary) in INPLACE_OPERATORS.values() {
            assert_eq!(inplace.replacen("__i", "__", 1), *binary);
        }
    }

    #[test]
    fn test_reflected_names() {
        assert_eq!(reflected("__add__").as_deref(), Some("__radd__"));
        assert_eq!(reflected("__floordiv__").as_deref(), Some("__rfloordiv__"));
        assert_eq!(reflected("__getitem__"), None);
    }

    #[test]
    fn test_comparison_methods() {
        assert_eq!(comparison_method(compare::LT), Some("__lt__"));
        assert_eq!(comparison_method(compare::IS), None);
        assert_eq!(comparison_method(compare::EXC_MATCH), None);
    }
}
