//! Frames and the per-path interpreter state.
//!
//! A [`FrameState`] is the state of one path through a function: the current
//! CFG node, the operand stack, the block stack and the active path
//! condition. States are values; opcode handlers take one and return the
//! next. A [`Frame`] holds what all paths through one invocation share.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pyflow_bytecode::{CodeObject, Opcode};

use crate::abstract_value::{NamespaceId, ValueStore};
use crate::error::AnalysisError;
use crate::typegraph::{BindingId, DataId, NodeId, Program, VariableId};

/// Why a path stopped executing the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Why {
    Return,
    Yield,
    Exception,
    Reraise,
    Break,
    Continue,
    /// The path condition cannot hold.
    Unsatisfiable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Loop,
    SetupExcept,
    Finally,
    With,
}

/// An entry of the block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    pub kind: BlockKind,
    /// Instruction that receives control when the block is unwound.
    pub handler: usize,
    /// Operand stack height when the block was entered.
    pub level: usize,
}

/// The exception a path is currently propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTriple {
    pub exc_type: VariableId,
    pub value: VariableId,
    pub traceback: VariableId,
}

/// Result of splitting a path on the truthiness of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Every visible binding agrees; the parent condition stays in force.
    Unrestricted,
    /// No visible binding agrees; the branch is dead.
    Unsatisfiable,
    /// Holds exactly when one of the agreeing bindings does.
    Binding(BindingId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub node: NodeId,
    pub stack: Vec<VariableId>,
    pub blocks: Vec<BlockRecord>,
    pub condition: Option<BindingId>,
    pub exception: Option<ExceptionTriple>,
    pub why: Option<Why>,
}

fn underflow(needed: usize, have: usize) -> AnalysisError {
    AnalysisError::StackUnderflow {
        opcode: String::new(),
        needed,
        have,
    }
}

impl FrameState {
    pub fn init(node: NodeId) -> Self {
        Self {
            node,
            stack: Vec::new(),
            blocks: Vec::new(),
            condition: None,
            exception: None,
            why: None,
        }
    }

    pub fn push(mut self, var: VariableId) -> Self {
        self.stack.push(var);
        self
    }

    pub fn push_all(mut self, vars: impl IntoIterator<Item = VariableId>) -> Self {
        self.stack.extend(vars);
        self
    }

    pub fn pop(mut self) -> Result<(Self, VariableId), AnalysisError> {
        match self.stack.pop() {
            Some(var) => Ok((self, var)),
            None => Err(underflow(1, 0)),
        }
    }

    pub fn pop_and_discard(self) -> Result<Self, AnalysisError> {
        self.pop().map(|(state, _)| state)
    }

    /// Pop `n` values. The result is in stack order, top last.
    pub fn popn(mut self, n: usize) -> Result<(Self, Vec<VariableId>), AnalysisError> {
        if self.stack.len() < n {
            return Err(underflow(n, self.stack.len()));
        }
        let at = self.stack.len() - n;
        let values = self.stack.split_off(at);
        Ok((self, values))
    }

    pub fn top(&self) -> Result<VariableId, AnalysisError> {
        self.peek(1)
    }

    /// The `n`-th value from the top, counting from 1.
    pub fn peek(&self, n: usize) -> Result<VariableId, AnalysisError> {
        if n == 0 || n > self.stack.len() {
            return Err(underflow(n, self.stack.len()));
        }
        Ok(self.stack[self.stack.len() - n])
    }

    /// Drop values above `level`.
    pub fn truncate(mut self, level: usize) -> Self {
        self.stack.truncate(level);
        self
    }

    pub fn push_block(mut self, kind: BlockKind, handler: usize) -> Self {
        let level = self.stack.len();
        self.blocks.push(BlockRecord {
            kind,
            handler,
            level,
        });
        self
    }

    pub fn pop_block(mut self) -> Result<(Self, BlockRecord), AnalysisError> {
        match self.blocks.pop() {
            Some(block) => Ok((self, block)),
            None => Err(AnalysisError::StackUnderflow {
                opcode: String::new(),
                needed: 1,
                have: 0,
            }),
        }
    }

    pub fn set_why(mut self, why: Option<Why>) -> Self {
        self.why = why;
        self
    }

    pub fn set_exception(mut self, exception: Option<ExceptionTriple>) -> Self {
        self.exception = exception;
        self
    }

    pub fn change_cfg_node(mut self, node: NodeId) -> Self {
        self.node = node;
        self
    }

    /// Narrow the path condition. `Unrestricted` keeps the current one.
    pub fn set_condition(mut self, condition: Condition) -> Self {
        match condition {
            Condition::Binding(b) => self.condition = Some(b),
            Condition::Unrestricted => {}
            Condition::Unsatisfiable => self.why = Some(Why::Unsatisfiable),
        }
        self
    }

    /// Move to a fresh successor node that carries the path condition.
    pub fn forward_cfg_node(mut self, program: &mut Program) -> Result<Self, AnalysisError> {
        let name = program.node(self.node).name.clone();
        self.node = program.connect_new(self.node, &name, self.condition)?;
        Ok(self)
    }

    /// Join two states reaching instruction `index`. Stack slots are merged
    /// position by position at a fresh node fed by both.
    pub fn merge_into(
        self,
        existing: FrameState,
        program: &mut Program,
        index: usize,
    ) -> Result<FrameState, AnalysisError> {
        check_compatible(&existing, &self, index)?;
        let join = program.new_node("join")?;
        program.connect(existing.node, join)?;
        program.connect(self.node, join)?;
        let mut stack = Vec::with_capacity(self.stack.len());
        for (a, b) in existing.stack.iter().zip(self.stack.iter()) {
            stack.push(program.merge_variables(join, "stack", &[*a, *b]));
        }
        let condition = if existing.condition == self.condition {
            existing.condition
        } else {
            None
        };
        Ok(FrameState {
            node: join,
            stack,
            blocks: existing.blocks,
            condition,
            exception: existing.exception.or(self.exception),
            why: None,
        })
    }
}

/// States meeting at one instruction must agree on stack and block shape.
pub fn check_compatible(a: &FrameState, b: &FrameState, index: usize) -> Result<(), AnalysisError> {
    if a.stack.len() != b.stack.len() {
        return Err(AnalysisError::StateMismatch {
            index,
            reason: format!("stack heights {} and {}", a.stack.len(), b.stack.len()),
        });
    }
    if a.blocks != b.blocks {
        return Err(AnalysisError::StateMismatch {
            index,
            reason: format!("block stacks of depth {} and {}", a.blocks.len(), b.blocks.len()),
        });
    }
    Ok(())
}

/// Conditions for the true and the false successor of a branch on `var`.
///
/// Each side that only some visible bindings agree with gets a fresh marker
/// binding, justified by each agreeing binding together with `parent`.
pub fn split_conditions(
    program: &mut Program,
    values: &ValueStore,
    node: NodeId,
    parent: Option<BindingId>,
    var: VariableId,
) -> (Condition, Condition) {
    let bindings = program.bindings(var, node);
    if bindings.is_empty() {
        return (Condition::Unrestricted, Condition::Unrestricted);
    }
    let mut sides = [Vec::new(), Vec::new()];
    for b in &bindings {
        let data = program.binding_data(*b);
        if values.compatible_with(program, data, true) {
            sides[0].push(*b);
        }
        if values.compatible_with(program, data, false) {
            sides[1].push(*b);
        }
    }
    let [truthy, falsy] = sides;
    let total = bindings.len();
    (
        make_condition(program, node, parent, truthy, total),
        make_condition(program, node, parent, falsy, total),
    )
}

fn make_condition(
    program: &mut Program,
    node: NodeId,
    parent: Option<BindingId>,
    agreeing: Vec<BindingId>,
    total: usize,
) -> Condition {
    if agreeing.is_empty() {
        return Condition::Unsatisfiable;
    }
    if agreeing.len() == total {
        return Condition::Unrestricted;
    }
    let marker = program.new_variable("condition");
    let mut result = None;
    for b in agreeing {
        let sources = std::iter::once(b).chain(parent);
        result = Some(program.add_binding(marker, DataId::MARKER, sources, node));
    }
    match result {
        Some(b) => Condition::Binding(b),
        None => Condition::Unrestricted,
    }
}

/// One invocation of a code object.
#[derive(Debug, Clone)]
pub struct Frame {
    pub code: Arc<CodeObject>,
    pub globals: NamespaceId,
    pub locals: NamespaceId,
    pub builtins: NamespaceId,
    /// Cell variables followed by free variables.
    pub cells: Vec<VariableId>,
    /// Entry states keyed by instruction index.
    pub states: HashMap<usize, FrameState>,
    /// Entry states of `finally` and `with` handlers reached by an
    /// exception, with the triple on top of the stack.
    pub handler_states: HashMap<usize, FrameState>,
    /// Block starts already interpreted.
    pub executed: HashSet<usize>,
    pub return_var: VariableId,
    pub yield_var: VariableId,
    pub current_op: Option<Opcode>,
}

impl Frame {
    pub fn name(&self) -> &str {
        &self.code.name
    }

    pub fn line(&self) -> u32 {
        self.current_op
            .as_ref()
            .map_or(self.code.first_line, |op| op.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_value::{AbstractValue, ClassOrigin, Class, Instance, PyValue};
    use pyflow_bytecode::Constant;
    use std::collections::BTreeMap;

    fn value(store: &mut ValueStore, constant: Constant) -> DataId {
        let cls = store.add(AbstractValue::Class(Class {
            name: "object".into(),
            bases: Vec::new(),
            members: BTreeMap::new(),
            mro: Vec::new(),
            template: Vec::new(),
            origin: ClassOrigin::Library,
        }));
        store.add(AbstractValue::Instance(Instance {
            cls,
            type_params: BTreeMap::new(),
            members: BTreeMap::new(),
            pyval: Some(PyValue::Constant(constant)),
        }))
    }

    #[test]
    fn test_stack_operations() {
        let mut program = Program::new(None);
        let n = program.new_node("n").unwrap();
        let a = program.new_variable("a");
        let b = program.new_variable("b");
        let c = program.new_variable("c");
        let state = FrameState::init(n).push(a).push(b).push(c);
        assert_eq!(state.top().unwrap(), c);
        assert_eq!(state.peek(3).unwrap(), a);
        assert!(state.peek(4).is_err());
        let (state, popped) = state.popn(2).unwrap();
        assert_eq!(popped, vec![b, c]);
        let (state, x) = state.pop().unwrap();
        assert_eq!(x, a);
        assert!(matches!(
            state.pop(),
            Err(AnalysisError::StackUnderflow { needed: 1, have: 0, .. })
        ));
    }

    #[test]
    fn test_block_stack() {
        let mut program = Program::new(None);
        let n = program.new_node("n").unwrap();
        let v = program.new_variable("v");
        let state = FrameState::init(n).push(v).push_block(BlockKind::Loop, 9);
        assert_eq!(state.blocks[0].level, 1);
        let (state, block) = state.pop_block().unwrap();
        assert_eq!(block.handler, 9);
        assert!(state.pop_block().is_err());
    }

    #[test]
    fn test_forward_keeps_condition() {
        let mut program = Program::new(None);
        let n = program.new_node("n").unwrap();
        let cond_var = program.new_variable("c");
        let cond = program.add_binding(cond_var, DataId::MARKER, [], n);
        let state = FrameState::init(n)
            .set_condition(Condition::Binding(cond))
            .forward_cfg_node(&mut program)
            .unwrap();
        assert_ne!(state.node, n);
        assert_eq!(program.node(state.node).condition, Some(cond));
        assert_eq!(program.node(state.node).incoming, vec![n]);
    }

    #[test]
    fn test_split_on_mixed_truthiness() {
        let mut program = Program::new(None);
        let n = program.new_node("n").unwrap();
        let mut store = ValueStore::new();
        let none = value(&mut store, Constant::None);
        let one = value(&mut store, Constant::Int(1));
        let x = program.new_variable("x");
        let bn = program.add_binding(x, none, [], n);
        let b1 = program.add_binding(x, one, [], n);
        let (t, f) = split_conditions(&mut program, &store, n, None, x);
        let (Condition::Binding(t), Condition::Binding(f)) = (t, f) else {
            panic!("expected marker conditions, got {:?} {:?}", t, f);
        };
        let then_node = program.connect_new(n, "then", Some(t)).unwrap();
        let else_node = program.connect_new(n, "else", Some(f)).unwrap();
        assert!(program.is_visible(b1, then_node));
        assert!(!program.is_visible(bn, then_node));
        assert!(program.is_visible(bn, else_node));
        assert!(!program.is_visible(b1, else_node));
    }

    #[test]
    fn test_split_uniform_and_dead() {
        let mut program = Program::new(None);
        let n = program.new_node("n").unwrap();
        let mut store = ValueStore::new();
        let one = value(&mut store, Constant::Int(1));
        let x = program.new_variable("x");
        program.add_binding(x, one, [], n);
        let (t, f) = split_conditions(&mut program, &store, n, None, x);
        assert_eq!(t, Condition::Unrestricted);
        assert_eq!(f, Condition::Unsatisfiable);
        let state = FrameState::init(n).set_condition(f);
        assert_eq!(state.why, Some(Why::Unsatisfiable));
    }

    #[test]
    fn test_merge_states() {
        let mut program = Program::new(None);
        let root = program.new_node("root").unwrap();
        let a = program.connect_new(root, "a", None).unwrap();
        let b = program.connect_new(root, "b", None).unwrap();
        let mut store = ValueStore::new();
        let one = value(&mut store, Constant::Int(1));
        let two = value(&mut store, Constant::Int(2));
        let va = program.new_variable("va");
        let vb = program.new_variable("vb");
        program.add_binding(va, one, [], a);
        program.add_binding(vb, two, [], b);
        let merged = FrameState::init(b)
            .push(vb)
            .merge_into(FrameState::init(a).push(va), &mut program, 4)
            .unwrap();
        assert_eq!(program.node(merged.node).incoming, vec![a, b]);
        let data = program.data(merged.stack[0], merged.node);
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_merge_rejects_mismatched_heights() {
        let mut program = Program::new(None);
        let n = program.new_node("n").unwrap();
        let v = program.new_variable("v");
        let err = FrameState::init(n)
            .push(v)
            .merge_into(FrameState::init(n), &mut program, 7)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::StateMismatch { index: 7, .. }));
    }
}
