use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::error::AnalysisError;

use super::solver::Solver;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

arena_id!(
    /// A node of the control-flow graph.
    NodeId
);
arena_id!(
    /// A variable: the set of values a program location may hold.
    VariableId
);
arena_id!(
    /// One candidate value of a variable.
    BindingId
);
arena_id!(
    /// An abstract value, owned by the interpreter's value store.
    DataId
);

impl DataId {
    /// Placeholder data carried by path-condition bindings.
    pub const MARKER: DataId = DataId(u32::MAX);
}

/// Bindings that must all be visible together.
pub type SourceSet = BTreeSet<BindingId>;

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub id: NodeId,
    pub name: String,
    pub incoming: Vec<NodeId>,
    pub outgoing: Vec<NodeId>,
    /// Path condition that must hold for a query to pass through this node.
    pub condition: Option<BindingId>,
    /// Variables that receive a binding at this node.
    assigned: HashSet<VariableId>,
}

impl CfgNode {
    pub fn assigns(&self, var: VariableId) -> bool {
        self.assigned.contains(&var)
    }
}

/// Where a binding becomes valid, and under which alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub node: NodeId,
    pub source_sets: Vec<SourceSet>,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub id: BindingId,
    pub variable: VariableId,
    pub data: DataId,
    pub origins: Vec<Origin>,
}

impl Binding {
    pub fn origin_at(&self, node: NodeId) -> Option<&Origin> {
        self.origins.iter().find(|o| o.node == node)
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub bindings: Vec<BindingId>,
    by_data: HashMap<DataId, BindingId>,
}

/// Owner of every node, variable and binding, plus the complexity counter.
#[derive(Debug, Clone)]
pub struct Program {
    nodes: Vec<CfgNode>,
    variables: Vec<Variable>,
    bindings: Vec<Binding>,
    entry: Option<NodeId>,
    cost: u64,
    limit: Option<u64>,
    tripped: bool,
}

impl Default for Program {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Program {
    /// An empty program. `limit` is the complexity ceiling, if any.
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            nodes: Vec::new(),
            variables: Vec::new(),
            bindings: Vec::new(),
            entry: None,
            cost: 0,
            limit,
            tripped: false,
        }
    }

    fn charge(&mut self, amount: u64) -> Result<(), AnalysisError> {
        let limit = self.limit.unwrap_or(u64::MAX);
        if self.tripped {
            return Err(AnalysisError::ComplexityLimit {
                limit,
                cost: self.cost,
            });
        }
        self.cost = self.cost.saturating_add(amount);
        if self.cost > limit {
            self.tripped = true;
            return Err(AnalysisError::ComplexityLimit {
                limit,
                cost: self.cost,
            });
        }
        Ok(())
    }

    /// Accumulated mutation cost.
    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn complexity_limit(&self) -> Option<u64> {
        self.limit
    }

    /// The first node ever created.
    pub fn entry(&self) -> Option<NodeId> {
        self.entry
    }

    pub fn new_node(&mut self, name: &str) -> Result<NodeId, AnalysisError> {
        self.charge(1)?;
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(CfgNode {
            id,
            name: name.to_string(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
            condition: None,
            assigned: HashSet::new(),
        });
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        Ok(id)
    }

    /// Add the edge `from -> to`. Existing edges are not duplicated.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), AnalysisError> {
        if self.nodes[from.index()].outgoing.contains(&to) {
            return Ok(());
        }
        let degree = self.nodes[from.index()].outgoing.len() as u64 + 1;
        self.charge(degree)?;
        self.nodes[from.index()].outgoing.push(to);
        self.nodes[to.index()].incoming.push(from);
        Ok(())
    }

    /// Create a successor of `from`, optionally guarded by `condition`.
    pub fn connect_new(
        &mut self,
        from: NodeId,
        name: &str,
        condition: Option<BindingId>,
    ) -> Result<NodeId, AnalysisError> {
        let node = self.new_node(name)?;
        self.nodes[node.index()].condition = condition;
        self.connect(from, node)?;
        Ok(node)
    }

    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[CfgNode] {
        &self.nodes
    }

    pub fn set_condition(&mut self, node: NodeId, condition: Option<BindingId>) {
        self.nodes[node.index()].condition = condition;
    }

    pub fn new_variable(&mut self, name: &str) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(Variable {
            id,
            name: name.to_string(),
            bindings: Vec::new(),
            by_data: HashMap::new(),
        });
        id
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.index()]
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.bindings[id.index()]
    }

    /// Bind `data` to `var`, valid from `at` under `source_set`. Binding the
    /// same data twice adds an origin to the existing binding.
    pub fn add_binding(
        &mut self,
        var: VariableId,
        data: DataId,
        source_set: impl IntoIterator<Item = BindingId>,
        at: NodeId,
    ) -> BindingId {
        let existing = self.variables[var.index()].by_data.get(&data).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = BindingId(self.bindings.len() as u32);
                self.bindings.push(Binding {
                    id,
                    variable: var,
                    data,
                    origins: Vec::new(),
                });
                let variable = &mut self.variables[var.index()];
                variable.bindings.push(id);
                variable.by_data.insert(data, id);
                id
            }
        };
        self.add_origin(id, at, source_set);
        id
    }

    pub fn add_origin(
        &mut self,
        binding: BindingId,
        at: NodeId,
        source_set: impl IntoIterator<Item = BindingId>,
    ) {
        let source_set: SourceSet = source_set.into_iter().collect();
        let b = &mut self.bindings[binding.index()];
        match b.origins.iter_mut().find(|o| o.node == at) {
            Some(origin) => {
                if !origin.source_sets.contains(&source_set) {
                    origin.source_sets.push(source_set);
                }
            }
            None => b.origins.push(Origin {
                node: at,
                source_sets: vec![source_set],
            }),
        }
        let var = b.variable;
        self.nodes[at.index()].assigned.insert(var);
    }

    /// Copy every binding of `src` into `dst`, each justified by the binding
    /// it was copied from.
    pub fn paste_variable(&mut self, dst: VariableId, src: VariableId, at: NodeId) {
        if dst == src {
            return;
        }
        let sources = self.variables[src.index()].bindings.clone();
        for b in sources {
            let data = self.bindings[b.index()].data;
            self.add_binding(dst, data, [b], at);
        }
    }

    /// Join combinator. A single input (or identical inputs) is returned as
    /// is; otherwise the result is a fresh variable with all inputs pasted.
    pub fn merge_variables(
        &mut self,
        at: NodeId,
        name: &str,
        vars: &[VariableId],
    ) -> VariableId {
        let mut unique: Vec<VariableId> = Vec::with_capacity(vars.len());
        for v in vars {
            if !unique.contains(v) {
                unique.push(*v);
            }
        }
        match unique.as_slice() {
            [] => self.new_variable(name),
            [only] => *only,
            _ => {
                let merged = self.new_variable(name);
                for v in unique {
                    self.paste_variable(merged, v, at);
                }
                merged
            }
        }
    }

    /// Every binding of `var`, regardless of position.
    pub fn all_bindings(&self, var: VariableId) -> &[BindingId] {
        &self.variables[var.index()].bindings
    }

    pub fn all_data(&self, var: VariableId) -> Vec<DataId> {
        self.all_bindings(var)
            .iter()
            .map(|b| self.bindings[b.index()].data)
            .collect()
    }

    pub fn binding_data(&self, binding: BindingId) -> DataId {
        self.bindings[binding.index()].data
    }

    /// The bindings of `var` visible at `node`.
    pub fn bindings(&self, var: VariableId, node: NodeId) -> Vec<BindingId> {
        let mut solver = Solver::new(self);
        self.variables[var.index()]
            .bindings
            .iter()
            .copied()
            .filter(|b| solver.solve([*b], node))
            .collect()
    }

    /// The data of the bindings of `var` visible at `node`.
    pub fn data(&self, var: VariableId, node: NodeId) -> Vec<DataId> {
        self.bindings(var, node)
            .into_iter()
            .map(|b| self.bindings[b.index()].data)
            .collect()
    }

    pub fn is_visible(&self, binding: BindingId, node: NodeId) -> bool {
        Solver::new(self).solve([binding], node)
    }

    /// Whether all of `bindings` can be visible at `node` at the same time.
    pub fn can_have_combination(
        &self,
        bindings: impl IntoIterator<Item = BindingId>,
        node: NodeId,
    ) -> bool {
        Solver::new(self).solve(bindings, node)
    }

    /// Plain graph reachability along outgoing edges.
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(n) = queue.pop_front() {
            if n == to {
                return true;
            }
            if seen.insert(n) {
                queue.extend(self.nodes[n.index()].outgoing.iter().copied());
            }
        }
        false
    }
}
