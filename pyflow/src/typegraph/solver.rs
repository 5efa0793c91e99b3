//! Backwards search answering "can these bindings hold together here".
//!
//! A state is a position plus a set of goal bindings. At each position the
//! goals that originate there are replaced by one of their source sets;
//! the remaining goals are carried to the predecessors, except across nodes
//! that overwrite one of their variables. Two goals on the same variable
//! never hold together.

use std::collections::HashMap;

use super::program::{BindingId, NodeId, Program, SourceSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Memo {
    InProgress,
    Done(bool),
}

/// One query episode. Memoized results are only valid while the program is
/// not mutated, so a solver borrows the program immutably.
pub(super) struct Solver<'a> {
    program: &'a Program,
    memo: HashMap<(NodeId, SourceSet), Memo>,
    hit_cycle: bool,
}

impl<'a> Solver<'a> {
    pub(super) fn new(program: &'a Program) -> Self {
        Self {
            program,
            memo: HashMap::new(),
            hit_cycle: false,
        }
    }

    /// Whether all `goals` can be visible at `pos` simultaneously.
    pub(super) fn solve(&mut self, goals: impl IntoIterator<Item = BindingId>, pos: NodeId) -> bool {
        let goals: SourceSet = goals.into_iter().collect();
        self.arrive(pos, goals)
    }

    /// Enter `pos`: its path condition becomes a goal.
    fn arrive(&mut self, pos: NodeId, mut goals: SourceSet) -> bool {
        if let Some(condition) = self.program.node(pos).condition {
            goals.insert(condition);
        }
        self.find(pos, goals)
    }

    fn find(&mut self, pos: NodeId, goals: SourceSet) -> bool {
        if goals.is_empty() {
            return true;
        }
        let key = (pos, goals);
        match self.memo.get(&key) {
            Some(Memo::Done(answer)) => return *answer,
            Some(Memo::InProgress) => {
                self.hit_cycle = true;
                return false;
            }
            None => {}
        }
        self.memo.insert(key.clone(), Memo::InProgress);

        let outer_cycle = std::mem::replace(&mut self.hit_cycle, false);
        let answer = self.step(key.0, &key.1);
        if answer || !self.hit_cycle {
            self.memo.insert(key, Memo::Done(answer));
        } else {
            self.memo.remove(&key);
        }
        self.hit_cycle |= outer_cycle;
        answer
    }

    fn step(&mut self, pos: NodeId, goals: &SourceSet) -> bool {
        let pending: Vec<BindingId> = goals.iter().copied().collect();
        self.settle(pos, pending, Vec::new(), SourceSet::new())
    }

    /// Justify every goal that originates at `pos` by one of its source sets,
    /// transitively, then carry the rest to the predecessors. All goals seen
    /// at this position must be free of conflicts.
    fn settle(
        &mut self,
        pos: NodeId,
        mut pending: Vec<BindingId>,
        settled: Vec<BindingId>,
        mut remaining: SourceSet,
    ) -> bool {
        let program = self.program;
        while let Some(goal) = pending.pop() {
            if settled.contains(&goal) || remaining.contains(&goal) {
                continue;
            }
            match program.binding(goal).origin_at(pos) {
                Some(origin) => {
                    for sources in &origin.source_sets {
                        let mut next_pending = pending.clone();
                        next_pending.extend(sources.iter().copied());
                        let mut next_settled = settled.clone();
                        next_settled.push(goal);
                        if self.settle(pos, next_pending, next_settled, remaining.clone()) {
                            return true;
                        }
                    }
                    return false;
                }
                None => {
                    remaining.insert(goal);
                }
            }
        }

        if self.conflicting(settled.iter().chain(remaining.iter())) {
            return false;
        }
        if remaining.is_empty() {
            return true;
        }
        for &pred in &program.node(pos).incoming {
            if self.blocked(pred, &remaining) {
                continue;
            }
            if self.arrive(pred, remaining.clone()) {
                return true;
            }
        }
        false
    }

    /// Two goals on the same variable can never hold at once.
    fn conflicting<'b>(&self, goals: impl Iterator<Item = &'b BindingId>) -> bool {
        let mut seen = Vec::new();
        for g in goals {
            let var = self.program.binding(*g).variable;
            if seen.contains(&var) {
                return true;
            }
            seen.push(var);
        }
        false
    }

    /// `node` overwrites the variable of some goal with another binding.
    fn blocked(&self, node: NodeId, goals: &SourceSet) -> bool {
        let n = self.program.node(node);
        goals.iter().any(|g| {
            let binding = self.program.binding(*g);
            n.assigns(binding.variable) && binding.origin_at(node).is_none()
        })
    }
}
