//! Incremental totalizer encoding of cardinality sums, as used by the
//! core-guided optimizer.
//!
//! An [`EncodingNode`] represents a number in `[lb, ub]` through consecutive
//! Boolean literals, `literal(i)` meaning "the number is greater than
//! `lb + i`". Leaves wrap one objective literal; internal nodes represent the
//! sum of their two children and are materialized lazily, literal by literal,
//! as the search needs them.
//!
//! Nodes live in an arena ([`EncodingNodeRepository`]) and reference each
//! other by index, keeping the merge DAG free of ownership cycles.
//!
//! This is roughly based on the cardinality encoding described in:
//! Bailleux and Boufkhad, "Efficient CNF Encoding of Boolean Cardinality
//! Constraints", CP 2003.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;

use crate::bop_assert_simple;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;
use crate::engine::sat::SatSolver;

/// Index of a node inside the [`EncodingNodeRepository`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NodeIndex(pub(crate) usize);

#[derive(Clone, Debug)]
pub(crate) struct EncodingNode {
    depth: i32,
    lb: i32,
    ub: i32,
    for_sorting: BooleanVariable,

    /// The weight only applies to literals at index `weight_lb` or beyond.
    weight_lb: i32,
    weight: i64,

    child_a: Option<NodeIndex>,
    child_b: Option<NodeIndex>,

    /// The active literals, in order; `literals[i]` means "the represented
    /// number is > lb + i". Consecutive literals are linked by monotone
    /// binary clauses at creation.
    literals: Vec<Literal>,
}

impl EncodingNode {
    /// A node of size one formed by the given literal.
    fn literal_node(literal: Literal) -> Self {
        EncodingNode {
            depth: 0,
            lb: 0,
            ub: 1,
            for_sorting: literal.variable(),
            weight_lb: 0,
            weight: 0,
            child_a: None,
            child_b: None,
            literals: vec![literal],
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.literals.len()
    }

    pub(crate) fn literal(&self, i: usize) -> Literal {
        self.literals[i]
    }

    /// A literal meaning "this node's number is > i"; `i` must be in
    /// `[lb, current_ub)`.
    pub(crate) fn greater_than(&self, i: i32) -> Literal {
        self.literal((i - self.lb) as usize)
    }

    pub(crate) fn lb(&self) -> i32 {
        self.lb
    }

    pub(crate) fn ub(&self) -> i32 {
        self.ub
    }

    pub(crate) fn current_ub(&self) -> i32 {
        self.lb + self.literals.len() as i32
    }

    pub(crate) fn depth(&self) -> i32 {
        self.depth
    }

    pub(crate) fn weight(&self) -> i64 {
        self.weight
    }

    pub(crate) fn set_weight(&mut self, weight: i64) {
        bop_assert_simple!(weight >= 0);
        self.weight_lb = self.lb;
        self.weight = weight;
    }

    /// The assumption literal of this node: the negation of its first
    /// unfixed "greater than" literal.
    pub(crate) fn assumption_literal(&self) -> Literal {
        let first = (self.weight_lb - self.lb).max(0) as usize;
        !self.literal(first)
    }

    /// Removes the left-side literals fixed to true, increasing `lb`, and the
    /// right-side literals fixed to false, decreasing `ub`. Returns the
    /// number of left pops; the caller accumulates `pops * weight` into the
    /// objective lower bound.
    pub(crate) fn reduce(&mut self, solver: &SatSolver) -> i64 {
        let mut num_pops = 0;
        while num_pops < self.literals.len()
            && solver.assignment().literal_is_true(self.literals[num_pops])
        {
            num_pops += 1;
            self.lb += 1;
        }
        self.literals.drain(..num_pops);
        while self
            .literals
            .last()
            .is_some_and(|&literal| solver.assignment().literal_is_false(literal))
        {
            let _ = self.literals.pop();
            self.ub = self.lb + self.literals.len() as i32;
        }
        num_pops as i64
    }

    /// Force-falses every literal whose weight contribution would exceed the
    /// gap. The index `gap / weight` uses integer division on purpose.
    pub(crate) fn apply_weight_upper_bound(&mut self, gap: i64, solver: &mut SatSolver) {
        bop_assert_simple!(self.weight > 0);
        let num_allowed = (self.weight_lb - self.lb).max(0) as i64 + gap / self.weight;
        if self.size() as i64 <= num_allowed {
            return;
        }
        for i in (num_allowed.max(0) as usize)..self.size() {
            let _ = solver.add_unit_clause(!self.literals[i]);
        }
        self.literals.truncate(num_allowed.max(0) as usize);
        self.ub = self.lb + self.literals.len() as i32;
    }

    /// Creates one new literal, increasing `current_ub`. Returns false when
    /// the node is already at its upper bound.
    fn increase_current_ub(&mut self, solver: &mut SatSolver) -> bool {
        if self.current_ub() == self.ub {
            return false;
        }
        let variable = BooleanVariable(solver.num_variables() as u32);
        solver.set_num_variables(solver.num_variables() + 1);
        let literal = Literal::new(variable, true);
        if let Some(&previous) = self.literals.last() {
            let _ = solver.add_binary_clause(!literal, previous);
        }
        self.literals.push(literal);
        true
    }
}

/// Owns every [`EncodingNode`]; merges reference nodes by [`NodeIndex`].
#[derive(Debug, Default)]
pub(crate) struct EncodingNodeRepository {
    nodes: Vec<EncodingNode>,
}

impl std::ops::Index<NodeIndex> for EncodingNodeRepository {
    type Output = EncodingNode;
    fn index(&self, index: NodeIndex) -> &EncodingNode {
        &self.nodes[index.0]
    }
}

impl std::ops::IndexMut<NodeIndex> for EncodingNodeRepository {
    fn index_mut(&mut self, index: NodeIndex) -> &mut EncodingNode {
        &mut self.nodes[index.0]
    }
}

impl EncodingNodeRepository {
    pub(crate) fn add_literal_node(&mut self, literal: Literal, weight: i64) -> NodeIndex {
        let mut node = EncodingNode::literal_node(literal);
        node.set_weight(weight);
        self.push(node)
    }

    fn push(&mut self, node: EncodingNode) -> NodeIndex {
        self.nodes.push(node);
        NodeIndex(self.nodes.len() - 1)
    }

    /// Merges two nodes lazily: a single literal `z0` is created for the
    /// parent, linked by `!a0 => z0`, `!b0 => z0` and `z0 => a0 or b0`.
    /// Growth is deferred to [`EncodingNodeRepository::increase_node_size`].
    pub(crate) fn lazy_merge(
        &mut self,
        a: NodeIndex,
        b: NodeIndex,
        solver: &mut SatSolver,
    ) -> NodeIndex {
        let variable = BooleanVariable(solver.num_variables() as u32);
        solver.set_num_variables(solver.num_variables() + 1);
        let z0 = Literal::new(variable, true);

        let node = {
            let node_a = &self[a];
            let node_b = &self[b];
            EncodingNode {
                depth: 1 + node_a.depth.max(node_b.depth),
                lb: node_a.lb + node_b.lb,
                ub: node_a.ub + node_b.ub,
                // Merging nodes of the same depth in order seems to help.
                for_sorting: node_a.for_sorting.min(node_b.for_sorting),
                weight_lb: 0,
                weight: 0,
                child_a: Some(a),
                child_b: Some(b),
                literals: vec![z0],
            }
        };
        let a0 = self[a].literal(0);
        let b0 = self[b].literal(0);
        let _ = solver.add_binary_clause(!a0, z0);
        let _ = solver.add_binary_clause(!b0, z0);
        let _ = solver.add_ternary_clause(!z0, a0, b0);
        self.push(node)
    }

    /// Fully materializes the merge of `a` and `b` up to `upper_bound`
    /// literals, with all the linking clauses. Children literals beyond the
    /// bound are unit-fixed to false.
    pub(crate) fn full_merge(
        &mut self,
        upper_bound: i64,
        a: NodeIndex,
        b: NodeIndex,
        solver: &mut SatSolver,
    ) -> NodeIndex {
        let a_size = self[a].size();
        let b_size = self[b].size();
        let size = ((a_size + b_size) as i64).min(upper_bound) as usize;
        bop_assert_simple!(size > 0);

        // The parent literals, with the monotone chain z_{i} => z_{i-1}.
        let first_variable = solver.num_variables();
        solver.set_num_variables(first_variable + size);
        let literals: Vec<Literal> = (0..size)
            .map(|i| Literal::new(BooleanVariable((first_variable + i) as u32), true))
            .collect();
        for i in 1..size {
            let _ = solver.add_binary_clause(literals[i - 1], !literals[i]);
        }

        let node = {
            let node_a = &self[a];
            let node_b = &self[b];
            EncodingNode {
                depth: 1 + node_a.depth.max(node_b.depth),
                lb: node_a.lb + node_b.lb,
                ub: node_a.lb + node_b.lb + size as i32,
                for_sorting: BooleanVariable(first_variable as u32),
                weight_lb: 0,
                weight: 0,
                child_a: Some(a),
                child_b: Some(b),
                literals,
            }
        };

        for ia in 0..a_size {
            let a_literal = self[a].literal(ia);
            if ia + b_size < size {
                let _ = solver.add_binary_clause(!node.literals[ia + b_size], a_literal);
            }
            if ia < size {
                let _ = solver.add_binary_clause(node.literals[ia], !a_literal);
            } else {
                // Fixed to false because of the given upper bound.
                let _ = solver.add_unit_clause(!a_literal);
            }
        }
        for ib in 0..b_size {
            let b_literal = self[b].literal(ib);
            if ib + a_size < size {
                let _ = solver.add_binary_clause(!node.literals[ib + a_size], b_literal);
            }
            if ib < size {
                let _ = solver.add_binary_clause(node.literals[ib], !b_literal);
            } else {
                let _ = solver.add_unit_clause(!b_literal);
            }
        }
        for ia in 0..a_size {
            for ib in 0..b_size {
                let a_literal = self[a].literal(ia);
                let b_literal = self[b].literal(ib);
                if ia + ib < size {
                    // x <= ia and y <= ib implies x + y <= ia + ib.
                    let _ = solver.add_ternary_clause(
                        !node.literals[ia + ib],
                        a_literal,
                        b_literal,
                    );
                }
                if ia + ib + 1 < size {
                    // x > ia and y > ib implies x + y > ia + ib + 1.
                    let _ = solver.add_ternary_clause(
                        node.literals[ia + ib + 1],
                        !a_literal,
                        !b_literal,
                    );
                } else {
                    let _ = solver.add_binary_clause(!a_literal, !b_literal);
                }
            }
        }
        self.push(node)
    }

    /// Grows the node by one literal, recursively growing the children as
    /// needed and posting the linking clauses of the new target index. Only
    /// the upward-propagating side of the encoding is posted; the downward
    /// side was measured to hurt.
    pub(crate) fn increase_node_size(&mut self, node: NodeIndex, solver: &mut SatSolver) {
        if !self.increase_current_ub_of(node, solver) {
            return;
        }
        let mut to_process = vec![node];
        while let Some(n) = to_process.pop() {
            let a = self[n].child_a.expect("a grown node has children");
            let b = self[n].child_b.expect("a grown node has children");
            bop_assert_simple!(self[n].size() >= 2);
            let target = self[n].current_ub() - 1;

            // Grow a child when its reach no longer covers the new target.
            if self[a].current_ub() != self[a].ub()
                && self[a].current_ub() - 1 + self[b].lb() < target
            {
                let grown = self.increase_current_ub_of(a, solver);
                bop_assert_simple!(grown);
                to_process.push(a);
            }
            if self[b].current_ub() != self[b].ub()
                && self[b].current_ub() - 1 + self[a].lb() < target
            {
                let grown = self.increase_current_ub_of(b, solver);
                bop_assert_simple!(grown);
                to_process.push(b);
            }

            // Wire the new literal of n with its two children.
            let n_target = self[n].greater_than(target);
            let (a_lb, a_current_ub) = (self[a].lb(), self[a].current_ub());
            let (b_lb, b_current_ub) = (self[b].lb(), self[b].current_ub());
            for ia in a_lb..a_current_ub {
                let ib = target - ia;
                let a_greater = self[a].greater_than(ia);
                if ib - 1 == b_lb - 1 {
                    let _ = solver.add_binary_clause(n_target, !a_greater);
                }
                if (ib - 1) >= b_lb && (ib - 1) < b_current_ub {
                    // x > ia and y > ib - 1 implies x + y > ia + ib.
                    let _ = solver.add_ternary_clause(
                        n_target,
                        !a_greater,
                        !self[b].greater_than(ib - 1),
                    );
                }
            }
            // Case ia = a.lb - 1: a > ia always holds.
            {
                let ib = target - (a_lb - 1);
                if ib - 1 == b_lb - 1 {
                    let _ = solver.add_unit_clause(n_target);
                }
                if (ib - 1) >= b_lb && (ib - 1) < b_current_ub {
                    let _ = solver.add_binary_clause(n_target, !self[b].greater_than(ib - 1));
                }
            }
            // Case ia = a.ub: a > ia never holds.
            {
                let ib = target - self[a].ub();
                if ib == self[b].ub() {
                    let _ = solver.add_unit_clause(!n_target);
                }
            }
        }
    }

    /// Merges all nodes two by two in queue order using full merges; the
    /// returned node encodes the total sum.
    pub(crate) fn merge_all_nodes_with_deque(
        &mut self,
        upper_bound: i64,
        nodes: &[NodeIndex],
        solver: &mut SatSolver,
    ) -> NodeIndex {
        let mut queue: VecDeque<NodeIndex> = nodes.iter().copied().collect();
        while queue.len() > 1 {
            let a = queue.pop_front().unwrap();
            let b = queue.pop_front().unwrap();
            let merged = self.full_merge(upper_bound, a, b, solver);
            queue.push_back(merged);
        }
        queue.pop_front().expect("at least one node to merge")
    }

    /// Merges all nodes with lazy merges, pairing shallow nodes first so the
    /// resulting tree is Huffman-shaped.
    pub(crate) fn lazy_merge_all_with_pq(
        &mut self,
        nodes: &[NodeIndex],
        solver: &mut SatSolver,
    ) -> NodeIndex {
        // Order: shallowest first, ties by oldest (smallest first variable).
        let mut heap: BinaryHeap<Reverse<(i32, u32, usize)>> = nodes
            .iter()
            .map(|&n| Reverse((self[n].depth(), self[n].for_sorting.0, n.0)))
            .collect();
        while heap.len() > 1 {
            let Reverse((_, _, a)) = heap.pop().unwrap();
            let Reverse((_, _, b)) = heap.pop().unwrap();
            let merged = self.lazy_merge(NodeIndex(a), NodeIndex(b), solver);
            heap.push(Reverse((
                self[merged].depth(),
                self[merged].for_sorting.0,
                merged.0,
            )));
        }
        let Reverse((_, _, root)) = heap.pop().expect("at least one node to merge");
        NodeIndex(root)
    }
}

impl EncodingNodeRepository {
    fn increase_current_ub_of(&mut self, index: NodeIndex, solver: &mut SatSolver) -> bool {
        self.nodes[index.0].increase_current_ub(solver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(num_leaves: usize) -> (EncodingNodeRepository, SatSolver, Vec<NodeIndex>) {
        let mut solver = SatSolver::default();
        solver.set_num_variables(num_leaves);
        let mut repository = EncodingNodeRepository::default();
        let leaves: Vec<NodeIndex> = (0..num_leaves)
            .map(|i| {
                repository
                    .add_literal_node(Literal::new(BooleanVariable(i as u32), true), 1)
            })
            .collect();
        (repository, solver, leaves)
    }

    #[test]
    fn full_merge_literals_are_monotone_under_propagation() {
        let (mut repository, mut solver, leaves) = setup(2);
        let merged = repository.full_merge(2, leaves[0], leaves[1], &mut solver);
        assert_eq!(repository[merged].size(), 2);

        // literal(1) implies literal(0) by unit propagation.
        let high = repository[merged].literal(1);
        let low = repository[merged].literal(0);
        assert!(solver.add_unit_clause(high));
        assert!(solver.assignment().literal_is_true(low));
    }

    #[test]
    fn full_merge_counts_true_leaves() {
        let (mut repository, mut solver, leaves) = setup(2);
        let merged = repository.full_merge(2, leaves[0], leaves[1], &mut solver);

        assert!(solver.add_unit_clause(Literal::new(BooleanVariable(0), true)));
        assert!(solver.add_unit_clause(Literal::new(BooleanVariable(1), true)));
        // Both leaves are true: the sum is > 1.
        assert!(solver
            .assignment()
            .literal_is_true(repository[merged].literal(1)));
    }

    #[test]
    fn lazy_merge_grows_one_literal_at_a_time() {
        let (mut repository, mut solver, leaves) = setup(2);
        let merged = repository.lazy_merge(leaves[0], leaves[1], &mut solver);
        assert_eq!(repository[merged].size(), 1);
        assert_eq!(repository[merged].ub(), 2);

        repository.increase_node_size(merged, &mut solver);
        assert_eq!(repository[merged].size(), 2);

        // With both leaves true, both counting literals propagate to true.
        assert!(solver.add_unit_clause(Literal::new(BooleanVariable(0), true)));
        assert!(solver.add_unit_clause(Literal::new(BooleanVariable(1), true)));
        assert!(solver
            .assignment()
            .literal_is_true(repository[merged].literal(0)));
        assert!(solver
            .assignment()
            .literal_is_true(repository[merged].literal(1)));
    }

    #[test]
    fn reduce_pops_fixed_literals_on_both_sides() {
        let (mut repository, mut solver, leaves) = setup(2);
        let merged = repository.full_merge(2, leaves[0], leaves[1], &mut solver);

        assert!(solver.add_unit_clause(Literal::new(BooleanVariable(0), true)));
        assert!(solver.add_unit_clause(Literal::new(BooleanVariable(1), false)));
        // One leaf true: literal(0) is true, literal(1) is false.
        let pops = repository[merged].clone().reduce(&solver);
        assert_eq!(pops, 1);

        let node = &mut repository[merged];
        let _ = node.reduce(&solver);
        assert_eq!(node.lb(), 1);
        assert_eq!(node.ub(), 1);
        assert_eq!(node.size(), 0);
    }

    #[test]
    fn reduce_on_an_all_true_node_pops_everything() {
        let (mut repository, mut solver, leaves) = setup(2);
        let merged = repository.full_merge(2, leaves[0], leaves[1], &mut solver);
        assert!(solver.add_unit_clause(repository[merged].literal(1)));

        let node = &mut repository[merged];
        assert_eq!(node.reduce(&solver), 2);
        assert_eq!(node.size(), 0);
        assert_eq!(node.lb(), 2);
    }

    #[test]
    fn apply_weight_upper_bound_of_zero_fixes_everything_false() {
        let (mut repository, mut solver, leaves) = setup(2);
        let merged = repository.full_merge(2, leaves[0], leaves[1], &mut solver);
        repository[merged].set_weight(2);

        let literals: Vec<Literal> =
            (0..2).map(|i| repository[merged].literal(i)).collect();
        repository[merged].apply_weight_upper_bound(0, &mut solver);
        assert_eq!(repository[merged].size(), 0);
        for literal in literals {
            assert!(solver.assignment().literal_is_false(literal));
        }
    }

    #[test]
    fn huffman_merge_pairs_shallow_nodes_first() {
        let (mut repository, mut solver, leaves) = setup(3);
        let root = repository.lazy_merge_all_with_pq(&leaves, &mut solver);
        // Three leaves: two merge at depth 1, the pair merges with the last
        // leaf at depth 2.
        assert_eq!(repository[root].depth(), 2);
        assert_eq!(repository[root].ub(), 3);
    }
}

