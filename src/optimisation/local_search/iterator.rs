use std::rc::Rc;

use log::debug;

use crate::basic_types::BopSolution;
use crate::basic_types::ConstraintIndex;
use crate::basic_types::HashSet;
use crate::basic_types::KeyedVec;
use crate::basic_types::TermIndex;
use crate::bop_assert_simple;
use crate::engine::sat::Literal;
use crate::engine::ProblemState;
use crate::optimisation::local_search::AssignmentAndConstraintFeasibilityMaintainer;
use crate::optimisation::local_search::OneFlipConstraintRepairer;
use crate::optimisation::local_search::SatWrapper;
use crate::optimisation::local_search::INIT_TERM;
use crate::optimisation::local_search::INVALID_CONSTRAINT;
use crate::optimisation::local_search::INVALID_TERM;

/// Keys of the transposition table hold at most this many decisions; deeper
/// states are not pruned. Enlarging this requires enlarging the key encoding
/// as well.
const STORED_MAX_DECISIONS: usize = 4;

/// A node of the local-search tree: which constraint the decision repairs and
/// which of its terms is flipped.
#[derive(Clone, Copy, Debug)]
struct SearchNode {
    constraint: ConstraintIndex,
    term_index: TermIndex,
}

/// Iterates on all assignments reachable from the reference solution by
/// deliberately flipping at most `max_num_decisions` variables; each decision
/// repairs one currently-broken constraint. Propagation may flip more
/// variables than that.
///
/// The iteration is resumable: `initial_term_index` remembers where each
/// constraint's scan started so that work is not repeated across `optimize`
/// calls, and [`LocalSearchAssignmentIterator::synchronize_sat_wrapper`]
/// replays the saved search path after the shared SAT propagator moved.
#[derive(Debug)]
pub(crate) struct LocalSearchAssignmentIterator {
    max_num_decisions: usize,
    max_num_broken_constraints: usize,
    better_solution_has_been_found: bool,
    maintainer: AssignmentAndConstraintFeasibilityMaintainer,
    repairer: OneFlipConstraintRepairer,
    search_nodes: Vec<SearchNode>,
    initial_term_index: KeyedVec<ConstraintIndex, TermIndex>,

    use_transposition_table: bool,
    use_potential_one_flip_repairs: bool,

    /// For each set of explored decisions, the sorted zero-padded signed
    /// literals, so that e.g. decisions (a, b) and (b, a) are tried once.
    /// Different decision sets can still reach identical assignments; those
    /// are not detected.
    transposition_table: HashSet<[i32; STORED_MAX_DECISIONS]>,

    tmp_propagated_literals: Vec<Literal>,

    num_nodes: i64,
    num_skipped_nodes: i64,
    num_improvements: i64,
    num_improvements_by_one_flip_repairs: i64,
    num_inspected_one_flip_repairs: i64,
}

impl Drop for LocalSearchAssignmentIterator {
    fn drop(&mut self) {
        debug!(
            "LS {} num improvements: {} ({} by one flip repairs, {} inspected)",
            self.max_num_decisions,
            self.num_improvements,
            self.num_improvements_by_one_flip_repairs,
            self.num_inspected_one_flip_repairs
        );
    }
}

impl LocalSearchAssignmentIterator {
    pub(crate) fn new(
        problem_state: &ProblemState,
        max_num_decisions: usize,
        max_num_broken_constraints: usize,
    ) -> Self {
        let problem = problem_state.problem();
        let maintainer = AssignmentAndConstraintFeasibilityMaintainer::new(Rc::clone(problem));
        let num_constraints = maintainer.num_constraints();
        LocalSearchAssignmentIterator {
            max_num_decisions,
            max_num_broken_constraints,
            better_solution_has_been_found: false,
            maintainer,
            repairer: OneFlipConstraintRepairer::new(problem),
            search_nodes: vec![],
            initial_term_index: KeyedVec::from_elem(INIT_TERM, num_constraints),
            use_transposition_table: false,
            use_potential_one_flip_repairs: false,
            transposition_table: HashSet::default(),
            tmp_propagated_literals: vec![],
            num_nodes: 0,
            num_skipped_nodes: 0,
            num_improvements: 0,
            num_improvements_by_one_flip_repairs: 0,
            num_inspected_one_flip_repairs: 0,
        }
    }

    pub(crate) fn use_transposition_table(&mut self, value: bool) {
        self.use_transposition_table = value;
    }

    pub(crate) fn use_potential_one_flip_repairs(&mut self, value: bool) {
        self.use_potential_one_flip_repairs = value;
    }

    pub(crate) fn better_solution_has_been_found(&self) -> bool {
        self.better_solution_has_been_found
    }

    pub(crate) fn last_reference_assignment(&self) -> &BopSolution {
        self.maintainer.reference()
    }

    /// Restarts the search from the state's best solution. Only call this
    /// when the problem state changed.
    pub(crate) fn synchronize(&mut self, problem_state: &ProblemState) {
        self.better_solution_has_been_found = false;
        self.maintainer
            .set_reference_solution(problem_state.solution());
        for node in &self.search_nodes {
            self.initial_term_index[node.constraint] = node.term_index;
        }
        self.search_nodes.clear();
        self.transposition_table.clear();
        self.num_nodes = 0;
        self.num_skipped_nodes = 0;
    }

    /// Re-synchronizes with the shared SAT propagator after someone else used
    /// it: backtrack everything, apply the propagator trail, then replay the
    /// saved path up to the first decision that is no longer valid.
    pub(crate) fn synchronize_sat_wrapper(&mut self, sat_wrapper: &mut SatWrapper<'_>) {
        bop_assert_simple!(!self.better_solution_has_been_found);
        let saved_path = std::mem::take(&mut self.search_nodes);
        sat_wrapper.backtrack_all();
        self.maintainer.backtrack_all();

        // The sat trail contains the fixed variables. They will almost always
        // be at the same value in the reference solution, but since the
        // objective may be over-constrained in the solver, some variables can
        // have been propagated to other values.
        self.maintainer.assign(&sat_wrapper.full_sat_trail());

        for node in saved_path {
            if !self.repairer.repair_is_valid(
                &self.maintainer,
                sat_wrapper.sat_assignment(),
                node.constraint,
                node.term_index,
            ) {
                break;
            }
            self.search_nodes.push(node);
            let flip = self
                .repairer
                .get_flip(&self.maintainer, node.constraint, node.term_index);
            self.apply_decision(sat_wrapper, flip);
        }
    }

    /// Moves to the next assignment. Returns false when the whole
    /// neighbourhood has been explored.
    pub(crate) fn next_assignment(&mut self, sat_wrapper: &mut SatWrapper<'_>) -> bool {
        if sat_wrapper.is_model_unsat() {
            return false;
        }
        if self.maintainer.is_feasible() {
            self.use_current_state_as_reference(sat_wrapper);
            return true;
        }

        // Potential one-flip repairs are only inspected at the bottom of the
        // search tree; trying them at every level did not pay off.
        if self.use_potential_one_flip_repairs
            && self.search_nodes.len() == self.max_num_decisions
        {
            let repairs: Vec<Literal> = self.maintainer.potential_one_flip_repairs().to_vec();
            for literal in repairs {
                if sat_wrapper.sat_assignment().literal_is_assigned(literal) {
                    continue;
                }
                self.num_inspected_one_flip_repairs += 1;

                // Temporarily apply the potential repair and see if it works.
                self.apply_decision(sat_wrapper, literal);
                if self.maintainer.is_feasible() {
                    self.num_improvements_by_one_flip_repairs += 1;
                    self.use_current_state_as_reference(sat_wrapper);
                    return true;
                }
                self.maintainer.backtrack_one_level();
                sat_wrapper.backtrack_one_level();
            }
        }

        // If possible, go deeper, i.e. take one more decision. Otherwise
        // backtrack to the first node that still has an untried repair and
        // move to it.
        if !self.go_deeper(sat_wrapper) {
            self.backtrack(sat_wrapper);
        }

        // All nodes have been explored.
        if self.search_nodes.is_empty() {
            debug!(
                "LS finished. #explored:{} #stored:{} #skipped:{}",
                self.num_nodes,
                self.transposition_table.len(),
                self.num_skipped_nodes
            );
            return false;
        }

        // Apply the decision of the new top node.
        let node = *self.search_nodes.last().unwrap();
        let flip = self
            .repairer
            .get_flip(&self.maintainer, node.constraint, node.term_index);
        self.apply_decision(sat_wrapper, flip);
        true
    }

    /// Called when a better solution has been found, to restart the search
    /// from this new "root".
    fn use_current_state_as_reference(&mut self, sat_wrapper: &mut SatWrapper<'_>) {
        self.better_solution_has_been_found = true;
        self.maintainer.use_current_state_as_reference();
        sat_wrapper.backtrack_all();

        for node in &self.search_nodes {
            self.initial_term_index[node.constraint] = node.term_index;
        }
        self.search_nodes.clear();
        self.transposition_table.clear();
        self.num_nodes = 0;
        self.num_skipped_nodes = 0;
        self.num_improvements += 1;
    }

    /// Applies the decision, automatically following the backjumps the SAT
    /// propagator performs on conflict.
    fn apply_decision(&mut self, sat_wrapper: &mut SatWrapper<'_>, literal: Literal) {
        self.num_nodes += 1;
        let num_backtracks =
            sat_wrapper.apply_decision(literal, &mut self.tmp_propagated_literals);

        // Sync the maintainer with SAT.
        if num_backtracks == 0 {
            self.maintainer.add_backtracking_level();
            self.maintainer.assign(&self.tmp_propagated_literals);
        } else {
            bop_assert_simple!(num_backtracks <= self.search_nodes.len() + 1);

            // Only backtrack num_backtracks - 1 levels, as the last decision
            // has not been pushed to the maintainer yet.
            for _ in 0..num_backtracks - 1 {
                self.maintainer.backtrack_one_level();
            }
            self.maintainer.assign(&self.tmp_propagated_literals);
            self.search_nodes
                .truncate(self.search_nodes.len().saturating_sub(num_backtracks));
        }
    }

    fn transposition_table_key(&self) -> [i32; STORED_MAX_DECISIONS] {
        let mut key = [0; STORED_MAX_DECISIONS];
        for (slot, node) in key.iter_mut().zip(&self.search_nodes) {
            // Negated because this variable is already flipped, so get_flip
            // returns the old value.
            *slot = -self
                .repairer
                .get_flip(&self.maintainer, node.constraint, node.term_index)
                .signed_value();
        }
        key
    }

    /// Whether the current decisions plus the new one were already explored.
    fn new_state_is_in_transposition_table(&mut self, literal: Literal) -> bool {
        if self.search_nodes.len() + 1 > STORED_MAX_DECISIONS {
            return false;
        }
        let mut key = self.transposition_table_key();
        key[self.search_nodes.len()] = literal.signed_value();
        key[..self.search_nodes.len() + 1].sort_unstable();
        if self.transposition_table.contains(&key) {
            self.num_skipped_nodes += 1;
            true
        } else {
            false
        }
    }

    /// Inserts the current set of decisions in the transposition table.
    fn insert_in_transposition_table(&mut self) {
        if self.search_nodes.len() > STORED_MAX_DECISIONS {
            return;
        }
        let mut key = self.transposition_table_key();
        key[..self.search_nodes.len()].sort_unstable();
        let _ = self.transposition_table.insert(key);
    }

    /// Looks for the next repairing term of the given constraint, skipping
    /// states present in the transposition table, and pushes it as a search
    /// node. A term index of [`INVALID_TERM`] means the constraint is
    /// explored for the first time.
    fn enqueue_next_repairing_term_if_any(
        &mut self,
        sat_wrapper: &SatWrapper<'_>,
        ct_to_repair: ConstraintIndex,
        mut term_index: TermIndex,
    ) -> bool {
        if term_index == self.initial_term_index[ct_to_repair] {
            return false;
        }
        if term_index == INVALID_TERM {
            term_index = self.initial_term_index[ct_to_repair];
        }
        loop {
            term_index = self.repairer.next_repairing_term(
                &self.maintainer,
                sat_wrapper.sat_assignment(),
                ct_to_repair,
                self.initial_term_index[ct_to_repair],
                term_index,
            );
            if term_index == INVALID_TERM {
                return false;
            }
            let flip = self
                .repairer
                .get_flip(&self.maintainer, ct_to_repair, term_index);
            if !self.use_transposition_table || !self.new_state_is_in_transposition_table(flip) {
                self.search_nodes.push(SearchNode {
                    constraint: ct_to_repair,
                    term_index,
                });
                return true;
            }
            if term_index == self.initial_term_index[ct_to_repair] {
                return false;
            }
        }
    }

    /// Adds one more decision repairing an infeasible constraint. Returns
    /// false when the depth or broken-constraint budget is exhausted, or no
    /// constraint is repairable in one flip.
    fn go_deeper(&mut self, sat_wrapper: &SatWrapper<'_>) -> bool {
        if self.search_nodes.len() >= self.max_num_decisions {
            return false;
        }
        if self.maintainer.num_infeasible_constraints() as usize
            > self.max_num_broken_constraints
        {
            return false;
        }
        let ct_to_repair = self
            .repairer
            .constraint_to_repair(&self.maintainer, sat_wrapper.sat_assignment());
        if ct_to_repair == INVALID_CONSTRAINT {
            return false;
        }
        self.enqueue_next_repairing_term_if_any(sat_wrapper, ct_to_repair, INVALID_TERM)
    }

    /// Backtracks to the first node with an untried repair and moves it to
    /// the next one. Fully explored prefixes go into the transposition table
    /// so the same decision sets are not revisited.
    fn backtrack(&mut self, sat_wrapper: &mut SatWrapper<'_>) {
        while let Some(last_node) = self.search_nodes.last().copied() {
            if self.use_transposition_table {
                self.insert_in_transposition_table();
            }
            let _ = self.search_nodes.pop();
            self.maintainer.backtrack_one_level();
            sat_wrapper.backtrack_one_level();
            if self.enqueue_next_repairing_term_if_any(
                sat_wrapper,
                last_node.constraint,
                last_node.term_index,
            ) {
                return;
            }
        }
    }
}
