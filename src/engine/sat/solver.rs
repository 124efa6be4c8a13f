use rand::Rng;
use rand::SeedableRng;

use crate::basic_types::BinaryClause;
use crate::basic_types::BinaryClauseManager;
use crate::basic_types::KeyedVec;
use crate::basic_types::Random;
use crate::bop_assert_simple;
use crate::engine::sat::canonicalize_upper_bounded;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::ClauseAllocator;
use crate::engine::sat::ClauseReference;
use crate::engine::sat::ClauseWatcher;
use crate::engine::sat::LinearConstraintId;
use crate::engine::sat::Literal;
use crate::engine::sat::LiteralWithCoeff;
use crate::engine::sat::Polarity;
use crate::engine::sat::SatParameters;
use crate::engine::sat::UpperBoundedLinearConstraint;
use crate::engine::sat::VariableOrder;
use crate::engine::sat::VariablesAssignment;
use crate::engine::TimeLimit;

/// Outcome of a [`SatSolver::solve`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SatSolverStatus {
    /// A full assignment satisfying every constraint was found. It stays
    /// readable through [`SatSolver::assignment`] until the next backtrack.
    Feasible,
    /// The problem is unsatisfiable regardless of assumptions.
    Infeasible,
    /// The fixed assumptions cannot be extended to a full solution; a core is
    /// available through [`SatSolver::last_incompatible_decisions`].
    AssumptionsUnsat,
    /// The conflict or time budget ran out first.
    LimitReached,
}

/// Why a trail literal holds.
#[derive(Clone, Copy, Debug)]
enum Reason {
    Decision,
    /// A root-level fact (unit clause or learned unit).
    Unit,
    Clause(ClauseReference),
    Linear(LinearConstraintId),
}

#[derive(Clone, Copy, Debug)]
enum ConflictCause {
    Clause(ClauseReference),
    Linear(LinearConstraintId),
}

enum LearnOutcome {
    /// Carries the trail size right after the backjump, i.e. the position
    /// from which the re-propagated literals start.
    Learned(usize),
    RootUnsat,
    AssumptionsConflict,
}

const UNASSIGNED_POSITION: usize = usize::MAX;

/// A conflict-driven SAT solver over clauses and linear pseudo-Boolean
/// constraints, supporting incremental use: constraints can be added at the
/// root between solves, assumptions can be fixed, and unsat cores extracted.
///
/// Conflict analysis collects the decisions reachable from the conflict
/// through propagation reasons and learns their negation, backjumping to the
/// second-highest decision level involved.
#[derive(Debug)]
pub(crate) struct SatSolver {
    assignment: VariablesAssignment,
    trail: Vec<Literal>,
    trail_reasons: Vec<Reason>,
    /// Position of each assigned variable in the trail.
    trail_positions: Vec<usize>,
    /// Trail size at the time each decision was pushed.
    decision_level_starts: Vec<usize>,
    decisions: Vec<Literal>,
    next_position_to_propagate: usize,

    clause_allocator: ClauseAllocator,
    watch_lists: KeyedVec<Literal, Vec<ClauseWatcher>>,

    linear_constraints: Vec<UpperBoundedLinearConstraint>,
    /// For each literal, the linear constraints whose activity grows when the
    /// literal becomes true, with the coefficient.
    linear_occurrences: KeyedVec<Literal, Vec<(LinearConstraintId, i64)>>,

    parameters: SatParameters,
    preferences: Vec<Option<(bool, f64)>>,
    saved_phases: Vec<Option<bool>>,

    /// Decision levels at or below this boundary are assumptions; a conflict
    /// that only involves them ends the solve with [`SatSolverStatus::AssumptionsUnsat`].
    assumption_level: usize,
    last_incompatible_decisions: Vec<Literal>,

    is_model_unsat: bool,
    num_failures: i64,
    work_counter: u64,

    binary_clause_manager: BinaryClauseManager,
}

impl Default for SatSolver {
    fn default() -> Self {
        SatSolver {
            assignment: VariablesAssignment::default(),
            trail: vec![],
            trail_reasons: vec![],
            trail_positions: vec![],
            decision_level_starts: vec![],
            decisions: vec![],
            next_position_to_propagate: 0,
            clause_allocator: ClauseAllocator::default(),
            watch_lists: KeyedVec::default(),
            linear_constraints: vec![],
            linear_occurrences: KeyedVec::default(),
            parameters: SatParameters::default(),
            preferences: vec![],
            saved_phases: vec![],
            assumption_level: 0,
            last_incompatible_decisions: vec![],
            is_model_unsat: false,
            num_failures: 0,
            work_counter: 0,
            binary_clause_manager: BinaryClauseManager::default(),
        }
    }
}

impl SatSolver {
    pub(crate) fn num_variables(&self) -> usize {
        self.assignment.num_variables()
    }

    pub(crate) fn set_num_variables(&mut self, num_variables: usize) {
        bop_assert_simple!(num_variables >= self.num_variables());
        self.assignment.grow_to(num_variables);
        self.trail_positions.resize(num_variables, UNASSIGNED_POSITION);
        self.preferences.resize(num_variables, None);
        self.saved_phases.resize(num_variables, None);
        while self.watch_lists.len() < 2 * num_variables {
            // Once for each polarity.
            let _ = self.watch_lists.push(vec![]);
            let _ = self.linear_occurrences.push(vec![]);
        }
    }

    pub(crate) fn assignment(&self) -> &VariablesAssignment {
        &self.assignment
    }

    pub(crate) fn is_model_unsat(&self) -> bool {
        self.is_model_unsat
    }

    pub(crate) fn num_failures(&self) -> i64 {
        self.num_failures
    }

    /// A reproducible proxy for the time spent in this solver, roughly
    /// proportional to the number of inspected watchers and updated linear
    /// terms. The order of magnitude is close to seconds.
    pub(crate) fn deterministic_time(&self) -> f64 {
        5e-8 * self.work_counter as f64
    }

    pub(crate) fn parameters(&self) -> &SatParameters {
        &self.parameters
    }

    pub(crate) fn set_parameters(&mut self, parameters: SatParameters) {
        self.parameters = parameters;
    }

    pub(crate) fn current_decision_level(&self) -> usize {
        self.decisions.len()
    }

    pub(crate) fn literal_trail(&self) -> &[Literal] {
        &self.trail
    }

    /// The root-level part of the trail, i.e. the literals fixed regardless
    /// of any decision.
    pub(crate) fn root_literals(&self) -> &[Literal] {
        match self.decision_level_starts.first() {
            Some(&first_decision) => &self.trail[..first_decision],
            None => &self.trail,
        }
    }

    pub(crate) fn assumption_level(&self) -> usize {
        self.assumption_level
    }

    /// Marks every current decision level as an assumption; conflicts that
    /// only involve those levels report [`SatSolverStatus::AssumptionsUnsat`]
    /// instead of backjumping past them.
    pub(crate) fn set_assumption_level(&mut self, level: usize) {
        bop_assert_simple!(level <= self.current_decision_level());
        self.assumption_level = level;
    }

    pub(crate) fn restore_to_assumption_level(&mut self) {
        self.backtrack(self.assumption_level);
    }

    /// The subset of assumptions involved in the last assumptions conflict,
    /// in the order they were assumed.
    pub(crate) fn last_incompatible_decisions(&self) -> Vec<Literal> {
        self.last_incompatible_decisions.clone()
    }

    pub(crate) fn set_assignment_preference(&mut self, literal: Literal, weight: f64) {
        let var = literal.variable();
        if var.index() < self.preferences.len() {
            self.preferences[var.index()] = Some((literal.is_positive(), weight));
        }
    }

    pub(crate) fn all_preferences(&self) -> Vec<(Literal, f64)> {
        self.preferences
            .iter()
            .enumerate()
            .filter_map(|(index, preference)| {
                preference.map(|(polarity, weight)| {
                    (Literal::new(BooleanVariable(index as u32), polarity), weight)
                })
            })
            .collect()
    }

    /// Clears assignment preferences and saved phases.
    pub(crate) fn reset_decision_heuristic(&mut self) {
        self.preferences.iter_mut().for_each(|p| *p = None);
        self.saved_phases.iter_mut().for_each(|p| *p = None);
    }

    pub(crate) fn newly_added_binary_clauses(&self) -> Vec<BinaryClause> {
        self.binary_clause_manager.newly_added().to_vec()
    }

    pub(crate) fn clear_newly_added_binary_clauses(&mut self) {
        self.binary_clause_manager.clear_newly_added();
    }
}

/// Constraint addition. All of these must be called with the solver
/// backtracked to the root.
impl SatSolver {
    pub(crate) fn add_unit_clause(&mut self, literal: Literal) -> bool {
        bop_assert_simple!(self.current_decision_level() == 0);
        if self.is_model_unsat {
            return false;
        }
        if self.assignment.literal_is_true(literal) {
            return true;
        }
        if self.assignment.literal_is_false(literal) {
            self.is_model_unsat = true;
            return false;
        }
        self.enqueue(literal, Reason::Unit);
        if let Err(_cause) = self.propagate() {
            self.is_model_unsat = true;
            return false;
        }
        true
    }

    pub(crate) fn add_binary_clause(&mut self, a: Literal, b: Literal) -> bool {
        self.add_problem_clause(vec![a, b])
    }

    pub(crate) fn add_binary_clauses(&mut self, clauses: &[BinaryClause]) -> bool {
        for clause in clauses {
            if !self.add_binary_clause(clause.a, clause.b) {
                return false;
            }
        }
        true
    }

    pub(crate) fn add_ternary_clause(&mut self, a: Literal, b: Literal, c: Literal) -> bool {
        self.add_problem_clause(vec![a, b, c])
    }

    pub(crate) fn add_problem_clause(&mut self, literals: Vec<Literal>) -> bool {
        bop_assert_simple!(self.current_decision_level() == 0);
        if self.is_model_unsat {
            return false;
        }

        // Root-level preprocessing: drop false literals, drop the clause if
        // already satisfied, deduplicate, detect tautologies.
        let mut preprocessed: Vec<Literal> = vec![];
        for literal in literals {
            if self.assignment.literal_is_true(literal) {
                return true;
            }
            if self.assignment.literal_is_false(literal) {
                continue;
            }
            if preprocessed.contains(&!literal) {
                return true;
            }
            if !preprocessed.contains(&literal) {
                preprocessed.push(literal);
            }
        }

        match preprocessed.len() {
            0 => {
                self.is_model_unsat = true;
                false
            }
            1 => self.add_unit_clause(preprocessed[0]),
            _ => {
                if preprocessed.len() == 2 {
                    let _ = self
                        .binary_clause_manager
                        .add(BinaryClause::new(preprocessed[0], preprocessed[1]));
                }
                let reference = self.clause_allocator.create_clause(preprocessed, false);
                self.start_watching_clause(reference);
                true
            }
        }
    }

    /// Adds `lower_bound <= sum terms <= upper_bound`. Each finite side is
    /// canonicalized to an upper-bounded constraint over positive
    /// coefficients. Returns false when the solver becomes unsat.
    pub(crate) fn add_linear_constraint(
        &mut self,
        lower_bound: Option<i64>,
        upper_bound: Option<i64>,
        terms: Vec<LiteralWithCoeff>,
    ) -> bool {
        bop_assert_simple!(self.current_decision_level() == 0);
        if self.is_model_unsat {
            return false;
        }
        if let Some(upper_bound) = upper_bound {
            let (canonical, rhs) = canonicalize_upper_bounded(&terms, upper_bound);
            if !self.add_canonical_constraint(canonical, rhs) {
                return false;
            }
        }
        if let Some(lower_bound) = lower_bound {
            // sum >= lb is -sum <= -lb.
            let negated: Vec<LiteralWithCoeff> = terms
                .iter()
                .map(|term| LiteralWithCoeff::new(term.literal, -term.coefficient))
                .collect();
            let (canonical, rhs) = canonicalize_upper_bounded(&negated, -lower_bound);
            if !self.add_canonical_constraint(canonical, rhs) {
                return false;
            }
        }
        true
    }

    fn add_canonical_constraint(&mut self, mut terms: Vec<LiteralWithCoeff>, mut rhs: i64) -> bool {
        // Simplify against the root assignment and force the literals whose
        // coefficient exceeds the bound, to a fixed point since forcing one
        // may propagate others.
        let mut remaining: Vec<LiteralWithCoeff> = vec![];
        loop {
            let mut changed = false;
            remaining.clear();
            for term in &terms {
                if self.assignment.literal_is_true(term.literal) {
                    rhs -= term.coefficient;
                    changed = true;
                } else if self.assignment.literal_is_false(term.literal) {
                    changed = true;
                } else {
                    remaining.push(*term);
                }
            }
            if rhs < 0 {
                self.is_model_unsat = true;
                return false;
            }
            while remaining.first().is_some_and(|term| term.coefficient > rhs) {
                let term = remaining.remove(0);
                if !self.add_unit_clause(!term.literal) {
                    return false;
                }
                changed = true;
            }
            if !changed {
                break;
            }
            terms = std::mem::take(&mut remaining);
        }

        let total: i64 = remaining.iter().map(|term| term.coefficient).sum();
        if total <= rhs {
            return true;
        }

        // A cardinality bound of size - 1 is the clause of the negations.
        if remaining.iter().all(|term| term.coefficient == 1)
            && rhs == remaining.len() as i64 - 1
        {
            let negations = remaining.iter().map(|term| !term.literal).collect();
            return self.add_problem_clause(negations);
        }

        let id = LinearConstraintId(self.linear_constraints.len() as u32);
        for term in &remaining {
            self.linear_occurrences[term.literal].push((id, term.coefficient));
        }
        self.linear_constraints.push(UpperBoundedLinearConstraint {
            terms: remaining,
            rhs,
            activity: 0,
        });
        if self.propagate_linear_constraint(id).is_err() || self.propagate().is_err() {
            self.is_model_unsat = true;
            return false;
        }
        true
    }

    fn start_watching_clause(&mut self, clause_reference: ClauseReference) {
        let clause = self.clause_allocator.get_clause(clause_reference);
        let first = clause[0];
        let second = clause[1];
        self.watch_lists[first].push(ClauseWatcher {
            cached_literal: second,
            clause_reference,
        });
        self.watch_lists[second].push(ClauseWatcher {
            cached_literal: first,
            clause_reference,
        });
    }
}

/// Propagation.
impl SatSolver {
    fn enqueue(&mut self, literal: Literal, reason: Reason) {
        self.assignment.assign(literal);
        self.trail_positions[literal.variable().index()] = self.trail.len();
        self.trail.push(literal);
        self.trail_reasons.push(reason);
        // The activity bookkeeping happens on enqueue/unassign so that it
        // stays consistent whatever point propagation stops at.
        for occurrence_index in 0..self.linear_occurrences[literal].len() {
            let (id, coefficient) = self.linear_occurrences[literal][occurrence_index];
            self.linear_constraints[id.0 as usize].activity += coefficient;
        }
    }

    /// Enqueues a propagated literal; returns false when it is already false.
    fn enqueue_propagated(&mut self, literal: Literal, reason: Reason) -> bool {
        if self.assignment.literal_is_true(literal) {
            return true;
        }
        if self.assignment.literal_is_false(literal) {
            return false;
        }
        self.enqueue(literal, reason);
        true
    }

    fn propagate(&mut self) -> Result<(), ConflictCause> {
        while self.next_position_to_propagate < self.trail.len() {
            let true_literal = self.trail[self.next_position_to_propagate];
            self.propagate_clauses(true_literal)?;
            self.propagate_linear(true_literal)?;
            self.next_position_to_propagate += 1;
        }
        Ok(())
    }

    /// Two-watched-literal scheme: clauses watching the negation of the newly
    /// true literal look for a replacement watch, propagate, or conflict.
    fn propagate_clauses(&mut self, true_literal: Literal) -> Result<(), ConflictCause> {
        let watched_literal = !true_literal;
        let mut end_index = 0;
        let mut current_index = 0;
        while current_index < self.watch_lists[watched_literal].len() {
            self.work_counter += 1;
            let mut watcher = self.watch_lists[watched_literal][current_index];
            if self.assignment.literal_is_true(watcher.cached_literal) {
                // The clause is satisfied, no need to look at its memory.
                self.watch_lists[watched_literal][end_index] = watcher;
                current_index += 1;
                end_index += 1;
                continue;
            }

            let clause_reference = watcher.clause_reference;
            {
                // Place the falsified literal at position 1 for simplicity.
                let clause = self.clause_allocator.get_mutable_clause(clause_reference);
                if clause[0] == watched_literal {
                    clause[0] = clause[1];
                    clause[1] = watched_literal;
                }
            }

            let first = self.clause_allocator.get_clause(clause_reference)[0];
            if self.assignment.literal_is_true(first) {
                watcher.cached_literal = first;
                self.watch_lists[watched_literal][end_index] = watcher;
                current_index += 1;
                end_index += 1;
                continue;
            }

            // Look for a non-falsified literal to take over the watch.
            let clause_len = self.clause_allocator.get_clause(clause_reference).len();
            let mut found_new_watch = false;
            for i in 2..clause_len {
                let candidate = self.clause_allocator.get_clause(clause_reference)[i];
                if !self.assignment.literal_is_false(candidate) {
                    let clause = self.clause_allocator.get_mutable_clause(clause_reference);
                    clause[1] = candidate;
                    clause[i] = watched_literal;
                    self.watch_lists[candidate].push(ClauseWatcher {
                        cached_literal: first,
                        clause_reference,
                    });
                    found_new_watch = true;
                    break;
                }
            }
            if found_new_watch {
                // The clause leaves this watch list.
                current_index += 1;
                continue;
            }

            // All other literals are false: propagate or conflict.
            self.watch_lists[watched_literal][end_index] = watcher;
            current_index += 1;
            end_index += 1;
            if !self.enqueue_propagated(first, Reason::Clause(clause_reference)) {
                // Keep the remaining watchers before reporting the conflict.
                while current_index < self.watch_lists[watched_literal].len() {
                    self.watch_lists[watched_literal][end_index] =
                        self.watch_lists[watched_literal][current_index];
                    current_index += 1;
                    end_index += 1;
                }
                self.watch_lists[watched_literal].truncate(end_index);
                return Err(ConflictCause::Clause(clause_reference));
            }
        }
        self.watch_lists[watched_literal].truncate(end_index);
        Ok(())
    }

    fn propagate_linear(&mut self, true_literal: Literal) -> Result<(), ConflictCause> {
        for occurrence_index in 0..self.linear_occurrences[true_literal].len() {
            let (id, _) = self.linear_occurrences[true_literal][occurrence_index];
            self.work_counter += 1;
            self.propagate_linear_constraint(id)?;
        }
        Ok(())
    }

    fn propagate_linear_constraint(&mut self, id: LinearConstraintId) -> Result<(), ConflictCause> {
        let slack = self.linear_constraints[id.0 as usize].slack();
        if slack < 0 {
            return Err(ConflictCause::Linear(id));
        }
        for term_index in 0..self.linear_constraints[id.0 as usize].terms.len() {
            let term = self.linear_constraints[id.0 as usize].terms[term_index];
            if term.coefficient <= slack {
                // Terms are sorted by decreasing coefficient.
                break;
            }
            self.work_counter += 1;
            if !self.assignment.literal_is_assigned(term.literal)
                && !self.enqueue_propagated(!term.literal, Reason::Linear(id))
            {
                return Err(ConflictCause::Linear(id));
            }
        }
        Ok(())
    }
}

/// Backtracking, conflict analysis and learning.
impl SatSolver {
    pub(crate) fn backtrack(&mut self, target_level: usize) {
        bop_assert_simple!(target_level <= self.current_decision_level());
        if target_level == self.current_decision_level() {
            return;
        }
        let target_trail_size = self.decision_level_starts[target_level];
        for position in (target_trail_size..self.trail.len()).rev() {
            let literal = self.trail[position];
            for occurrence_index in 0..self.linear_occurrences[literal].len() {
                let (id, coefficient) = self.linear_occurrences[literal][occurrence_index];
                self.linear_constraints[id.0 as usize].activity -= coefficient;
            }
            let value = self.assignment.unassign(literal.variable());
            self.saved_phases[literal.variable().index()] = Some(value);
            self.trail_positions[literal.variable().index()] = UNASSIGNED_POSITION;
        }
        self.trail.truncate(target_trail_size);
        self.trail_reasons.truncate(target_trail_size);
        self.decision_level_starts.truncate(target_level);
        self.decisions.truncate(target_level);
        self.next_position_to_propagate = self.trail.len();
        if self.assumption_level > target_level {
            self.assumption_level = target_level;
        }
    }

    fn decision_level_of_position(&self, trail_position: usize) -> usize {
        // Number of decisions pushed at or before this trail position.
        self.decision_level_starts
            .partition_point(|&start| start <= trail_position)
    }

    /// Collects the decisions reachable from the conflict through the reasons
    /// of the propagated literals, in increasing trail order.
    fn analyze_conflict(&self, cause: ConflictCause) -> Vec<Literal> {
        let mut marked = vec![false; self.num_variables()];
        self.mark_cause_variables(&mut marked, cause);

        let mut involved_decisions = vec![];
        for position in (0..self.trail.len()).rev() {
            let literal = self.trail[position];
            if !marked[literal.variable().index()] {
                continue;
            }
            match self.trail_reasons[position] {
                Reason::Decision => involved_decisions.push(literal),
                Reason::Unit => {}
                Reason::Clause(reference) => {
                    for &clause_literal in self.clause_allocator.get_clause(reference).literals() {
                        if clause_literal.variable() != literal.variable() {
                            marked[clause_literal.variable().index()] = true;
                        }
                    }
                }
                Reason::Linear(id) => {
                    for term in &self.linear_constraints[id.0 as usize].terms {
                        if self.assignment.literal_is_true(term.literal)
                            && self.trail_positions[term.literal.variable().index()] < position
                        {
                            marked[term.literal.variable().index()] = true;
                        }
                    }
                }
            }
        }
        involved_decisions.reverse();
        involved_decisions
    }

    fn mark_cause_variables(&self, marked: &mut [bool], cause: ConflictCause) {
        match cause {
            ConflictCause::Clause(reference) => {
                for &literal in self.clause_allocator.get_clause(reference).literals() {
                    marked[literal.variable().index()] = true;
                }
            }
            ConflictCause::Linear(id) => {
                for term in &self.linear_constraints[id.0 as usize].terms {
                    if self.assignment.literal_is_true(term.literal) {
                        marked[term.literal.variable().index()] = true;
                    }
                }
            }
        }
    }

    /// Learns from the conflict and backjumps. On `Learned`, the negation of
    /// the highest involved decision has been propagated at the backjump
    /// level.
    fn learn_and_backjump(&mut self, cause: ConflictCause) -> LearnOutcome {
        self.num_failures += 1;
        let involved_decisions = self.analyze_conflict(cause);

        if involved_decisions.is_empty() {
            self.is_model_unsat = true;
            self.backtrack(0);
            return LearnOutcome::RootUnsat;
        }

        let highest = *involved_decisions.last().unwrap();
        let highest_level =
            self.decision_level_of_position(self.trail_positions[highest.variable().index()]);
        if highest_level <= self.assumption_level {
            // Every involved decision is an assumption. A singleton means the
            // assumption conflicts with the root facts alone, so its negation
            // is a global consequence worth fixing right away.
            if involved_decisions.len() == 1 {
                let decision = involved_decisions[0];
                self.last_incompatible_decisions = involved_decisions;
                self.backtrack(0);
                let _ = self.add_unit_clause(!decision);
                return LearnOutcome::AssumptionsConflict;
            }
            self.last_incompatible_decisions = involved_decisions;
            self.restore_to_assumption_level();
            return LearnOutcome::AssumptionsConflict;
        }

        let second_highest_level = involved_decisions[..involved_decisions.len() - 1]
            .iter()
            .map(|decision| {
                self.decision_level_of_position(self.trail_positions[decision.variable().index()])
            })
            .max()
            .unwrap_or(0);
        let target_level = second_highest_level.max(self.assumption_level);
        self.backtrack(target_level);
        let trail_size_after_backjump = self.trail.len();

        if involved_decisions.len() == 1 {
            if target_level == 0 {
                if !self.add_unit_clause(!highest) {
                    return LearnOutcome::RootUnsat;
                }
            } else {
                let _ = self.enqueue_propagated(!highest, Reason::Unit);
            }
            return LearnOutcome::Learned(trail_size_after_backjump);
        }

        // Order the learned clause so that the asserting literal and the
        // highest remaining decision hold the watches.
        let mut learned: Vec<Literal> = vec![!highest];
        learned.extend(
            involved_decisions[..involved_decisions.len() - 1]
                .iter()
                .rev()
                .map(|&decision| !decision),
        );
        if learned.len() == 2 {
            let _ = self
                .binary_clause_manager
                .add(BinaryClause::new(learned[0], learned[1]));
        }
        let reference = self.clause_allocator.create_clause(learned, true);
        self.start_watching_clause(reference);
        let _ = self.enqueue_propagated(!highest, Reason::Clause(reference));
        LearnOutcome::Learned(trail_size_after_backjump)
    }

    /// Applies the decision that makes the given literal true, propagates,
    /// and resolves any conflicts by learning and backjumping. Returns the
    /// trail index from which the newly propagated literals start.
    pub(crate) fn enqueue_decision_and_backjump_on_conflict(
        &mut self,
        decision_literal: Literal,
    ) -> usize {
        bop_assert_simple!(!self.is_model_unsat);
        bop_assert_simple!(!self.assignment.literal_is_assigned(decision_literal));

        let mut first_new_index = self.trail.len();
        self.decision_level_starts.push(self.trail.len());
        self.decisions.push(decision_literal);
        self.enqueue(decision_literal, Reason::Decision);

        while let Err(cause) = self.propagate() {
            match self.learn_and_backjump(cause) {
                LearnOutcome::Learned(trail_size_after_backjump) => {
                    // The backjump popped part of the trail; report from there.
                    first_new_index = first_new_index.min(trail_size_after_backjump);
                }
                LearnOutcome::RootUnsat | LearnOutcome::AssumptionsConflict => {
                    return self.trail.len();
                }
            }
        }
        first_new_index
    }
}

/// Solving.
impl SatSolver {
    pub(crate) fn solve(&mut self, time_limit: &TimeLimit) -> SatSolverStatus {
        self.solve_internal(time_limit)
    }

    /// Backtracks everything, fixes the given assumptions (each becoming one
    /// decision level) and solves. On [`SatSolverStatus::AssumptionsUnsat`]
    /// the core is available in
    /// [`SatSolver::last_incompatible_decisions`].
    pub(crate) fn reset_and_solve_with_given_assumptions(
        &mut self,
        assumptions: &[Literal],
        time_limit: &TimeLimit,
    ) -> SatSolverStatus {
        self.backtrack(0);
        self.assumption_level = 0;
        if self.is_model_unsat {
            return SatSolverStatus::Infeasible;
        }
        if let Err(_cause) = self.propagate() {
            self.is_model_unsat = true;
            return SatSolverStatus::Infeasible;
        }

        for &assumption in assumptions {
            if self.assignment.literal_is_true(assumption) {
                continue;
            }
            if self.assignment.literal_is_false(assumption) {
                // The earlier assumptions (or root facts) propagated the
                // negation; the core is those plus the assumption itself.
                let mut marked = vec![false; self.num_variables()];
                marked[assumption.variable().index()] = true;
                let mut core = self.analyze_marked(marked);
                core.push(assumption);
                self.last_incompatible_decisions = core;
                return SatSolverStatus::AssumptionsUnsat;
            }
            self.assumption_level = self.current_decision_level() + 1;
            self.decision_level_starts.push(self.trail.len());
            self.decisions.push(assumption);
            self.enqueue(assumption, Reason::Decision);
            while let Err(cause) = self.propagate() {
                match self.learn_and_backjump(cause) {
                    LearnOutcome::RootUnsat => return SatSolverStatus::Infeasible,
                    LearnOutcome::AssumptionsConflict => {
                        return SatSolverStatus::AssumptionsUnsat
                    }
                    LearnOutcome::Learned(_) => {}
                }
            }
        }
        self.assumption_level = self.current_decision_level();
        self.solve_internal(time_limit)
    }

    /// Like [`SatSolver::analyze_conflict`] but starting from an explicitly
    /// marked set of variables.
    fn analyze_marked(&self, mut marked: Vec<bool>) -> Vec<Literal> {
        let mut involved_decisions = vec![];
        for position in (0..self.trail.len()).rev() {
            let literal = self.trail[position];
            if !marked[literal.variable().index()] {
                continue;
            }
            match self.trail_reasons[position] {
                Reason::Decision => involved_decisions.push(literal),
                Reason::Unit => {}
                Reason::Clause(reference) => {
                    for &clause_literal in self.clause_allocator.get_clause(reference).literals() {
                        marked[clause_literal.variable().index()] = true;
                    }
                }
                Reason::Linear(id) => {
                    for term in &self.linear_constraints[id.0 as usize].terms {
                        if self.assignment.literal_is_true(term.literal)
                            && self.trail_positions[term.literal.variable().index()] < position
                        {
                            marked[term.literal.variable().index()] = true;
                        }
                    }
                }
            }
        }
        involved_decisions.reverse();
        involved_decisions
    }

    fn solve_internal(&mut self, time_limit: &TimeLimit) -> SatSolverStatus {
        if self.is_model_unsat {
            return SatSolverStatus::Infeasible;
        }
        let mut conflicts_left = self.parameters.max_number_of_conflicts;
        let mut random = Random::seed_from_u64(self.parameters.random_seed);
        let mut decisions_since_time_check = 0;

        loop {
            while let Err(cause) = self.propagate() {
                match self.learn_and_backjump(cause) {
                    LearnOutcome::RootUnsat => return SatSolverStatus::Infeasible,
                    LearnOutcome::AssumptionsConflict => {
                        return SatSolverStatus::AssumptionsUnsat
                    }
                    LearnOutcome::Learned(_) => {}
                }
                conflicts_left -= 1;
                if conflicts_left <= 0 || time_limit.limit_reached() {
                    self.restore_to_assumption_level();
                    return SatSolverStatus::LimitReached;
                }
            }

            if self.trail.len() == self.num_variables() {
                return SatSolverStatus::Feasible;
            }

            decisions_since_time_check += 1;
            if decisions_since_time_check >= 128 {
                decisions_since_time_check = 0;
                if time_limit.limit_reached() {
                    self.restore_to_assumption_level();
                    return SatSolverStatus::LimitReached;
                }
            }

            let decision = self.pick_branching_literal(&mut random);
            self.decision_level_starts.push(self.trail.len());
            self.decisions.push(decision);
            self.enqueue(decision, Reason::Decision);
        }
    }

    fn pick_branching_literal(&mut self, random: &mut Random) -> Literal {
        let num_variables = self.num_variables();
        let variable = if self.parameters.random_branches_ratio > 0.0
            && random.gen_bool(self.parameters.random_branches_ratio)
        {
            self.pick_random_unassigned(random)
        } else {
            self.pick_ordered_unassigned(random)
        };

        let preferred = self.preferences[variable.index()];
        let mut polarity = match preferred {
            Some((polarity, _)) => polarity,
            None => {
                let saved = self.saved_phases[variable.index()];
                match saved {
                    Some(phase) if self.parameters.use_phase_saving => phase,
                    _ => match self.parameters.initial_polarity {
                        Polarity::False => false,
                        Polarity::True => true,
                        Polarity::Random => random.gen_bool(0.5),
                    },
                }
            }
        };
        if self.parameters.random_polarity_ratio > 0.0
            && random.gen_bool(self.parameters.random_polarity_ratio)
        {
            polarity = random.gen_bool(0.5);
        }
        debug_assert!(variable.index() < num_variables);
        Literal::new(variable, polarity)
    }

    fn pick_random_unassigned(&self, random: &mut Random) -> BooleanVariable {
        let num_variables = self.num_variables() as u32;
        for _ in 0..32 {
            let candidate = BooleanVariable(random.gen_range(0..num_variables));
            if !self.assignment.variable_is_assigned(candidate) {
                return candidate;
            }
        }
        self.first_unassigned(false)
    }

    fn pick_ordered_unassigned(&self, random: &mut Random) -> BooleanVariable {
        // An assignment preference acts as a priority: branch on the
        // unassigned preferred variable with the largest weight first.
        let mut best: Option<(BooleanVariable, f64)> = None;
        for (index, preference) in self.preferences.iter().enumerate() {
            if let Some((_, weight)) = preference {
                let variable = BooleanVariable(index as u32);
                if !self.assignment.variable_is_assigned(variable)
                    && best.map_or(true, |(_, best_weight)| *weight > best_weight)
                {
                    best = Some((variable, *weight));
                }
            }
        }
        if let Some((variable, _)) = best {
            return variable;
        }

        match self.parameters.preferred_variable_order {
            VariableOrder::InOrder => self.first_unassigned(false),
            VariableOrder::InReverseOrder => self.first_unassigned(true),
            VariableOrder::InRandomOrder => self.pick_random_unassigned(random),
        }
    }

    fn first_unassigned(&self, reverse: bool) -> BooleanVariable {
        let num_variables = self.num_variables();
        if reverse {
            for index in (0..num_variables).rev() {
                let variable = BooleanVariable(index as u32);
                if !self.assignment.variable_is_assigned(variable) {
                    return variable;
                }
            }
        } else {
            for index in 0..num_variables {
                let variable = BooleanVariable(index as u32);
                if !self.assignment.variable_is_assigned(variable) {
                    return variable;
                }
            }
        }
        unreachable!("no unassigned variable left")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(signed: i32) -> Literal {
        Literal::from_signed(signed)
    }

    #[test]
    fn unit_propagation_through_clauses() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(3);
        assert!(solver.add_problem_clause(vec![lit(-1), lit(2)]));
        assert!(solver.add_problem_clause(vec![lit(-2), lit(3)]));
        assert!(solver.add_unit_clause(lit(1)));
        assert!(solver.assignment().literal_is_true(lit(2)));
        assert!(solver.assignment().literal_is_true(lit(3)));
    }

    #[test]
    fn contradictory_units_are_unsat() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(1);
        assert!(solver.add_unit_clause(lit(1)));
        assert!(!solver.add_unit_clause(lit(-1)));
        assert!(solver.is_model_unsat());
    }

    #[test]
    fn solve_finds_model_of_simple_formula() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(2);
        assert!(solver.add_problem_clause(vec![lit(1), lit(2)]));
        assert!(solver.add_problem_clause(vec![lit(-1), lit(-2)]));
        let status = solver.solve(&TimeLimit::infinite());
        assert_eq!(status, SatSolverStatus::Feasible);
        let x1 = solver.assignment().literal_is_true(lit(1));
        let x2 = solver.assignment().literal_is_true(lit(2));
        assert!(x1 != x2);
    }

    #[test]
    fn unsat_formula_is_detected() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(2);
        assert!(solver.add_problem_clause(vec![lit(1), lit(2)]));
        assert!(solver.add_problem_clause(vec![lit(1), lit(-2)]));
        assert!(solver.add_problem_clause(vec![lit(-1), lit(2)]));
        let ok = solver.add_problem_clause(vec![lit(-1), lit(-2)]);
        let status = solver.solve(&TimeLimit::infinite());
        assert!(!ok || status == SatSolverStatus::Infeasible);
        assert!(solver.is_model_unsat());
    }

    #[test]
    fn linear_constraint_propagates_when_slack_vanishes() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(3);
        // x1 + x2 + x3 <= 1
        assert!(solver.add_linear_constraint(
            None,
            Some(1),
            vec![
                LiteralWithCoeff::from_signed(1, 1),
                LiteralWithCoeff::from_signed(2, 1),
                LiteralWithCoeff::from_signed(3, 1),
            ],
        ));
        let _ = solver.enqueue_decision_and_backjump_on_conflict(lit(1));
        assert!(solver.assignment().literal_is_false(lit(2)));
        assert!(solver.assignment().literal_is_false(lit(3)));
    }

    #[test]
    fn linear_lower_bound_side_propagates() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(2);
        // x1 + x2 >= 2 fixes both variables.
        assert!(solver.add_linear_constraint(
            Some(2),
            None,
            vec![
                LiteralWithCoeff::from_signed(1, 1),
                LiteralWithCoeff::from_signed(2, 1),
            ],
        ));
        assert!(solver.assignment().literal_is_true(lit(1)));
        assert!(solver.assignment().literal_is_true(lit(2)));
    }

    #[test]
    fn assumptions_unsat_returns_a_core() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(3);
        // x1 + x2 >= 1: assuming both false is incompatible.
        assert!(solver.add_linear_constraint(
            Some(1),
            None,
            vec![
                LiteralWithCoeff::from_signed(1, 1),
                LiteralWithCoeff::from_signed(2, 1),
            ],
        ));
        let status = solver.reset_and_solve_with_given_assumptions(
            &[lit(-1), lit(-2), lit(3)],
            &TimeLimit::infinite(),
        );
        assert_eq!(status, SatSolverStatus::AssumptionsUnsat);
        let core = solver.last_incompatible_decisions();
        assert!(core.contains(&lit(-1)));
        assert!(core.contains(&lit(-2)));
        assert!(!core.contains(&lit(3)));
    }

    #[test]
    fn conflict_budget_stops_the_search() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(12);
        // Pigeonhole-ish: hard enough to burn a one-conflict budget.
        for i in 1..=6 {
            for j in (i + 1)..=6 {
                assert!(solver.add_problem_clause(vec![lit(-i), lit(-j)]));
            }
        }
        assert!(solver.add_linear_constraint(
            Some(2),
            None,
            (1..=6).map(|i| LiteralWithCoeff::from_signed(i, 1)).collect(),
        ));
        let mut parameters = SatParameters::default();
        parameters.max_number_of_conflicts = 1;
        solver.set_parameters(parameters);
        let status = solver.solve(&TimeLimit::infinite());
        assert!(
            status == SatSolverStatus::LimitReached || status == SatSolverStatus::Infeasible
        );
    }

    #[test]
    fn backtrack_restores_linear_activity() {
        let mut solver = SatSolver::default();
        solver.set_num_variables(3);
        assert!(solver.add_linear_constraint(
            None,
            Some(2),
            vec![
                LiteralWithCoeff::from_signed(1, 2),
                LiteralWithCoeff::from_signed(2, 1),
                LiteralWithCoeff::from_signed(3, 1),
            ],
        ));
        let _ = solver.enqueue_decision_and_backjump_on_conflict(lit(1));
        // 2*x1 = 2: the others are forced off.
        assert!(solver.assignment().literal_is_false(lit(2)));
        solver.backtrack(0);
        assert!(!solver.assignment().literal_is_assigned(lit(2)));
        let _ = solver.enqueue_decision_and_backjump_on_conflict(lit(2));
        assert!(!solver.assignment().literal_is_false(lit(3)));
    }
}
