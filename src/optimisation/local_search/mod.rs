//! Local search: bounded-depth backtracking over decisions that each repair
//! one currently-broken constraint, measured against the best feasible
//! solution (the reference).
//!
//! [`LocalSearchOptimizer`] is the portfolio-facing entry point; the other
//! types are the machinery it is built from.

mod backtrackable_set;
mod iterator;
mod maintainer;
mod repairer;
mod set_hasher;

pub(crate) use backtrackable_set::BacktrackableIntegerSet;
pub(crate) use iterator::LocalSearchAssignmentIterator;
pub(crate) use maintainer::AssignmentAndConstraintFeasibilityMaintainer;
pub(crate) use maintainer::OBJECTIVE_CONSTRAINT;
pub(crate) use repairer::OneFlipConstraintRepairer;
pub(crate) use repairer::INIT_TERM;
pub(crate) use repairer::INVALID_CONSTRAINT;
pub(crate) use repairer::INVALID_TERM;
pub(crate) use set_hasher::NonOrderedSetHasher;

use crate::basic_types::Random;
use crate::bop_assert_simple;
use crate::engine::sat::Literal;
use crate::engine::sat::SatSolver;
use crate::engine::sat::VariablesAssignment;
use crate::engine::LearnedInfo;
use crate::engine::ProblemState;
use crate::engine::TimeLimit;
use crate::optimisation::util;
use crate::optimisation::BopOptimizer;
use crate::optimisation::OptimizerStatus;
use crate::parameters::BopParameters;

/// Borrow of the shared SAT propagator for the duration of one `optimize`
/// call, exposing the few operations local search needs.
#[derive(Debug)]
pub(crate) struct SatWrapper<'a> {
    sat_solver: &'a mut SatSolver,
}

impl<'a> SatWrapper<'a> {
    pub(crate) fn new(sat_solver: &'a mut SatSolver) -> Self {
        SatWrapper { sat_solver }
    }

    /// The current state of the solver propagation trail.
    pub(crate) fn full_sat_trail(&self) -> Vec<Literal> {
        self.sat_solver.literal_trail().to_vec()
    }

    /// Note that an unsat problem might not be reported as such right away;
    /// after some decisions and learned conflicts the solver may only then be
    /// able to prove it.
    pub(crate) fn is_model_unsat(&self) -> bool {
        self.sat_solver.is_model_unsat()
    }

    pub(crate) fn sat_assignment(&self) -> &VariablesAssignment {
        &*self.sat_solver.assignment()
    }

    /// Applies the decision making the literal true and returns the number of
    /// decisions to backtrack due to conflicts:
    ///   - 0: no conflict; `propagated_literals` holds everything propagated
    ///     by the decision, the decision included.
    ///   - k > 0: k decisions (the current one included) were undone;
    ///     `propagated_literals` holds what the conflict propagated instead.
    ///
    /// The decision variable must not be assigned already.
    pub(crate) fn apply_decision(
        &mut self,
        decision_literal: Literal,
        propagated_literals: &mut Vec<Literal>,
    ) -> usize {
        bop_assert_simple!(!self.sat_assignment().literal_is_assigned(decision_literal));
        propagated_literals.clear();
        let old_decision_level = self.sat_solver.current_decision_level();
        let new_trail_index = self
            .sat_solver
            .enqueue_decision_and_backjump_on_conflict(decision_literal);
        if self.sat_solver.is_model_unsat() {
            return old_decision_level + 1;
        }

        // Return the propagated literals whether there was a conflict or not;
        // after a conflict these have to be added to the last decision level
        // left after the backtrack.
        propagated_literals
            .extend_from_slice(&self.sat_solver.literal_trail()[new_trail_index..]);

        old_decision_level + 1 - self.sat_solver.current_decision_level()
    }

    /// Backtracks the last decision if any.
    pub(crate) fn backtrack_one_level(&mut self) {
        let level = self.sat_solver.current_decision_level();
        if level > 0 {
            self.sat_solver.backtrack(level - 1);
        }
    }

    pub(crate) fn backtrack_all(&mut self) {
        self.sat_solver.backtrack(0);
    }

    pub(crate) fn extract_learned_info(&mut self, learned_info: &mut LearnedInfo) {
        util::extract_learned_info_from_sat_solver(self.sat_solver, learned_info);
    }

    /// Deterministic time spent in the underlying solver.
    pub(crate) fn deterministic_time(&self) -> f64 {
        self.sat_solver.deterministic_time()
    }
}

/// Local search over assignments within `max_num_decisions` flips of the best
/// solution. The iterator state survives across `optimize` calls, so calling
/// again resumes the exploration until everything reachable was seen or a
/// better solution restarts it.
#[derive(Debug)]
pub(crate) struct LocalSearchOptimizer {
    name: String,
    state_update_stamp: i64,
    max_num_decisions: usize,
    assignment_iterator: Option<LocalSearchAssignmentIterator>,
}

impl LocalSearchOptimizer {
    pub(crate) fn new(name: impl Into<String>, max_num_decisions: usize) -> Self {
        LocalSearchOptimizer {
            name: name.into(),
            state_update_stamp: ProblemState::INITIAL_STAMP_VALUE,
            max_num_decisions,
            assignment_iterator: None,
        }
    }
}

impl BopOptimizer for LocalSearchOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_be_run(&self, problem_state: &ProblemState) -> bool {
        problem_state.solution().is_feasible()
    }

    fn optimize(
        &mut self,
        parameters: &BopParameters,
        problem_state: &ProblemState,
        sat_propagator: &mut SatSolver,
        _random: &mut Random,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus {
        learned_info.clear();
        let mut sat_wrapper = SatWrapper::new(sat_propagator);

        let iterator = self.assignment_iterator.get_or_insert_with(|| {
            LocalSearchAssignmentIterator::new(
                problem_state,
                self.max_num_decisions,
                parameters.max_num_broken_constraints_in_ls,
            )
        });

        if self.state_update_stamp != problem_state.update_stamp() {
            // We have a new problem state.
            self.state_update_stamp = problem_state.update_stamp();
            iterator.synchronize(problem_state);
        }
        iterator.synchronize_sat_wrapper(&mut sat_wrapper);

        iterator.use_transposition_table(parameters.use_transposition_table_in_ls);
        iterator.use_potential_one_flip_repairs(parameters.use_potential_one_flip_repairs_in_ls);

        let mut prev_deterministic_time = sat_wrapper.deterministic_time();
        let mut num_assignments_to_explore =
            parameters.max_number_of_explored_assignments_per_try_in_ls;
        while !time_limit.limit_reached()
            && num_assignments_to_explore > 0
            && iterator.next_assignment(&mut sat_wrapper)
        {
            let deterministic_time = sat_wrapper.deterministic_time();
            // The 1.2 factor approximates the maintainer work on top of the
            // time spent in the SAT wrapper.
            time_limit.advance_deterministic_time(
                1.2 * (deterministic_time - prev_deterministic_time),
            );
            prev_deterministic_time = deterministic_time;
            num_assignments_to_explore -= 1;
        }

        if sat_wrapper.is_model_unsat() {
            return if problem_state.solution().is_feasible() {
                OptimizerStatus::OptimalSolutionFound
            } else {
                OptimizerStatus::Infeasible
            };
        }

        sat_wrapper.extract_learned_info(learned_info);
        if iterator.better_solution_has_been_found() {
            learned_info.solution = iterator.last_reference_assignment().clone();
            return OptimizerStatus::SolutionFound;
        }
        if time_limit.limit_reached() {
            return OptimizerStatus::LimitReached;
        }
        if num_assignments_to_explore <= 0 {
            // Explore the remaining assignments in a future call.
            return OptimizerStatus::Continue;
        }

        // Every assignment reachable in max_num_decisions or less has been
        // explored; running again on the same solution is pointless.
        OptimizerStatus::Abort
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::basic_types::BopSolution;
    use crate::basic_types::VariableIndex;
    use crate::optimisation::util::load_state_problem_to_sat_solver;
    use crate::problem::LinearBooleanProblem;
    use rand::SeedableRng;

    /// min x1 + x2 + x3 with x1 + x2 + x3 >= 1, seeded with the all-ones
    /// solution: local search must walk down to cost 1.
    #[test]
    fn local_search_improves_the_reference_solution() {
        let mut problem = LinearBooleanProblem::with_num_variables(3);
        problem.add_constraint(vec![1, 2, 3], vec![1, 1, 1], Some(1), None);
        problem.set_objective(vec![1, 2, 3], vec![1, 1, 1], 0, 1.0);
        let problem = Rc::new(problem);

        let mut state = crate::engine::ProblemState::new(Rc::clone(&problem));
        let mut all_ones = BopSolution::new(Rc::clone(&problem), "seed");
        for i in 0..3 {
            all_ones.set_value(VariableIndex::new(i), true);
        }
        let mut seed_info = LearnedInfo::new(&problem);
        seed_info.solution = all_ones;
        assert!(state.merge_learned_info(&seed_info, OptimizerStatus::Continue));

        let mut sat_propagator = SatSolver::default();
        assert_eq!(
            load_state_problem_to_sat_solver(&state, &mut sat_propagator),
            OptimizerStatus::Continue
        );

        let parameters = BopParameters::default();
        let mut random = Random::seed_from_u64(parameters.random_seed);
        let mut optimizer = LocalSearchOptimizer::new("LS_2", 2);
        let mut learned_info = LearnedInfo::new(&problem);
        let mut time_limit = TimeLimit::infinite();

        assert!(optimizer.should_be_run(&state));
        let status = optimizer.optimize(
            &parameters,
            &state,
            &mut sat_propagator,
            &mut random,
            &mut learned_info,
            &mut time_limit,
        );
        assert_eq!(status, OptimizerStatus::SolutionFound);
        assert!(learned_info.solution.is_feasible());
        assert!(learned_info.solution.cost() < 3);
    }

    #[test]
    fn local_search_needs_a_feasible_solution() {
        let mut problem = LinearBooleanProblem::with_num_variables(2);
        problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), None);
        problem.set_objective(vec![1, 2], vec![1, 1], 0, 1.0);
        let state = crate::engine::ProblemState::new(Rc::new(problem));
        let optimizer = LocalSearchOptimizer::new("LS_1", 1);
        assert!(!optimizer.should_be_run(&state));
    }
}
