//! Helpers shared by the optimizers: loading the problem state into a SAT
//! solver, extracting learned information back, and the adaptive parameters
//! pacing the LNS.

use crate::basic_types::BopSolution;
use crate::basic_types::VariableIndex;
use crate::bop_assert_simple;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;
use crate::engine::sat::SatSolver;
use crate::engine::sat::VariablesAssignment;
use crate::engine::LearnedInfo;
use crate::engine::ProblemState;
use crate::optimisation::OptimizerStatus;
use crate::problem;

/// Loads the problem state into the solver: on first use the full problem,
/// afterwards only the newly fixed variables, the tightened objective bounds
/// and the new binary clauses.
///
/// Returns `Continue` on success. An unsat result means the current solution
/// is optimal when one exists (the objective is over-constrained to force a
/// strict improvement), and that the problem is infeasible otherwise.
pub(crate) fn load_state_problem_to_sat_solver(
    problem_state: &ProblemState,
    sat_solver: &mut SatSolver,
) -> OptimizerStatus {
    if internal_load(problem_state, sat_solver) {
        OptimizerStatus::Continue
    } else if problem_state.solution().is_feasible() {
        OptimizerStatus::OptimalSolutionFound
    } else {
        OptimizerStatus::Infeasible
    }
}

fn internal_load(problem_state: &ProblemState, sat_solver: &mut SatSolver) -> bool {
    let problem = problem_state.problem();
    let first_time = sat_solver.num_variables() == 0;
    if first_time {
        sat_solver.set_num_variables(problem.num_variables());
    } else {
        // Backtrack the solver to be able to add new constraints.
        sat_solver.backtrack(0);
    }

    // Set the fixed variables first so that loading the problem is faster.
    for var in problem_state.is_fixed().keys() {
        if problem_state.is_variable_fixed(var) {
            let literal = Literal::new(
                BooleanVariable(var.value() as u32),
                problem_state.variable_fixed_value(var),
            );
            if !sat_solver.add_unit_clause(literal) {
                return false;
            }
        }
    }

    if first_time && !problem::load_boolean_problem(problem, sat_solver) {
        return false;
    }

    // Constrain the objective to [lower_bound, upper_bound - 1]. If the
    // strict upper bound makes the problem unsat, the current solution is
    // proven optimal.
    let lower = (problem_state.lower_bound() != i64::MIN).then_some(problem_state.lower_bound());
    let upper = (problem_state.upper_bound() != i64::MAX)
        .then_some(problem_state.upper_bound() - 1);
    if !problem::add_objective_constraint(problem, lower, upper, sat_solver) {
        return false;
    }

    if !sat_solver.add_binary_clauses(problem_state.newly_added_binary_clauses()) {
        return false;
    }
    sat_solver.clear_newly_added_binary_clauses();

    true
}

/// Extracts from the solver any new information about the problem: the
/// root-fixed literals and the newly learned binary clauses. The solver is
/// not const-like because this clears its "newly added" window.
pub(crate) fn extract_learned_info_from_sat_solver(
    solver: &mut SatSolver,
    learned_info: &mut LearnedInfo,
) {
    bop_assert_simple!(!solver.is_model_unsat());
    learned_info.fixed_literals.clear();
    learned_info
        .fixed_literals
        .extend_from_slice(solver.root_literals());
    learned_info.binary_clauses = solver.newly_added_binary_clauses();
    solver.clear_newly_added_binary_clauses();
}

/// Copies a complete SAT assignment into a solution; only the variables of
/// the original problem are extracted.
pub(crate) fn sat_assignment_to_bop_solution(
    assignment: &VariablesAssignment,
    solution: &mut BopSolution,
) {
    bop_assert_simple!(solution.size() <= assignment.num_variables());
    for index in 0..solution.size() {
        let variable = BooleanVariable(index as u32);
        bop_assert_simple!(assignment.variable_is_assigned(variable));
        solution.set_value(
            VariableIndex::new(index),
            assignment.literal_is_true(Literal::new(variable, true)),
        );
    }
}

/// Upgrades a feasible solution to "optimal" when its cost already matches
/// the known lower bound (the bound may even exceed the cost because of LP
/// rounding).
pub(crate) fn solution_status(solution: &BopSolution, lower_bound: i64) -> OptimizerStatus {
    if solution.is_feasible() {
        if solution.cost() <= lower_bound {
            OptimizerStatus::OptimalSolutionFound
        } else {
            OptimizerStatus::SolutionFound
        }
    } else {
        OptimizerStatus::LimitReached
    }
}

/// Sets the solver preferences so that it tries to reproduce the given
/// solution first.
pub(crate) fn use_solution_for_sat_assignment_preference(
    solution: &BopSolution,
    solver: &mut SatSolver,
) {
    for index in 0..solution.size() {
        let variable = BooleanVariable(index as u32);
        solver.set_assignment_preference(
            Literal::new(variable, solution.value(VariableIndex::new(index))),
            1.0,
        );
    }
}

/// The i-th term (1-based) of the Luby sequence 1 1 2 1 1 2 4 1 1 2 1 1 2 4
/// 8 ..., the restart-pacing sequence with good worst-case properties.
pub(crate) fn luby(i: u64) -> u64 {
    bop_assert_simple!(i > 0);
    let mut i = i;
    loop {
        if (i + 1).is_power_of_two() {
            return (i + 1) / 2;
        }
        // Strip the completed prefix: the largest 2^k - 1 not exceeding i.
        let prefix = (1u64 << (63 - (i + 1).leading_zeros())) - 1;
        i -= prefix;
    }
}

/// A bounded value in [0, 1] moved up and down by decaying steps: the more it
/// changed already, the smaller the relative move.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AdaptiveParameterValue {
    value: f64,
    num_changes: i32,
}

impl AdaptiveParameterValue {
    pub(crate) fn new(initial_value: f64) -> Self {
        AdaptiveParameterValue {
            value: initial_value,
            num_changes: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.num_changes = 0;
    }

    pub(crate) fn increase(&mut self) {
        self.num_changes += 1;
        let factor = 1.0 + 1.0 / (self.num_changes as f64 / 2.0 + 1.0);
        self.value = (1.0 - (1.0 - self.value) / factor).min(self.value * factor);
    }

    pub(crate) fn decrease(&mut self) {
        self.num_changes += 1;
        let factor = 1.0 + 1.0 / (self.num_changes as f64 / 2.0 + 1.0);
        self.value = (self.value / factor).max(1.0 - (1.0 - self.value) * factor);
    }

    pub(crate) fn value(&self) -> f64 {
        self.value
    }
}

const MAX_LUBY_INDEX: usize = 30;
const MAX_BOOST: i32 = 30;

/// Luby-paced difficulty: one [`AdaptiveParameterValue`] per power-of-two
/// class of the Luby sequence, so that short and long runs adapt separately.
#[derive(Clone, Debug)]
pub(crate) struct LubyAdaptiveParameterValue {
    luby_id: u64,
    luby_boost: u32,
    luby_value: u64,
    difficulties: Vec<AdaptiveParameterValue>,
}

impl LubyAdaptiveParameterValue {
    pub(crate) fn new(initial_value: f64) -> Self {
        LubyAdaptiveParameterValue {
            luby_id: 0,
            luby_boost: 0,
            luby_value: 0,
            difficulties: vec![AdaptiveParameterValue::new(initial_value); MAX_LUBY_INDEX],
        }
    }

    #[allow(unused, reason = "part of the adaptive pacing interface")]
    pub(crate) fn reset(&mut self) {
        self.luby_id = 0;
        self.luby_boost = 0;
        self.luby_value = 0;
        self.difficulties.iter_mut().for_each(|d| d.reset());
    }

    fn luby_class(&self) -> usize {
        63 - self.luby_value.leading_zeros() as usize
    }

    pub(crate) fn increase_parameter(&mut self) {
        let class = self.luby_class();
        self.difficulties[class].increase();
    }

    pub(crate) fn decrease_parameter(&mut self) {
        let class = self.luby_class();
        self.difficulties[class].decrease();
    }

    pub(crate) fn parameter_value(&self) -> f64 {
        self.difficulties[self.luby_class()].value()
    }

    pub(crate) fn update_luby(&mut self) {
        self.luby_id += 1;
        self.luby_value = luby(self.luby_id) << self.luby_boost;
    }

    #[allow(unused, reason = "part of the adaptive pacing interface")]
    pub(crate) fn boost_luby(&mut self) -> bool {
        self.luby_boost += 1;
        self.luby_boost >= MAX_BOOST as u32
    }

    pub(crate) fn luby_value(&self) -> u64 {
        self.luby_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luby_sequence_prefix() {
        let expected = [1, 1, 2, 1, 1, 2, 4, 1, 1, 2, 1, 1, 2, 4, 8, 1];
        for (index, &value) in expected.iter().enumerate() {
            assert_eq!(luby(index as u64 + 1), value, "at index {index}");
        }
    }

    #[test]
    fn adaptive_parameter_stays_in_unit_interval() {
        let mut parameter = AdaptiveParameterValue::new(0.5);
        for _ in 0..100 {
            parameter.increase();
            assert!(parameter.value() <= 1.0);
        }
        for _ in 0..200 {
            parameter.decrease();
            assert!(parameter.value() >= 0.0);
        }
    }

    #[test]
    fn increase_then_decrease_moves_the_value() {
        let mut parameter = AdaptiveParameterValue::new(0.1);
        let initial = parameter.value();
        parameter.increase();
        assert!(parameter.value() > initial);
        let increased = parameter.value();
        parameter.decrease();
        assert!(parameter.value() < increased);
    }

    #[test]
    fn luby_adaptive_parameter_tracks_classes_independently() {
        let mut parameter = LubyAdaptiveParameterValue::new(0.02);
        parameter.update_luby();
        let class_one_value = parameter.parameter_value();
        parameter.increase_parameter();
        assert!(parameter.parameter_value() > class_one_value);

        // Third step of the sequence is 2, a different class with the value
        // still untouched.
        parameter.update_luby();
        parameter.update_luby();
        assert_eq!(parameter.luby_value(), 2);
        assert!((parameter.parameter_value() - 0.02).abs() < 1e-12);
    }
}
