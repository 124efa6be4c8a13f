//! Linear relaxation of the current problem: either certifies a better lower
//! bound, fixes variables through strong branching, or produces fractional
//! values that guide the other optimizers.

use log::debug;

use crate::basic_types::Random;
use crate::basic_types::StorageKey;
use crate::basic_types::VariableIndex;
use crate::bop_assert_simple;
use crate::engine::lp::LinearProgram;
use crate::engine::lp::LpSolver;
use crate::engine::lp::LpStatus;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;
use crate::engine::sat::SatSolver;
use crate::engine::LearnedInfo;
use crate::engine::ProblemState;
use crate::engine::TimeLimit;
use crate::optimisation::lns::convert_boolean_problem_to_linear_program;
use crate::optimisation::BopOptimizer;
use crate::optimisation::OptimizerStatus;
use crate::parameters::BopParameters;

const INTEGRALITY_TOLERANCE: f64 = 1e-6;

fn all_integral_values(values: &[f64], tolerance: f64) -> bool {
    // Correct because this part of the code only deals with 0/1 variables.
    values
        .iter()
        .all(|&value| value < tolerance || value + tolerance >= 1.0)
}

/// The LP relaxation optimizer. The model is kept loaded between calls;
/// synchronization pins the newly fixed variables and appends rows for the
/// newly learned binary clauses.
#[derive(Debug)]
pub(crate) struct LinearRelaxation {
    name: String,
    state_update_stamp: i64,
    lp_model_loaded: bool,
    num_full_solves: i32,
    lp_model: LinearProgram,
    lp_solver: LpSolver,
    num_fixed_variables: i32,
    problem_already_solved: bool,
    /// Cost of the state solution, or infinity without one; used by strong
    /// branching to decide which branch outcomes allow fixing a variable.
    solution_cost: f64,
    num_binary_clause_rows: usize,
}

impl LinearRelaxation {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        LinearRelaxation {
            name: name.into(),
            state_update_stamp: ProblemState::INITIAL_STAMP_VALUE,
            lp_model_loaded: false,
            num_full_solves: 0,
            lp_model: LinearProgram::default(),
            lp_solver: LpSolver::default(),
            num_fixed_variables: -1,
            problem_already_solved: false,
            solution_cost: f64::INFINITY,
            num_binary_clause_rows: 0,
        }
    }

    fn synchronize_if_needed(
        &mut self,
        parameters: &BopParameters,
        problem_state: &ProblemState,
    ) -> OptimizerStatus {
        if self.state_update_stamp == problem_state.update_stamp() {
            return OptimizerStatus::Continue;
        }
        self.state_update_stamp = problem_state.update_stamp();

        // On a pure feasibility problem, obey the dedicated solve budget.
        if problem_state.problem().objective().literals.is_empty()
            && parameters.max_lp_solve_for_feasibility_problems >= 0
            && self.num_full_solves >= parameters.max_lp_solve_for_feasibility_problems
        {
            return OptimizerStatus::Abort;
        }

        // Solving again is only useful when more variables got fixed.
        let num_fixed_variables = problem_state
            .is_fixed()
            .iter()
            .filter(|&&fixed| fixed)
            .count() as i32;
        self.problem_already_solved =
            self.problem_already_solved && self.num_fixed_variables >= num_fixed_variables;
        if self.problem_already_solved {
            return OptimizerStatus::Abort;
        }
        self.num_fixed_variables = num_fixed_variables;

        if !self.lp_model_loaded {
            convert_boolean_problem_to_linear_program(
                problem_state.problem(),
                &mut self.lp_model,
            );
            self.lp_model_loaded = true;
        }
        for var in problem_state.is_fixed().keys() {
            if problem_state.is_variable_fixed(var) {
                let value = if problem_state.variable_fixed_value(var) {
                    1.0
                } else {
                    0.0
                };
                self.lp_model.set_column_bounds(var.index(), value, value);
            }
        }

        // Append rows for the binary clauses learned since last time:
        // a + b >= 1 over the literal values.
        if parameters.use_learned_binary_clauses_in_lp {
            let new_clauses = problem_state.newly_added_binary_clauses();
            for clause in new_clauses.iter().skip(self.num_binary_clause_rows) {
                let coefficient_a = if clause.a.is_positive() { 1.0 } else { -1.0 };
                let coefficient_b = if clause.b.is_positive() { 1.0 } else { -1.0 };
                let rhs = 1.0
                    + (if clause.a.is_positive() { 0.0 } else { -1.0 })
                    + (if clause.b.is_positive() { 0.0 } else { -1.0 });
                self.lp_model.add_row(
                    vec![
                        (clause.a.variable().index(), coefficient_a),
                        (clause.b.variable().index(), coefficient_b),
                    ],
                    Some(rhs),
                    None,
                );
            }
            self.num_binary_clause_rows = new_clauses.len();
        }

        self.solution_cost = if problem_state.solution().is_feasible() {
            problem_state.solution().cost() as f64
        } else {
            f64::INFINITY
        };
        OptimizerStatus::Continue
    }

    fn solve_lp(&mut self, parameters: &BopParameters, time_limit: &TimeLimit) -> LpStatus {
        let budget = parameters
            .lp_max_deterministic_time
            .min(time_limit.deterministic_time_left().max(0.0) + 1e-3);
        self.lp_solver.solve(&self.lp_model, budget)
    }

    /// What-if analysis on each fractional variable: resolve with the
    /// variable pinned to 1 and to 0; both branch bounds improve the overall
    /// bound, and a branch worse than the incumbent fixes the variable the
    /// other way.
    fn compute_lower_bound_using_strong_branching(
        &mut self,
        parameters: &BopParameters,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> f64 {
        let initial_lp_values = self.lp_solver.variable_values().to_vec();
        let tolerance = INTEGRALITY_TOLERANCE;
        let mut best_lp_objective = self.lp_solver.objective_value();
        for (column, &initial_value) in initial_lp_values.iter().enumerate() {
            if time_limit.limit_reached() {
                break;
            }

            // Skip fixed variables.
            let (lower, upper) = self.lp_model.column_bounds(column);
            if lower == upper {
                continue;
            }
            bop_assert_simple!(lower == 0.0 && upper == 1.0);

            // Without a feasible solution, only fractional variables are
            // worth branching on; with one, every variable may lead to a
            // useful fixing through the bound / cost comparison.
            if self.solution_cost.is_infinite()
                && (initial_value < tolerance || initial_value + tolerance > 1.0)
            {
                continue;
            }

            let mut objective_true = best_lp_objective;
            let mut objective_false = best_lp_objective;

            let branch_deterministic_time = self.lp_solver.deterministic_time();
            self.lp_model.set_column_bounds(column, 1.0, 1.0);
            let status_true = self.solve_lp(parameters, time_limit);
            if status_true == LpStatus::Optimal || status_true == LpStatus::PrimalFeasible {
                objective_true = self.lp_solver.objective_value();

                self.lp_model.set_column_bounds(column, 0.0, 0.0);
                let status_false = self.solve_lp(parameters, time_limit);
                if status_false == LpStatus::Optimal
                    || status_false == LpStatus::PrimalFeasible
                {
                    objective_false = self.lp_solver.objective_value();
                    best_lp_objective =
                        best_lp_objective.max(objective_true.min(objective_false));
                }
            }
            time_limit.advance_deterministic_time(
                self.lp_solver.deterministic_time() - branch_deterministic_time,
            );

            if self.cost_is_worse_than_solution(objective_true, tolerance) {
                // Variable at true cannot beat the current solution.
                self.lp_model.set_column_bounds(column, 0.0, 0.0);
                learned_info
                    .fixed_literals
                    .push(Literal::new(BooleanVariable(column as u32), false));
            } else if self.cost_is_worse_than_solution(objective_false, tolerance) {
                self.lp_model.set_column_bounds(column, 1.0, 1.0);
                learned_info
                    .fixed_literals
                    .push(Literal::new(BooleanVariable(column as u32), true));
            } else {
                // Safe since the variable is not fixed.
                self.lp_model.set_column_bounds(column, 0.0, 1.0);
            }
        }
        best_lp_objective
    }

    fn cost_is_worse_than_solution(&self, cost: f64, tolerance: f64) -> bool {
        cost > self.solution_cost + tolerance
    }
}

impl BopOptimizer for LinearRelaxation {
    fn name(&self) -> &str {
        &self.name
    }

    /// Always run with an objective; on pure feasibility problems only when
    /// the dedicated parameter asks for it (a negative value means no limit).
    fn should_be_run(&self, problem_state: &ProblemState) -> bool {
        !problem_state.problem().objective().literals.is_empty()
            || problem_state.parameters().max_lp_solve_for_feasibility_problems != 0
    }

    fn optimize(
        &mut self,
        parameters: &BopParameters,
        problem_state: &ProblemState,
        _sat_propagator: &mut SatSolver,
        _random: &mut Random,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus {
        learned_info.clear();

        let sync_status = self.synchronize_if_needed(parameters, problem_state);
        if sync_status != OptimizerStatus::Continue {
            return sync_status;
        }

        let initial_deterministic_time = self.lp_solver.deterministic_time();
        let lp_status = self.solve_lp(parameters, time_limit);
        time_limit.advance_deterministic_time(
            self.lp_solver.deterministic_time() - initial_deterministic_time,
        );
        debug!(
            "LP: {:.6} status: {lp_status:?}",
            self.lp_solver.objective_value()
        );

        if lp_status == LpStatus::Optimal {
            self.num_full_solves += 1;
            self.problem_already_solved = true;
        }
        if lp_status == LpStatus::Init {
            return OptimizerStatus::LimitReached;
        }
        if lp_status != LpStatus::Optimal && lp_status != LpStatus::PrimalFeasible {
            return OptimizerStatus::Abort;
        }
        learned_info.lp_values = self.lp_solver.variable_values().to_vec();

        if lp_status == LpStatus::Optimal {
            let mut lower_bound = self.lp_solver.objective_value();
            if parameters.use_lp_strong_branching {
                lower_bound = self.compute_lower_bound_using_strong_branching(
                    parameters,
                    learned_info,
                    time_limit,
                );
                debug!("LP: {lower_bound:.6} using strong branching.");
            }

            // The relaxation bounds the integer optimum from below; round up
            // with a small slack for the solver tolerances.
            learned_info.lower_bound = (lower_bound - INTEGRALITY_TOLERANCE).ceil() as i64;

            if all_integral_values(&learned_info.lp_values, INTEGRALITY_TOLERANCE) {
                for (index, &value) in learned_info.lp_values.iter().enumerate() {
                    learned_info
                        .solution
                        .set_value(VariableIndex::new(index), value.round() == 1.0);
                }
                bop_assert_simple!(learned_info.solution.is_feasible());
                return OptimizerStatus::OptimalSolutionFound;
            }
        }

        OptimizerStatus::InformationFound
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::problem::LinearBooleanProblem;
    use rand::SeedableRng;

    fn optimize_once(state: &ProblemState) -> (OptimizerStatus, LearnedInfo) {
        let parameters = BopParameters::default();
        let mut optimizer = LinearRelaxation::new("LinearRelaxation");
        let mut learned_info = LearnedInfo::new(state.problem());
        let mut sat_propagator = SatSolver::default();
        let mut random = Random::seed_from_u64(8);
        let mut time_limit = TimeLimit::infinite();
        let status = optimizer.optimize(
            &parameters,
            state,
            &mut sat_propagator,
            &mut random,
            &mut learned_info,
            &mut time_limit,
        );
        (status, learned_info)
    }

    #[test]
    fn integral_relaxation_solves_the_problem() {
        // min x1 + x2 with x1 + x2 = 1: the relaxation optimum is integral.
        let mut problem = LinearBooleanProblem::with_num_variables(2);
        problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));
        problem.set_objective(vec![1, 2], vec![1, 2], 0, 1.0);
        let state = ProblemState::new(Rc::new(problem));

        let (status, learned_info) = optimize_once(&state);
        assert_eq!(status, OptimizerStatus::OptimalSolutionFound);
        assert!(learned_info.solution.is_feasible());
        assert_eq!(learned_info.solution.cost(), 1);
    }

    #[test]
    fn fractional_relaxation_reports_bound_and_values() {
        // Vertex cover on a triangle: LP optimum is 3/2, all values 1/2.
        let mut problem = LinearBooleanProblem::with_num_variables(3);
        for (u, v) in [(1, 2), (2, 3), (1, 3)] {
            problem.add_constraint(vec![u, v], vec![1, 1], Some(1), None);
        }
        problem.set_objective(vec![1, 2, 3], vec![1, 1, 1], 0, 1.0);
        let state = ProblemState::new(Rc::new(problem));

        let (status, learned_info) = optimize_once(&state);
        assert_eq!(status, OptimizerStatus::InformationFound);
        assert_eq!(learned_info.lp_values.len(), 3);
        // ceil(3/2) = 2 is a valid integer bound.
        assert_eq!(learned_info.lower_bound, 2);
    }
}
