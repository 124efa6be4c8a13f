use std::rc::Rc;

use log::debug;
use log::error;

use crate::basic_types::BopSolution;
use crate::basic_types::BopSolveStatus;
use crate::basic_types::VariableIndex;
use crate::bop_assert_simple;
use crate::engine::LearnedInfo;
use crate::engine::ProblemState;
use crate::engine::TimeLimit;
use crate::optimisation::portfolio::PortfolioOptimizer;
use crate::optimisation::OptimizerStatus;
use crate::parameters::BopParameters;
use crate::parameters::BopSolverOptimizerSet;
use crate::problem::LinearBooleanProblem;

/// The outer driver: owns the problem state and one portfolio, and loops
/// until the state is proven optimal or infeasible, the portfolio gives up,
/// or the time limit fires.
#[derive(Debug)]
pub struct BopSolver {
    problem: Rc<LinearBooleanProblem>,
    problem_state: ProblemState,
    parameters: BopParameters,
}

impl BopSolver {
    pub fn new(problem: LinearBooleanProblem) -> Self {
        let problem = Rc::new(problem);
        let problem_state = ProblemState::new(Rc::clone(&problem));
        BopSolver {
            problem,
            problem_state,
            parameters: BopParameters::default(),
        }
    }

    pub fn set_parameters(&mut self, parameters: BopParameters) {
        self.parameters = parameters;
    }

    pub fn solve(&mut self, time_limit: &mut TimeLimit) -> BopSolveStatus {
        if let Err(validation_error) = self.problem.validate() {
            error!("Invalid Boolean problem: {validation_error}");
            return BopSolveStatus::InvalidProblem;
        }

        self.update_parameters();
        if self.parameters.number_of_solvers > 1 {
            // Reserved for a multi-threaded variant; not implemented.
            return BopSolveStatus::InvalidProblem;
        }

        self.internal_monothread_solver(time_limit)
    }

    /// Like [`BopSolver::solve`], starting from a hint: a feasible hint
    /// becomes the initial solution (and may already prove optimality), an
    /// infeasible one is used as the assignment preference of the user-guided
    /// first-solution generator.
    pub fn solve_with_hint(
        &mut self,
        hint_values: Vec<bool>,
        time_limit: &mut TimeLimit,
    ) -> BopSolveStatus {
        bop_assert_simple!(hint_values.len() == self.problem.num_variables());
        let mut hint = BopSolution::new(Rc::clone(&self.problem), "Hint");
        for (index, &value) in hint_values.iter().enumerate() {
            hint.set_value(VariableIndex::new(index), value);
        }

        if hint.is_feasible() {
            debug!("First solution is feasible.");
            let mut learned_info = LearnedInfo::new(&self.problem);
            learned_info.solution = hint;
            if self
                .problem_state
                .merge_learned_info(&learned_info, OptimizerStatus::Continue)
                && self.problem_state.is_optimal()
            {
                return BopSolveStatus::OptimalSolutionFound;
            }
        } else {
            debug!("First solution is infeasible. Using it as assignment preference.");
            self.problem_state.set_assignment_preference(hint_values);
        }
        self.solve(time_limit)
    }

    /// The best solution so far; check the solve status (or
    /// [`BopSolution::is_feasible`]) before using it.
    pub fn solution(&self) -> &BopSolution {
        self.problem_state.solution()
    }

    /// The best proven bound on the objective, in user (scaled) space.
    pub fn scaled_best_bound(&self) -> f64 {
        self.problem
            .scale_objective_value(self.problem_state.lower_bound())
    }

    /// The relative gap between the best solution and the best bound, in
    /// percent.
    pub fn scaled_gap(&self) -> f64 {
        100.0 * (self.problem_state.solution().scaled_cost() - self.scaled_best_bound()).abs()
            / self.problem_state.solution().scaled_cost().abs()
    }

    fn internal_monothread_solver(&mut self, time_limit: &mut TimeLimit) -> BopSolveStatus {
        let mut learned_info = LearnedInfo::new(&self.problem);
        let mut portfolio = PortfolioOptimizer::new(
            &self.problem_state,
            &self.parameters,
            &self.parameters.optimizer_sets[0],
            "Portfolio",
        );
        while !time_limit.limit_reached() {
            let optimization_status = portfolio.optimize(
                &self.parameters,
                &self.problem_state,
                &mut learned_info,
                time_limit,
            );
            let _ = self
                .problem_state
                .merge_learned_info(&learned_info, optimization_status);

            if optimization_status == OptimizerStatus::SolutionFound {
                bop_assert_simple!(self.problem_state.solution().is_feasible());
                debug!(
                    "{} New solution!",
                    self.problem_state.solution().scaled_cost()
                );
            }

            if self.problem_state.is_optimal() {
                bop_assert_simple!(self.problem_state.solution().is_feasible());
                return BopSolveStatus::OptimalSolutionFound;
            }
            if self.problem_state.is_infeasible() {
                return BopSolveStatus::InfeasibleProblem;
            }
            if optimization_status == OptimizerStatus::Abort {
                break;
            }
            learned_info.clear();
        }

        if self.problem_state.solution().is_feasible() {
            BopSolveStatus::FeasibleSolutionFound
        } else {
            BopSolveStatus::NoSolutionFound
        }
    }

    fn update_parameters(&mut self) {
        if self.parameters.optimizer_sets.is_empty() {
            // No user-defined optimizers: use the default portfolio.
            self.parameters
                .optimizer_sets
                .push(BopSolverOptimizerSet::default());
        }
        self.problem_state.set_parameters(self.parameters.clone());
    }
}
