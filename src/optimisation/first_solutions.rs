//! Optimizers whose job is to discover feasible solutions with SAT: one
//! guided by a policy-chosen assignment preference, and one trying many
//! randomized restarts with a tiny conflict budget.

use log::debug;
use rand::Rng;

use crate::basic_types::Random;
use crate::bop_assert_simple;
use crate::engine::sat::randomize_decision_heuristic;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;
use crate::engine::sat::SatSolver;
use crate::engine::sat::SatSolverStatus;
use crate::engine::LearnedInfo;
use crate::engine::ProblemState;
use crate::engine::TimeLimit;
use crate::optimisation::util;
use crate::optimisation::BopOptimizer;
use crate::optimisation::OptimizerStatus;
use crate::parameters::BopParameters;
use crate::problem;

/// The guiding heuristics of [`GuidedSatFirstSolutionGenerator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Policy {
    /// The default SAT solver.
    NotGuided,
    /// Guided by the values of the linear relaxation.
    LpGuided,
    /// Guided by the objective coefficients.
    ObjectiveGuided,
    /// Guided by the problem assignment preference.
    UserGuided,
}

/// Finds a first solution with SAT under an assignment preference. Runs in
/// small conflict chunks: on `Continue` the next call resumes the very same
/// search as long as the problem state did not change.
#[derive(Debug)]
pub(crate) struct GuidedSatFirstSolutionGenerator {
    name: String,
    policy: Policy,
    abort: bool,
    state_update_stamp: i64,
    sat_solver: Option<SatSolver>,
}

impl GuidedSatFirstSolutionGenerator {
    pub(crate) fn new(name: impl Into<String>, policy: Policy) -> Self {
        GuidedSatFirstSolutionGenerator {
            name: name.into(),
            policy,
            abort: false,
            state_update_stamp: ProblemState::INITIAL_STAMP_VALUE,
            sat_solver: None,
        }
    }

    fn synchronize_if_needed(&mut self, problem_state: &ProblemState) -> OptimizerStatus {
        if self.state_update_stamp == problem_state.update_stamp() {
            return OptimizerStatus::Continue;
        }
        self.state_update_stamp = problem_state.update_stamp();

        let sat_solver = self.sat_solver.get_or_insert_with(SatSolver::default);
        let load_status = util::load_state_problem_to_sat_solver(problem_state, sat_solver);
        if load_status != OptimizerStatus::Continue {
            return load_status;
        }

        match self.policy {
            Policy::NotGuided => {}
            Policy::LpGuided => {
                for (index, &value) in problem_state.lp_values().iter().enumerate() {
                    sat_solver.set_assignment_preference(
                        Literal::new(BooleanVariable(index as u32), value.round() == 1.0),
                        1.0 - (value - value.round()).abs(),
                    );
                }
            }
            Policy::ObjectiveGuided => {
                problem::use_objective_for_sat_assignment_preference(
                    problem_state.problem(),
                    sat_solver,
                );
            }
            Policy::UserGuided => {
                for (index, &value) in problem_state.assignment_preference().iter().enumerate() {
                    sat_solver.set_assignment_preference(
                        Literal::new(BooleanVariable(index as u32), value),
                        1.0,
                    );
                }
            }
        }
        OptimizerStatus::Continue
    }
}

impl BopOptimizer for GuidedSatFirstSolutionGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_be_run(&self, problem_state: &ProblemState) -> bool {
        if self.abort {
            return false;
        }
        if self.policy == Policy::LpGuided && problem_state.lp_values().is_empty() {
            return false;
        }
        if self.policy == Policy::UserGuided && problem_state.assignment_preference().is_empty() {
            return false;
        }
        true
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

        let sync_status = self.synchronize_if_needed(problem_state);
        if sync_status != OptimizerStatus::Continue {
            return sync_status;
        }

        let sat_solver = self.sat_solver.as_mut().unwrap();
        let mut sat_parameters = sat_solver.parameters().clone();
        // A relatively small conflict limit, so that other optimizers get a
        // chance to run; on limit we return Continue and resume later.
        sat_parameters.max_number_of_conflicts = parameters.guided_sat_conflicts_chunk;
        sat_parameters.random_seed = parameters.random_seed;
        sat_solver.set_parameters(sat_parameters);

        let initial_deterministic_time = sat_solver.deterministic_time();
        let sat_status = sat_solver.solve(time_limit);
        time_limit.advance_deterministic_time(
            sat_solver.deterministic_time() - initial_deterministic_time,
        );

        if sat_status == SatSolverStatus::Infeasible {
            if self.policy != Policy::NotGuided {
                self.abort = true;
            }
            if problem_state.upper_bound() != i64::MAX {
                // The state solution is feasible, so it is proven optimal.
                learned_info.lower_bound = problem_state.upper_bound();
                return OptimizerStatus::OptimalSolutionFound;
            }
            return OptimizerStatus::Infeasible;
        }

        util::extract_learned_info_from_sat_solver(sat_solver, learned_info);
        if sat_status == SatSolverStatus::Feasible {
            util::sat_assignment_to_bop_solution(
                sat_solver.assignment(),
                &mut learned_info.solution,
            );
            sat_solver.backtrack(0);
            return util::solution_status(&learned_info.solution, problem_state.lower_bound());
        }

        OptimizerStatus::Continue
    }
}

/// Tries many random search strategies, each with a really low conflict
/// limit. Useful to find a first solution or to improve an existing one.
///
/// Unlike the other optimizers, this one does not return as soon as a new
/// solution is found: it keeps improving it while it has budget, re-tightening
/// the objective after each improvement.
#[derive(Debug)]
pub(crate) struct BopRandomFirstSolutionGenerator {
    name: String,
}

impl BopRandomFirstSolutionGenerator {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        BopRandomFirstSolutionGenerator { name: name.into() }
    }
}

impl BopOptimizer for BopRandomFirstSolutionGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    /// Only run when there is an objective to minimize.
    fn should_be_run(&self, problem_state: &ProblemState) -> bool {
        !problem_state.problem().objective().literals.is_empty()
    }

    fn optimize(
        &mut self,
        parameters: &BopParameters,
        problem_state: &ProblemState,
        sat_propagator: &mut SatSolver,
        random: &mut Random,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus {
        learned_info.clear();
        let problem = problem_state.problem();

        // Snapshot the shared solver heuristics; they are restored on exit.
        let saved_parameters = sat_propagator.parameters().clone();
        let saved_preferences = sat_propagator.all_preferences();
        let initial_deterministic_time = sat_propagator.deterministic_time();

        const MAX_NUM_CONFLICTS_PER_TRY: i64 = 10;
        let mut best_cost = if problem_state.solution().is_feasible() {
            problem_state.solution().cost()
        } else {
            i64::MAX
        };
        let mut remaining_num_conflicts =
            parameters.max_number_of_conflicts_in_random_solution_generation;

        // Since each solve is really fast, the work around one is kept as
        // small as possible: the objective is only re-tightened after an
        // improvement.
        let mut objective_need_to_be_overconstrained = best_cost != i64::MAX;

        let mut solution_found = false;
        while remaining_num_conflicts > 0 && !time_limit.limit_reached() {
            sat_propagator.backtrack(0);
            let old_num_failures = sat_propagator.num_failures();

            let mut sat_parameters = saved_parameters.clone();
            randomize_decision_heuristic(random, &mut sat_parameters);
            sat_parameters.max_number_of_conflicts = MAX_NUM_CONFLICTS_PER_TRY;
            sat_parameters.random_seed = random.gen();
            sat_propagator.set_parameters(sat_parameters);
            sat_propagator.reset_decision_heuristic();

            if objective_need_to_be_overconstrained {
                if !problem::add_objective_constraint(
                    problem,
                    None,
                    Some(best_cost - 1),
                    sat_propagator,
                ) {
                    // The solution is proved optimal (if any).
                    learned_info.lower_bound = best_cost;
                    return if best_cost == i64::MAX {
                        OptimizerStatus::Infeasible
                    } else {
                        OptimizerStatus::OptimalSolutionFound
                    };
                }
                objective_need_to_be_overconstrained = false;
            }

            // Special assignment preferences for this restart.
            match random.gen_range(0..4) {
                0 => {
                    problem::use_objective_for_sat_assignment_preference(problem, sat_propagator);
                }
                1 if !problem_state.lp_values().is_empty() => {
                    for (index, &value) in problem_state.lp_values().iter().enumerate() {
                        sat_propagator.set_assignment_preference(
                            Literal::new(BooleanVariable(index as u32), value.round() == 1.0),
                            1.0 - (value - value.round()).abs(),
                        );
                    }
                }
                _ => {}
            }

            let sat_status = sat_propagator.solve(time_limit);
            match sat_status {
                SatSolverStatus::Feasible => {
                    objective_need_to_be_overconstrained = true;
                    solution_found = true;
                    util::sat_assignment_to_bop_solution(
                        sat_propagator.assignment(),
                        &mut learned_info.solution,
                    );
                    bop_assert_simple!(learned_info.solution.cost() < best_cost);
                    best_cost = learned_info.solution.cost();
                    debug!("Random restart found a solution of cost {best_cost}.");
                }
                SatSolverStatus::Infeasible => {
                    // The solution is proved optimal (if any).
                    learned_info.lower_bound = best_cost;
                    return if best_cost == i64::MAX {
                        OptimizerStatus::Infeasible
                    } else {
                        OptimizerStatus::OptimalSolutionFound
                    };
                }
                _ => {}
            }

            // The number of failures approximates the number of conflicts;
            // note that it is never reinitialized.
            remaining_num_conflicts -= sat_propagator.num_failures() - old_num_failures;
        }

        // Restore the shared propagator. If the loop was left early the
        // problem was solved to optimality or proved infeasible, and the
        // propagator will not be used on this state again.
        bop_assert_simple!(sat_propagator.assumption_level() == 0);
        sat_propagator.backtrack(0);
        sat_propagator.set_parameters(saved_parameters);
        sat_propagator.reset_decision_heuristic();
        for (literal, weight) in saved_preferences {
            sat_propagator.set_assignment_preference(literal, weight);
        }
        time_limit.advance_deterministic_time(
            sat_propagator.deterministic_time() - initial_deterministic_time,
        );

        if sat_propagator.is_model_unsat() {
            learned_info.lower_bound = best_cost;
            return if best_cost == i64::MAX {
                OptimizerStatus::Infeasible
            } else {
                OptimizerStatus::OptimalSolutionFound
            };
        }

        util::extract_learned_info_from_sat_solver(sat_propagator, learned_info);
        if solution_found {
            OptimizerStatus::SolutionFound
        } else {
            OptimizerStatus::LimitReached
        }
    }
}
