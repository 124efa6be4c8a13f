//! Large-neighbourhood search: fix most variables to their value in the best
//! solution and let a short SAT solve explore the remaining "hole".

use std::rc::Rc;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::basic_types::Random;
use crate::basic_types::VariableIndex;
use crate::bop_assert_simple;
use crate::engine::lp::LinearProgram;
use crate::engine::lp::LpSolver;
use crate::engine::lp::LpStatus;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;
use crate::engine::sat::LiteralWithCoeff;
use crate::engine::sat::SatSolver;
use crate::engine::sat::SatSolverStatus;
use crate::engine::LearnedInfo;
use crate::engine::ProblemState;
use crate::engine::TimeLimit;
use crate::optimisation::util;
use crate::optimisation::util::LubyAdaptiveParameterValue;
use crate::optimisation::BopOptimizer;
use crate::optimisation::OptimizerStatus;
use crate::parameters::BopParameters;
use crate::problem;
use crate::problem::LinearBooleanProblem;

/// One objective term, used by the neighbourhood generators to know each
/// variable's cheap value.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BopConstraintTerm {
    pub(crate) var_id: VariableIndex,
    pub(crate) weight: i64,
}

pub(crate) type BopConstraintTerms = Vec<BopConstraintTerm>;

pub(crate) fn build_objective_terms(problem: &LinearBooleanProblem) -> BopConstraintTerms {
    let objective = problem.objective();
    objective
        .literals
        .iter()
        .zip(&objective.coefficients)
        .map(|(&literal, &coefficient)| {
            bop_assert_simple!(literal > 0);
            bop_assert_simple!(coefficient != 0);
            BopConstraintTerm {
                var_id: VariableIndex::new(literal as usize - 1),
                weight: coefficient,
            }
        })
        .collect()
}

fn objective_variables_assigned_to_their_low_cost_value(
    problem_state: &ProblemState,
    objective_terms: &BopConstraintTerms,
) -> Vec<Literal> {
    bop_assert_simple!(problem_state.solution().is_feasible());
    let solution = problem_state.solution();
    objective_terms
        .iter()
        .filter(|term| {
            (solution.value(term.var_id) && term.weight < 0)
                || (!solution.value(term.var_id) && term.weight > 0)
        })
        .map(|term| {
            Literal::new(
                BooleanVariable(term.var_id.value() as u32),
                solution.value(term.var_id),
            )
        })
        .collect()
}

/// A strategy that fixes variables on the propagator trail so that the
/// remaining neighbourhood has roughly `difficulty * num_variables` free
/// variables.
///
/// Preconditions: the propagator holds the current problem (with the
/// find-a-strictly-better-solution constraint) and the state holds a feasible
/// solution. On infeasibility detected mid-fixing, generators return early;
/// the caller checks the propagator unsat flag.
pub(crate) trait NeighborhoodGenerator: std::fmt::Debug {
    fn generate_neighborhood(
        &mut self,
        problem_state: &ProblemState,
        difficulty: f64,
        sat_propagator: &mut SatSolver,
        random: &mut Random,
    );
}

/// Fixes a random subset of the objective variables currently at their cheap
/// value.
#[derive(Debug)]
pub(crate) struct ObjectiveBasedNeighborhood {
    objective_terms: Rc<BopConstraintTerms>,
}

impl ObjectiveBasedNeighborhood {
    pub(crate) fn new(objective_terms: Rc<BopConstraintTerms>) -> Self {
        ObjectiveBasedNeighborhood { objective_terms }
    }
}

impl NeighborhoodGenerator for ObjectiveBasedNeighborhood {
    fn generate_neighborhood(
        &mut self,
        problem_state: &ProblemState,
        difficulty: f64,
        sat_propagator: &mut SatSolver,
        random: &mut Random,
    ) {
        let mut candidates =
            objective_variables_assigned_to_their_low_cost_value(problem_state, &self.objective_terms);
        candidates.shuffle(random);

        // Fix candidates while the number of propagated variables stays under
        // the target.
        let num_variables = sat_propagator.num_variables();
        let target = ((1.0 - difficulty) * num_variables as f64).round() as usize;

        sat_propagator.backtrack(0);
        for literal in candidates {
            if sat_propagator.literal_trail().len() == target {
                break;
            }
            if sat_propagator.literal_trail().len() > target {
                // Prefer to err on the large neighbourhood side: drop the last
                // enqueued decision.
                let level = sat_propagator.current_decision_level();
                sat_propagator.backtrack(level.saturating_sub(1));
                break;
            }
            if sat_propagator.assignment().literal_is_assigned(literal) {
                continue;
            }
            let _ = sat_propagator.enqueue_decision_and_backjump_on_conflict(literal);
            if sat_propagator.is_model_unsat() {
                return;
            }
        }
    }
}

/// Relaxes all the variables of a random subset of constraints and fixes the
/// cheap-valued objective variables outside of it.
#[derive(Debug)]
pub(crate) struct ConstraintBasedNeighborhood {
    objective_terms: Rc<BopConstraintTerms>,
}

impl ConstraintBasedNeighborhood {
    pub(crate) fn new(objective_terms: Rc<BopConstraintTerms>) -> Self {
        ConstraintBasedNeighborhood { objective_terms }
    }
}

impl NeighborhoodGenerator for ConstraintBasedNeighborhood {
    fn generate_neighborhood(
        &mut self,
        problem_state: &ProblemState,
        difficulty: f64,
        sat_propagator: &mut SatSolver,
        random: &mut Random,
    ) {
        let problem = problem_state.problem();
        let num_constraints = problem.constraints().len();
        let mut ct_ids: Vec<usize> = (0..num_constraints).collect();
        ct_ids.shuffle(random);

        // Mark the variables of the selected constraints as relaxed until the
        // target is reached. Really large constraints are excluded, they are
        // unlikely to pick a nice neighbourhood.
        let num_variables = sat_propagator.num_variables();
        let target = (difficulty * num_variables as f64).round() as usize;
        let mut num_relaxed = 0;
        let mut variable_is_relaxed = vec![false; problem.num_variables()];
        for &ct_id in &ct_ids {
            if num_relaxed >= target {
                break;
            }
            let constraint = &problem.constraints()[ct_id];
            if constraint.literals.len() as f64 > 0.7 * num_variables as f64 {
                continue;
            }
            for &literal in &constraint.literals {
                let var = literal.unsigned_abs() as usize - 1;
                if !variable_is_relaxed[var] {
                    num_relaxed += 1;
                    variable_is_relaxed[var] = true;
                }
            }
        }

        // Fix every cheap-valued objective variable that is not relaxed.
        sat_propagator.backtrack(0);
        let to_fix =
            objective_variables_assigned_to_their_low_cost_value(problem_state, &self.objective_terms);
        for literal in to_fix {
            if variable_is_relaxed[literal.variable().index()] {
                continue;
            }
            if sat_propagator.assignment().literal_is_assigned(literal) {
                continue;
            }
            let _ = sat_propagator.enqueue_decision_and_backjump_on_conflict(literal);
            if sat_propagator.is_model_unsat() {
                return;
            }
        }
    }
}

/// Relaxes a BFS ball of the graph where two variables are linked when they
/// co-occur in a small constraint.
#[derive(Debug)]
pub(crate) struct RelationGraphBasedNeighborhood {
    /// For each variable, the constraints it appears in; constraints larger
    /// than 10% of the variables are ignored.
    columns: Vec<Vec<usize>>,
}

impl RelationGraphBasedNeighborhood {
    pub(crate) fn new(problem: &LinearBooleanProblem) -> Self {
        let num_variables = problem.num_variables();
        let mut columns: Vec<Vec<usize>> = vec![vec![]; num_variables];
        const SIZE_THRESHOLD: f64 = 0.1;
        for (ct_id, constraint) in problem.constraints().iter().enumerate() {
            if constraint.literals.len() as f64 > SIZE_THRESHOLD * num_variables as f64 {
                continue;
            }
            for &literal in &constraint.literals {
                columns[literal.unsigned_abs() as usize - 1].push(ct_id);
            }
        }
        RelationGraphBasedNeighborhood { columns }
    }
}

impl NeighborhoodGenerator for RelationGraphBasedNeighborhood {
    fn generate_neighborhood(
        &mut self,
        problem_state: &ProblemState,
        difficulty: f64,
        sat_propagator: &mut SatSolver,
        random: &mut Random,
    ) {
        bop_assert_simple!(problem_state.solution().is_feasible());
        let problem = problem_state.problem();
        let num_variables = sat_propagator.num_variables();
        let target = (difficulty * num_variables as f64).round() as usize;
        let mut num_relaxed = 1;
        let mut variable_is_relaxed = vec![false; num_variables];
        let mut queue = std::collections::VecDeque::new();

        queue.push_back(random.gen_range(0..num_variables));
        variable_is_relaxed[*queue.back().unwrap()] = true;
        while let Some(var) = queue.pop_front() {
            if num_relaxed >= target {
                break;
            }
            for &ct_id in &self.columns[var] {
                for &literal in &problem.constraints()[ct_id].literals {
                    let next_var = literal.unsigned_abs() as usize - 1;
                    if !variable_is_relaxed[next_var] {
                        num_relaxed += 1;
                        variable_is_relaxed[next_var] = true;
                        queue.push_back(next_var);
                    }
                }
            }
        }

        // Fix the variables in order, but skip any decision that propagates a
        // relaxed variable so the relaxed core is not accidentally pinned.
        sat_propagator.backtrack(0);
        for var in 0..num_variables {
            let literal = Literal::new(
                BooleanVariable(var as u32),
                problem_state.solution().value(VariableIndex::new(var)),
            );
            if variable_is_relaxed[var] {
                continue;
            }
            if sat_propagator.assignment().literal_is_assigned(literal) {
                continue;
            }
            let index = sat_propagator.enqueue_decision_and_backjump_on_conflict(literal);
            if sat_propagator.current_decision_level() > 0 {
                let trail = sat_propagator.literal_trail();
                let pinned_relaxed = trail[index.min(trail.len())..]
                    .iter()
                    .any(|l| variable_is_relaxed[l.variable().index()]);
                if pinned_relaxed {
                    let level = sat_propagator.current_decision_level();
                    sat_propagator.backtrack(level - 1);
                }
            }
            if sat_propagator.is_model_unsat() {
                return;
            }
        }
        debug!(
            "target:{target} relaxed:{num_relaxed} actual:{}",
            num_variables - sat_propagator.literal_trail().len()
        );
    }
}

/// Returns false when the LP hits its limit; otherwise sets the solver
/// preferences from the relaxation values of the not-yet-fixed problem.
fn use_linear_relaxation_for_sat_assignment_preference(
    parameters: &BopParameters,
    problem: &LinearBooleanProblem,
    sat_solver: &mut SatSolver,
    time_limit: &mut TimeLimit,
) -> bool {
    let mut lp_model = LinearProgram::default();
    convert_boolean_problem_to_linear_program(problem, &mut lp_model);

    // Pin the variables the solver already fixed.
    for &literal in sat_solver.literal_trail() {
        if literal.variable().index() >= problem.num_variables() {
            continue;
        }
        let value = if literal.is_positive() { 1.0 } else { 0.0 };
        lp_model.set_column_bounds(literal.variable().index(), value, value);
    }

    let mut lp_solver = LpSolver::default();
    let lp_status = lp_solver.solve(&lp_model, parameters.lp_max_deterministic_time);
    time_limit.advance_deterministic_time(lp_solver.deterministic_time());

    if lp_status != LpStatus::Optimal && lp_status != LpStatus::PrimalFeasible {
        // No useful information from the LP; abort this LNS.
        return false;
    }

    for (column, &value) in lp_solver.variable_values().iter().enumerate() {
        sat_solver.set_assignment_preference(
            Literal::new(BooleanVariable(column as u32), value.round() == 1.0),
            1.0 - (value - value.round()).abs(),
        );
    }
    true
}

/// Builds the 0/1 box relaxation of the problem, in unscaled objective space.
pub(crate) fn convert_boolean_problem_to_linear_program(
    problem: &LinearBooleanProblem,
    lp_model: &mut LinearProgram,
) {
    lp_model.clear();
    let objective = problem.objective();
    let mut costs = vec![0.0; problem.num_variables()];
    for (&literal, &coefficient) in objective.literals.iter().zip(&objective.coefficients) {
        costs[literal.unsigned_abs() as usize - 1] = coefficient as f64;
    }
    for cost in costs {
        let _ = lp_model.add_column(0.0, 1.0, cost);
    }
    for constraint in problem.constraints() {
        let terms: Vec<(usize, f64)> = constraint
            .literals
            .iter()
            .zip(&constraint.coefficients)
            .map(|(&literal, &coefficient)| {
                (literal.unsigned_abs() as usize - 1, coefficient as f64)
            })
            .collect();
        lp_model.add_row(
            terms,
            constraint.lower_bound.map(|b| b as f64),
            constraint.upper_bound.map(|b| b as f64),
        );
    }
}

/// A generic LNS optimizer: generate a neighbourhood, probe it cheaply in
/// place, then solve a fresh small subproblem over the free variables with a
/// Luby-scaled conflict budget, adapting the neighbourhood size to how the
/// solve went.
#[derive(Debug)]
pub(crate) struct BopAdaptiveLNSOptimizer {
    name: String,
    use_lp_to_guide_sat: bool,
    neighborhood_generator: Box<dyn NeighborhoodGenerator>,

    /// One difficulty per Luby class, kept from one run to the next. The
    /// initial value is deliberately low: on large problems that works much
    /// better, and on small ones it increases very quickly anyway.
    adaptive_difficulty: LubyAdaptiveParameterValue,
}

impl BopAdaptiveLNSOptimizer {
    pub(crate) fn new(
        name: impl Into<String>,
        use_lp_to_guide_sat: bool,
        neighborhood_generator: Box<dyn NeighborhoodGenerator>,
    ) -> Self {
        BopAdaptiveLNSOptimizer {
            name: name.into(),
            use_lp_to_guide_sat,
            neighborhood_generator,
            adaptive_difficulty: LubyAdaptiveParameterValue::new(0.001),
        }
    }

    fn optimize_internal(
        &mut self,
        parameters: &BopParameters,
        problem_state: &ProblemState,
        sat_propagator: &mut SatSolver,
        random: &mut Random,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus {
        let mut num_tries = 0;
        while !time_limit.limit_reached() && num_tries < parameters.num_random_lns_tries {
            // Compute the target difficulty, then the neighbourhood.
            self.adaptive_difficulty.update_luby();
            let difficulty = self.adaptive_difficulty.parameter_value();
            self.neighborhood_generator.generate_neighborhood(
                problem_state,
                difficulty,
                sat_propagator,
                random,
            );

            num_tries += 1;
            debug!(
                "{num_tries}  difficulty:{difficulty}  luby:{}  fixed:{}/{}",
                self.adaptive_difficulty.luby_value(),
                sat_propagator.literal_trail().len(),
                problem_state.problem().num_variables()
            );

            // Special case when the difficulty is too high.
            if !sat_propagator.is_model_unsat()
                && sat_propagator.current_decision_level() == 0
            {
                debug!("Nothing fixed!");
                self.adaptive_difficulty.decrease_parameter();
                continue;
            }

            // Since everything is already set up, try the propagator itself
            // with a tiny conflict limit: UNSAT cases are skipped without the
            // costly subproblem setup.
            if !sat_propagator.is_model_unsat() {
                let mut sat_parameters = sat_propagator.parameters().clone();
                sat_parameters.max_number_of_conflicts =
                    parameters.max_number_of_conflicts_for_quick_check;
                sat_parameters.random_seed = parameters.random_seed;
                sat_propagator.set_parameters(sat_parameters);
                sat_propagator.set_assumption_level(sat_propagator.current_decision_level());

                match sat_propagator.solve(time_limit) {
                    SatSolverStatus::Feasible => {
                        self.adaptive_difficulty.increase_parameter();
                        util::sat_assignment_to_bop_solution(
                            sat_propagator.assignment(),
                            &mut learned_info.solution,
                        );
                        return OptimizerStatus::SolutionFound;
                    }
                    SatSolverStatus::AssumptionsUnsat => {
                        // The local problem is infeasible.
                        self.adaptive_difficulty.increase_parameter();
                        continue;
                    }
                    _ => {}
                }
            }

            // The fixed variables of the propagator seed the local problem,
            // so restore it to the assumption level first. Note this can
            // prove the unsatisfiability, hence the check afterwards.
            if !sat_propagator.is_model_unsat() {
                sat_propagator.restore_to_assumption_level();
            }
            if sat_propagator.is_model_unsat() {
                return if problem_state.solution().is_feasible() {
                    OptimizerStatus::OptimalSolutionFound
                } else {
                    OptimizerStatus::Infeasible
                };
            }

            // Construct and solve the LNS subproblem with a clean solver: on
            // a small problem this beats a long solve under assumptions.
            let conflict_limit = self.adaptive_difficulty.luby_value() as i64
                * parameters.max_number_of_conflicts_in_random_lns;
            let problem = problem_state.problem();
            let mut sat_solver = SatSolver::default();
            let mut sat_parameters = sat_solver.parameters().clone();
            sat_parameters.max_number_of_conflicts = conflict_limit;
            sat_parameters.random_seed = parameters.random_seed;
            sat_solver.set_parameters(sat_parameters);

            // The unit clauses fixing the neighbourhood come first, so that
            // loading the problem builds the small local subproblem directly.
            sat_solver.set_num_variables(problem.num_variables());
            let mut local_infeasible = false;
            for &literal in sat_propagator.literal_trail() {
                if !sat_solver.add_unit_clause(literal) {
                    local_infeasible = true;
                    break;
                }
            }
            if local_infeasible || !problem::load_boolean_problem(problem, &mut sat_solver) {
                self.adaptive_difficulty.increase_parameter();
                continue;
            }

            if self.use_lp_to_guide_sat {
                if !use_linear_relaxation_for_sat_assignment_preference(
                    parameters,
                    problem,
                    &mut sat_solver,
                    time_limit,
                ) {
                    return OptimizerStatus::LimitReached;
                }
            } else {
                problem::use_objective_for_sat_assignment_preference(problem, &mut sat_solver);
            }

            if !problem::add_objective_constraint(
                problem,
                None,
                Some(problem_state.solution().cost() - 1),
                &mut sat_solver,
            ) {
                // The local problem is infeasible.
                self.adaptive_difficulty.increase_parameter();
                continue;
            }

            let sat_status = sat_solver.solve(time_limit);
            time_limit.advance_deterministic_time(sat_solver.deterministic_time());
            if sat_status == SatSolverStatus::Feasible {
                util::sat_assignment_to_bop_solution(
                    sat_solver.assignment(),
                    &mut learned_info.solution,
                );
                return OptimizerStatus::SolutionFound;
            }

            // Adapt the difficulty.
            if sat_solver.num_failures() < conflict_limit / 2 {
                self.adaptive_difficulty.increase_parameter();
            } else if sat_solver.num_failures() as f64 > 0.95 * conflict_limit as f64 {
                self.adaptive_difficulty.decrease_parameter();
            }
        }
        OptimizerStatus::Continue
    }
}

impl BopOptimizer for BopAdaptiveLNSOptimizer {
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
        random: &mut Random,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus {
        learned_info.clear();

        let initial_deterministic_time = sat_propagator.deterministic_time();
        let status = self.optimize_internal(
            parameters,
            problem_state,
            sat_propagator,
            random,
            learned_info,
            time_limit,
        );

        // Return the shared propagator to assumption level zero and collect
        // what it learned, whatever the exit path was.
        if !sat_propagator.is_model_unsat() {
            sat_propagator.set_assumption_level(0);
            sat_propagator.restore_to_assumption_level();
            util::extract_learned_info_from_sat_solver(sat_propagator, learned_info);
        }
        time_limit.advance_deterministic_time(
            sat_propagator.deterministic_time() - initial_deterministic_time,
        );
        status
    }
}

/// A single monolithic SAT solve under the constraint that the solution stays
/// within a given Hamming distance of the current one.
#[derive(Debug)]
pub(crate) struct BopCompleteLNSOptimizer {
    name: String,
    state_update_stamp: i64,
    sat_solver: Option<SatSolver>,
    objective_terms: Rc<BopConstraintTerms>,
}

impl BopCompleteLNSOptimizer {
    pub(crate) fn new(name: impl Into<String>, objective_terms: Rc<BopConstraintTerms>) -> Self {
        BopCompleteLNSOptimizer {
            name: name.into(),
            state_update_stamp: ProblemState::INITIAL_STAMP_VALUE,
            sat_solver: None,
            objective_terms,
        }
    }

    fn synchronize_if_needed(
        &mut self,
        problem_state: &ProblemState,
        num_relaxed_vars: usize,
    ) -> OptimizerStatus {
        if self.state_update_stamp == problem_state.update_stamp() {
            return OptimizerStatus::Continue;
        }
        self.state_update_stamp = problem_state.update_stamp();

        // Load the current problem into a fresh solver.
        let mut sat_solver = SatSolver::default();
        let status = util::load_state_problem_to_sat_solver(problem_state, &mut sat_solver);
        if status != OptimizerStatus::Continue {
            self.sat_solver = Some(sat_solver);
            return status;
        }

        // Ask for a solution at Hamming distance at most num_relaxed_vars
        // from the current one; only the objective terms count.
        let solution = problem_state.solution();
        let mut terms: Vec<LiteralWithCoeff> = vec![];
        for term in self.objective_terms.iter() {
            if solution.value(term.var_id) && term.weight < 0 {
                terms.push(LiteralWithCoeff::new(
                    Literal::new(BooleanVariable(term.var_id.value() as u32), false),
                    1,
                ));
            } else if !solution.value(term.var_id) && term.weight > 0 {
                terms.push(LiteralWithCoeff::new(
                    Literal::new(BooleanVariable(term.var_id.value() as u32), true),
                    1,
                ));
            }
        }
        let feasible =
            sat_solver.add_linear_constraint(None, Some(num_relaxed_vars as i64), terms);

        if !feasible || sat_solver.is_model_unsat() {
            self.sat_solver = Some(sat_solver);
            return OptimizerStatus::Abort;
        }

        // Nudge the solver towards solutions close to the current one; partly
        // redundant with the constraint above.
        util::use_solution_for_sat_assignment_preference(solution, &mut sat_solver);
        self.sat_solver = Some(sat_solver);
        OptimizerStatus::Continue
    }
}

impl BopOptimizer for BopCompleteLNSOptimizer {
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
        _sat_propagator: &mut SatSolver,
        _random: &mut Random,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus {
        learned_info.clear();

        let sync_status =
            self.synchronize_if_needed(problem_state, parameters.num_relaxed_vars);
        if sync_status != OptimizerStatus::Continue {
            return sync_status;
        }

        let sat_solver = self.sat_solver.as_mut().unwrap();
        let initial_deterministic_time = sat_solver.deterministic_time();

        let mut sat_parameters = sat_solver.parameters().clone();
        sat_parameters.max_number_of_conflicts =
            parameters.max_number_of_conflicts_in_random_lns;
        sat_parameters.random_seed = parameters.random_seed;
        sat_solver.set_parameters(sat_parameters);

        let sat_status = sat_solver.solve(time_limit);
        time_limit.advance_deterministic_time(
            sat_solver.deterministic_time() - initial_deterministic_time,
        );
        match sat_status {
            SatSolverStatus::Feasible => {
                util::sat_assignment_to_bop_solution(
                    sat_solver.assignment(),
                    &mut learned_info.solution,
                );
                OptimizerStatus::SolutionFound
            }
            SatSolverStatus::LimitReached => OptimizerStatus::Continue,
            // Because of the Hamming constraint, an unsat result proves
            // nothing about the problem.
            _ => OptimizerStatus::Abort,
        }
    }
}
