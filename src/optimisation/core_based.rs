//! Core-guided Boolean optimization: solve under assumptions that the
//! objective literals stay at their cheap value, and turn every unsat core
//! into a totalizer node, monotonically increasing the lower bound.

use log::debug;
use log::warn;

use crate::bop_assert_simple;
use crate::basic_types::Random;
use crate::encodings::EncodingNodeRepository;
use crate::encodings::NodeIndex;
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

/// Tries to shrink a core with one cheap solve under the reversed
/// assumptions: unit propagation alone often shows that a subset is enough.
pub(crate) fn minimize_core(solver: &mut SatSolver, core: &mut Vec<Literal>, time_limit: &TimeLimit) {
    let mut reversed: Vec<Literal> = core.clone();
    reversed.reverse();
    solver.backtrack(0);

    let saved_parameters = solver.parameters().clone();
    let mut parameters = saved_parameters.clone();
    parameters.max_number_of_conflicts = 1;
    solver.set_parameters(parameters);
    let status = solver.reset_and_solve_with_given_assumptions(&reversed, time_limit);
    solver.set_parameters(saved_parameters);

    if status != SatSolverStatus::AssumptionsUnsat {
        // This should be rare: the solver may have deleted learned clauses
        // needed to re-derive the core by propagation alone.
        warn!("Core not unsat by propagation, keeping it as it is.");
        return;
    }
    let mut minimized = solver.last_incompatible_decisions();
    if minimized.len() < core.len() {
        minimized.reverse();
        *core = minimized;
    }
}

/// The minimum weight over the nodes whose assumption is part of the core.
/// The core literals appear in the same order as the nodes.
fn compute_core_min_weight(
    repository: &EncodingNodeRepository,
    nodes: &[NodeIndex],
    core: &[Literal],
) -> i64 {
    let mut min_weight = i64::MAX;
    let mut index = 0;
    for &core_literal in core {
        while repository[nodes[index]].assumption_literal() != core_literal {
            index += 1;
            bop_assert_simple!(index < nodes.len());
        }
        min_weight = min_weight.min(repository[nodes[index]].weight());
        index += 1;
    }
    min_weight
}

/// The largest node weight strictly below the given bound; zero when none
/// exists (node weights are strictly positive).
fn max_node_weight_smaller_than(
    repository: &EncodingNodeRepository,
    nodes: &[NodeIndex],
    upper_bound: i64,
) -> i64 {
    let mut result = 0;
    for &node in nodes {
        let weight = repository[node].weight();
        if weight < upper_bound {
            result = result.max(weight);
        }
    }
    result
}

/// A complete solver: runs on the full problem, can prove optimality or
/// infeasibility by itself, and resumes from where it left off when called
/// in short slices.
///
/// Between calls it keeps its own SAT solver (with everything learned), the
/// encoding tree, the stratification threshold and the accumulated lower
/// bound; on entry only the new parts of the problem state are replayed.
#[derive(Debug)]
pub(crate) struct SatCoreBasedOptimizer {
    name: String,
    state_update_stamp: i64,
    initialized: bool,
    assumptions_already_added: bool,
    solver: SatSolver,

    offset: i64,
    /// Bounds in "number of literals not at their cheap value" space, i.e.
    /// shifted by `offset` from the objective space.
    lower_bound: i64,
    upper_bound: i64,
    stratified_lower_bound: i64,

    repository: EncodingNodeRepository,
    nodes: Vec<NodeIndex>,
}

impl SatCoreBasedOptimizer {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        SatCoreBasedOptimizer {
            name: name.into(),
            state_update_stamp: ProblemState::INITIAL_STAMP_VALUE,
            initialized: false,
            assumptions_already_added: false,
            solver: SatSolver::default(),
            offset: 0,
            lower_bound: 0,
            upper_bound: i64::MAX,
            stratified_lower_bound: 0,
            repository: EncodingNodeRepository::default(),
            nodes: vec![],
        }
    }

    fn synchronize_if_needed(&mut self, problem_state: &ProblemState) -> OptimizerStatus {
        if self.state_update_stamp == problem_state.update_stamp() {
            return OptimizerStatus::Continue;
        }
        self.state_update_stamp = problem_state.update_stamp();

        // If the solver is not empty, this only loads the newly learned
        // information.
        let status = util::load_state_problem_to_sat_solver(problem_state, &mut self.solver);
        if status != OptimizerStatus::Continue {
            return status;
        }

        if !self.initialized {
            // One leaf per objective literal; negative coefficients wrap the
            // negated literal and move the offset.
            let objective = problem_state.problem().objective();
            for (&literal, &coefficient) in
                objective.literals.iter().zip(&objective.coefficients)
            {
                let literal = Literal::from_signed(literal);
                if coefficient > 0 {
                    let node = self.repository.add_literal_node(literal, coefficient);
                    self.nodes.push(node);
                } else {
                    let node = self.repository.add_literal_node(!literal, -coefficient);
                    self.nodes.push(node);
                    self.offset -= coefficient;
                }
            }
            self.initialized = true;

            // Start the stratification at the heaviest weight.
            self.stratified_lower_bound = self
                .nodes
                .iter()
                .map(|&n| self.repository[n].weight())
                .max()
                .unwrap_or(0);
        }

        if problem_state.solution().is_feasible() {
            self.upper_bound = problem_state.solution().cost() + self.offset;
        }
        OptimizerStatus::Continue
    }

    fn solve_with_assumptions(&mut self, time_limit: &TimeLimit) -> SatSolverStatus {
        self.solver.backtrack(0);

        // Reduce the nodes using the literals fixed at the root and update
        // the lower bound accordingly.
        for &node in &self.nodes {
            let pops = self.repository[node].reduce(&self.solver);
            self.lower_bound += pops * self.repository[node].weight();
        }

        // Clamp the right-most literals that would overshoot the gap.
        if self.upper_bound != i64::MAX {
            let gap = self.upper_bound - self.lower_bound;
            for &node in &self.nodes {
                self.repository[node].apply_weight_upper_bound(gap, &mut self.solver);
            }
        }

        // Saturated nodes contribute a fixed amount and are dropped.
        let repository = &self.repository;
        self.nodes.retain(|&node| repository[node].size() > 0);

        let assumptions: Vec<Literal> = self
            .nodes
            .iter()
            .filter(|&&node| self.repository[node].weight() >= self.stratified_lower_bound)
            .map(|&node| self.repository[node].assumption_literal())
            .collect();
        self.solver
            .reset_and_solve_with_given_assumptions(&assumptions, time_limit)
    }

    /// Registers the core: the involved nodes lose `min_weight`, their lazy
    /// merge becomes a new node of weight `min_weight` whose count is at
    /// least one.
    fn process_core(&mut self, core: &[Literal], min_weight: i64) {
        self.solver.backtrack(0);

        if core.len() == 1 {
            // The core is a single node whose assumption is already false at
            // the root; growing it is enough, the reduce of the next round
            // does the rest.
            bop_assert_simple!(self.solver.assignment().literal_is_false(core[0]));
            for index in 0..self.nodes.len() {
                let node = self.nodes[index];
                if self.repository[node].assumption_literal() == core[0] {
                    self.repository.increase_node_size(node, &mut self.solver);
                    break;
                }
            }
            return;
        }

        // The nodes appear in the core order, so a single linear scan finds
        // them all. A node heavier than min_weight is kept with the remaining
        // weight: the classic trick of splitting a weighted clause in two.
        let mut kept: Vec<NodeIndex> = vec![];
        let mut to_merge: Vec<NodeIndex> = vec![];
        let mut index = 0;
        for &core_literal in core {
            while self.repository[self.nodes[index]].assumption_literal() != core_literal {
                kept.push(self.nodes[index]);
                index += 1;
                bop_assert_simple!(index < self.nodes.len());
            }
            let node = self.nodes[index];
            to_merge.push(node);
            if self.repository[node].weight() > min_weight {
                let remaining = self.repository[node].weight() - min_weight;
                self.repository[node].set_weight(remaining);
                kept.push(node);
            }
            index += 1;
        }
        kept.extend_from_slice(&self.nodes[index..]);

        let merged = self
            .repository
            .lazy_merge_all_with_pq(&to_merge, &mut self.solver);
        self.repository.increase_node_size(merged, &mut self.solver);
        self.repository[merged].set_weight(min_weight);
        let forced = self.repository[merged].literal(0);
        let added = self.solver.add_unit_clause(forced);
        bop_assert_simple!(added);
        kept.push(merged);
        self.nodes = kept;
    }
}

impl BopOptimizer for SatCoreBasedOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    /// Only meaningful when there is an objective.
    fn should_be_run(&self, problem_state: &ProblemState) -> bool {
        !problem_state.problem().objective().literals.is_empty()
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

        let mut conflict_limit = parameters.max_number_of_conflicts_in_random_lns;
        let mut deterministic_time_at_last_sync = self.solver.deterministic_time();
        while !time_limit.limit_reached() {
            let mut sat_parameters = self.solver.parameters().clone();
            sat_parameters.max_number_of_conflicts = conflict_limit.max(1);
            sat_parameters.random_seed = parameters.random_seed;
            self.solver.set_parameters(sat_parameters);

            let old_num_conflicts = self.solver.num_failures();
            let sat_status = if self.assumptions_already_added {
                self.solver.solve(time_limit)
            } else {
                self.solve_with_assumptions(time_limit)
            };
            time_limit.advance_deterministic_time(
                self.solver.deterministic_time() - deterministic_time_at_last_sync,
            );
            deterministic_time_at_last_sync = self.solver.deterministic_time();

            self.assumptions_already_added = true;
            conflict_limit -= self.solver.num_failures() - old_num_conflicts;
            learned_info.lower_bound = self.lower_bound - self.offset;

            // Possible because we over-constrain the objective.
            if sat_status == SatSolverStatus::Infeasible {
                return if problem_state.solution().is_feasible() {
                    OptimizerStatus::OptimalSolutionFound
                } else {
                    OptimizerStatus::Infeasible
                };
            }

            util::extract_learned_info_from_sat_solver(&mut self.solver, learned_info);
            if sat_status == SatSolverStatus::LimitReached || conflict_limit < 0 {
                return OptimizerStatus::Continue;
            }

            if sat_status == SatSolverStatus::Feasible {
                // A strictly better solution at the current stratification
                // threshold.
                util::sat_assignment_to_bop_solution(
                    self.solver.assignment(),
                    &mut learned_info.solution,
                );
                self.stratified_lower_bound = max_node_weight_smaller_than(
                    &self.repository,
                    &self.nodes,
                    self.stratified_lower_bound,
                );
                self.solver.backtrack(0);
                if self.stratified_lower_bound > 0 {
                    self.assumptions_already_added = false;
                    return OptimizerStatus::SolutionFound;
                }
                return OptimizerStatus::OptimalSolutionFound;
            }

            // The interesting case: we have a core.
            let mut core = self.solver.last_incompatible_decisions();
            minimize_core(&mut self.solver, &mut core, time_limit);
            let min_weight = compute_core_min_weight(&self.repository, &self.nodes, &core);
            debug!("core:{} mw:{min_weight}", core.len());
            self.process_core(&core, min_weight);
            self.assumptions_already_added = false;
        }
        OptimizerStatus::Continue
    }
}
