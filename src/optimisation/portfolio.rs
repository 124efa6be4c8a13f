//! The portfolio runs one optimizer per `optimize` call, picked by an
//! adaptive selector from their past reward per deterministic time.

use std::rc::Rc;

use log::debug;
use log::warn;
use rand::SeedableRng;

use crate::basic_types::KeyedVec;
use crate::basic_types::OptimizerIndex;
use crate::basic_types::Random;
use crate::engine::sat::SatSolver;
use crate::engine::LearnedInfo;
use crate::engine::ProblemState;
use crate::engine::TimeLimit;
use crate::optimisation::core_based::SatCoreBasedOptimizer;
use crate::optimisation::first_solutions::BopRandomFirstSolutionGenerator;
use crate::optimisation::first_solutions::GuidedSatFirstSolutionGenerator;
use crate::optimisation::first_solutions::Policy;
use crate::optimisation::linear_relaxation::LinearRelaxation;
use crate::optimisation::lns::build_objective_terms;
use crate::optimisation::lns::BopAdaptiveLNSOptimizer;
use crate::optimisation::lns::BopCompleteLNSOptimizer;
use crate::optimisation::lns::BopConstraintTerms;
use crate::optimisation::lns::ConstraintBasedNeighborhood;
use crate::optimisation::lns::ObjectiveBasedNeighborhood;
use crate::optimisation::lns::RelationGraphBasedNeighborhood;
use crate::optimisation::local_search::LocalSearchOptimizer;
use crate::optimisation::util;
use crate::optimisation::BopOptimizer;
use crate::optimisation::OptimizerStatus;
use crate::parameters::BopOptimizerMethod;
use crate::parameters::BopParameters;
use crate::parameters::BopSolverOptimizerSet;
use crate::problem;

pub(crate) const INVALID_OPTIMIZER_INDEX: OptimizerIndex = OptimizerIndex(-1);

#[derive(Debug)]
struct RunInfo {
    optimizer_index: OptimizerIndex,
    name: String,
    num_successes: i32,
    num_calls: i32,
    total_gain: i64,
    time_spent: f64,
    time_spent_since_last_solution: f64,
    runnable: bool,
    selectable: bool,
    score: f64,
}

impl RunInfo {
    fn new(optimizer_index: OptimizerIndex, name: String) -> Self {
        RunInfo {
            optimizer_index,
            name,
            num_successes: 0,
            num_calls: 0,
            total_gain: 0,
            time_spent: 0.0,
            time_spent_since_last_solution: 0.0,
            runnable: true,
            selectable: true,
            score: 0.0,
        }
    }

    fn runnable_and_selectable(&self) -> bool {
        self.runnable && self.selectable
    }
}

/// Adaptive selection of the next optimizer to run, based on the history of
/// successes and deterministic time spent.
#[derive(Debug)]
pub(crate) struct OptimizerSelector {
    run_infos: Vec<RunInfo>,
    info_positions: KeyedVec<OptimizerIndex, usize>,
    selected_index: usize,
}

impl OptimizerSelector {
    fn new(names: Vec<String>) -> Self {
        let mut info_positions = KeyedVec::default();
        let mut run_infos = vec![];
        for (position, name) in names.into_iter().enumerate() {
            let _ = info_positions.push(position);
            run_infos.push(RunInfo::new(OptimizerIndex::new(position), name));
        }
        OptimizerSelector {
            selected_index: run_infos.len(),
            run_infos,
            info_positions,
        }
    }

    /// Selects the next optimizer in the score-sorted list, skipping any
    /// whose time spent since the last solution exceeds that of an earlier
    /// runnable one (fairness), and wrapping to the first runnable when the
    /// end is reached. Returns [`INVALID_OPTIMIZER_INDEX`] when nothing is
    /// runnable and selectable.
    pub(crate) fn select_optimizer(&mut self) -> OptimizerIndex {
        loop {
            self.selected_index += 1;
            while self.selected_index < self.run_infos.len()
                && !self.run_infos[self.selected_index].runnable_and_selectable()
            {
                self.selected_index += 1;
            }

            if self.selected_index >= self.run_infos.len() {
                // Wrap: select the first possible optimizer.
                match self
                    .run_infos
                    .iter()
                    .position(|info| info.runnable_and_selectable())
                {
                    Some(position) => {
                        self.selected_index = position;
                        break;
                    }
                    None => return INVALID_OPTIMIZER_INDEX,
                }
            } else {
                // Don't move on from an earlier optimizer that had less time
                // than this one since the last solution.
                let time_spent =
                    self.run_infos[self.selected_index].time_spent_since_last_solution;
                let too_much_time_spent = self.run_infos[..self.selected_index]
                    .iter()
                    .any(|info| {
                        info.runnable_and_selectable()
                            && info.time_spent_since_last_solution < time_spent
                    });
                if !too_much_time_spent {
                    break;
                }
            }
        }

        self.run_infos[self.selected_index].num_calls += 1;
        self.run_infos[self.selected_index].optimizer_index
    }

    /// Updates the internal metrics of the just-run optimizer; the gain is
    /// its reward (e.g. the cost improvement) and the time spent should be
    /// deterministic to keep the whole solve reproducible.
    pub(crate) fn update_score(&mut self, gain: i64, time_spent: f64) {
        let new_solution_found = gain != 0;
        if new_solution_found {
            self.new_solution_found(gain);
        }
        self.update_deterministic_time(time_spent);

        const EROSION: f64 = 0.2;
        const MIN_SCORE: f64 = 1e-6;
        let new_score = if time_spent == 0.0 {
            0.0
        } else {
            gain as f64 / time_spent
        };
        let info = &mut self.run_infos[self.selected_index];
        info.score = MIN_SCORE.max(info.score * (1.0 - EROSION) + EROSION * new_score);

        if new_solution_found {
            self.update_order();
            self.selected_index = self.run_infos.len();
        }
    }

    /// Marks the optimizer as not selectable until a positive gain is
    /// reported, which makes every optimizer selectable again.
    pub(crate) fn temporarily_mark_optimizer_as_unselectable(
        &mut self,
        optimizer_index: OptimizerIndex,
    ) {
        self.run_infos[self.info_positions[optimizer_index]].selectable = false;
    }

    pub(crate) fn set_optimizer_runnability(
        &mut self,
        optimizer_index: OptimizerIndex,
        runnable: bool,
    ) {
        self.run_infos[self.info_positions[optimizer_index]].runnable = runnable;
    }

    pub(crate) fn log_statistics(&self) {
        for info in &self.run_infos {
            if info.num_calls == 0 {
                continue;
            }
            debug!(
                "  {} : {}/{} ({:.2}%) gain:{} dtime:{:.3} score:{}",
                info.name,
                info.num_successes,
                info.num_calls,
                100.0 * info.num_successes as f64 / info.num_calls as f64,
                info.total_gain,
                info.time_spent,
                info.score
            );
        }
    }

    fn new_solution_found(&mut self, gain: i64) {
        self.run_infos[self.selected_index].num_successes += 1;
        self.run_infos[self.selected_index].total_gain += gain;

        for info in &mut self.run_infos {
            info.time_spent_since_last_solution = 0.0;
            info.selectable = true;
        }
    }

    fn update_deterministic_time(&mut self, time_spent: f64) {
        self.run_infos[self.selected_index].time_spent += time_spent;
        self.run_infos[self.selected_index].time_spent_since_last_solution += time_spent;
    }

    /// Sorts optimizers by score; those that never gained anything rank by
    /// ascending time spent.
    fn update_order(&mut self) {
        self.run_infos.sort_by(|a, b| {
            if a.total_gain == 0 && b.total_gain == 0 {
                a.time_spent.partial_cmp(&b.time_spent).unwrap()
            } else {
                b.score.partial_cmp(&a.score).unwrap()
            }
        });
        for (position, info) in self.run_infos.iter().enumerate() {
            self.info_positions[info.optimizer_index] = position;
        }
    }
}

/// Owns an ordered set of optimizers, the SAT propagator they share and the
/// selector deciding who runs next. One [`PortfolioOptimizer::optimize`] call
/// runs exactly one of them.
pub(crate) struct PortfolioOptimizer {
    name: String,
    random: Random,
    state_update_stamp: i64,
    objective_terms: Option<Rc<BopConstraintTerms>>,
    selector: OptimizerSelector,
    optimizers: KeyedVec<OptimizerIndex, Box<dyn BopOptimizer>>,
    sat_propagator: SatSolver,
    lower_bound: f64,
    upper_bound: f64,
    number_of_consecutive_failing_optimizers: i32,
}

impl std::fmt::Debug for PortfolioOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.optimizers.iter().map(|o| o.name()).collect();
        f.debug_struct("PortfolioOptimizer")
            .field("name", &self.name)
            .field("optimizers", &names)
            .finish()
    }
}

impl PortfolioOptimizer {
    pub(crate) fn new(
        problem_state: &ProblemState,
        parameters: &BopParameters,
        optimizer_set: &BopSolverOptimizerSet,
        name: impl Into<String>,
    ) -> Self {
        let mut portfolio = PortfolioOptimizer {
            name: name.into(),
            random: Random::seed_from_u64(parameters.random_seed),
            state_update_stamp: ProblemState::INITIAL_STAMP_VALUE,
            objective_terms: None,
            selector: OptimizerSelector::new(vec![]),
            optimizers: KeyedVec::default(),
            sat_propagator: SatSolver::default(),
            lower_bound: f64::NEG_INFINITY,
            upper_bound: f64::INFINITY,
            number_of_consecutive_failing_optimizers: 0,
        };
        portfolio.create_optimizers(problem_state, parameters, optimizer_set);
        portfolio
    }

    fn objective_terms(&mut self, problem_state: &ProblemState) -> Rc<BopConstraintTerms> {
        Rc::clone(self.objective_terms.get_or_insert_with(|| {
            Rc::new(build_objective_terms(problem_state.problem()))
        }))
    }

    fn add_optimizer(
        &mut self,
        problem_state: &ProblemState,
        parameters: &BopParameters,
        optimizer_method: BopOptimizerMethod,
    ) {
        match optimizer_method {
            BopOptimizerMethod::SatCoreBased => {
                self.push_optimizer(Box::new(SatCoreBasedOptimizer::new("SatCoreBasedOptimizer")));
            }
            BopOptimizerMethod::LinearSearch => {
                self.push_optimizer(Box::new(GuidedSatFirstSolutionGenerator::new(
                    "SatOptimizer",
                    Policy::NotGuided,
                )));
            }
            BopOptimizerMethod::LinearRelaxation => {
                self.push_optimizer(Box::new(LinearRelaxation::new("LinearRelaxation")));
            }
            BopOptimizerMethod::LocalSearch => {
                for i in 1..=parameters.max_num_decisions_in_ls {
                    self.push_optimizer(Box::new(LocalSearchOptimizer::new(format!("LS_{i}"), i)));
                }
            }
            BopOptimizerMethod::RandomFirstSolution => {
                self.push_optimizer(Box::new(BopRandomFirstSolutionGenerator::new(
                    "SATRandomFirstSolution",
                )));
            }
            BopOptimizerMethod::RandomVariableLns => {
                let terms = self.objective_terms(problem_state);
                self.push_optimizer(Box::new(BopAdaptiveLNSOptimizer::new(
                    "RandomVariableLns",
                    false,
                    Box::new(ObjectiveBasedNeighborhood::new(terms)),
                )));
            }
            BopOptimizerMethod::RandomVariableLnsGuidedByLp => {
                let terms = self.objective_terms(problem_state);
                self.push_optimizer(Box::new(BopAdaptiveLNSOptimizer::new(
                    "RandomVariableLnsWithLp",
                    true,
                    Box::new(ObjectiveBasedNeighborhood::new(terms)),
                )));
            }
            BopOptimizerMethod::RandomConstraintLns => {
                let terms = self.objective_terms(problem_state);
                self.push_optimizer(Box::new(BopAdaptiveLNSOptimizer::new(
                    "RandomConstraintLns",
                    false,
                    Box::new(ConstraintBasedNeighborhood::new(terms)),
                )));
            }
            BopOptimizerMethod::RandomConstraintLnsGuidedByLp => {
                let terms = self.objective_terms(problem_state);
                self.push_optimizer(Box::new(BopAdaptiveLNSOptimizer::new(
                    "RandomConstraintLnsWithLp",
                    true,
                    Box::new(ConstraintBasedNeighborhood::new(terms)),
                )));
            }
            BopOptimizerMethod::RelationGraphLns => {
                self.push_optimizer(Box::new(BopAdaptiveLNSOptimizer::new(
                    "RelationGraphLns",
                    false,
                    Box::new(RelationGraphBasedNeighborhood::new(problem_state.problem())),
                )));
            }
            BopOptimizerMethod::RelationGraphLnsGuidedByLp => {
                self.push_optimizer(Box::new(BopAdaptiveLNSOptimizer::new(
                    "RelationGraphLnsWithLp",
                    true,
                    Box::new(RelationGraphBasedNeighborhood::new(problem_state.problem())),
                )));
            }
            BopOptimizerMethod::CompleteLns => {
                let terms = self.objective_terms(problem_state);
                self.push_optimizer(Box::new(BopCompleteLNSOptimizer::new("LNS", terms)));
            }
            BopOptimizerMethod::UserGuidedFirstSolution => {
                self.push_optimizer(Box::new(GuidedSatFirstSolutionGenerator::new(
                    "SATUserGuidedFirstSolution",
                    Policy::UserGuided,
                )));
            }
            BopOptimizerMethod::LpFirstSolution => {
                self.push_optimizer(Box::new(GuidedSatFirstSolutionGenerator::new(
                    "SATLPFirstSolution",
                    Policy::LpGuided,
                )));
            }
            BopOptimizerMethod::ObjectiveFirstSolution => {
                self.push_optimizer(Box::new(GuidedSatFirstSolutionGenerator::new(
                    "SATObjectiveFirstSolution",
                    Policy::ObjectiveGuided,
                )));
            }
        }
    }

    fn push_optimizer(&mut self, optimizer: Box<dyn BopOptimizer>) {
        let _ = self.optimizers.push(optimizer);
    }

    fn create_optimizers(
        &mut self,
        problem_state: &ProblemState,
        parameters: &BopParameters,
        optimizer_set: &BopSolverOptimizerSet,
    ) {
        if parameters.use_symmetry {
            // The symmetry subsystem is not part of this engine.
            warn!("use_symmetry is set but symmetry detection is not available; ignored.");
        }

        for &optimizer_method in &optimizer_set.methods {
            self.add_optimizer(problem_state, parameters, optimizer_method);
        }

        let names = self
            .optimizers
            .iter()
            .map(|optimizer| optimizer.name().to_owned())
            .collect();
        self.selector = OptimizerSelector::new(names);
    }

    fn synchronize_if_needed(&mut self, problem_state: &ProblemState) -> OptimizerStatus {
        if self.state_update_stamp == problem_state.update_stamp() {
            return OptimizerStatus::Continue;
        }
        self.state_update_stamp = problem_state.update_stamp();

        // Load any new information into the shared propagator.
        let first_time = self.sat_propagator.num_variables() == 0;
        let status =
            util::load_state_problem_to_sat_solver(problem_state, &mut self.sat_propagator);
        if status != OptimizerStatus::Continue {
            return status;
        }
        if first_time {
            // Use the objective as the default assignment preference.
            problem::use_objective_for_sat_assignment_preference(
                problem_state.problem(),
                &mut self.sat_propagator,
            );
        }

        self.lower_bound = problem_state.scaled_lower_bound();
        self.upper_bound = if problem_state.solution().is_feasible() {
            problem_state.solution().scaled_cost()
        } else {
            f64::INFINITY
        };
        OptimizerStatus::Continue
    }

    pub(crate) fn optimize(
        &mut self,
        parameters: &BopParameters,
        problem_state: &ProblemState,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus {
        learned_info.clear();

        let sync_status = self.synchronize_if_needed(problem_state);
        if sync_status != OptimizerStatus::Continue {
            return sync_status;
        }

        for optimizer_index in self.optimizers.keys() {
            self.selector.set_optimizer_runnability(
                optimizer_index,
                self.optimizers[optimizer_index].should_be_run(problem_state),
            );
        }

        let init_cost = if problem_state.solution().is_feasible() {
            problem_state.solution().cost()
        } else {
            i64::MAX
        };
        let init_deterministic_time = time_limit.elapsed_deterministic_time();

        let selected_optimizer_index = self.selector.select_optimizer();
        if selected_optimizer_index == INVALID_OPTIMIZER_INDEX {
            debug!("All the optimizers are done.");
            return OptimizerStatus::Abort;
        }
        debug!(
            "      {} .. {} {} - {}. Time limit: {} -- {}",
            self.lower_bound,
            self.upper_bound,
            self.name,
            self.optimizers[selected_optimizer_index].name(),
            time_limit.time_left(),
            time_limit.deterministic_time_left()
        );
        let optimization_status = self.optimizers[selected_optimizer_index].optimize(
            parameters,
            problem_state,
            &mut self.sat_propagator,
            &mut self.random,
            learned_info,
            time_limit,
        );

        // Abort means not-until-a-new-solution for this one.
        if optimization_status == OptimizerStatus::Abort {
            self.selector
                .temporarily_mark_optimizer_as_unselectable(selected_optimizer_index);
        }

        // The gain defaults to 1 for the very first solution.
        let gain = if optimization_status == OptimizerStatus::SolutionFound {
            if init_cost == i64::MAX {
                1
            } else {
                init_cost - learned_info.solution.cost()
            }
        } else {
            0
        };
        let spent_deterministic_time =
            time_limit.elapsed_deterministic_time() - init_deterministic_time;
        self.selector.update_score(gain, spent_deterministic_time);

        if optimization_status == OptimizerStatus::Infeasible
            || optimization_status == OptimizerStatus::OptimalSolutionFound
        {
            return optimization_status;
        }

        // Stop the portfolio after too many unsuccessful calls in a row.
        if let Some(max_failures) = parameters.max_number_of_consecutive_failing_optimizer_calls
        {
            if problem_state.solution().is_feasible() {
                self.number_of_consecutive_failing_optimizers =
                    if optimization_status == OptimizerStatus::SolutionFound {
                        0
                    } else {
                        self.number_of_consecutive_failing_optimizers + 1
                    };
                if self.number_of_consecutive_failing_optimizers > max_failures {
                    return OptimizerStatus::Abort;
                }
            }
        }
        OptimizerStatus::Continue
    }
}

impl Drop for PortfolioOptimizer {
    fn drop(&mut self) {
        debug!("Stats. #new_solutions/#calls by optimizer:");
        self.selector.log_statistics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector_with(names: &[&str]) -> OptimizerSelector {
        OptimizerSelector::new(names.iter().map(|&n| n.to_owned()).collect())
    }

    #[test]
    fn selection_is_round_robin_without_history() {
        let mut selector = selector_with(&["a", "b", "c"]);
        assert_eq!(selector.select_optimizer(), OptimizerIndex(0));
        selector.update_score(0, 1.0);
        // Fairness: "b" has spent no time yet, "a" has; "b" runs next.
        assert_eq!(selector.select_optimizer(), OptimizerIndex(1));
        selector.update_score(0, 1.0);
        assert_eq!(selector.select_optimizer(), OptimizerIndex(2));
    }

    #[test]
    fn non_runnable_optimizers_are_skipped() {
        let mut selector = selector_with(&["a", "b"]);
        selector.set_optimizer_runnability(OptimizerIndex(0), false);
        assert_eq!(selector.select_optimizer(), OptimizerIndex(1));
    }

    #[test]
    fn everything_unselectable_returns_invalid() {
        let mut selector = selector_with(&["a", "b"]);
        selector.temporarily_mark_optimizer_as_unselectable(OptimizerIndex(0));
        selector.temporarily_mark_optimizer_as_unselectable(OptimizerIndex(1));
        assert_eq!(selector.select_optimizer(), INVALID_OPTIMIZER_INDEX);
    }

    #[test]
    fn a_solution_restores_selectability_and_resorts() {
        let mut selector = selector_with(&["a", "b"]);
        let _ = selector.select_optimizer();
        selector.temporarily_mark_optimizer_as_unselectable(OptimizerIndex(1));
        // "a" finds a solution: everything is selectable again and the next
        // selection restarts from the top of the re-sorted list.
        selector.update_score(10, 1.0);
        let selected = selector.select_optimizer();
        assert_eq!(selected, OptimizerIndex(0));
    }
}
