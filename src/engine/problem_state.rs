use std::rc::Rc;

use log::debug;

use crate::basic_types::BinaryClause;
use crate::basic_types::BinaryClauseManager;
use crate::basic_types::BopSolution;
use crate::basic_types::KeyedVec;
use crate::basic_types::VariableIndex;
use crate::bop_assert_simple;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;
use crate::optimisation::OptimizerStatus;
use crate::parameters::BopParameters;
use crate::problem::LinearBooleanProblem;

/// What an optimizer learned during one `optimize` call. The driver owns one
/// instance, hands it to a single optimizer at a time, and merges it back
/// into the [`ProblemState`]. Optimizers must clear it on entry.
#[derive(Clone, Debug)]
pub(crate) struct LearnedInfo {
    /// Literals proved to hold in every (optimal) solution.
    pub(crate) fixed_literals: Vec<Literal>,

    /// A candidate solution, possibly infeasible; the state only keeps it if
    /// it is feasible and strictly better than the stored one.
    pub(crate) solution: BopSolution,

    /// A proven lower bound on the objective.
    pub(crate) lower_bound: i64,

    /// Fractional values from the linear relaxation; either empty or one
    /// value per problem variable.
    pub(crate) lp_values: Vec<f64>,

    /// Binary clauses implied by the problem, learned by a SAT solver.
    pub(crate) binary_clauses: Vec<BinaryClause>,
}

impl LearnedInfo {
    pub(crate) fn new(problem: &Rc<LinearBooleanProblem>) -> Self {
        LearnedInfo {
            fixed_literals: vec![],
            solution: BopSolution::new(Rc::clone(problem), "AllZero"),
            lower_bound: i64::MIN,
            lp_values: vec![],
            binary_clauses: vec![],
        }
    }

    /// Resets everything but the solution, whose staleness is harmless: the
    /// state only accepts strict improvements.
    pub(crate) fn clear(&mut self) {
        self.fixed_literals.clear();
        self.lower_bound = i64::MIN;
        self.lp_values.clear();
        self.binary_clauses.clear();
    }
}

/// The current state of the problem with everything the solver has learned
/// about it: bounds, fixed variables, the best solution, LP values and
/// learned binary clauses.
///
/// The state is only written by the driver through
/// [`ProblemState::merge_learned_info`]; optimizers observe it read-only and
/// use [`ProblemState::update_stamp`] to detect changes since their last
/// synchronization.
#[derive(Debug)]
pub(crate) struct ProblemState {
    problem: Rc<LinearBooleanProblem>,
    parameters: BopParameters,
    update_stamp: i64,
    is_fixed: KeyedVec<VariableIndex, bool>,
    fixed_values: KeyedVec<VariableIndex, bool>,
    lp_values: Vec<f64>,
    solution: BopSolution,
    assignment_preference: Vec<bool>,
    lower_bound: i64,
    upper_bound: i64,
    binary_clause_manager: BinaryClauseManager,
}

impl ProblemState {
    pub(crate) const INITIAL_STAMP_VALUE: i64 = 0;

    pub(crate) fn new(problem: Rc<LinearBooleanProblem>) -> Self {
        let num_variables = problem.num_variables();
        let solution = BopSolution::new(Rc::clone(&problem), "Initial");

        // Trivial relaxation: every term at its minimum.
        let objective = problem.objective();
        let lower_bound: i64 = objective
            .coefficients
            .iter()
            .map(|&coefficient| coefficient.min(0))
            .sum();
        let upper_bound = if solution.is_feasible() {
            solution.cost()
        } else {
            i64::MAX
        };

        ProblemState {
            problem,
            parameters: BopParameters::default(),
            update_stamp: Self::INITIAL_STAMP_VALUE + 1,
            is_fixed: KeyedVec::from_elem(false, num_variables),
            fixed_values: KeyedVec::from_elem(false, num_variables),
            lp_values: vec![],
            solution,
            assignment_preference: vec![],
            lower_bound,
            upper_bound,
            binary_clause_manager: BinaryClauseManager::default(),
        }
    }

    pub(crate) fn set_parameters(&mut self, parameters: BopParameters) {
        self.parameters = parameters;
    }

    pub(crate) fn parameters(&self) -> &BopParameters {
        &self.parameters
    }

    /// Used for warm start only: a preferred polarity per variable.
    pub(crate) fn set_assignment_preference(&mut self, preference: Vec<bool>) {
        self.assignment_preference = preference;
    }

    pub(crate) fn assignment_preference(&self) -> &[bool] {
        &self.assignment_preference
    }

    /// Merges the learned information into the state. Returns true when the
    /// state changed, in which case the update stamp was advanced.
    pub(crate) fn merge_learned_info(
        &mut self,
        learned_info: &LearnedInfo,
        optimization_status: OptimizerStatus,
    ) -> bool {
        let mut new_lp_values = false;
        if !learned_info.lp_values.is_empty() && self.lp_values != learned_info.lp_values {
            debug_assert_eq!(learned_info.lp_values.len(), self.problem.num_variables());
            self.lp_values = learned_info.lp_values.clone();
            new_lp_values = true;
            debug!("New LP values.");
        }

        let mut new_binary_clauses = false;
        for &clause in &learned_info.binary_clauses {
            let num_variables = self.problem.num_variables() as u32;
            if clause.a.variable().0 < num_variables && clause.b.variable().0 < num_variables {
                new_binary_clauses |= self.binary_clause_manager.add(clause);
            }
        }
        if new_binary_clauses {
            debug!(
                "Num binary clauses: {}",
                self.binary_clause_manager.num_clauses()
            );
        }

        let mut new_solution = false;
        if learned_info.solution.is_feasible()
            && (!self.solution.is_feasible()
                || learned_info.solution.cost() < self.solution.cost())
        {
            self.solution = learned_info.solution.clone();
            new_solution = true;
            debug!(
                "New solution '{}' with cost {}.",
                self.solution.name(),
                self.solution.cost()
            );
        }

        let mut new_lower_bound = false;
        if learned_info.lower_bound > self.lower_bound {
            self.lower_bound = learned_info.lower_bound;
            new_lower_bound = true;
            debug!("New lower bound {}.", self.lower_bound);
        }

        if self.solution.is_feasible() {
            self.upper_bound = self.upper_bound.min(self.solution.cost());
            if self.upper_bound <= self.lower_bound || self.gap_is_within_limit() {
                // The lower bound might exceed the cost of a feasible
                // solution due to rounding in the problem scaling and the LP;
                // holding a feasible solution, it is proven optimal.
                self.mark_as_optimal();
            }
        }

        // Merge fixed variables. Variables created during search, i.e. not in
        // the original problem, are ignored.
        let mut num_newly_fixed_variables = 0;
        for &literal in &learned_info.fixed_literals {
            if literal.variable().index() >= self.problem.num_variables() {
                continue;
            }
            let var = VariableIndex::new(literal.variable().index());
            let value = literal.is_positive();
            if self.is_fixed[var] {
                if self.fixed_values[var] != value {
                    self.mark_as_infeasible();
                    return true;
                }
            } else {
                self.is_fixed[var] = true;
                self.fixed_values[var] = value;
                num_newly_fixed_variables += 1;
            }
        }
        if num_newly_fixed_variables > 0 {
            let num_fixed_variables = self.is_fixed.iter().filter(|&&fixed| fixed).count();
            debug!(
                "{num_newly_fixed_variables} newly fixed variables ({num_fixed_variables} / {}).",
                self.is_fixed.len()
            );
            if num_fixed_variables == self.is_fixed.len() {
                // Everything is fixed; the state is decided either way.
                let mut fixed_solution = self.solution.clone();
                for var in self.is_fixed.keys() {
                    fixed_solution.set_value(var, self.fixed_values[var]);
                }
                if fixed_solution.is_feasible() {
                    self.solution = fixed_solution;
                }
                if self.solution.is_feasible() {
                    self.mark_as_optimal();
                } else {
                    self.mark_as_infeasible();
                }
            }
        }

        let known_status = match optimization_status {
            OptimizerStatus::OptimalSolutionFound => {
                self.mark_as_optimal();
                true
            }
            OptimizerStatus::Infeasible => {
                self.mark_as_infeasible();
                true
            }
            _ => false,
        };

        let updated = new_lp_values
            || new_binary_clauses
            || new_solution
            || new_lower_bound
            || num_newly_fixed_variables > 0
            || known_status;
        if updated {
            self.update_stamp += 1;
        }
        updated
    }

    fn gap_is_within_limit(&self) -> bool {
        let gap = self.upper_bound as f64 - self.lower_bound as f64;
        let magnitude = (self.upper_bound.abs().max(self.lower_bound.abs())) as f64;
        gap <= self.parameters.relative_gap_limit * magnitude
    }

    /// Snapshots all the information learned so far, including the binary
    /// clauses added since the last [`ProblemState::synchronization_done`].
    #[allow(unused, reason = "used by cooperating drivers to exchange state")]
    pub(crate) fn get_learned_info(&self) -> LearnedInfo {
        let mut learned_info = LearnedInfo::new(&self.problem);
        for var in self.is_fixed.keys() {
            if self.is_fixed[var] {
                learned_info.fixed_literals.push(Literal::new(
                    BooleanVariable(var.value() as u32),
                    self.fixed_values[var],
                ));
            }
        }
        learned_info.solution = self.solution.clone();
        learned_info.lower_bound = self.lower_bound;
        learned_info.lp_values = self.lp_values.clone();
        learned_info.binary_clauses = self.newly_added_binary_clauses().to_vec();
        learned_info
    }

    /// Marks the problem state as optimal; requires a feasible solution.
    pub(crate) fn mark_as_optimal(&mut self) {
        bop_assert_simple!(self.solution.is_feasible());
        self.upper_bound = self.upper_bound.min(self.solution.cost());
        self.lower_bound = self.upper_bound;
        self.update_stamp += 1;
    }

    /// Marks the problem state as infeasible, i.e. sets a lower bound greater
    /// than the upper bound.
    pub(crate) fn mark_as_infeasible(&mut self) {
        bop_assert_simple!(!self.solution.is_feasible());
        if self.upper_bound == i64::MAX {
            self.lower_bound = i64::MAX;
            self.upper_bound = i64::MAX - 1;
        } else {
            self.lower_bound = self.upper_bound.saturating_add(1);
        }
        self.update_stamp += 1;
    }

    /// True when the stored solution is proven optimal; it is then returned
    /// by [`ProblemState::solution`].
    pub(crate) fn is_optimal(&self) -> bool {
        self.solution.is_feasible() && self.solution.cost() == self.lower_bound
    }

    pub(crate) fn is_infeasible(&self) -> bool {
        self.lower_bound > self.upper_bound
    }

    pub(crate) fn is_variable_fixed(&self, var: VariableIndex) -> bool {
        self.is_fixed[var]
    }

    pub(crate) fn is_fixed(&self) -> &KeyedVec<VariableIndex, bool> {
        &self.is_fixed
    }

    /// The value of a fixed variable; only meaningful when
    /// [`ProblemState::is_variable_fixed`] holds.
    pub(crate) fn variable_fixed_value(&self, var: VariableIndex) -> bool {
        self.fixed_values[var]
    }

    /// Values of the LP relaxation, empty when no LP ran yet.
    pub(crate) fn lp_values(&self) -> &[f64] {
        &self.lp_values
    }

    /// The best solution so far. Until a feasible one is found this is just
    /// the initial assignment.
    pub(crate) fn solution(&self) -> &BopSolution {
        &self.solution
    }

    pub(crate) fn problem(&self) -> &Rc<LinearBooleanProblem> {
        &self.problem
    }

    /// Unscaled bounds; compare them only to unscaled solution costs.
    pub(crate) fn lower_bound(&self) -> i64 {
        self.lower_bound
    }

    pub(crate) fn upper_bound(&self) -> i64 {
        self.upper_bound
    }

    pub(crate) fn scaled_lower_bound(&self) -> f64 {
        self.problem.scale_objective_value(self.lower_bound)
    }

    /// An upper bound on the number of times the state was updated. When it
    /// changed since an optimizer last looked, resynchronizing is worthwhile.
    pub(crate) fn update_stamp(&self) -> i64 {
        self.update_stamp
    }

    pub(crate) fn newly_added_binary_clauses(&self) -> &[BinaryClause] {
        self.binary_clause_manager.newly_added()
    }

    /// Resets what is considered "new" binary clauses; meant to be called
    /// once every optimizer has synchronized.
    #[allow(unused, reason = "used by cooperating drivers to exchange state")]
    pub(crate) fn synchronization_done(&mut self) {
        self.binary_clause_manager.clear_newly_added();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ProblemState {
        let mut problem = LinearBooleanProblem::with_num_variables(3);
        problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));
        problem.set_objective(vec![1, 2, 3], vec![1, 1, 1], 0, 1.0);
        ProblemState::new(Rc::new(problem))
    }

    fn feasible_solution(state: &ProblemState, on: &[usize]) -> BopSolution {
        let mut solution = BopSolution::new(Rc::clone(state.problem()), "test");
        for &index in on {
            solution.set_value(VariableIndex::new(index), true);
        }
        solution
    }

    #[test]
    fn initial_bounds_are_the_trivial_relaxation() {
        let state = state();
        assert_eq!(state.lower_bound(), 0);
        assert_eq!(state.upper_bound(), i64::MAX);
        assert!(!state.is_optimal());
        assert!(!state.is_infeasible());
    }

    #[test]
    fn merging_a_better_solution_updates_the_upper_bound() {
        let mut state = state();
        let mut learned_info = LearnedInfo::new(state.problem());
        learned_info.solution = feasible_solution(&state, &[0]);
        let old_stamp = state.update_stamp();

        assert!(state.merge_learned_info(&learned_info, OptimizerStatus::SolutionFound));
        assert_eq!(state.upper_bound(), 1);
        assert!(state.update_stamp() > old_stamp);

        // A worse solution changes nothing.
        learned_info.clear();
        learned_info.solution = feasible_solution(&state, &[0, 2]);
        assert!(!state.merge_learned_info(&learned_info, OptimizerStatus::Continue));
    }

    #[test]
    fn infeasible_merged_solutions_are_ignored() {
        let mut state = state();
        let mut learned_info = LearnedInfo::new(state.problem());
        learned_info.solution = feasible_solution(&state, &[0, 1]);
        assert!(!learned_info.solution.is_feasible());
        assert!(!state.merge_learned_info(&learned_info, OptimizerStatus::Continue));
        assert_eq!(state.upper_bound(), i64::MAX);
    }

    #[test]
    fn closing_the_gap_marks_optimality() {
        let mut state = state();
        let mut learned_info = LearnedInfo::new(state.problem());
        learned_info.solution = feasible_solution(&state, &[0]);
        learned_info.lower_bound = 1;
        assert!(state.merge_learned_info(&learned_info, OptimizerStatus::Continue));
        assert!(state.is_optimal());
        assert_eq!(state.lower_bound(), state.upper_bound());
    }

    #[test]
    fn conflicting_fixed_literals_are_infeasible() {
        let mut state = state();
        let mut learned_info = LearnedInfo::new(state.problem());
        learned_info.fixed_literals = vec![Literal::from_signed(1)];
        assert!(state.merge_learned_info(&learned_info, OptimizerStatus::Continue));

        learned_info.clear();
        learned_info.fixed_literals = vec![Literal::from_signed(-1)];
        assert!(state.merge_learned_info(&learned_info, OptimizerStatus::Continue));
        assert!(state.is_infeasible());
        assert!(state.lower_bound() > state.upper_bound());
    }

    #[test]
    fn update_stamp_is_nondecreasing_across_merges() {
        let mut state = state();
        let mut stamp = state.update_stamp();
        let mut learned_info = LearnedInfo::new(state.problem());
        for step in 0..3 {
            learned_info.clear();
            learned_info.lower_bound = step;
            let _ = state.merge_learned_info(&learned_info, OptimizerStatus::Continue);
            assert!(state.update_stamp() >= stamp);
            stamp = state.update_stamp();
        }
    }

    #[test]
    fn newly_added_clauses_reset_on_synchronization_done() {
        let mut state = state();
        let mut learned_info = LearnedInfo::new(state.problem());
        learned_info.binary_clauses = vec![BinaryClause::new(
            Literal::from_signed(1),
            Literal::from_signed(2),
        )];
        assert!(state.merge_learned_info(&learned_info, OptimizerStatus::Continue));
        assert_eq!(state.newly_added_binary_clauses().len(), 1);
        state.synchronization_done();
        assert!(state.newly_added_binary_clauses().is_empty());
    }

    #[test]
    fn fixing_every_variable_decides_the_state() {
        let mut state = state();
        let mut learned_info = LearnedInfo::new(state.problem());
        learned_info.fixed_literals = vec![
            Literal::from_signed(1),
            Literal::from_signed(-2),
            Literal::from_signed(-3),
        ];
        assert!(state.merge_learned_info(&learned_info, OptimizerStatus::Continue));
        assert!(state.is_optimal());
        assert_eq!(state.solution().cost(), 1);
    }
}
