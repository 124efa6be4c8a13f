use std::rc::Rc;

use crate::basic_types::BopSolution;
use crate::basic_types::ConstraintIndex;
use crate::basic_types::EntryIndex;
use crate::basic_types::HashMap;
use crate::basic_types::KeyedVec;
use crate::basic_types::StorageKey;
use crate::basic_types::VariableIndex;
use crate::bop_assert_moderate;
use crate::bop_assert_simple;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;
use crate::optimisation::local_search::BacktrackableIntegerSet;
use crate::optimisation::local_search::NonOrderedSetHasher;
use crate::problem::LinearBooleanProblem;

/// A constraint entry of the sparse by-variable matrix.
#[derive(Clone, Copy, Debug)]
struct ConstraintEntry {
    constraint: ConstraintIndex,
    weight: i64,
}

/// A [`ConstraintIndex`] together with a repair direction: "up" means the
/// activity is below the lower bound and must move up to fix the
/// infeasibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ConstraintIndexWithDirection(i32);

impl StorageKey for ConstraintIndexWithDirection {
    fn index(&self) -> usize {
        self.0 as usize
    }

    fn create_from_index(index: usize) -> Self {
        ConstraintIndexWithDirection(index as i32)
    }
}

fn with_direction(constraint: ConstraintIndex, up: bool) -> ConstraintIndexWithDirection {
    ConstraintIndexWithDirection(2 * constraint.value() + (up as i32))
}

/// Incrementally maintains an assignment and the feasibility of every
/// constraint under it.
///
/// The current assignment starts from a feasible reference solution and is
/// updated by [`AssignmentAndConstraintFeasibilityMaintainer::assign`]; it
/// may become infeasible. All updates can be reverted through a stack of
/// backtracking levels:
///
/// ```text
///      Method called                 Assigned after the call
///   1- assign({a, b})                         a b
///   2- add_backtracking_level()               a b |
///   3- assign({c})                            a b | c
///   4- assign({d})                            a b | c d
///   5- backtrack_one_level()                  a b
/// ```
///
/// The objective is a distinguished constraint at index 0 whose upper bound
/// sits strictly below the reference cost, so a feasible current assignment
/// is always a strict improvement.
#[derive(Debug)]
pub(crate) struct AssignmentAndConstraintFeasibilityMaintainer {
    by_variable_matrix: KeyedVec<VariableIndex, KeyedVec<EntryIndex, ConstraintEntry>>,
    constraint_lower_bounds: KeyedVec<ConstraintIndex, i64>,
    constraint_upper_bounds: KeyedVec<ConstraintIndex, i64>,

    assignment: BopSolution,
    reference: BopSolution,

    constraint_values: KeyedVec<ConstraintIndex, i64>,
    infeasible_constraint_set: BacktrackableIntegerSet<ConstraintIndex>,

    /// Variables flipped in `assignment`, partitioned by backtracking level:
    /// `flipped_var_trail_backtrack_levels[i]` is the trail size at the time
    /// of the i-th `add_backtracking_level` call.
    flipped_var_trail_backtrack_levels: Vec<usize>,
    flipped_var_trail: Vec<VariableIndex>,

    tmp_potential_repairs: Vec<Literal>,
    constraint_set_hasher: NonOrderedSetHasher<ConstraintIndexWithDirection>,
    hash_to_potential_repairs: HashMap<u64, Vec<Literal>>,
}

/// The index of the special "objective" constraint.
pub(crate) const OBJECTIVE_CONSTRAINT: ConstraintIndex = ConstraintIndex(0);

impl AssignmentAndConstraintFeasibilityMaintainer {
    /// Note that the constraint indices used here are not the ones of the
    /// given problem: the objective comes first and binary constraints are
    /// skipped (their repair is delegated to the SAT propagator).
    pub(crate) fn new(problem: Rc<LinearBooleanProblem>) -> Self {
        let num_variables = problem.num_variables();
        let mut by_variable_matrix: KeyedVec<VariableIndex, KeyedVec<EntryIndex, ConstraintEntry>> =
            KeyedVec::from_elem(KeyedVec::default(), num_variables);
        let mut constraint_lower_bounds: KeyedVec<ConstraintIndex, i64> = KeyedVec::default();
        let mut constraint_upper_bounds: KeyedVec<ConstraintIndex, i64> = KeyedVec::default();
        let mut constraint_values: KeyedVec<ConstraintIndex, i64> = KeyedVec::default();

        // The objective is the first constraint; its bounds only become
        // meaningful once a reference solution is set.
        let objective = problem.objective();
        for (&literal, &coefficient) in objective.literals.iter().zip(&objective.coefficients) {
            bop_assert_simple!(literal > 0);
            bop_assert_simple!(coefficient != 0);
            let var = VariableIndex::new(literal as usize - 1);
            let _ = by_variable_matrix[var].push(ConstraintEntry {
                constraint: OBJECTIVE_CONSTRAINT,
                weight: coefficient,
            });
        }
        let _ = constraint_lower_bounds.push(i64::MIN);
        let _ = constraint_values.push(0);
        let _ = constraint_upper_bounds.push(i64::MAX);

        let mut num_constraints_with_objective = ConstraintIndex(1);
        for constraint in problem.constraints() {
            if constraint.literals.len() <= 2 {
                // Infeasible binary constraints are repaired by propagation
                // whenever possible, so they are not tracked here.
                continue;
            }
            for (&literal, &coefficient) in constraint.literals.iter().zip(&constraint.coefficients)
            {
                let var = VariableIndex::new(literal as usize - 1);
                let _ = by_variable_matrix[var].push(ConstraintEntry {
                    constraint: num_constraints_with_objective,
                    weight: coefficient,
                });
            }
            let _ = constraint_lower_bounds.push(constraint.lower_bound.unwrap_or(i64::MIN));
            let _ = constraint_values.push(0);
            let _ = constraint_upper_bounds.push(constraint.upper_bound.unwrap_or(i64::MAX));
            num_constraints_with_objective.0 += 1;
        }

        let mut infeasible_constraint_set = BacktrackableIntegerSet::new();
        infeasible_constraint_set.clear_and_resize(constraint_values.len());

        AssignmentAndConstraintFeasibilityMaintainer {
            by_variable_matrix,
            constraint_lower_bounds,
            constraint_upper_bounds,
            assignment: BopSolution::new(Rc::clone(&problem), "Assignment"),
            reference: BopSolution::new(problem, "Assignment"),
            constraint_values,
            infeasible_constraint_set,
            flipped_var_trail_backtrack_levels: vec![],
            flipped_var_trail: vec![],
            tmp_potential_repairs: vec![],
            constraint_set_hasher: NonOrderedSetHasher::new(),
            hash_to_potential_repairs: HashMap::default(),
        }
    }

    /// Sets a new feasible reference solution and reverts all internal
    /// structures to their initial state.
    pub(crate) fn set_reference_solution(&mut self, reference_solution: &BopSolution) {
        bop_assert_simple!(reference_solution.is_feasible());
        self.infeasible_constraint_set.backtrack_all();

        self.assignment = reference_solution.clone();
        self.assignment.set_name("Assignment");
        self.reference = self.assignment.clone();
        self.flipped_var_trail_backtrack_levels.clear();
        self.flipped_var_trail.clear();
        self.add_backtracking_level(); // To handle initial propagation.

        // Recompute the value of all constraints.
        self.constraint_values.assign(0, self.num_constraints());
        for var in self.by_variable_matrix.keys() {
            if self.assignment.value(var) {
                for entry_index in self.by_variable_matrix[var].keys() {
                    let entry = self.by_variable_matrix[var][entry_index];
                    self.constraint_values[entry.constraint] += entry.weight;
                }
            }
        }

        self.make_objective_constraint_infeasible(1);
    }

    /// Promotes the current assignment, which must be feasible (hence a
    /// strict improvement over the old reference), to the new reference.
    pub(crate) fn use_current_state_as_reference(&mut self) {
        for i in 0..self.flipped_var_trail.len() {
            let var = self.flipped_var_trail[i];
            let value = self.assignment.value(var);
            self.reference.set_value(var, value);
        }
        self.flipped_var_trail.clear();
        self.flipped_var_trail_backtrack_levels.clear();
        self.add_backtracking_level(); // To handle initial propagation.
        self.make_objective_constraint_infeasible(1);
    }

    /// Over-constrains the objective by the given delta. Must be called on a
    /// feasible, fully backtracked state.
    fn make_objective_constraint_infeasible(&mut self, delta: i64) {
        bop_assert_simple!(self.is_feasible());
        bop_assert_simple!(self.flipped_var_trail.is_empty());
        self.constraint_upper_bounds[OBJECTIVE_CONSTRAINT] =
            self.constraint_values[OBJECTIVE_CONSTRAINT] - delta;
        self.infeasible_constraint_set.backtrack_all();
        self.infeasible_constraint_set
            .change_state(OBJECTIVE_CONSTRAINT, true);
        self.infeasible_constraint_set.add_backtracking_level();
        bop_assert_simple!(!self.constraint_is_feasible(OBJECTIVE_CONSTRAINT));
        bop_assert_simple!(!self.is_feasible());
    }

    /// Applies every literal that flips a variable of the current assignment,
    /// updating the constraint values and the infeasible set. Revertible with
    /// [`AssignmentAndConstraintFeasibilityMaintainer::backtrack_one_level`].
    pub(crate) fn assign(&mut self, literals: &[Literal]) {
        for &literal in literals {
            let var = VariableIndex::new(literal.variable().index());
            if var.index() >= self.by_variable_matrix.len() {
                // A variable created during search, unknown to the problem.
                continue;
            }
            let value = literal.is_positive();
            if self.assignment.value(var) != value {
                self.flipped_var_trail.push(var);
                self.assignment.set_value(var, value);
                for entry_index in self.by_variable_matrix[var].keys() {
                    let entry = self.by_variable_matrix[var][entry_index];
                    let was_feasible = self.constraint_is_feasible(entry.constraint);
                    self.constraint_values[entry.constraint] +=
                        if value { entry.weight } else { -entry.weight };
                    if self.constraint_is_feasible(entry.constraint) != was_feasible {
                        self.infeasible_constraint_set
                            .change_state(entry.constraint, was_feasible);
                    }
                }
            }
        }
    }

    pub(crate) fn add_backtracking_level(&mut self) {
        self.flipped_var_trail_backtrack_levels
            .push(self.flipped_var_trail.len());
        self.infeasible_constraint_set.add_backtracking_level();
    }

    /// Restores the state exactly as it was before the matching
    /// [`AssignmentAndConstraintFeasibilityMaintainer::add_backtracking_level`].
    /// Backtracking past the initial level is a no-op.
    pub(crate) fn backtrack_one_level(&mut self) {
        let Some(trail_size) = self.flipped_var_trail_backtrack_levels.pop() else {
            return;
        };
        for i in (trail_size..self.flipped_var_trail.len()).rev() {
            let var = self.flipped_var_trail[i];
            let new_value = !self.assignment.value(var);
            bop_assert_moderate!(new_value == self.reference.value(var));
            self.assignment.set_value(var, new_value);
            for entry_index in self.by_variable_matrix[var].keys() {
                let entry = self.by_variable_matrix[var][entry_index];
                self.constraint_values[entry.constraint] +=
                    if new_value { entry.weight } else { -entry.weight };
            }
        }
        self.flipped_var_trail.truncate(trail_size);
        self.infeasible_constraint_set.backtrack_one_level();
    }

    pub(crate) fn backtrack_all(&mut self) {
        while !self.flipped_var_trail_backtrack_levels.is_empty() {
            self.backtrack_one_level();
        }
    }

    /// The literals that appear in exactly all the currently infeasible
    /// constraints (objective aside) and whose flip goes in the repairing
    /// direction for each of them. Such a flip may repair everything at once
    /// without any propagation.
    ///
    /// The returned slice is only valid until the next call.
    pub(crate) fn potential_one_flip_repairs(&mut self) -> &[Literal] {
        if !self.constraint_set_hasher.is_initialized() {
            self.initialize_constraint_set_hasher();
        }

        let mut hash: u64 = 0;
        for index in 0..self.infeasible_constraint_set.superset().len() {
            let constraint = self.infeasible_constraint_set.superset()[index];
            let value = self.constraint_value(constraint);
            if value > self.constraint_upper_bound(constraint) {
                hash ^= self.constraint_set_hasher.hash(with_direction(constraint, false));
            } else if value < self.constraint_lower_bound(constraint) {
                hash ^= self.constraint_set_hasher.hash(with_direction(constraint, true));
            }
        }

        self.tmp_potential_repairs.clear();
        if let Some(candidates) = self.hash_to_potential_repairs.get(&hash) {
            for &literal in candidates {
                // Only return actual flips.
                let var = VariableIndex::new(literal.variable().index());
                if self.assignment.value(var) != literal.is_positive() {
                    self.tmp_potential_repairs.push(literal);
                }
            }
        }
        &self.tmp_potential_repairs
    }

    fn initialize_constraint_set_hasher(&mut self) {
        let num_constraints_with_objective = self.constraint_upper_bounds.len();

        // The objective constraint is completely ignored so that a repair is
        // considered even while the objective is still infeasible.
        self.constraint_set_hasher
            .initialize(2 * num_constraints_with_objective, 0x5eed);
        self.constraint_set_hasher
            .ignore_element(with_direction(OBJECTIVE_CONSTRAINT, true));
        self.constraint_set_hasher
            .ignore_element(with_direction(OBJECTIVE_CONSTRAINT, false));

        // Two entries per variable: a positive flip (false to true) and a
        // negative one.
        for var in self.by_variable_matrix.keys() {
            for flip_is_positive in [true, false] {
                let mut hash: u64 = 0;
                for entry_index in self.by_variable_matrix[var].keys() {
                    let entry = self.by_variable_matrix[var][entry_index];
                    let coeff_is_positive = entry.weight > 0;
                    let up = if flip_is_positive {
                        coeff_is_positive
                    } else {
                        !coeff_is_positive
                    };
                    hash ^= self.constraint_set_hasher.hash(with_direction(entry.constraint, up));
                }
                self.hash_to_potential_repairs
                    .entry(hash)
                    .or_default()
                    .push(Literal::new(
                        BooleanVariable(var.value() as u32),
                        flip_is_positive,
                    ));
            }
        }
    }

    /// True when no constraint is infeasible in the current state.
    pub(crate) fn is_feasible(&self) -> bool {
        self.infeasible_constraint_set.size() == 0
    }

    /// The *exact* number of infeasible constraints;
    /// [`AssignmentAndConstraintFeasibilityMaintainer::possibly_infeasible_constraints`]
    /// may return more.
    pub(crate) fn num_infeasible_constraints(&self) -> i32 {
        self.infeasible_constraint_set.size()
    }

    /// A superset of the infeasible constraints in the current state.
    pub(crate) fn possibly_infeasible_constraints(&self) -> &[ConstraintIndex] {
        self.infeasible_constraint_set.superset()
    }

    /// The number of constraints, objective included.
    pub(crate) fn num_constraints(&self) -> usize {
        self.constraint_lower_bounds.len()
    }

    /// The value of the variable in the current assignment; variables never
    /// assigned since the last reference reset keep their reference value.
    pub(crate) fn assignment(&self, var: VariableIndex) -> bool {
        self.assignment.value(var)
    }

    pub(crate) fn reference(&self) -> &BopSolution {
        &self.reference
    }

    pub(crate) fn constraint_lower_bound(&self, constraint: ConstraintIndex) -> i64 {
        self.constraint_lower_bounds[constraint]
    }

    pub(crate) fn constraint_upper_bound(&self, constraint: ConstraintIndex) -> i64 {
        self.constraint_upper_bounds[constraint]
    }

    /// The activity of the constraint under the current assignment; the
    /// constraint is feasible iff this lies between its bounds (inclusive).
    pub(crate) fn constraint_value(&self, constraint: ConstraintIndex) -> i64 {
        self.constraint_values[constraint]
    }

    pub(crate) fn constraint_is_feasible(&self, constraint: ConstraintIndex) -> bool {
        let value = self.constraint_value(constraint);
        value >= self.constraint_lower_bound(constraint)
            && value <= self.constraint_upper_bound(constraint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> Rc<LinearBooleanProblem> {
        let mut problem = LinearBooleanProblem::with_num_variables(4);
        // Ternary so that the maintainer tracks it.
        problem.add_constraint(vec![1, 2, 3], vec![1, 1, 1], Some(1), Some(2));
        problem.add_constraint(vec![2, 3, 4], vec![1, 2, 1], None, Some(2));
        problem.set_objective(vec![1, 2, 3, 4], vec![1, 1, 1, 1], 0, 1.0);
        Rc::new(problem)
    }

    fn feasible_reference(problem: &Rc<LinearBooleanProblem>) -> BopSolution {
        let mut solution = BopSolution::new(Rc::clone(problem), "reference");
        solution.set_value(VariableIndex(0), true);
        assert!(solution.is_feasible());
        solution
    }

    #[test]
    fn reference_must_improve_via_the_objective_constraint() {
        let problem = problem();
        let mut maintainer = AssignmentAndConstraintFeasibilityMaintainer::new(Rc::clone(&problem));
        maintainer.set_reference_solution(&feasible_reference(&problem));

        // Only the objective pseudo-constraint is infeasible.
        assert!(!maintainer.is_feasible());
        assert_eq!(maintainer.num_infeasible_constraints(), 1);
        assert_eq!(
            maintainer.constraint_upper_bound(OBJECTIVE_CONSTRAINT),
            0
        );
    }

    #[test]
    fn assign_and_backtrack_restore_everything() {
        let problem = problem();
        let mut maintainer = AssignmentAndConstraintFeasibilityMaintainer::new(Rc::clone(&problem));
        maintainer.set_reference_solution(&feasible_reference(&problem));

        let values_before: Vec<i64> = (0..maintainer.num_constraints())
            .map(|c| maintainer.constraint_value(ConstraintIndex::new(c)))
            .collect();
        let infeasible_before = maintainer.num_infeasible_constraints();

        maintainer.add_backtracking_level();
        maintainer.assign(&[
            Literal::from_signed(-1),
            Literal::from_signed(2),
            Literal::from_signed(4),
        ]);
        assert!(maintainer.assignment(VariableIndex(1)));

        maintainer.backtrack_one_level();
        let values_after: Vec<i64> = (0..maintainer.num_constraints())
            .map(|c| maintainer.constraint_value(ConstraintIndex::new(c)))
            .collect();
        assert_eq!(values_before, values_after);
        assert_eq!(infeasible_before, maintainer.num_infeasible_constraints());
        assert!(maintainer.assignment(VariableIndex(0)));
        assert!(!maintainer.assignment(VariableIndex(1)));
    }

    #[test]
    fn becoming_feasible_means_strict_improvement() {
        let problem = problem();
        let mut maintainer = AssignmentAndConstraintFeasibilityMaintainer::new(Rc::clone(&problem));
        let mut reference = BopSolution::new(Rc::clone(&problem), "reference");
        reference.set_value(VariableIndex(0), true);
        reference.set_value(VariableIndex(3), true);
        assert!(reference.is_feasible());
        maintainer.set_reference_solution(&reference);

        // Dropping x4 keeps all real constraints feasible and lowers the
        // cost, so the whole state becomes feasible.
        maintainer.add_backtracking_level();
        maintainer.assign(&[Literal::from_signed(-4)]);
        assert!(maintainer.is_feasible());

        maintainer.use_current_state_as_reference();
        assert!(!maintainer.is_feasible());
        assert_eq!(maintainer.reference().cost(), 1);
    }

    #[test]
    fn potential_one_flip_repairs_finds_the_single_flip() {
        let problem = problem();
        let mut maintainer = AssignmentAndConstraintFeasibilityMaintainer::new(Rc::clone(&problem));
        maintainer.set_reference_solution(&feasible_reference(&problem));

        // Make constraint 1 (x1 + x2 + x3 in [1, 2]) infeasible by flipping
        // x1 off; every candidate repairing exactly that constraint is a
        // flip of x1, x2 or x3 upwards.
        maintainer.add_backtracking_level();
        maintainer.assign(&[Literal::from_signed(-1)]);
        let repairs: Vec<Literal> = maintainer.potential_one_flip_repairs().to_vec();
        assert!(!repairs.is_empty());
        for literal in repairs {
            assert!(literal.is_positive());
            assert!(literal.variable().index() < 3);
        }
    }
}
