use std::cell::Cell;
use std::rc::Rc;

use crate::basic_types::KeyedVec;
use crate::basic_types::VariableIndex;
use crate::problem::LinearBooleanProblem;

/// A Boolean assignment for each variable of the problem, together with the
/// objective cost of the assignment.
///
/// Note that a solution might not be feasible, i.e. might violate some
/// constraints of the problem; [`BopSolution::is_feasible`] tests this.
///
/// Cost and feasibility are lazy but not incremental: reading them after a
/// [`BopSolution::set_value`] runs in the problem size. Use with care during
/// search.
#[derive(Clone, Debug)]
pub struct BopSolution {
    problem: Rc<LinearBooleanProblem>,
    name: String,
    values: KeyedVec<VariableIndex, bool>,
    cost: Cell<Option<i64>>,
    is_feasible: Cell<Option<bool>>,
}

impl BopSolution {
    /// Creates the "lucky" assignment: every objective variable is set to
    /// whichever value minimizes its term in isolation, every other variable
    /// to false. If this happens to be feasible it is optimal.
    pub(crate) fn new(problem: Rc<LinearBooleanProblem>, name: impl Into<String>) -> Self {
        let mut values = KeyedVec::from_elem(false, problem.num_variables());
        let objective = problem.objective();
        for (&literal, &coefficient) in objective.literals.iter().zip(&objective.coefficients) {
            let var = VariableIndex::new(literal.unsigned_abs() as usize - 1);
            values[var] = coefficient < 0;
        }
        BopSolution {
            problem,
            name: name.into(),
            values,
            cost: Cell::new(None),
            is_feasible: Cell::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, var: VariableIndex) -> bool {
        self.values[var]
    }

    pub(crate) fn set_value(&mut self, var: VariableIndex, value: bool) {
        self.cost.set(None);
        self.is_feasible.set(None);
        self.values[var] = value;
    }

    /// The unscaled objective cost of this assignment.
    pub fn cost(&self) -> i64 {
        if let Some(cost) = self.cost.get() {
            return cost;
        }
        let cost = self.compute_cost();
        self.cost.set(Some(cost));
        cost
    }

    /// The cost taking the problem offset and scaling into account. This is
    /// only meant for display; internally the algorithms work on the integer
    /// cost.
    pub fn scaled_cost(&self) -> f64 {
        self.problem.scale_objective_value(self.cost())
    }

    pub fn is_feasible(&self) -> bool {
        if let Some(is_feasible) = self.is_feasible.get() {
            return is_feasible;
        }
        let is_feasible = self.compute_is_feasible();
        self.is_feasible.set(Some(is_feasible));
        is_feasible
    }

    /// Solution ordering: a feasible solution beats an infeasible one, and
    /// between solutions of equal feasibility the lower cost wins.
    pub(crate) fn is_better_than(&self, other: &BopSolution) -> bool {
        if self.is_feasible() == other.is_feasible() {
            self.cost() < other.cost()
        } else {
            self.is_feasible()
        }
    }

    fn compute_cost(&self) -> i64 {
        let objective = self.problem.objective();
        let mut sum = 0;
        for (&literal, &coefficient) in objective.literals.iter().zip(&objective.coefficients) {
            let var = VariableIndex::new(literal.unsigned_abs() as usize - 1);
            if self.values[var] {
                sum += coefficient;
            }
        }
        sum
    }

    fn compute_is_feasible(&self) -> bool {
        for constraint in self.problem.constraints() {
            let mut sum = 0;
            for (&literal, &coefficient) in constraint.literals.iter().zip(&constraint.coefficients)
            {
                let var = VariableIndex::new(literal.unsigned_abs() as usize - 1);
                if self.values[var] {
                    sum += coefficient;
                }
            }
            if constraint.upper_bound.is_some_and(|ub| sum > ub)
                || constraint.lower_bound.is_some_and(|lb| sum < lb)
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> Rc<LinearBooleanProblem> {
        let mut problem = LinearBooleanProblem::with_num_variables(3);
        problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));
        problem.set_objective(vec![1, 2, 3], vec![2, 3, -1], 0, 1.0);
        Rc::new(problem)
    }

    #[test]
    fn lucky_assignment_minimizes_each_term() {
        let solution = BopSolution::new(problem(), "lucky");
        assert!(!solution.value(VariableIndex(0)));
        assert!(!solution.value(VariableIndex(1)));
        assert!(solution.value(VariableIndex(2)));
        assert_eq!(solution.cost(), -1);
        // x1 + x2 = 1 is violated by the all-minimal assignment.
        assert!(!solution.is_feasible());
    }

    #[test]
    fn cost_is_invalidated_by_set_value() {
        let mut solution = BopSolution::new(problem(), "s");
        assert_eq!(solution.cost(), -1);
        solution.set_value(VariableIndex(0), true);
        assert_eq!(solution.cost(), 1);
        assert!(solution.is_feasible());
    }

    #[test]
    fn cost_is_invariant_under_rewriting_the_same_value() {
        let mut solution = BopSolution::new(problem(), "s");
        let cost = solution.cost();
        solution.set_value(VariableIndex(2), solution.value(VariableIndex(2)));
        assert_eq!(solution.cost(), cost);
    }

    #[test]
    fn feasible_beats_infeasible_whatever_the_cost() {
        let mut feasible = BopSolution::new(problem(), "feasible");
        feasible.set_value(VariableIndex(0), true);
        let infeasible = BopSolution::new(problem(), "infeasible");
        assert!(feasible.cost() > infeasible.cost());
        assert!(feasible.is_better_than(&infeasible));
        assert!(!infeasible.is_better_than(&feasible));
    }
}
