use std::rc::Rc;

use crate::basic_types::ConstraintIndex;
use crate::basic_types::KeyedVec;
use crate::basic_types::TermIndex;
use crate::basic_types::VariableIndex;
use crate::bop_assert_simple;
use crate::engine::sat::BooleanVariable;
use crate::engine::sat::Literal;
use crate::engine::sat::VariablesAssignment;
use crate::optimisation::local_search::AssignmentAndConstraintFeasibilityMaintainer;
use crate::optimisation::local_search::OBJECTIVE_CONSTRAINT;
use crate::problem::LinearBooleanProblem;

pub(crate) const INVALID_CONSTRAINT: ConstraintIndex = ConstraintIndex(-1);
pub(crate) const INIT_TERM: TermIndex = TermIndex(-1);
pub(crate) const INVALID_TERM: TermIndex = TermIndex(-2);

/// One term of the by-constraint matrix.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ConstraintTerm {
    pub(crate) var: VariableIndex,
    pub(crate) weight: i64,
}

/// Selects which infeasible constraint to repair and which single variable to
/// flip for it.
///
/// A constraint `lb <= sum w_i x_i <= ub` is repairable in one flip when
/// flipping one variable that is still unassigned in the SAT propagator moves
/// its activity back inside the bounds. Terms are sorted by decreasing
/// absolute objective coefficient so that high-impact flips come first.
///
/// The constraint indexing follows the
/// [`AssignmentAndConstraintFeasibilityMaintainer`] convention exactly
/// (objective first, binary constraints skipped).
#[derive(Debug)]
pub(crate) struct OneFlipConstraintRepairer {
    by_constraint_matrix: KeyedVec<ConstraintIndex, KeyedVec<TermIndex, ConstraintTerm>>,
}

impl OneFlipConstraintRepairer {
    pub(crate) fn new(problem: &Rc<LinearBooleanProblem>) -> Self {
        let mut by_constraint_matrix: KeyedVec<ConstraintIndex, KeyedVec<TermIndex, ConstraintTerm>> =
            KeyedVec::default();

        let mut objective_terms: KeyedVec<TermIndex, ConstraintTerm> = KeyedVec::default();
        let objective = problem.objective();
        for (&literal, &coefficient) in objective.literals.iter().zip(&objective.coefficients) {
            bop_assert_simple!(literal > 0);
            bop_assert_simple!(coefficient != 0);
            let _ = objective_terms.push(ConstraintTerm {
                var: VariableIndex::new(literal as usize - 1),
                weight: coefficient,
            });
        }
        let _ = by_constraint_matrix.push(objective_terms);

        for constraint in problem.constraints() {
            if constraint.literals.len() <= 2 {
                continue;
            }
            let mut terms: KeyedVec<TermIndex, ConstraintTerm> = KeyedVec::default();
            for (&literal, &coefficient) in constraint.literals.iter().zip(&constraint.coefficients)
            {
                let _ = terms.push(ConstraintTerm {
                    var: VariableIndex::new(literal as usize - 1),
                    weight: coefficient,
                });
            }
            let _ = by_constraint_matrix.push(terms);
        }

        let mut repairer = OneFlipConstraintRepairer {
            by_constraint_matrix,
        };
        repairer.sort_terms_of_each_constraint(problem.num_variables());
        repairer
    }

    /// Sorts to iterate on the most promising variables first.
    fn sort_terms_of_each_constraint(&mut self, num_variables: usize) {
        let mut objective: KeyedVec<VariableIndex, i64> = KeyedVec::from_elem(0, num_variables);
        for term in self.by_constraint_matrix[OBJECTIVE_CONSTRAINT].iter() {
            objective[term.var] = term.weight.abs();
        }
        for terms in self.by_constraint_matrix.iter_mut() {
            let mut sorted: Vec<ConstraintTerm> = terms.iter().copied().collect();
            sorted.sort_by(|a, b| objective[b.var].cmp(&objective[a.var]));
            *terms = KeyedVec::new(sorted);
        }
    }

    /// The index of a constraint that can be repaired in one flip, preferring
    /// the one with the fewest repairing flips. When only one infeasible
    /// candidate remains and nothing was selected yet, it is returned without
    /// the (possibly expensive) check.
    pub(crate) fn constraint_to_repair(
        &self,
        maintainer: &AssignmentAndConstraintFeasibilityMaintainer,
        sat_assignment: &VariablesAssignment,
    ) -> ConstraintIndex {
        let mut selected_ct = INVALID_CONSTRAINT;
        let mut selected_num_branches = i32::MAX;
        let mut num_infeasible_constraints_left = maintainer.num_infeasible_constraints();

        // The constraints are inspected in reverse order because the
        // objective one always comes first, and with some luck we break early
        // instead of fully exploring it.
        let infeasible_constraints = maintainer.possibly_infeasible_constraints();
        for index in (0..infeasible_constraints.len()).rev() {
            let i = infeasible_constraints[index];
            if maintainer.constraint_is_feasible(i) {
                continue;
            }
            num_infeasible_constraints_left -= 1;

            // Return the only candidate without inspecting it. This is
            // critical at the beginning of the search, when the only
            // candidate is the objective constraint which can be really long.
            if num_infeasible_constraints_left == 0 && selected_ct == INVALID_CONSTRAINT {
                return i;
            }

            let constraint_value = maintainer.constraint_value(i);
            let lb = maintainer.constraint_lower_bound(i);
            let ub = maintainer.constraint_upper_bound(i);

            let mut num_branches = 0;
            for term in self.by_constraint_matrix[i].iter() {
                if sat_assignment.variable_is_assigned(BooleanVariable(term.var.value() as u32)) {
                    continue;
                }
                let new_value = constraint_value
                    + if maintainer.assignment(term.var) {
                        -term.weight
                    } else {
                        term.weight
                    };
                if new_value >= lb && new_value <= ub {
                    num_branches += 1;
                    if num_branches >= selected_num_branches {
                        break;
                    }
                }
            }

            // The constraint cannot be repaired in one decision.
            if num_branches == 0 {
                continue;
            }
            if num_branches < selected_num_branches {
                selected_ct = i;
                selected_num_branches = num_branches;
                if num_branches == 1 {
                    break;
                }
            }
        }
        selected_ct
    }

    /// The next term whose flip repairs the constraint, scanning circularly
    /// from `start_term_index + 1` and stopping when `init_term_index` is
    /// reached again. Both indices may be [`INIT_TERM`]. Returns
    /// [`INVALID_TERM`] when no repairing term is left.
    pub(crate) fn next_repairing_term(
        &self,
        maintainer: &AssignmentAndConstraintFeasibilityMaintainer,
        sat_assignment: &VariablesAssignment,
        ct_index: ConstraintIndex,
        init_term_index: TermIndex,
        start_term_index: TermIndex,
    ) -> TermIndex {
        let terms = &self.by_constraint_matrix[ct_index];
        let num_terms = terms.len() as i32;
        let constraint_value = maintainer.constraint_value(ct_index);
        let lb = maintainer.constraint_lower_bound(ct_index);
        let ub = maintainer.constraint_upper_bound(ct_index);

        let end_term_index = num_terms + init_term_index.value() + 1;
        let mut loop_term_index = start_term_index.value()
            + 1
            + if start_term_index < init_term_index {
                num_terms
            } else {
                0
            };
        while loop_term_index < end_term_index {
            let term_index = TermIndex(loop_term_index % num_terms);
            let term = terms[term_index];
            loop_term_index += 1;
            if sat_assignment.variable_is_assigned(BooleanVariable(term.var.value() as u32)) {
                continue;
            }
            let new_value = constraint_value
                + if maintainer.assignment(term.var) {
                    -term.weight
                } else {
                    term.weight
                };
            if new_value >= lb && new_value <= ub {
                return term_index;
            }
        }
        INVALID_TERM
    }

    /// Re-verifies that the constraint is still infeasible, the term variable
    /// still unassigned, and the flip still lands in range. Used on resume,
    /// because SAT propagation between calls may have invalidated a node.
    pub(crate) fn repair_is_valid(
        &self,
        maintainer: &AssignmentAndConstraintFeasibilityMaintainer,
        sat_assignment: &VariablesAssignment,
        ct_index: ConstraintIndex,
        term_index: TermIndex,
    ) -> bool {
        if maintainer.constraint_is_feasible(ct_index) {
            return false;
        }
        let term = self.by_constraint_matrix[ct_index][term_index];
        if sat_assignment.variable_is_assigned(BooleanVariable(term.var.value() as u32)) {
            return false;
        }
        let new_value = maintainer.constraint_value(ct_index)
            + if maintainer.assignment(term.var) {
                -term.weight
            } else {
                term.weight
            };
        new_value >= maintainer.constraint_lower_bound(ct_index)
            && new_value <= maintainer.constraint_upper_bound(ct_index)
    }

    /// The literal flipping the term variable, i.e. assigning it the opposite
    /// of its current value.
    pub(crate) fn get_flip(
        &self,
        maintainer: &AssignmentAndConstraintFeasibilityMaintainer,
        ct_index: ConstraintIndex,
        term_index: TermIndex,
    ) -> Literal {
        let term = self.by_constraint_matrix[ct_index][term_index];
        let value = maintainer.assignment(term.var);
        Literal::new(BooleanVariable(term.var.value() as u32), !value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_types::BopSolution;
    use crate::engine::sat::SatSolver;

    fn problem() -> Rc<LinearBooleanProblem> {
        let mut problem = LinearBooleanProblem::with_num_variables(4);
        problem.add_constraint(vec![1, 2, 3], vec![1, 1, 1], Some(1), None);
        problem.add_constraint(vec![2, 3, 4], vec![1, 1, 1], None, Some(1));
        problem.set_objective(vec![1, 2, 3, 4], vec![3, 1, 2, 1], 0, 1.0);
        Rc::new(problem)
    }

    fn setup() -> (
        AssignmentAndConstraintFeasibilityMaintainer,
        OneFlipConstraintRepairer,
        SatSolver,
    ) {
        let problem = problem();
        let mut maintainer = AssignmentAndConstraintFeasibilityMaintainer::new(Rc::clone(&problem));
        let mut reference = BopSolution::new(Rc::clone(&problem), "reference");
        reference.set_value(VariableIndex(0), true);
        maintainer.set_reference_solution(&reference);
        let repairer = OneFlipConstraintRepairer::new(&problem);
        let mut solver = SatSolver::default();
        solver.set_num_variables(4);
        (maintainer, repairer, solver)
    }

    #[test]
    fn single_infeasible_constraint_is_returned_directly() {
        let (maintainer, repairer, solver) = setup();
        // Only the objective pseudo-constraint is infeasible right now.
        let selected = repairer.constraint_to_repair(&maintainer, solver.assignment());
        assert_eq!(selected, OBJECTIVE_CONSTRAINT);
    }

    #[test]
    fn terms_are_scanned_by_objective_impact() {
        let (mut maintainer, repairer, solver) = setup();
        // Break constraint 1 (x1 + x2 + x3 >= 1).
        maintainer.add_backtracking_level();
        maintainer.assign(&[Literal::from_signed(-1)]);

        // The first repairing term must be x1, the variable with the largest
        // objective coefficient among {x1, x2, x3}.
        let term =
            repairer.next_repairing_term(&maintainer, solver.assignment(), ConstraintIndex(1), INIT_TERM, INIT_TERM);
        assert_ne!(term, INVALID_TERM);
        let flip = repairer.get_flip(&maintainer, ConstraintIndex(1), term);
        assert_eq!(flip.variable().index(), 0);
        assert!(flip.is_positive());
    }

    #[test]
    fn circular_scan_wraps_and_terminates() {
        let (mut maintainer, repairer, solver) = setup();
        maintainer.add_backtracking_level();
        maintainer.assign(&[Literal::from_signed(-1)]);

        let mut seen = vec![];
        let mut term = INIT_TERM;
        loop {
            term = repairer.next_repairing_term(
                &maintainer,
                solver.assignment(),
                ConstraintIndex(1),
                INIT_TERM,
                term,
            );
            if term == INVALID_TERM {
                break;
            }
            seen.push(term);
            assert!(seen.len() <= 3, "circular scan must terminate");
        }
        // All three flips repair x1 + x2 + x3 >= 1.
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn sat_assigned_variables_are_not_candidates() {
        let (mut maintainer, repairer, mut solver) = setup();
        maintainer.add_backtracking_level();
        maintainer.assign(&[Literal::from_signed(-1)]);
        // Fix x1 in the SAT solver: the repairer must skip it.
        assert!(solver.add_unit_clause(Literal::from_signed(-1)));

        let term =
            repairer.next_repairing_term(&maintainer, solver.assignment(), ConstraintIndex(1), INIT_TERM, INIT_TERM);
        assert_ne!(term, INVALID_TERM);
        let flip = repairer.get_flip(&maintainer, ConstraintIndex(1), term);
        assert_ne!(flip.variable().index(), 0);
        assert!(!repairer.repair_is_valid(
            &maintainer,
            solver.assignment(),
            ConstraintIndex(1),
            TermIndex(0)
        ));
    }
}
