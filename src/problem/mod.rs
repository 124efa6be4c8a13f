//! The immutable description of a pseudo-Boolean optimization problem.
//!
//! Literals are 1-indexed signed integers: `3` is variable `x3`, `-3` its
//! negation. The engine itself only supports positive literals (problems are
//! canonicalized upstream), which [`LinearBooleanProblem::validate`] enforces.

use thiserror::Error;

use crate::basic_types::HashSet;
use crate::engine::sat::LiteralWithCoeff;
use crate::engine::sat::SatSolver;

/// A linear constraint `lower_bound <= sum coefficients[i] * literals[i] <=
/// upper_bound` where an absent bound means minus/plus infinity.
#[derive(Clone, Debug)]
pub struct LinearBooleanConstraint {
    pub literals: Vec<i32>,
    pub coefficients: Vec<i64>,
    pub lower_bound: Option<i64>,
    pub upper_bound: Option<i64>,
    pub name: String,
}

/// The linear objective `sum coefficients[i] * literals[i]`. The scaled cost
/// shown to the user is `(cost + offset) * scaling_factor`.
#[derive(Clone, Debug)]
pub struct LinearObjective {
    pub literals: Vec<i32>,
    pub coefficients: Vec<i64>,
    pub offset: i64,
    pub scaling_factor: f64,
}

impl Default for LinearObjective {
    fn default() -> Self {
        LinearObjective {
            literals: vec![],
            coefficients: vec![],
            offset: 0,
            scaling_factor: 1.0,
        }
    }
}

/// A full problem instance: variables, constraints and the objective.
#[derive(Clone, Debug)]
pub struct LinearBooleanProblem {
    name: String,
    num_variables: usize,
    constraints: Vec<LinearBooleanConstraint>,
    objective: LinearObjective,
}

/// The ways an input problem can be rejected by [`LinearBooleanProblem::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProblemValidationError {
    #[error("constraint '{constraint}' has {num_literals} literals but {num_coefficients} coefficients")]
    MismatchedArity {
        constraint: String,
        num_literals: usize,
        num_coefficients: usize,
    },
    #[error("literal {literal} references a variable outside [1, {num_variables}]")]
    UnknownVariable { literal: i32, num_variables: usize },
    #[error("literal {literal} is not positive; the engine only accepts canonicalized problems")]
    NonPositiveLiteral { literal: i32 },
    #[error("variable {variable} appears twice in '{constraint}'")]
    DuplicateLiteral { variable: i32, constraint: String },
    #[error("zero coefficient in '{constraint}'")]
    ZeroCoefficient { constraint: String },
}

impl LinearBooleanProblem {
    pub fn with_num_variables(num_variables: usize) -> Self {
        LinearBooleanProblem {
            name: String::new(),
            num_variables,
            constraints: vec![],
            objective: LinearObjective::default(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds the constraint `lower_bound <= sum coefficients[i] *
    /// literals[i] <= upper_bound`.
    pub fn add_constraint(
        &mut self,
        literals: Vec<i32>,
        coefficients: Vec<i64>,
        lower_bound: Option<i64>,
        upper_bound: Option<i64>,
    ) {
        self.constraints.push(LinearBooleanConstraint {
            literals,
            coefficients,
            lower_bound,
            upper_bound,
            name: String::new(),
        });
    }

    pub fn add_named_constraint(
        &mut self,
        literals: Vec<i32>,
        coefficients: Vec<i64>,
        lower_bound: Option<i64>,
        upper_bound: Option<i64>,
        name: impl Into<String>,
    ) {
        self.constraints.push(LinearBooleanConstraint {
            literals,
            coefficients,
            lower_bound,
            upper_bound,
            name: name.into(),
        });
    }

    pub fn set_objective(
        &mut self,
        literals: Vec<i32>,
        coefficients: Vec<i64>,
        offset: i64,
        scaling_factor: f64,
    ) {
        self.objective = LinearObjective {
            literals,
            coefficients,
            offset,
            scaling_factor,
        };
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    pub fn constraints(&self) -> &[LinearBooleanConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinearObjective {
        &self.objective
    }

    /// Checks that the problem is well-formed. Any failure makes the whole
    /// solve return `InvalidProblem`.
    pub fn validate(&self) -> Result<(), ProblemValidationError> {
        for constraint in &self.constraints {
            self.validate_terms(&constraint.name, &constraint.literals, &constraint.coefficients)?;
        }
        self.validate_terms(
            "objective",
            &self.objective.literals,
            &self.objective.coefficients,
        )
    }

    fn validate_terms(
        &self,
        name: &str,
        literals: &[i32],
        coefficients: &[i64],
    ) -> Result<(), ProblemValidationError> {
        if literals.len() != coefficients.len() {
            return Err(ProblemValidationError::MismatchedArity {
                constraint: name.to_owned(),
                num_literals: literals.len(),
                num_coefficients: coefficients.len(),
            });
        }
        let mut seen: HashSet<i32> = HashSet::default();
        for (&literal, &coefficient) in literals.iter().zip(coefficients) {
            if literal <= 0 {
                return Err(ProblemValidationError::NonPositiveLiteral { literal });
            }
            if literal.unsigned_abs() as usize > self.num_variables {
                return Err(ProblemValidationError::UnknownVariable {
                    literal,
                    num_variables: self.num_variables,
                });
            }
            if coefficient == 0 {
                return Err(ProblemValidationError::ZeroCoefficient {
                    constraint: name.to_owned(),
                });
            }
            if !seen.insert(literal.abs()) {
                return Err(ProblemValidationError::DuplicateLiteral {
                    variable: literal.abs(),
                    constraint: name.to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Returns `(cost + offset) * scaling_factor`, the user-facing version of
    /// an unscaled objective value.
    pub fn scale_objective_value(&self, cost: i64) -> f64 {
        (cost as f64 + self.objective.offset as f64) * self.objective.scaling_factor
    }
}

/// Loads all the problem constraints into the given solver. Returns `false`
/// when the solver detects unsatisfiability while doing so.
pub(crate) fn load_boolean_problem(
    problem: &LinearBooleanProblem,
    solver: &mut SatSolver,
) -> bool {
    if solver.num_variables() < problem.num_variables() {
        solver.set_num_variables(problem.num_variables());
    }
    for constraint in problem.constraints() {
        let mut terms: Vec<LiteralWithCoeff> = Vec::with_capacity(constraint.literals.len());
        for (&literal, &coefficient) in constraint.literals.iter().zip(&constraint.coefficients) {
            terms.push(LiteralWithCoeff::from_signed(literal, coefficient));
        }
        if !solver.add_linear_constraint(constraint.lower_bound, constraint.upper_bound, terms) {
            return false;
        }
    }
    true
}

/// Over-constrains the objective: `lower <= sum c_i x_i <= upper` with either
/// side optional. Returns `false` when this makes the solver unsat, which the
/// callers interpret as an optimality or infeasibility proof.
pub(crate) fn add_objective_constraint(
    problem: &LinearBooleanProblem,
    lower_bound: Option<i64>,
    upper_bound: Option<i64>,
    solver: &mut SatSolver,
) -> bool {
    if lower_bound.is_none() && upper_bound.is_none() {
        return true;
    }
    let objective = problem.objective();
    let terms: Vec<LiteralWithCoeff> = objective
        .literals
        .iter()
        .zip(&objective.coefficients)
        .map(|(&literal, &coefficient)| LiteralWithCoeff::from_signed(literal, coefficient))
        .collect();
    solver.add_linear_constraint(lower_bound, upper_bound, terms)
}

/// Sets the assignment preference of every objective variable to its
/// low-cost value, weighted by the relative magnitude of its coefficient.
pub(crate) fn use_objective_for_sat_assignment_preference(
    problem: &LinearBooleanProblem,
    solver: &mut SatSolver,
) {
    let objective = problem.objective();
    let max_weight = objective
        .coefficients
        .iter()
        .map(|coefficient| coefficient.abs())
        .max()
        .unwrap_or(0);
    if max_weight == 0 {
        return;
    }
    for (&literal, &coefficient) in objective.literals.iter().zip(&objective.coefficients) {
        let preferred = LiteralWithCoeff::from_signed(literal, coefficient)
            .literal
            .negated_if(coefficient > 0);
        solver
            .set_assignment_preference(preferred, coefficient.abs() as f64 / max_weight as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_problem() -> LinearBooleanProblem {
        let mut problem = LinearBooleanProblem::with_num_variables(3);
        problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));
        problem.set_objective(vec![1, 2, 3], vec![1, 1, -1], 0, 1.0);
        problem
    }

    #[test]
    fn valid_problem_passes_validation() {
        assert_eq!(small_problem().validate(), Ok(()));
    }

    #[test]
    fn zero_coefficient_is_rejected() {
        let mut problem = small_problem();
        problem.add_constraint(vec![3], vec![0], None, Some(1));
        assert!(matches!(
            problem.validate(),
            Err(ProblemValidationError::ZeroCoefficient { .. })
        ));
    }

    #[test]
    fn duplicate_literal_is_rejected() {
        let mut problem = small_problem();
        problem.add_constraint(vec![1, 1], vec![1, 1], None, Some(1));
        assert!(matches!(
            problem.validate(),
            Err(ProblemValidationError::DuplicateLiteral { .. })
        ));
    }

    #[test]
    fn unknown_variable_is_rejected() {
        let mut problem = small_problem();
        problem.add_constraint(vec![4], vec![1], None, Some(1));
        assert!(matches!(
            problem.validate(),
            Err(ProblemValidationError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn negated_objective_literal_is_rejected() {
        let mut problem = small_problem();
        problem.set_objective(vec![-1], vec![1], 0, 1.0);
        assert!(matches!(
            problem.validate(),
            Err(ProblemValidationError::NonPositiveLiteral { .. })
        ));
    }

    #[test]
    fn scaled_cost_applies_offset_then_scaling() {
        let mut problem = small_problem();
        problem.set_objective(vec![1], vec![1], 3, 4.0);
        assert_eq!(problem.scale_objective_value(-1), 8.0);
    }
}
