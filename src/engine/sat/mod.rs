//! A conflict-driven SAT backend over clauses and linear pseudo-Boolean
//! constraints.
//!
//! This is deliberately small: the optimization engine drives it through a
//! handful of operations (adding constraints at the root, decisions with
//! backjumping, solving under assumptions, core extraction) and those are the
//! only ones implemented.

mod assignment;
mod clause;
mod literal;
mod pb_constraint;
mod sat_parameters;
mod solver;

pub(crate) use assignment::VariablesAssignment;
pub(crate) use clause::ClauseAllocator;
pub(crate) use clause::ClauseReference;
pub(crate) use clause::ClauseWatcher;
pub(crate) use literal::BooleanVariable;
pub(crate) use literal::Literal;
pub(crate) use pb_constraint::canonicalize_upper_bounded;
pub(crate) use pb_constraint::LinearConstraintId;
pub(crate) use pb_constraint::LiteralWithCoeff;
pub(crate) use pb_constraint::UpperBoundedLinearConstraint;
pub(crate) use sat_parameters::randomize_decision_heuristic;
pub(crate) use sat_parameters::Polarity;
pub(crate) use sat_parameters::SatParameters;
pub(crate) use sat_parameters::VariableOrder;
pub(crate) use solver::SatSolver;
pub(crate) use solver::SatSolverStatus;
