//! # Bop
//! Bop is an exact solver for pseudo-Boolean optimization problems, i.e.
//! problems of the form
//!
//! ```text
//! minimize   c^T x + offset        (x in {0,1}^n)
//! subject to L_k <= a_k^T x <= U_k
//! ```
//!
//! where all constants are integers. The solver runs a portfolio of
//! cooperating optimizers (core-guided SAT, guided first-solution search,
//! bounded-depth local search, large-neighbourhood search and a linear
//! relaxation) over a shared, incrementally refined problem state.
//!
//! # Using Bop
//! The first step is to describe the problem:
//! ```rust
//! use bop::problem::LinearBooleanProblem;
//!
//! let mut problem = LinearBooleanProblem::with_num_variables(3);
//! // x1 + x2 = 1
//! problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));
//! // minimize x1 + x2
//! problem.set_objective(vec![1, 2], vec![1, 1], 0, 1.0);
//! ```
//!
//! Then create a [`BopSolver`] and solve:
//! ```rust
//! # use bop::problem::LinearBooleanProblem;
//! # use bop::BopSolveStatus;
//! # use bop::BopSolver;
//! # use bop::engine::TimeLimit;
//! # let mut problem = LinearBooleanProblem::with_num_variables(3);
//! # problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));
//! # problem.set_objective(vec![1, 2], vec![1, 1], 0, 1.0);
//! let mut solver = BopSolver::new(problem);
//! let mut time_limit = TimeLimit::infinite();
//! let status = solver.solve(&mut time_limit);
//! assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
//! assert_eq!(solver.solution().cost(), 1);
//! ```
//!
//! A feasible hint can be passed with [`BopSolver::solve_with_hint`]; an
//! infeasible hint is used as an assignment preference for the user-guided
//! first-solution generator instead.

pub(crate) mod asserts;
pub(crate) mod basic_types;
pub(crate) mod encodings;
pub(crate) mod optimisation;

pub mod engine;
pub mod parameters;
pub mod problem;

// We declare a private module with public use, so that all exports from API
// are exports directly from the crate.
//
// Example:
// `use bop::BopSolver;`
// vs.
// `use bop::api::BopSolver;`
mod api;

pub use api::*;

pub use crate::api::solver::BopSolver;
pub use crate::basic_types::BopSolution;
pub use crate::basic_types::BopSolveStatus;
pub use crate::basic_types::VariableIndex;

pub(crate) mod tests;
