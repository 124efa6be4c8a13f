#![cfg(test)]
//! End-to-end solves of small concrete problems through the full portfolio.

use crate::basic_types::VariableIndex;
use crate::engine::TimeLimit;
use crate::problem::LinearBooleanProblem;
use crate::BopSolveStatus;
use crate::BopSolver;

fn solve(problem: LinearBooleanProblem) -> (BopSolveStatus, BopSolver) {
    let mut solver = BopSolver::new(problem);
    let mut time_limit = TimeLimit::from_seconds(30.0);
    let status = solver.solve(&mut time_limit);
    (status, solver)
}

fn values(solver: &BopSolver) -> Vec<bool> {
    (0..solver.solution().size())
        .map(|i| solver.solution().value(VariableIndex::new(i)))
        .collect()
}

#[test]
fn two_constraints_three_variables() {
    let mut problem = LinearBooleanProblem::with_num_variables(3);
    // x1 + x2 = 1 and x2 + x3 <= 1.
    problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));
    problem.add_constraint(vec![2, 3], vec![1, 1], None, Some(1));
    problem.set_objective(vec![1, 2], vec![1, 1], 0, 1.0);

    let (status, solver) = solve(problem);
    assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
    assert_eq!(solver.solution().cost(), 1);
    assert!(solver.solution().is_feasible());
    // Every cost-1 assignment satisfying both constraints is accepted.
    let solution = values(&solver);
    assert!(
        solution == vec![true, false, false]
            || solution == vec![true, false, true]
            || solution == vec![false, true, false]
    );
}

#[test]
fn unconstrained_objective_takes_each_cheap_value() {
    let mut problem = LinearBooleanProblem::with_num_variables(3);
    problem.set_objective(vec![1, 2, 3], vec![1, 2, -1], 3, 4.0);

    let (status, solver) = solve(problem);
    assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
    assert_eq!(solver.solution().cost(), -1);
    assert_eq!(solver.solution().scaled_cost(), 8.0);
    assert_eq!(values(&solver), vec![false, false, true]);
}

#[test]
fn pure_satisfaction_problem_is_optimal_at_cost_zero() {
    let mut problem = LinearBooleanProblem::with_num_variables(2);
    problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));

    let (status, solver) = solve(problem);
    assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
    assert_eq!(solver.solution().cost(), 0);
    let solution = values(&solver);
    assert!(solution == vec![true, false] || solution == vec![false, true]);
}

#[test]
fn contradictory_fixings_are_infeasible() {
    let mut problem = LinearBooleanProblem::with_num_variables(1);
    problem.add_constraint(vec![1], vec![1], Some(1), Some(1));
    problem.add_constraint(vec![1], vec![1], Some(0), Some(0));

    let (status, solver) = solve(problem);
    assert_eq!(status, BopSolveStatus::InfeasibleProblem);
    assert!(!solver.solution().is_feasible());
}

#[test]
fn vertex_cover_on_a_cycle_is_proved_optimal() {
    // Minimum vertex cover of the 4-cycle 1-2-3-4-1: two opposite vertices.
    let mut problem = LinearBooleanProblem::with_num_variables(4);
    for (u, v) in [(1, 2), (2, 3), (3, 4), (4, 1)] {
        problem.add_constraint(vec![u, v], vec![1, 1], Some(1), None);
    }
    problem.set_objective(vec![1, 2, 3, 4], vec![1, 1, 1, 1], 0, 1.0);

    let (status, solver) = solve(problem);
    assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
    assert_eq!(solver.solution().cost(), 2);
    let solution = values(&solver);
    assert!(
        solution == vec![true, false, true, false]
            || solution == vec![false, true, false, true]
    );
}

#[test]
fn hint_solution_is_improved_to_the_optimum() {
    let mut problem = LinearBooleanProblem::with_num_variables(3);
    problem.set_objective(vec![1, 2, 3], vec![1, 2, -1], 3, 4.0);

    let mut solver = BopSolver::new(problem);
    let mut time_limit = TimeLimit::from_seconds(30.0);
    // All ones costs 2 (scaled 20); the driver must walk down to -1.
    let status = solver.solve_with_hint(vec![true, true, true], &mut time_limit);
    assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
    assert_eq!(solver.solution().cost(), -1);
    assert_eq!(solver.solution().scaled_cost(), 8.0);
}

#[test]
fn infeasible_hint_becomes_an_assignment_preference() {
    let mut problem = LinearBooleanProblem::with_num_variables(2);
    problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), Some(1));
    problem.set_objective(vec![1, 2], vec![1, 1], 0, 1.0);

    let mut solver = BopSolver::new(problem);
    let mut time_limit = TimeLimit::from_seconds(30.0);
    // Both on violates the equality; the hint still guides the first search.
    let status = solver.solve_with_hint(vec![true, true], &mut time_limit);
    assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
    assert_eq!(solver.solution().cost(), 1);
}

#[test]
fn empty_objective_with_offset_keeps_the_scaled_offset() {
    let mut problem = LinearBooleanProblem::with_num_variables(2);
    problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), None);
    problem.set_objective(vec![], vec![], 7, 2.0);

    let (status, solver) = solve(problem);
    assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
    assert_eq!(solver.solution().cost(), 0);
    assert_eq!(solver.solution().scaled_cost(), 14.0);
}

#[test]
fn invalid_problems_are_rejected() {
    let mut problem = LinearBooleanProblem::with_num_variables(1);
    problem.add_constraint(vec![2], vec![1], Some(1), None);
    let (status, _solver) = solve(problem);
    assert_eq!(status, BopSolveStatus::InvalidProblem);
}

#[test]
fn weighted_cover_prefers_the_cheap_vertices() {
    // Cover edges (1,2) and (2,3); vertex 2 alone covers both but is pricy.
    let mut problem = LinearBooleanProblem::with_num_variables(3);
    problem.add_constraint(vec![1, 2], vec![1, 1], Some(1), None);
    problem.add_constraint(vec![2, 3], vec![1, 1], Some(1), None);
    problem.set_objective(vec![1, 2, 3], vec![1, 3, 1], 0, 1.0);

    let (status, solver) = solve(problem);
    assert_eq!(status, BopSolveStatus::OptimalSolutionFound);
    assert_eq!(solver.solution().cost(), 2);
    assert_eq!(values(&solver), vec![true, false, true]);
}
