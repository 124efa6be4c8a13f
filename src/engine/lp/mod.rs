//! A small dense linear-programming solver used for the relaxation of the
//! Boolean problem.
//!
//! The relaxations solved here are tiny by LP standards (every column is a
//! 0/1 variable of the problem), so this is a plain two-phase tableau
//! simplex with Bland's rule. Phase one drives artificial variables out of
//! the basis, phase two optimizes the real objective.

use crate::bop_assert_simple;

const PIVOT_TOLERANCE: f64 = 1e-9;
const COST_TOLERANCE: f64 = 1e-9;

/// Status of an LP solve, mirroring what the relaxation optimizer consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LpStatus {
    /// Proven optimal within tolerances.
    Optimal,
    /// Feasible but the pivot or time budget ran out before optimality.
    PrimalFeasible,
    /// The constraints admit no fractional solution.
    Infeasible,
    /// The objective is unbounded below (cannot happen with 0/1 boxes, kept
    /// for completeness).
    Unbounded,
    /// The budget ran out before a feasible point was found.
    Init,
}

/// A column of the LP: bounds and objective coefficient.
#[derive(Clone, Copy, Debug)]
struct LpColumn {
    lower_bound: f64,
    upper_bound: f64,
    cost: f64,
}

/// `lower_bound <= sum coefficient * column <= upper_bound`.
#[derive(Clone, Debug)]
struct LpRow {
    terms: Vec<(usize, f64)>,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
}

/// A linear program over bounded columns.
#[derive(Clone, Debug, Default)]
pub(crate) struct LinearProgram {
    columns: Vec<LpColumn>,
    rows: Vec<LpRow>,
}

impl LinearProgram {
    pub(crate) fn clear(&mut self) {
        self.columns.clear();
        self.rows.clear();
    }

    pub(crate) fn add_column(&mut self, lower_bound: f64, upper_bound: f64, cost: f64) -> usize {
        self.columns.push(LpColumn {
            lower_bound,
            upper_bound,
            cost,
        });
        self.columns.len() - 1
    }

    pub(crate) fn set_column_bounds(&mut self, column: usize, lower_bound: f64, upper_bound: f64) {
        self.columns[column].lower_bound = lower_bound;
        self.columns[column].upper_bound = upper_bound;
    }

    pub(crate) fn column_bounds(&self, column: usize) -> (f64, f64) {
        (
            self.columns[column].lower_bound,
            self.columns[column].upper_bound,
        )
    }

    pub(crate) fn add_row(
        &mut self,
        terms: Vec<(usize, f64)>,
        lower_bound: Option<f64>,
        upper_bound: Option<f64>,
    ) {
        self.rows.push(LpRow {
            terms,
            lower_bound,
            upper_bound,
        });
    }
}

/// Solves a [`LinearProgram`] and keeps the primal values of the last solve.
#[derive(Debug, Default)]
pub(crate) struct LpSolver {
    values: Vec<f64>,
    objective: f64,
    deterministic_time: f64,
}

impl LpSolver {
    /// The primal value of every column after the last solve.
    pub(crate) fn variable_values(&self) -> &[f64] {
        &self.values
    }

    pub(crate) fn objective_value(&self) -> f64 {
        self.objective
    }

    pub(crate) fn deterministic_time(&self) -> f64 {
        self.deterministic_time
    }

    /// Runs the two-phase simplex with the given deterministic-time budget.
    pub(crate) fn solve(
        &mut self,
        program: &LinearProgram,
        deterministic_budget: f64,
    ) -> LpStatus {
        let mut tableau = Tableau::build(program);
        let budget = self.deterministic_time + deterministic_budget;

        let phase1 = tableau.run_phase(Phase::One, &mut self.deterministic_time, budget);
        match phase1 {
            PhaseOutcome::BudgetExhausted => return LpStatus::Init,
            PhaseOutcome::Unbounded => unreachable!("phase one is bounded below by zero"),
            PhaseOutcome::Optimal => {}
        }
        if tableau.phase_one_infeasibility() > 1e-7 {
            return LpStatus::Infeasible;
        }

        tableau.enter_phase_two();
        let phase2 = tableau.run_phase(Phase::Two, &mut self.deterministic_time, budget);
        self.values = tableau.extract_values(program);
        self.objective = program
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| column.cost * value)
            .sum();
        match phase2 {
            PhaseOutcome::Optimal => LpStatus::Optimal,
            PhaseOutcome::BudgetExhausted => LpStatus::PrimalFeasible,
            PhaseOutcome::Unbounded => LpStatus::Unbounded,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    One,
    Two,
}

enum PhaseOutcome {
    Optimal,
    Unbounded,
    BudgetExhausted,
}

/// Dense simplex tableau. Columns are, in order: the shifted structural
/// variables, one slack per inequality row, one artificial per row whose
/// right-hand side was negative; the last column is the right-hand side.
#[derive(Debug)]
struct Tableau {
    rows: Vec<Vec<f64>>,
    /// Index of the basic variable of each row.
    basis: Vec<usize>,
    cost_row: Vec<f64>,
    num_structural: usize,
    first_artificial: usize,
    num_columns: usize,
    /// Shifted phase-two costs (structural columns only).
    structural_costs: Vec<f64>,
}

impl Tableau {
    /// Builds the tableau: every column is shifted by its lower bound so all
    /// variables are `>= 0`, every row becomes one or two `<=` rows, and
    /// column upper bounds become rows of their own.
    fn build(program: &LinearProgram) -> Tableau {
        let num_structural = program.columns.len();
        let mut inequalities: Vec<(Vec<f64>, f64)> = vec![];

        for row in &program.rows {
            let shift: f64 = row
                .terms
                .iter()
                .map(|&(column, coefficient)| coefficient * program.columns[column].lower_bound)
                .sum();
            let mut dense = vec![0.0; num_structural];
            for &(column, coefficient) in &row.terms {
                dense[column] = coefficient;
            }
            if let Some(upper_bound) = row.upper_bound {
                inequalities.push((dense.clone(), upper_bound - shift));
            }
            if let Some(lower_bound) = row.lower_bound {
                let negated: Vec<f64> = dense.iter().map(|&coefficient| -coefficient).collect();
                inequalities.push((negated, -(lower_bound - shift)));
            }
        }
        for (index, column) in program.columns.iter().enumerate() {
            let mut dense = vec![0.0; num_structural];
            dense[index] = 1.0;
            inequalities.push((dense, column.upper_bound - column.lower_bound));
        }

        let num_rows = inequalities.len();
        let num_slack = num_rows;
        let num_artificial = inequalities.iter().filter(|&&(_, rhs)| rhs < 0.0).count();
        let first_artificial = num_structural + num_slack;
        let num_columns = first_artificial + num_artificial;

        let mut rows = Vec::with_capacity(num_rows);
        let mut basis = Vec::with_capacity(num_rows);
        let mut next_artificial = first_artificial;
        for (row_index, (mut dense, mut rhs)) in inequalities.into_iter().enumerate() {
            let negate = rhs < 0.0;
            if negate {
                dense.iter_mut().for_each(|coefficient| *coefficient = -*coefficient);
                rhs = -rhs;
            }
            let mut row = vec![0.0; num_columns + 1];
            row[..num_structural].copy_from_slice(&dense);
            row[num_structural + row_index] = if negate { -1.0 } else { 1.0 };
            if negate {
                row[next_artificial] = 1.0;
                basis.push(next_artificial);
                next_artificial += 1;
            } else {
                basis.push(num_structural + row_index);
            }
            row[num_columns] = rhs;
            rows.push(row);
        }

        // Phase-one cost: one per artificial, priced out for the basic ones.
        let mut cost_row = vec![0.0; num_columns + 1];
        for column in first_artificial..num_columns {
            cost_row[column] = 1.0;
        }
        for (row_index, &basic) in basis.iter().enumerate() {
            if basic >= first_artificial {
                for column in 0..=num_columns {
                    cost_row[column] -= rows[row_index][column];
                }
            }
        }

        Tableau {
            rows,
            basis,
            cost_row,
            num_structural,
            first_artificial,
            num_columns,
            structural_costs: program.columns.iter().map(|column| column.cost).collect(),
        }
    }

    /// The remaining phase-one objective, i.e. the total infeasibility.
    fn phase_one_infeasibility(&self) -> f64 {
        -self.cost_row[self.num_columns]
    }

    /// Pivots every zero-valued basic artificial out of the basis so that
    /// later pivots cannot make it positive again. A row with no other
    /// nonzero coefficient is redundant and can keep its artificial.
    fn drive_out_artificials(&mut self) {
        for row_index in 0..self.rows.len() {
            if self.basis[row_index] < self.first_artificial {
                continue;
            }
            let replacement = (0..self.first_artificial)
                .find(|&column| self.rows[row_index][column].abs() > PIVOT_TOLERANCE);
            if let Some(column) = replacement {
                self.pivot(row_index, column);
            }
        }
    }

    /// Replaces the phase-one cost row by the real objective, priced out for
    /// the current basis. Artificial columns are barred from re-entering.
    fn enter_phase_two(&mut self) {
        self.drive_out_artificials();
        self.cost_row.iter_mut().for_each(|cost| *cost = 0.0);
        for (column, &cost) in self.structural_costs.iter().enumerate() {
            self.cost_row[column] = cost;
        }
        for row_index in 0..self.rows.len() {
            let basic = self.basis[row_index];
            let basic_cost = self.cost_row[basic];
            if basic_cost != 0.0 {
                for column in 0..=self.num_columns {
                    self.cost_row[column] -= basic_cost * self.rows[row_index][column];
                }
                // Keep the reduced cost of the basic column exactly zero.
                self.cost_row[basic] = 0.0;
            }
        }
    }

    fn run_phase(
        &mut self,
        phase: Phase,
        deterministic_time: &mut f64,
        budget: f64,
    ) -> PhaseOutcome {
        let pivot_work = 1e-8 * (self.rows.len() * (self.num_columns + 1)) as f64;
        loop {
            if *deterministic_time >= budget {
                return PhaseOutcome::BudgetExhausted;
            }
            let entering = match self.pick_entering(phase) {
                Some(column) => column,
                None => return PhaseOutcome::Optimal,
            };
            let leaving = match self.pick_leaving(entering) {
                Some(row) => row,
                None => return PhaseOutcome::Unbounded,
            };
            self.pivot(leaving, entering);
            *deterministic_time += pivot_work;
        }
    }

    /// Bland's rule: the lowest-index column with a negative reduced cost.
    fn pick_entering(&self, phase: Phase) -> Option<usize> {
        let last_column = match phase {
            Phase::One => self.num_columns,
            // Artificials must not re-enter in phase two.
            Phase::Two => self.first_artificial,
        };
        (0..last_column).find(|&column| self.cost_row[column] < -COST_TOLERANCE)
    }

    /// Ratio test, ties broken by the smallest basic variable index.
    fn pick_leaving(&self, entering: usize) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (row_index, row) in self.rows.iter().enumerate() {
            let coefficient = row[entering];
            if coefficient <= PIVOT_TOLERANCE {
                continue;
            }
            let ratio = row[self.num_columns] / coefficient;
            let better = match best {
                None => true,
                Some((best_row, best_ratio)) => {
                    ratio < best_ratio - PIVOT_TOLERANCE
                        || (ratio < best_ratio + PIVOT_TOLERANCE
                            && self.basis[row_index] < self.basis[best_row])
                }
            };
            if better {
                best = Some((row_index, ratio));
            }
        }
        best.map(|(row_index, _)| row_index)
    }

    fn pivot(&mut self, leaving_row: usize, entering_column: usize) {
        let pivot_value = self.rows[leaving_row][entering_column];
        bop_assert_simple!(pivot_value.abs() > PIVOT_TOLERANCE);
        for column in 0..=self.num_columns {
            self.rows[leaving_row][column] /= pivot_value;
        }
        for row_index in 0..self.rows.len() {
            if row_index == leaving_row {
                continue;
            }
            let factor = self.rows[row_index][entering_column];
            if factor != 0.0 {
                for column in 0..=self.num_columns {
                    self.rows[row_index][column] -= factor * self.rows[leaving_row][column];
                }
                self.rows[row_index][entering_column] = 0.0;
            }
        }
        let factor = self.cost_row[entering_column];
        if factor != 0.0 {
            for column in 0..=self.num_columns {
                self.cost_row[column] -= factor * self.rows[leaving_row][column];
            }
            self.cost_row[entering_column] = 0.0;
        }
        self.basis[leaving_row] = entering_column;
    }

    /// Reads the structural values back, undoing the lower-bound shift.
    fn extract_values(&self, program: &LinearProgram) -> Vec<f64> {
        let mut values = vec![0.0; self.num_structural];
        for (row_index, &basic) in self.basis.iter().enumerate() {
            if basic < self.num_structural {
                values[basic] = self.rows[row_index][self.num_columns];
            }
        }
        for (value, column) in values.iter_mut().zip(&program.columns) {
            *value = (*value + column.lower_bound)
                .clamp(column.lower_bound, column.upper_bound);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconstrained_box_goes_to_the_cheap_bound() {
        let mut program = LinearProgram::default();
        let _ = program.add_column(0.0, 1.0, 1.0);
        let _ = program.add_column(0.0, 1.0, -2.0);
        let mut solver = LpSolver::default();
        let status = solver.solve(&program, f64::INFINITY);
        assert_eq!(status, LpStatus::Optimal);
        assert!((solver.variable_values()[0] - 0.0).abs() < 1e-6);
        assert!((solver.variable_values()[1] - 1.0).abs() < 1e-6);
        assert!((solver.objective_value() + 2.0).abs() < 1e-6);
    }

    #[test]
    fn equality_row_is_respected() {
        // min x1 + x2 subject to x1 + x2 = 1.
        let mut program = LinearProgram::default();
        let x1 = program.add_column(0.0, 1.0, 1.0);
        let x2 = program.add_column(0.0, 1.0, 1.0);
        program.add_row(vec![(x1, 1.0), (x2, 1.0)], Some(1.0), Some(1.0));
        let mut solver = LpSolver::default();
        let status = solver.solve(&program, f64::INFINITY);
        assert_eq!(status, LpStatus::Optimal);
        assert!((solver.objective_value() - 1.0).abs() < 1e-6);
        let sum: f64 = solver.variable_values().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn infeasible_rows_are_detected() {
        // x1 >= 1 and x1 <= 0 at the same time.
        let mut program = LinearProgram::default();
        let x1 = program.add_column(0.0, 1.0, 0.0);
        program.add_row(vec![(x1, 1.0)], Some(1.0), None);
        program.add_row(vec![(x1, 1.0)], None, Some(0.0));
        let mut solver = LpSolver::default();
        assert_eq!(solver.solve(&program, f64::INFINITY), LpStatus::Infeasible);
    }

    #[test]
    fn fixed_column_stays_at_its_value() {
        // min -x1 - x2 with x2 fixed to 0 and x1 + x2 <= 1.
        let mut program = LinearProgram::default();
        let x1 = program.add_column(0.0, 1.0, -1.0);
        let x2 = program.add_column(0.0, 1.0, -1.0);
        program.set_column_bounds(x2, 0.0, 0.0);
        program.add_row(vec![(x1, 1.0), (x2, 1.0)], None, Some(1.0));
        let mut solver = LpSolver::default();
        let status = solver.solve(&program, f64::INFINITY);
        assert_eq!(status, LpStatus::Optimal);
        assert!((solver.variable_values()[0] - 1.0).abs() < 1e-6);
        assert!(solver.variable_values()[1].abs() < 1e-6);
    }

    #[test]
    fn fractional_optimum_is_found() {
        // min -x1 - x2 subject to 2 x1 + 2 x2 <= 1: optimum is on the facet
        // x1 + x2 = 1/2.
        let mut program = LinearProgram::default();
        let x1 = program.add_column(0.0, 1.0, -1.0);
        let x2 = program.add_column(0.0, 1.0, -1.0);
        program.add_row(vec![(x1, 2.0), (x2, 2.0)], None, Some(1.0));
        let mut solver = LpSolver::default();
        let status = solver.solve(&program, f64::INFINITY);
        assert_eq!(status, LpStatus::Optimal);
        let sum: f64 = solver.variable_values().iter().sum();
        assert!((sum - 0.5).abs() < 1e-6);
        assert!((solver.objective_value() + 0.5).abs() < 1e-6);
    }
}
