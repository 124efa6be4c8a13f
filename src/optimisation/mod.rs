//! The optimizers that cooperate on a shared problem state, and the
//! portfolio that schedules them.

use crate::basic_types::Random;
use crate::engine::sat::SatSolver;
use crate::engine::LearnedInfo;
use crate::engine::ProblemState;
use crate::engine::TimeLimit;
use crate::parameters::BopParameters;

pub(crate) mod core_based;
pub(crate) mod first_solutions;
pub(crate) mod linear_relaxation;
pub(crate) mod lns;
pub(crate) mod local_search;
pub(crate) mod portfolio;
pub(crate) mod util;

/// Return status of [`BopOptimizer::optimize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OptimizerStatus {
    OptimalSolutionFound,
    SolutionFound,
    Infeasible,
    LimitReached,

    /// Some information was learned and the problem state will need to be
    /// updated. This triggers a new optimization round.
    InformationFound,

    /// Nothing was learned yet but calling this optimizer again on the same
    /// problem state will resume its work.
    Continue,

    /// There is no need to call this optimizer again on the same problem
    /// state.
    Abort,
}

impl std::fmt::Display for OptimizerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OptimizerStatus::OptimalSolutionFound => "OPTIMAL_SOLUTION_FOUND",
            OptimizerStatus::SolutionFound => "SOLUTION_FOUND",
            OptimizerStatus::Infeasible => "INFEASIBLE",
            OptimizerStatus::LimitReached => "LIMIT_REACHED",
            OptimizerStatus::InformationFound => "INFORMATION_FOUND",
            OptimizerStatus::Continue => "CONTINUE",
            OptimizerStatus::Abort => "ABORT",
        };
        write!(f, "{name}")
    }
}

/// One optimizer of the portfolio. Optimizers are run sequentially; each call
/// gets a read-only view of the problem state, mutable access to the shared
/// SAT propagator and random generator owned by the portfolio, and reports
/// what it learned through `learned_info`.
///
/// Borrowers of the shared propagator must restore its parameters and
/// assignment preferences on every exit path, and leave it backtracked to
/// level zero unless it was proved unsat.
pub(crate) trait BopOptimizer {
    /// The name given at construction, for logging.
    fn name(&self) -> &str;

    /// Whether this optimizer can do something useful on the given state;
    /// e.g. local search needs a feasible solution to start from.
    ///
    /// Returning `Abort` from `optimize` has a similar effect, but also
    /// lowers the chance of being called again since it counts as a failure
    /// to improve the state.
    fn should_be_run(&self, problem_state: &ProblemState) -> bool;

    /// Tries to improve the state: reduce the gap by increasing the lower
    /// bound or by finding a better solution. `learned_info` is cleared on
    /// entry and filled with anything new.
    ///
    /// Precondition: `should_be_run` returned true.
    fn optimize(
        &mut self,
        parameters: &BopParameters,
        problem_state: &ProblemState,
        sat_propagator: &mut SatSolver,
        random: &mut Random,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus;
}
