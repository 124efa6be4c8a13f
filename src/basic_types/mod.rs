mod binary_clause;
mod indices;
mod keyed_vec;
mod solution;

pub(crate) use binary_clause::BinaryClause;
pub(crate) use binary_clause::BinaryClauseManager;
pub(crate) use indices::ConstraintIndex;
pub(crate) use indices::EntryIndex;
pub(crate) use indices::OptimizerIndex;
pub(crate) use indices::TermIndex;
pub use indices::VariableIndex;
pub(crate) use keyed_vec::KeyedVec;
pub(crate) use keyed_vec::StorageKey;
pub use solution::BopSolution;

/// The status of a full solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BopSolveStatus {
    /// The solver found the proven optimal solution.
    OptimalSolutionFound,

    /// The solver found a solution, but it is not proven to be the optimal
    /// solution.
    FeasibleSolutionFound,

    /// The solver didn't find any solution.
    NoSolutionFound,

    /// The problem is infeasible.
    InfeasibleProblem,

    /// The problem is invalid.
    InvalidProblem,
}

impl std::fmt::Display for BopSolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BopSolveStatus::OptimalSolutionFound => "OPTIMAL_SOLUTION_FOUND",
            BopSolveStatus::FeasibleSolutionFound => "FEASIBLE_SOLUTION_FOUND",
            BopSolveStatus::NoSolutionFound => "NO_SOLUTION_FOUND",
            BopSolveStatus::InfeasibleProblem => "INFEASIBLE_PROBLEM",
            BopSolveStatus::InvalidProblem => "INVALID_PROBLEM",
        };
        write!(f, "{name}")
    }
}

// Type aliases for hashing structures. The solver only hashes small keys, for
// which fnv outperforms the default hasher.
pub(crate) type HashMap<K, V> = fnv::FnvHashMap<K, V>;
pub(crate) type HashSet<K> = fnv::FnvHashSet<K>;

pub(crate) type Random = rand::rngs::SmallRng;
