//! Tuning knobs of the solver and the description of which optimizers a
//! portfolio runs.

/// One concrete optimizer kind inside a portfolio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BopOptimizerMethod {
    /// Stratified core-guided SAT optimization.
    SatCoreBased,
    /// Plain SAT search that keeps tightening the objective upper bound.
    LinearSearch,
    /// LP relaxation of the current problem (lower bound, lp values, fixings).
    LinearRelaxation,
    /// Bounded-depth local search; one optimizer is created per depth in
    /// `1..=max_num_decisions_in_ls`.
    LocalSearch,
    /// Randomized-restart SAT probing for first or improved solutions.
    RandomFirstSolution,
    /// LNS relaxing a random subset of objective variables.
    RandomVariableLns,
    RandomVariableLnsGuidedByLp,
    /// LNS relaxing the variables of a random subset of constraints.
    RandomConstraintLns,
    RandomConstraintLnsGuidedByLp,
    /// LNS relaxing a BFS ball in the variable co-occurrence graph.
    RelationGraphLns,
    RelationGraphLnsGuidedByLp,
    /// Single SAT solve under a Hamming-distance constraint.
    CompleteLns,
    /// First solution guided by the user assignment preference.
    UserGuidedFirstSolution,
    /// First solution guided by the LP values.
    LpFirstSolution,
    /// First solution guided by the objective coefficients.
    ObjectiveFirstSolution,
}

/// An ordered list of optimizer methods run by one portfolio.
#[derive(Clone, Debug)]
pub struct BopSolverOptimizerSet {
    pub methods: Vec<BopOptimizerMethod>,
}

impl Default for BopSolverOptimizerSet {
    fn default() -> Self {
        // The LP-backed methods are deliberately not part of the default set;
        // callers opt in through BopParameters::optimizer_sets.
        BopSolverOptimizerSet {
            methods: vec![
                BopOptimizerMethod::SatCoreBased,
                BopOptimizerMethod::LinearSearch,
                BopOptimizerMethod::LocalSearch,
                BopOptimizerMethod::RandomFirstSolution,
                BopOptimizerMethod::RandomConstraintLns,
                BopOptimizerMethod::RandomVariableLns,
                BopOptimizerMethod::RelationGraphLns,
                BopOptimizerMethod::CompleteLns,
                BopOptimizerMethod::ObjectiveFirstSolution,
                BopOptimizerMethod::UserGuidedFirstSolution,
            ],
        }
    }
}

/// Parameters controlling the solve. The defaults follow the tuning of the
/// original engine.
#[derive(Clone, Debug)]
pub struct BopParameters {
    /// Mark the state optimal when `upper_bound - lower_bound <=
    /// relative_gap_limit * max(|ub|, |lb|)` and a feasible solution is held.
    pub relative_gap_limit: f64,

    /// Conflict budget of one guided-SAT `optimize` slice.
    pub guided_sat_conflicts_chunk: i64,

    /// Conflict budget of one LNS subproblem solve (scaled by the Luby value).
    pub max_number_of_conflicts_in_random_lns: i64,

    /// Total conflict budget of the randomized first-solution generator.
    pub max_number_of_conflicts_in_random_solution_generation: i64,

    /// Conflict budget of the cheap in-place probe run before building an LNS
    /// subproblem.
    pub max_number_of_conflicts_for_quick_check: i64,

    /// Maximum depth of the local search; one LS optimizer per depth is
    /// instantiated.
    pub max_num_decisions_in_ls: usize,

    /// LS gives up deepening when more constraints than this are broken.
    pub max_num_broken_constraints_in_ls: usize,

    /// Number of LS tree nodes explored per `optimize` slice.
    pub max_number_of_explored_assignments_per_try_in_ls: i64,

    pub use_transposition_table_in_ls: bool,
    pub use_potential_one_flip_repairs_in_ls: bool,

    /// Hamming distance allowed by the complete LNS optimizer.
    pub num_relaxed_vars: usize,

    /// Number of neighbourhoods tried per adaptive-LNS `optimize` slice.
    pub num_random_lns_tries: i64,

    /// Deterministic-time budget of one LP solve.
    pub lp_max_deterministic_time: f64,
    pub use_lp_strong_branching: bool,
    pub use_learned_binary_clauses_in_lp: bool,

    /// Limit on full LP solves for pure feasibility problems; 0 disables the
    /// LP there entirely, a negative value means no limit.
    pub max_lp_solve_for_feasibility_problems: i32,

    /// Detect and exploit problem symmetries. The automorphism subsystem is
    /// not implemented; enabling this logs a warning and has no other effect.
    pub use_symmetry: bool,

    pub random_seed: u64,

    /// Give up after this many consecutive optimizer calls without progress
    /// while a feasible solution is held. `None` means never.
    pub max_number_of_consecutive_failing_optimizer_calls: Option<i32>,

    /// Number of cooperating solvers. Only 1 is supported; anything larger
    /// makes the solve return `InvalidProblem`.
    pub number_of_solvers: usize,

    /// The optimizers to run. When empty, [`BopSolverOptimizerSet::default`]
    /// is used.
    pub optimizer_sets: Vec<BopSolverOptimizerSet>,
}

impl Default for BopParameters {
    fn default() -> Self {
        BopParameters {
            relative_gap_limit: 1e-4,
            guided_sat_conflicts_chunk: 1000,
            max_number_of_conflicts_in_random_lns: 2500,
            max_number_of_conflicts_in_random_solution_generation: 500,
            max_number_of_conflicts_for_quick_check: 10,
            max_num_decisions_in_ls: 4,
            max_num_broken_constraints_in_ls: usize::MAX,
            max_number_of_explored_assignments_per_try_in_ls: 10_000,
            use_transposition_table_in_ls: true,
            use_potential_one_flip_repairs_in_ls: false,
            num_relaxed_vars: 10,
            num_random_lns_tries: 1,
            lp_max_deterministic_time: 1.0,
            use_lp_strong_branching: false,
            use_learned_binary_clauses_in_lp: true,
            max_lp_solve_for_feasibility_problems: 0,
            use_symmetry: false,
            random_seed: 8,
            max_number_of_consecutive_failing_optimizer_calls: None,
            number_of_solvers: 1,
            optimizer_sets: vec![],
        }
    }
}
