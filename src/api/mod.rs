pub(crate) mod solver;

pub mod results {
    //! Contains the outputs of solving: the final [`BopSolveStatus`] and the
    //! best [`BopSolution`].
    pub use crate::basic_types::BopSolution;
    pub use crate::basic_types::BopSolveStatus;
}
