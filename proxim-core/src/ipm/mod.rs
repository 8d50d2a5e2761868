//! Proximal interior-point driver.
//!
//! The driver owns the data store, the preconditioner, the KKT operator and
//! the iterate workspace, and runs the outer proximal loop with a
//! predictor-corrector inner step.

pub mod solver;
pub mod workspace;

pub use solver::{DenseSolver, Solver, SparseSolver};
pub use workspace::Workspace;
