//! Proxim: a proximal interior-point solver for convex quadratic programs
//!
//! Solves problems of the form
//!
//! ```text
//! minimize    (1/2) x^T P x + c^T x
//! subject to  A x  = b
//!             G x <= h
//!             x_lb <= x <= x_ub
//! ```
//!
//! with P symmetric positive semidefinite. Box bounds are element-wise and
//! may be deactivated per coordinate with the `INF` sentinel.
//!
//! # Algorithm
//!
//! A regularized primal-dual interior-point method wrapped in a proximal
//! outer iteration:
//!
//! - **Proximal regularization**: the KKT system always carries `rho I` /
//!   `-delta I` diagonal blocks, keeping the factorization quasi-definite
//!   even for rank-deficient data. The proximal centres are only moved when
//!   the corresponding residual shrinks, and the penalties decay with the
//!   complementarity progress.
//! - **Mehrotra predictor-corrector** inner steps: an affine direction sets
//!   the centering parameter (cubed duality ratio), the corrected direction
//!   is damped by a fraction-to-boundary rule so slacks and duals stay
//!   strictly positive.
//! - **Ruiz equilibration** of the problem data; every convergence test runs
//!   on unscaled residuals.
//! - **Infeasibility detection** from divergence of the proximal gaps.
//!
//! Dense and sparse back-ends share the same driver: the dense path condenses
//! the KKT system into an n x n Cholesky factorization, the sparse path
//! factors the augmented quasi-definite matrix with LDL^T.
//!
//! # Example
//!
//! ```
//! use nalgebra::dmatrix;
//! use proxim_core::{DenseSolver, Settings, Status};
//!
//! // minimize 0.5 x^T x - [1, 2]^T x  subject to  x <= (0.5, 0.5)
//! let p = dmatrix![1.0, 0.0; 0.0, 1.0];
//! let a = nalgebra::DMatrix::zeros(0, 2);
//! let g = nalgebra::DMatrix::zeros(0, 2);
//!
//! let mut solver = DenseSolver::setup(
//!     &p,
//!     &[-1.0, -2.0],
//!     &a,
//!     &[],
//!     &g,
//!     &[],
//!     None,
//!     Some(&[0.5, 0.5]),
//!     Settings::default(),
//! )
//! .unwrap();
//!
//! let status = solver.solve();
//! assert_eq!(status, Status::Solved);
//! assert!((solver.result().x[0] - 0.5).abs() < 1e-6);
//! ```

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // interior-point kernels carry many blocks

pub mod data;
pub mod ipm;
pub mod kkt;
pub mod linalg;
pub mod precond;
pub mod problem;

pub use data::{DenseData, SparseData};
pub use ipm::{DenseSolver, Solver, SparseSolver};
pub use kkt::{DenseKkt, KktOperator, SparseKkt};
pub use precond::{Preconditioner, RuizEquilibration};
pub use problem::{Info, ProblemError, Settings, SolverResult, Status, INF};
