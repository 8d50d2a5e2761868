//! KKT operator contract and back-ends.
//!
//! The operator solves the regularized Newton system
//!
//! ```text
//! [ P+rI+B   A^T        G^T      ] [dx]   [rx']
//! [ A       -dI                  ] [dy] = [ry ]
//! [ G               -(Z^-1 S+dI) ] [dz]   [rz - Z^-1 rs]
//! ```
//!
//! where the box-bound blocks are eliminated into the diagonal `B` of the
//! first block (one `z/(s + d z)` term per active bound) with the matching
//! fold of their right-hand sides into `rx'`. The bound duals and all slack
//! directions are recovered by back-substitution:
//!
//! ```text
//! dz_lb = -D_lb (dx[idx] + rz_lb - rs_lb / z_lb)
//! dz_ub =  D_ub (dx[idx] - rz_ub + rs_ub / z_ub)
//! ds    =  (rs - s .* dz) ./ z          (each piece)
//! ```
//!
//! The dense back-end additionally condenses the equality and inequality
//! blocks into an n x n positive definite system; the sparse back-end factors
//! the quasi-definite augmented matrix with LDL^T. Symbolic structure is
//! fixed at `init`; only numerical values change afterwards.

pub mod dense;
pub mod sparse;

pub use dense::DenseKkt;
pub use sparse::SparseKkt;

/// Which data blocks changed during an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataChanges {
    /// P values changed.
    pub p: bool,
    /// A values changed.
    pub a: bool,
    /// G values changed.
    pub g: bool,
}

impl DataChanges {
    /// All blocks changed.
    pub fn all() -> Self {
        Self {
            p: true,
            a: true,
            g: true,
        }
    }
}

/// Slack/dual scaling snapshot passed to `update_scalings`.
///
/// Bound slices are the live heads (length `n_lb` / `n_ub`).
#[derive(Debug, Clone, Copy)]
pub struct Scalings<'a> {
    /// Inequality slack.
    pub s: &'a [f64],
    /// Lower-bound slack head.
    pub s_lb: &'a [f64],
    /// Upper-bound slack head.
    pub s_ub: &'a [f64],
    /// Inequality dual.
    pub z: &'a [f64],
    /// Lower-bound dual head.
    pub z_lb: &'a [f64],
    /// Upper-bound dual head.
    pub z_ub: &'a [f64],
}

/// The augmented KKT operator: scaling updates, numerical refactorization and
/// the 8-block Newton solve.
pub trait KktOperator<D> {
    /// Prepare the operator with unit slack/dual scalings.
    ///
    /// Allocates all buffers and performs the symbolic preparation; no
    /// numerical factorization happens here.
    fn init(data: &D, rho: f64, delta: f64) -> Self;

    /// Stage new diagonal scalings; no factorization yet.
    fn update_scalings(&mut self, data: &D, rho: f64, delta: f64, scalings: Scalings<'_>);

    /// Refresh the numerical blocks for changed data, keeping the symbolic
    /// structure.
    fn update_data(&mut self, data: &D, changes: DataChanges);

    /// Numerically factor with the staged scalings.
    ///
    /// Returns `false` on numerical breakdown; never panics on a valid shape.
    fn factorize(&mut self, data: &D) -> bool;

    /// Solve the Newton system with the most recent successful factorization.
    ///
    /// Right-hand sides and outputs must not alias. Bound slices are live
    /// heads of length `n_lb` / `n_ub`.
    #[allow(clippy::too_many_arguments)]
    fn solve(
        &mut self,
        data: &D,
        rx: &[f64],
        ry: &[f64],
        rz: &[f64],
        rz_lb: &[f64],
        rz_ub: &[f64],
        rs: &[f64],
        rs_lb: &[f64],
        rs_ub: &[f64],
        dx: &mut [f64],
        dy: &mut [f64],
        dz: &mut [f64],
        dz_lb: &mut [f64],
        dz_ub: &mut [f64],
        ds: &mut [f64],
        ds_lb: &mut [f64],
        ds_ub: &mut [f64],
    );
}
