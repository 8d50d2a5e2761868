//! Preconditioner contract.
//!
//! The preconditioner owns diagonal row/column scalings of the problem data
//! and the inverse transforms for every quantity that leaves the core. All
//! infinity norms used in convergence tests are computed on unscaled
//! residuals through the `norm_*` family, which never mutates its input; the
//! `unscale_*` family rewrites vectors in place and is used on the final
//! iterates and when data is refreshed.

pub mod ruiz;

pub use ruiz::RuizEquilibration;

/// Bidirectional scaling of problem data, iterates and residuals.
pub trait Preconditioner<D> {
    /// Allocate scaling state sized to the problem.
    fn init(data: &D) -> Self;

    /// Equilibrate the stored data with up to `iters` sweeps.
    ///
    /// With `reuse` the existing scaling is applied as-is to the (unscaled)
    /// stored data instead of being recomputed. `scale_cost` adds a scalar
    /// cost normalisation.
    fn scale_data(&mut self, data: &mut D, reuse: bool, iters: usize, scale_cost: bool);

    /// Apply the inverse scaling to the stored data.
    fn unscale_data(&self, data: &mut D);

    /// Unscale a primal iterate in place.
    fn unscale_primal(&self, x: &mut [f64]);
    /// Unscale an equality dual in place.
    fn unscale_dual_eq(&self, y: &mut [f64]);
    /// Unscale an inequality dual in place.
    fn unscale_dual_ineq(&self, z: &mut [f64]);
    /// Unscale a compressed lower-bound dual in place.
    fn unscale_dual_lb(&self, z_lb: &mut [f64]);
    /// Unscale a compressed upper-bound dual in place.
    fn unscale_dual_ub(&self, z_ub: &mut [f64]);
    /// Unscale an inequality slack in place.
    fn unscale_slack_ineq(&self, s: &mut [f64]);
    /// Unscale a compressed lower-bound slack in place.
    fn unscale_slack_lb(&self, s_lb: &mut [f64]);
    /// Unscale a compressed upper-bound slack in place.
    fn unscale_slack_ub(&self, s_ub: &mut [f64]);
    /// Unscale a cost value.
    fn unscale_cost(&self, v: f64) -> f64;

    /// Infinity norm of an unscaled primal vector.
    fn norm_primal(&self, x: &[f64]) -> f64;
    /// Infinity norm of an unscaled equality dual.
    fn norm_dual_eq(&self, y: &[f64]) -> f64;
    /// Infinity norm of an unscaled inequality dual.
    fn norm_dual_ineq(&self, z: &[f64]) -> f64;
    /// Infinity norm of an unscaled lower-bound dual (compressed).
    fn norm_dual_lb(&self, z_lb: &[f64]) -> f64;
    /// Infinity norm of an unscaled upper-bound dual (compressed).
    fn norm_dual_ub(&self, z_ub: &[f64]) -> f64;
    /// Infinity norm of an unscaled equality residual.
    fn norm_primal_res_eq(&self, r: &[f64]) -> f64;
    /// Infinity norm of an unscaled inequality residual.
    fn norm_primal_res_ineq(&self, r: &[f64]) -> f64;
    /// Infinity norm of an unscaled lower-bound residual (compressed).
    fn norm_primal_res_lb(&self, r: &[f64]) -> f64;
    /// Infinity norm of an unscaled upper-bound residual (compressed).
    fn norm_primal_res_ub(&self, r: &[f64]) -> f64;
    /// Infinity norm of an unscaled stationarity residual.
    fn norm_dual_res(&self, r: &[f64]) -> f64;
}
