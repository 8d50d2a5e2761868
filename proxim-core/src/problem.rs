//! Solver-facing types: settings, termination status, result info and the
//! caller-error taxonomy.

use std::fmt;
use thiserror::Error;

/// Infinity sentinel for box bounds.
///
/// A lower bound `<= -INF` or an upper bound `>= INF` deactivates that bound;
/// the corresponding entry never enters the compressed bound lists.
pub const INF: f64 = 1e30;

/// Solver settings.
///
/// The numeric knobs mirror the proximal interior-point parameterisation:
/// `rho_init`/`delta_init` seed the primal/dual regularization, which decays
/// per iteration down to `reg_lower_limit` and is inflated 100x on
/// factorization retries.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Initial primal proximal penalty rho.
    pub rho_init: f64,

    /// Initial dual proximal penalty delta.
    pub delta_init: f64,

    /// Cap on outer iterations.
    pub max_iter: usize,

    /// KKT refactorization retries per factorization attempt.
    pub max_factor_retires: usize,

    /// Initial lower limit for rho and delta. Relaxed to 1e-13 when the
    /// proximal updates stagnate at the limit.
    pub reg_lower_limit: f64,

    /// Absolute feasibility tolerance.
    pub feas_tol_abs: f64,

    /// Relative feasibility tolerance.
    pub feas_tol_rel: f64,

    /// Tolerance on the complementarity measure mu.
    pub dual_tol: f64,

    /// Fraction-to-boundary factor, in (0, 1).
    pub tau: f64,

    /// Number of Ruiz equilibration sweeps.
    pub preconditioner_iter: usize,

    /// Also normalise the cost with a scalar factor during equilibration.
    pub preconditioner_scale_cost: bool,

    /// Print the per-iteration table and the solve summary.
    pub verbose: bool,

    /// Measure wall-clock time for setup/update/solve.
    pub compute_timings: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rho_init: 1e-6,
            delta_init: 1e-4,
            max_iter: 250,
            max_factor_retires: 10,
            reg_lower_limit: 1e-10,
            feas_tol_abs: 1e-8,
            feas_tol_rel: 1e-9,
            dual_tol: 1e-8,
            tau: 0.99,
            preconditioner_iter: 10,
            preconditioner_scale_cost: false,
            verbose: false,
            compute_timings: false,
        }
    }
}

impl Settings {
    /// Check that every numeric knob is usable.
    pub fn verify_settings(&self) -> bool {
        self.rho_init > 0.0
            && self.delta_init > 0.0
            && self.max_iter > 0
            && self.reg_lower_limit > 0.0
            && self.feas_tol_abs > 0.0
            && self.feas_tol_rel >= 0.0
            && self.dual_tol > 0.0
            && self.tau > 0.0
            && self.tau < 1.0
    }
}

/// Terminal solver status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Solve has not run (or settings were rejected before it could).
    Unsolved,

    /// Converged to the requested tolerances.
    Solved,

    /// Iteration cap reached without convergence.
    MaxIterReached,

    /// Primal problem certified infeasible.
    PrimalInfeasible,

    /// Dual problem certified infeasible (primal unbounded).
    DualInfeasible,

    /// Factorization kept failing after all retries.
    Numerics,

    /// Settings failed verification.
    InvalidSettings,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unsolved => write!(f, "unsolved"),
            Status::Solved => write!(f, "solved"),
            Status::MaxIterReached => write!(f, "max iterations reached"),
            Status::PrimalInfeasible => write!(f, "primal infeasible"),
            Status::DualInfeasible => write!(f, "dual infeasible"),
            Status::Numerics => write!(f, "numerical error"),
            Status::InvalidSettings => write!(f, "invalid settings"),
        }
    }
}

/// Per-solve diagnostics.
#[derive(Debug, Clone)]
pub struct Info {
    /// Terminal status of the last solve.
    pub status: Status,
    /// Outer iterations performed.
    pub iter: usize,
    /// Final primal proximal penalty.
    pub rho: f64,
    /// Final dual proximal penalty.
    pub delta: f64,
    /// Final complementarity measure.
    pub mu: f64,
    /// Last centering parameter.
    pub sigma: f64,
    /// Last primal step length.
    pub primal_step: f64,
    /// Last dual step length.
    pub dual_step: f64,
    /// Unscaled primal infeasibility at the last convergence check.
    pub primal_inf: f64,
    /// Unscaled dual infeasibility at the last convergence check.
    pub dual_inf: f64,
    /// Current lower limit for rho and delta.
    pub reg_limit: f64,
    /// Factorization retries in the current attempt (0 after success).
    pub factor_retires: usize,
    /// Consecutive iterations without a primal proximal update.
    pub no_primal_update: usize,
    /// Consecutive iterations without a dual proximal update.
    pub no_dual_update: usize,
    /// Setup wall-clock time in seconds.
    pub setup_time: f64,
    /// Update wall-clock time in seconds.
    pub update_time: f64,
    /// Solve wall-clock time in seconds.
    pub solve_time: f64,
    /// Accumulated wall-clock time in seconds.
    pub run_time: f64,
}

impl Default for Info {
    fn default() -> Self {
        Self {
            status: Status::Unsolved,
            iter: 0,
            rho: 0.0,
            delta: 0.0,
            mu: 0.0,
            sigma: 0.0,
            primal_step: 0.0,
            dual_step: 0.0,
            primal_inf: 0.0,
            dual_inf: 0.0,
            reg_limit: 0.0,
            factor_retires: 0,
            no_primal_update: 0,
            no_dual_update: 0,
            setup_time: 0.0,
            update_time: 0.0,
            solve_time: 0.0,
            run_time: 0.0,
        }
    }
}

/// Solver result: iterates, proximal centres and diagnostics.
///
/// The bound-related vectors (`z_lb`, `z_ub`, `s_lb`, `s_ub`, `nu_lb`,
/// `nu_ub`) are length n. During a solve only the head (the active-bound
/// count) is live; on return they are expanded to dense variable order with
/// zero duals and infinite slacks for inactive bounds.
#[derive(Debug, Clone, Default)]
pub struct SolverResult {
    /// Primal iterate.
    pub x: Vec<f64>,
    /// Equality dual.
    pub y: Vec<f64>,
    /// Inequality dual.
    pub z: Vec<f64>,
    /// Lower-bound dual.
    pub z_lb: Vec<f64>,
    /// Upper-bound dual.
    pub z_ub: Vec<f64>,
    /// Inequality slack.
    pub s: Vec<f64>,
    /// Lower-bound slack.
    pub s_lb: Vec<f64>,
    /// Upper-bound slack.
    pub s_ub: Vec<f64>,
    /// Primal proximal centre.
    pub zeta: Vec<f64>,
    /// Equality-dual proximal centre.
    pub lambda: Vec<f64>,
    /// Inequality-dual proximal centre.
    pub nu: Vec<f64>,
    /// Lower-bound-dual proximal centre.
    pub nu_lb: Vec<f64>,
    /// Upper-bound-dual proximal centre.
    pub nu_ub: Vec<f64>,
    /// Diagnostics.
    pub info: Info,
}

/// Caller errors raised by `setup` and `update`.
#[derive(Error, Debug)]
pub enum ProblemError {
    /// A matrix or vector does not have the expected shape.
    #[error("{what} has wrong dimensions: expected {expected}, got {actual}")]
    Dimension {
        /// Offending quantity.
        what: &'static str,
        /// Expected size description.
        expected: String,
        /// Actual size description.
        actual: String,
    },

    /// A sparse input is not in CSC storage.
    #[error("{0} must be in CSC storage")]
    NotCsc(&'static str),

    /// A sparse update changed the nonzero pattern.
    #[error("{0} nonzero pattern changed; sparse update requires an identical pattern")]
    PatternMismatch(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_verify() {
        assert!(Settings::default().verify_settings());
    }

    #[test]
    fn test_settings_reject_bad_tau() {
        let mut s = Settings::default();
        s.tau = 1.0;
        assert!(!s.verify_settings());
        s.tau = 0.0;
        assert!(!s.verify_settings());
        s.tau = -0.5;
        assert!(!s.verify_settings());
    }

    #[test]
    fn test_settings_reject_nonpositive_tolerances() {
        let mut s = Settings::default();
        s.feas_tol_abs = 0.0;
        assert!(!s.verify_settings());

        let mut s = Settings::default();
        s.rho_init = -1e-6;
        assert!(!s.verify_settings());

        let mut s = Settings::default();
        s.max_iter = 0;
        assert!(!s.verify_settings());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Solved.to_string(), "solved");
        assert_eq!(Status::PrimalInfeasible.to_string(), "primal infeasible");
        assert_eq!(Status::Numerics.to_string(), "numerical error");
    }
}
