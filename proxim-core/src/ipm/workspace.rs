//! Mutable per-solve workspace.
//!
//! Three vector families sized once at setup: the regularized residuals that
//! feed the KKT right-hand side, the non-regularized residuals used by the
//! convergence tests, and the Newton directions. Bound-related vectors are
//! length n with only the active head live. The main loop allocates nothing;
//! `dx` doubles as a scratch vector during residual assembly.

/// Residual and direction buffers.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    // Regularized residuals (KKT right-hand side).
    pub rx: Vec<f64>,
    pub ry: Vec<f64>,
    pub rz: Vec<f64>,
    pub rz_lb: Vec<f64>,
    pub rz_ub: Vec<f64>,
    pub rs: Vec<f64>,
    pub rs_lb: Vec<f64>,
    pub rs_ub: Vec<f64>,

    // Non-regularized residuals.
    pub rx_nr: Vec<f64>,
    pub ry_nr: Vec<f64>,
    pub rz_nr: Vec<f64>,
    pub rz_lb_nr: Vec<f64>,
    pub rz_ub_nr: Vec<f64>,

    // Newton directions.
    pub dx: Vec<f64>,
    pub dy: Vec<f64>,
    pub dz: Vec<f64>,
    pub dz_lb: Vec<f64>,
    pub dz_ub: Vec<f64>,
    pub ds: Vec<f64>,
    pub ds_lb: Vec<f64>,
    pub ds_ub: Vec<f64>,
}

impl Workspace {
    /// Allocate all buffers for dimensions (n, p, m).
    pub fn new(n: usize, p: usize, m: usize) -> Self {
        Self {
            rx: vec![0.0; n],
            ry: vec![0.0; p],
            rz: vec![0.0; m],
            rz_lb: vec![0.0; n],
            rz_ub: vec![0.0; n],
            rs: vec![0.0; m],
            rs_lb: vec![0.0; n],
            rs_ub: vec![0.0; n],
            rx_nr: vec![0.0; n],
            ry_nr: vec![0.0; p],
            rz_nr: vec![0.0; m],
            rz_lb_nr: vec![0.0; n],
            rz_ub_nr: vec![0.0; n],
            dx: vec![0.0; n],
            dy: vec![0.0; p],
            dz: vec![0.0; m],
            dz_lb: vec![0.0; n],
            dz_ub: vec![0.0; n],
            ds: vec![0.0; m],
            ds_lb: vec![0.0; n],
            ds_ub: vec![0.0; n],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_sizes() {
        let ws = Workspace::new(3, 1, 2);
        assert_eq!(ws.rx.len(), 3);
        assert_eq!(ws.ry.len(), 1);
        assert_eq!(ws.rz.len(), 2);
        assert_eq!(ws.rz_lb.len(), 3);
        assert_eq!(ws.ds_ub.len(), 3);
    }
}
