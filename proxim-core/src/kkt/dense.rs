//! Dense KKT back-end.
//!
//! Condenses the equality and inequality blocks into the n x n system
//!
//! ```text
//! K = P + rI + (1/d) A^T A + G^T W G + B,   W = diag(1/(s_k/z_k + d))
//! ```
//!
//! which is positive definite for r, d > 0, and factors it with a Cholesky
//! decomposition. The eliminated directions are recovered from dx.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use super::{DataChanges, KktOperator, Scalings};
use crate::data::dense::DenseData;
use crate::data::DataStore;

/// Dense condensed KKT operator.
pub struct DenseKkt {
    n: usize,
    p: usize,
    m: usize,

    rho: f64,
    delta: f64,

    // Slack/dual snapshot staged by `update_scalings`.
    s: Vec<f64>,
    z_inv: Vec<f64>,
    s_lb: Vec<f64>,
    z_lb_inv: Vec<f64>,
    s_ub: Vec<f64>,
    z_ub_inv: Vec<f64>,

    /// Inequality weights 1/(s_k/z_k + delta).
    w: Vec<f64>,
    /// Lower-bound weights z/(s + delta z), head live.
    w_lb: Vec<f64>,
    /// Upper-bound weights, head live.
    w_ub: Vec<f64>,

    mat: DMatrix<f64>,
    chol: Option<Cholesky<f64, Dyn>>,
    rhs: DVector<f64>,
}

impl DenseKkt {
    fn set_unit_scalings(&mut self) {
        self.s.fill(1.0);
        self.z_inv.fill(1.0);
        self.s_lb.fill(1.0);
        self.z_lb_inv.fill(1.0);
        self.s_ub.fill(1.0);
        self.z_ub_inv.fill(1.0);
        let w0 = 1.0 / (1.0 + self.delta);
        self.w.fill(w0);
        self.w_lb.fill(w0);
        self.w_ub.fill(w0);
    }
}

impl KktOperator<DenseData> for DenseKkt {
    fn init(data: &DenseData, rho: f64, delta: f64) -> Self {
        let (n, p, m) = (data.n(), data.p(), data.m());
        let mut kkt = Self {
            n,
            p,
            m,
            rho,
            delta,
            s: vec![1.0; m],
            z_inv: vec![1.0; m],
            s_lb: vec![1.0; n],
            z_lb_inv: vec![1.0; n],
            s_ub: vec![1.0; n],
            z_ub_inv: vec![1.0; n],
            w: vec![0.0; m],
            w_lb: vec![0.0; n],
            w_ub: vec![0.0; n],
            mat: DMatrix::zeros(n, n),
            chol: None,
            rhs: DVector::zeros(n),
        };
        kkt.set_unit_scalings();
        kkt
    }

    fn update_scalings(
        &mut self,
        data: &DenseData,
        rho: f64,
        delta: f64,
        scalings: Scalings<'_>,
    ) {
        self.rho = rho;
        self.delta = delta;

        let n_lb = data.n_lb();
        let n_ub = data.n_ub();

        for k in 0..self.m {
            self.s[k] = scalings.s[k];
            self.z_inv[k] = 1.0 / scalings.z[k];
            self.w[k] = 1.0 / (scalings.s[k] * self.z_inv[k] + delta);
        }
        for i in 0..n_lb {
            self.s_lb[i] = scalings.s_lb[i];
            self.z_lb_inv[i] = 1.0 / scalings.z_lb[i];
            self.w_lb[i] = scalings.z_lb[i] / (scalings.s_lb[i] + delta * scalings.z_lb[i]);
        }
        for i in 0..n_ub {
            self.s_ub[i] = scalings.s_ub[i];
            self.z_ub_inv[i] = 1.0 / scalings.z_ub[i];
            self.w_ub[i] = scalings.z_ub[i] / (scalings.s_ub[i] + delta * scalings.z_ub[i]);
        }
    }

    fn update_data(&mut self, _data: &DenseData, _changes: DataChanges) {
        // The condensed matrix is rebuilt from the store on every
        // factorization, so there is nothing to stage.
    }

    fn factorize(&mut self, data: &DenseData) -> bool {
        let n = self.n;
        self.mat.fill(0.0);

        // Symmetrized P plus the primal regularization.
        for j in 0..n {
            for i in 0..=j {
                let v = data.p_utri[(i, j)];
                if v != 0.0 {
                    self.mat[(i, j)] += v;
                    if i != j {
                        self.mat[(j, i)] += v;
                    }
                }
            }
            self.mat[(j, j)] += self.rho;
        }

        // Equality block: (1/delta) A^T A.
        let inv_delta = 1.0 / self.delta;
        for j in 0..self.p {
            let col = data.at.column(j);
            self.mat.ger(inv_delta, &col, &col, 1.0);
        }

        // Inequality block: G^T W G.
        for k in 0..self.m {
            let col = data.gt.column(k);
            self.mat.ger(self.w[k], &col, &col, 1.0);
        }

        // Box blocks fold into the diagonal.
        for (i, &idx) in data.x_lb_idx()[..data.n_lb()].iter().enumerate() {
            self.mat[(idx, idx)] += self.w_lb[i];
        }
        for (i, &idx) in data.x_ub_idx()[..data.n_ub()].iter().enumerate() {
            self.mat[(idx, idx)] += self.w_ub[i];
        }

        if !self.mat.iter().all(|v| v.is_finite()) {
            self.chol = None;
            return false;
        }

        self.chol = Cholesky::new(self.mat.clone());
        self.chol.is_some()
    }

    fn solve(
        &mut self,
        data: &DenseData,
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
    ) {
        let n_lb = data.n_lb();
        let n_ub = data.n_ub();
        let inv_delta = 1.0 / self.delta;

        // Condensed right-hand side.
        for i in 0..self.n {
            self.rhs[i] = rx[i];
        }
        for j in 0..self.p {
            self.rhs.axpy(ry[j] * inv_delta, &data.at.column(j), 1.0);
        }
        for k in 0..self.m {
            let coef = self.w[k] * (rz[k] - rs[k] * self.z_inv[k]);
            self.rhs.axpy(coef, &data.gt.column(k), 1.0);
        }
        for (i, &idx) in data.x_lb_idx()[..n_lb].iter().enumerate() {
            self.rhs[idx] -= self.w_lb[i] * (rz_lb[i] - rs_lb[i] * self.z_lb_inv[i]);
        }
        for (i, &idx) in data.x_ub_idx()[..n_ub].iter().enumerate() {
            self.rhs[idx] += self.w_ub[i] * (rz_ub[i] - rs_ub[i] * self.z_ub_inv[i]);
        }

        let chol = self
            .chol
            .as_ref()
            .expect("solve called without a successful factorization");
        chol.solve_mut(&mut self.rhs);
        dx.copy_from_slice(self.rhs.as_slice());

        // Recover the eliminated blocks.
        for j in 0..self.p {
            let ax = data.at.column(j).dot(&self.rhs);
            dy[j] = (ax - ry[j]) * inv_delta;
        }
        for k in 0..self.m {
            let gx = data.gt.column(k).dot(&self.rhs);
            dz[k] = self.w[k] * (gx - rz[k] + rs[k] * self.z_inv[k]);
            ds[k] = (rs[k] - self.s[k] * dz[k]) * self.z_inv[k];
        }
        for (i, &idx) in data.x_lb_idx()[..n_lb].iter().enumerate() {
            dz_lb[i] = -self.w_lb[i] * (dx[idx] + rz_lb[i] - rs_lb[i] * self.z_lb_inv[i]);
            ds_lb[i] = (rs_lb[i] - self.s_lb[i] * dz_lb[i]) * self.z_lb_inv[i];
        }
        for (i, &idx) in data.x_ub_idx()[..n_ub].iter().enumerate() {
            dz_ub[i] = self.w_ub[i] * (dx[idx] - rz_ub[i] + rs_ub[i] * self.z_ub_inv[i]);
            ds_ub[i] = (rs_ub[i] - self.s_ub[i] * dz_ub[i]) * self.z_ub_inv[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;

    fn test_data() -> DenseData {
        // Two variables, one equality, two inequalities, one bound per side.
        let p = dmatrix![2.0, 0.5; 0.5, 1.5];
        let a = dmatrix![1.0, 1.0];
        let g = dmatrix![1.0, 0.0; -1.0, 2.0];
        DenseData::new(
            &p,
            &[0.3, -0.7],
            &a,
            &[1.0],
            &g,
            &[2.0, 2.0],
            Some(&[0.0, -1e31]),
            Some(&[1e31, 0.8]),
        )
        .unwrap()
    }

    #[test]
    fn test_newton_system_identities() {
        let data = test_data();
        let (rho, delta) = (1e-3, 1e-2);
        let mut kkt = DenseKkt::init(&data, rho, delta);

        let s = [0.7, 1.3];
        let z = [0.9, 0.4];
        let s_lb = [0.6];
        let z_lb = [1.1];
        let s_ub = [0.5];
        let z_ub = [0.8];
        kkt.update_scalings(
            &data,
            rho,
            delta,
            Scalings {
                s: &s,
                s_lb: &s_lb,
                s_ub: &s_ub,
                z: &z,
                z_lb: &z_lb,
                z_ub: &z_ub,
            },
        );
        assert!(kkt.factorize(&data));

        let rx = [0.5, -0.2];
        let ry = [0.1];
        let rz = [-0.3, 0.4];
        let rz_lb = [0.2];
        let rz_ub = [-0.1];
        let rs = [0.05, -0.15];
        let rs_lb = [0.3];
        let rs_ub = [0.25];

        let mut dx = [0.0; 2];
        let mut dy = [0.0; 1];
        let mut dz = [0.0; 2];
        let mut dz_lb = [0.0; 1];
        let mut dz_ub = [0.0; 1];
        let mut ds = [0.0; 2];
        let mut ds_lb = [0.0; 1];
        let mut ds_ub = [0.0; 1];

        kkt.solve(
            &data, &rx, &ry, &rz, &rz_lb, &rz_ub, &rs, &rs_lb, &rs_ub, &mut dx, &mut dy,
            &mut dz, &mut dz_lb, &mut dz_ub, &mut ds, &mut ds_lb, &mut ds_ub,
        );

        let tol = 1e-10;

        // Stationarity row: (P + r I) dx + A^T dy + G^T dz - E_lb^T dz_lb
        // + E_ub^T dz_ub = rx. The bound indices are 0 (lower) and 1 (upper).
        let mut px = [0.0; 2];
        data.mul_p_sym(&dx, &mut px);
        let mut row = [px[0] + rho * dx[0], px[1] + rho * dx[1]];
        let mut aty = [0.0; 2];
        data.mul_at(&dy, &mut aty);
        let mut gtz = [0.0; 2];
        data.mul_gt(&dz, &mut gtz);
        row[0] += aty[0] + gtz[0] - dz_lb[0];
        row[1] += aty[1] + gtz[1] + dz_ub[0];
        assert!((row[0] - rx[0]).abs() < tol, "rx row 0: {} vs {}", row[0], rx[0]);
        assert!((row[1] - rx[1]).abs() < tol, "rx row 1: {} vs {}", row[1], rx[1]);

        // Equality row: A dx - d dy = ry.
        let mut ax = [0.0; 1];
        data.mul_a(&dx, &mut ax);
        assert!((ax[0] - delta * dy[0] - ry[0]).abs() < tol);

        // Inequality rows: G dx + ds - d dz = rz.
        let mut gx = [0.0; 2];
        data.mul_g(&dx, &mut gx);
        for k in 0..2 {
            let lhs = gx[k] + ds[k] - delta * dz[k];
            assert!((lhs - rz[k]).abs() < tol, "rz row {}: {} vs {}", k, lhs, rz[k]);
        }

        // Complementarity rows: z ds + s dz = rs (each piece).
        for k in 0..2 {
            assert!((z[k] * ds[k] + s[k] * dz[k] - rs[k]).abs() < tol);
        }
        assert!((z_lb[0] * ds_lb[0] + s_lb[0] * dz_lb[0] - rs_lb[0]).abs() < tol);
        assert!((z_ub[0] * ds_ub[0] + s_ub[0] * dz_ub[0] - rs_ub[0]).abs() < tol);

        // Bound rows: ds_lb - dx[idx] - d dz_lb = rz_lb and
        // ds_ub + dx[idx] - d dz_ub = rz_ub.
        assert!((ds_lb[0] - dx[0] - delta * dz_lb[0] - rz_lb[0]).abs() < tol);
        assert!((ds_ub[0] + dx[1] - delta * dz_ub[0] - rz_ub[0]).abs() < tol);
    }

    #[test]
    fn test_factorize_rejects_non_finite() {
        let data = test_data();
        let mut kkt = DenseKkt::init(&data, 1e-6, 1e-4);
        let s = [f64::NAN, 1.0];
        let z = [1.0, 1.0];
        kkt.update_scalings(
            &data,
            1e-6,
            1e-4,
            Scalings {
                s: &s,
                s_lb: &[1.0],
                s_ub: &[1.0],
                z: &z,
                z_lb: &[1.0],
                z_ub: &[1.0],
            },
        );
        assert!(!kkt.factorize(&data));
    }
}
