//! Sparse KKT back-end.
//!
//! Assembles the quasi-definite augmented matrix
//!
//! ```text
//! [ P+rI+B   A^T        G^T      ]
//! [ A       -dI                  ]
//! [ G               -(Z^-1 S+dI) ]
//! ```
//!
//! in upper-triangular CSC form once at init (every column carries an
//! explicit diagonal entry) and factors it with LDL^T. Index maps from the
//! stored P/A^T/G^T entries into the KKT value array keep numerical updates
//! allocation-free; the block layout makes each diagonal entry the last of
//! its column.

use super::{DataChanges, KktOperator, Scalings};
use crate::data::sparse::SparseData;
use crate::data::DataStore;
use crate::linalg::ldl::LdlSolver;

/// Sparse augmented KKT operator.
pub struct SparseKkt {
    n: usize,
    p: usize,
    m: usize,
    n_kkt: usize,

    rho: f64,
    delta: f64,

    // Slack/dual snapshot staged by `update_scalings`.
    s: Vec<f64>,
    z_inv: Vec<f64>,
    s_lb: Vec<f64>,
    z_lb_inv: Vec<f64>,
    s_ub: Vec<f64>,
    z_ub_inv: Vec<f64>,

    /// Lower-bound weights z/(s + delta z), head live.
    w_lb: Vec<f64>,
    /// Upper-bound weights, head live.
    w_ub: Vec<f64>,
    /// Accumulated box contributions per variable diagonal.
    box_diag: Vec<f64>,

    // Upper-triangular KKT matrix in CSC form.
    colptr: Vec<usize>,
    rowind: Vec<usize>,
    values: Vec<f64>,

    /// Position of each stored P entry in `values`.
    p_to_kkt: Vec<usize>,
    /// Position of each stored A^T entry in `values`.
    at_to_kkt: Vec<usize>,
    /// Position of each stored G^T entry in `values`.
    gt_to_kkt: Vec<usize>,
    /// Position of the diagonal entry of every KKT column.
    diag_idx: Vec<usize>,
    /// Structural diagonal of P (zero where absent).
    p_diag: Vec<f64>,

    ldl: LdlSolver,
    symbolic_ok: bool,

    /// Stacked right-hand side / solution buffer.
    work: Vec<f64>,
}

struct CscParts {
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

fn csc_parts(mat: &crate::linalg::sparse::SparseCsc) -> CscParts {
    let indptr = mat.indptr();
    CscParts {
        indptr: indptr.raw_storage().to_vec(),
        indices: mat.indices().to_vec(),
        values: mat.data().to_vec(),
    }
}

impl SparseKkt {
    /// Write the staged diagonal values into the matrix.
    fn stage_diagonals(&mut self, data: &SparseData) {
        let n_lb = data.n_lb();
        let n_ub = data.n_ub();

        self.box_diag.fill(0.0);
        for (i, &idx) in data.x_lb_idx()[..n_lb].iter().enumerate() {
            self.box_diag[idx] += self.w_lb[i];
        }
        for (i, &idx) in data.x_ub_idx()[..n_ub].iter().enumerate() {
            self.box_diag[idx] += self.w_ub[i];
        }

        for j in 0..self.n {
            self.values[self.diag_idx[j]] = self.p_diag[j] + self.rho + self.box_diag[j];
        }
        for j in 0..self.p {
            self.values[self.diag_idx[self.n + j]] = -self.delta;
        }
        for k in 0..self.m {
            self.values[self.diag_idx[self.n + self.p + k]] =
                -(self.s[k] * self.z_inv[k] + self.delta);
        }
    }
}

impl KktOperator<SparseData> for SparseKkt {
    fn init(data: &SparseData, rho: f64, delta: f64) -> Self {
        let (n, p, m) = (data.n(), data.p(), data.m());
        let n_kkt = n + p + m;

        let p_parts = csc_parts(&data.p_utri);
        let at_parts = csc_parts(&data.at);
        let gt_parts = csc_parts(&data.gt);

        let nnz_p = p_parts.values.len();
        let nnz_at = at_parts.values.len();
        let nnz_gt = gt_parts.values.len();

        let mut colptr = Vec::with_capacity(n_kkt + 1);
        let mut rowind = Vec::with_capacity(nnz_p + nnz_at + nnz_gt + n_kkt);
        let mut values = Vec::with_capacity(nnz_p + nnz_at + nnz_gt + n_kkt);
        let mut p_to_kkt = vec![0; nnz_p];
        let mut at_to_kkt = vec![0; nnz_at];
        let mut gt_to_kkt = vec![0; nnz_gt];
        let mut diag_idx = vec![0; n_kkt];
        let mut p_diag = vec![0.0; n];

        colptr.push(0);

        // Variable columns: the upper triangle of P plus an explicit
        // diagonal entry carrying the regularization.
        for j in 0..n {
            let start = p_parts.indptr[j];
            let end = p_parts.indptr[j + 1];
            let has_diag = end > start && p_parts.indices[end - 1] == j;

            for k in start..end {
                p_to_kkt[k] = values.len();
                rowind.push(p_parts.indices[k]);
                values.push(p_parts.values[k]);
            }
            if has_diag {
                p_diag[j] = p_parts.values[end - 1];
                *values.last_mut().expect("column has entries") += rho;
            } else {
                rowind.push(j);
                values.push(rho);
            }
            diag_idx[j] = values.len() - 1;
            colptr.push(values.len());
        }

        // Equality columns: A^T plus the -delta diagonal.
        for j in 0..p {
            let start = at_parts.indptr[j];
            let end = at_parts.indptr[j + 1];
            for k in start..end {
                at_to_kkt[k] = values.len();
                rowind.push(at_parts.indices[k]);
                values.push(at_parts.values[k]);
            }
            rowind.push(n + j);
            values.push(-delta);
            diag_idx[n + j] = values.len() - 1;
            colptr.push(values.len());
        }

        // Inequality columns: G^T plus the barrier diagonal.
        for k_col in 0..m {
            let start = gt_parts.indptr[k_col];
            let end = gt_parts.indptr[k_col + 1];
            for k in start..end {
                gt_to_kkt[k] = values.len();
                rowind.push(gt_parts.indices[k]);
                values.push(gt_parts.values[k]);
            }
            rowind.push(n + p + k_col);
            values.push(-(1.0 + delta));
            diag_idx[n + p + k_col] = values.len() - 1;
            colptr.push(values.len());
        }

        let mut ldl = LdlSolver::new(n_kkt);
        let symbolic_ok = ldl.symbolic(&colptr, &rowind).is_ok();

        let mut kkt = Self {
            n,
            p,
            m,
            n_kkt,
            rho,
            delta,
            s: vec![1.0; m],
            z_inv: vec![1.0; m],
            s_lb: vec![1.0; n],
            z_lb_inv: vec![1.0; n],
            s_ub: vec![1.0; n],
            z_ub_inv: vec![1.0; n],
            w_lb: vec![1.0 / (1.0 + delta); n],
            w_ub: vec![1.0 / (1.0 + delta); n],
            box_diag: vec![0.0; n],
            colptr,
            rowind,
            values,
            p_to_kkt,
            at_to_kkt,
            gt_to_kkt,
            diag_idx,
            p_diag,
            ldl,
            symbolic_ok,
            work: vec![0.0; n_kkt],
        };
        kkt.stage_diagonals(data);
        kkt
    }

    fn update_scalings(
        &mut self,
        data: &SparseData,
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

        self.stage_diagonals(data);
    }

    fn update_data(&mut self, data: &SparseData, changes: DataChanges) {
        if changes.p {
            let parts = csc_parts(&data.p_utri);
            for (k, &pos) in self.p_to_kkt.iter().enumerate() {
                self.values[pos] = parts.values[k];
            }
            for j in 0..self.n {
                let start = parts.indptr[j];
                let end = parts.indptr[j + 1];
                self.p_diag[j] = if end > start && parts.indices[end - 1] == j {
                    parts.values[end - 1]
                } else {
                    0.0
                };
            }
        }
        if changes.a {
            let parts = csc_parts(&data.at);
            for (k, &pos) in self.at_to_kkt.iter().enumerate() {
                self.values[pos] = parts.values[k];
            }
        }
        if changes.g {
            let parts = csc_parts(&data.gt);
            for (k, &pos) in self.gt_to_kkt.iter().enumerate() {
                self.values[pos] = parts.values[k];
            }
        }
        // Copying P clobbers the staged variable diagonals (and the bound
        // index lists may have been rebuilt), so restage them.
        self.stage_diagonals(data);
    }

    fn factorize(&mut self, _data: &SparseData) -> bool {
        if !self.symbolic_ok {
            return false;
        }
        if self
            .ldl
            .factor(&self.colptr, &self.rowind, &self.values)
            .is_err()
        {
            return false;
        }

        // The factorization of a quasi-definite KKT matrix must carry n
        // positive and p+m negative pivots; anything else is a breakdown.
        let d = self.ldl.d();
        for j in 0..self.n {
            if d[j] <= 0.0 {
                return false;
            }
        }
        for j in self.n..self.n_kkt {
            if d[j] >= 0.0 {
                return false;
            }
        }
        true
    }

    fn solve(
        &mut self,
        data: &SparseData,
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
        let (n, p, m) = (self.n, self.p, self.m);
        let n_lb = data.n_lb();
        let n_ub = data.n_ub();

        self.work[..n].copy_from_slice(rx);
        for (i, &idx) in data.x_lb_idx()[..n_lb].iter().enumerate() {
            self.work[idx] -= self.w_lb[i] * (rz_lb[i] - rs_lb[i] * self.z_lb_inv[i]);
        }
        for (i, &idx) in data.x_ub_idx()[..n_ub].iter().enumerate() {
            self.work[idx] += self.w_ub[i] * (rz_ub[i] - rs_ub[i] * self.z_ub_inv[i]);
        }
        self.work[n..n + p].copy_from_slice(ry);
        for k in 0..m {
            self.work[n + p + k] = rz[k] - rs[k] * self.z_inv[k];
        }

        self.ldl.solve_in_place(&mut self.work);

        dx.copy_from_slice(&self.work[..n]);
        dy.copy_from_slice(&self.work[n..n + p]);
        dz.copy_from_slice(&self.work[n + p..]);

        for k in 0..m {
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
    use crate::linalg::sparse::from_triplets;

    fn test_data() -> SparseData {
        let p = from_triplets(2, 2, vec![(0, 0, 2.0), (0, 1, 0.5), (1, 0, 0.5), (1, 1, 1.5)]);
        let a = from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]);
        let g = from_triplets(2, 2, vec![(0, 0, 1.0), (1, 0, -1.0), (1, 1, 2.0)]);
        SparseData::new(
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
        let mut kkt = SparseKkt::init(&data, rho, delta);

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

        let mut px = [0.0; 2];
        data.mul_p_sym(&dx, &mut px);
        let mut aty = [0.0; 2];
        data.mul_at(&dy, &mut aty);
        let mut gtz = [0.0; 2];
        data.mul_gt(&dz, &mut gtz);
        let row = [
            px[0] + rho * dx[0] + aty[0] + gtz[0] - dz_lb[0],
            px[1] + rho * dx[1] + aty[1] + gtz[1] + dz_ub[0],
        ];
        assert!((row[0] - rx[0]).abs() < tol, "rx row 0: {} vs {}", row[0], rx[0]);
        assert!((row[1] - rx[1]).abs() < tol, "rx row 1: {} vs {}", row[1], rx[1]);

        let mut ax = [0.0; 1];
        data.mul_a(&dx, &mut ax);
        assert!((ax[0] - delta * dy[0] - ry[0]).abs() < tol);

        let mut gx = [0.0; 2];
        data.mul_g(&dx, &mut gx);
        for k in 0..2 {
            let lhs = gx[k] + ds[k] - delta * dz[k];
            assert!((lhs - rz[k]).abs() < tol, "rz row {}: {} vs {}", k, lhs, rz[k]);
        }

        for k in 0..2 {
            assert!((z[k] * ds[k] + s[k] * dz[k] - rs[k]).abs() < tol);
        }
        assert!((z_lb[0] * ds_lb[0] + s_lb[0] * dz_lb[0] - rs_lb[0]).abs() < tol);
        assert!((z_ub[0] * ds_ub[0] + s_ub[0] * dz_ub[0] - rs_ub[0]).abs() < tol);

        assert!((ds_lb[0] - dx[0] - delta * dz_lb[0] - rz_lb[0]).abs() < tol);
        assert!((ds_ub[0] + dx[1] - delta * dz_ub[0] - rz_ub[0]).abs() < tol);
    }

    #[test]
    fn test_update_data_refreshes_values() {
        let data = test_data();
        let mut kkt = SparseKkt::init(&data, 1e-6, 1e-4);

        // Double every P value; the KKT copy must follow.
        let mut data2 = data.clone();
        let p2 = from_triplets(
            2,
            2,
            vec![(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)],
        );
        data2.set_p(&p2).unwrap();
        kkt.update_data(&data2, DataChanges { p: true, a: false, g: false });

        assert_eq!(kkt.p_diag, vec![4.0, 3.0]);
        // Off-diagonal P entry of column 1 sits right before the diagonal.
        assert_eq!(kkt.values[kkt.p_to_kkt[1]], 1.0);
    }

    #[test]
    fn test_pure_equality_structure() {
        // No inequalities and no bounds: the KKT matrix reduces to the
        // [P+rI A^T; A -dI] blocks.
        let p = from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]);
        let a = from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]);
        let g = from_triplets(0, 2, vec![]);
        let data = SparseData::new(&p, &[0.0, 0.0], &a, &[1.0], &g, &[], None, None).unwrap();

        let mut kkt = SparseKkt::init(&data, 1e-6, 1e-4);
        assert!(kkt.factorize(&data));

        let mut dx = [0.0; 2];
        let mut dy = [0.0; 1];
        let mut empty0 = [0.0; 0];
        let mut empty1 = [0.0; 0];
        let mut empty2 = [0.0; 0];
        let mut empty3 = [0.0; 0];
        let mut empty4 = [0.0; 0];
        let mut empty5 = [0.0; 0];

        kkt.solve(
            &data,
            &[0.0, 0.0],
            &[1.0],
            &[],
            &[],
            &[],
            &[],
            &[],
            &[],
            &mut dx,
            &mut dy,
            &mut empty0,
            &mut empty1,
            &mut empty2,
            &mut empty3,
            &mut empty4,
            &mut empty5,
        );

        // (P + rI) dx + A^T dy = 0 and A dx - d dy = 1: dx approaches the
        // least-norm solution of A dx = 1.
        assert!((dx[0] - 0.5).abs() < 1e-3);
        assert!((dx[1] - 0.5).abs() < 1e-3);
    }
}
