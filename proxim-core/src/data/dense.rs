//! Dense problem data store backed by `nalgebra`.

use nalgebra::DMatrix;

use super::{compress_lower_bounds, compress_upper_bounds, DataStore};
use crate::problem::ProblemError;

/// Dense store: P upper triangle, A^T and G^T as column-major matrices.
#[derive(Debug, Clone)]
pub struct DenseData {
    pub(crate) n: usize,
    pub(crate) p: usize,
    pub(crate) m: usize,
    pub(crate) n_lb: usize,
    pub(crate) n_ub: usize,

    /// Upper triangle of P; strict lower part is zero.
    pub(crate) p_utri: DMatrix<f64>,
    /// A^T (n x p).
    pub(crate) at: DMatrix<f64>,
    /// G^T (n x m).
    pub(crate) gt: DMatrix<f64>,

    pub(crate) c: Vec<f64>,
    pub(crate) b: Vec<f64>,
    pub(crate) h: Vec<f64>,

    pub(crate) x_lb_n: Vec<f64>,
    pub(crate) x_ub: Vec<f64>,
    pub(crate) x_lb_idx: Vec<usize>,
    pub(crate) x_ub_idx: Vec<usize>,
}

fn check_dims(
    what: &'static str,
    rows: usize,
    cols: usize,
    exp_rows: usize,
    exp_cols: usize,
) -> Result<(), ProblemError> {
    if rows != exp_rows || cols != exp_cols {
        return Err(ProblemError::Dimension {
            what,
            expected: format!("{}x{}", exp_rows, exp_cols),
            actual: format!("{}x{}", rows, cols),
        });
    }
    Ok(())
}

fn check_len(what: &'static str, len: usize, expected: usize) -> Result<(), ProblemError> {
    if len != expected {
        return Err(ProblemError::Dimension {
            what,
            expected: expected.to_string(),
            actual: len.to_string(),
        });
    }
    Ok(())
}

impl DenseData {
    /// Build the store from user matrices. P must be square; only its upper
    /// triangle is read.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        p_mat: &DMatrix<f64>,
        c: &[f64],
        a: &DMatrix<f64>,
        b: &[f64],
        g: &DMatrix<f64>,
        h: &[f64],
        x_lb: Option<&[f64]>,
        x_ub: Option<&[f64]>,
    ) -> Result<Self, ProblemError> {
        let n = p_mat.nrows();
        let p = a.nrows();
        let m = g.nrows();

        check_dims("P", p_mat.nrows(), p_mat.ncols(), n, n)?;
        check_dims("A", a.nrows(), a.ncols(), p, n)?;
        check_dims("G", g.nrows(), g.ncols(), m, n)?;
        check_len("c", c.len(), n)?;
        check_len("b", b.len(), p)?;
        check_len("h", h.len(), m)?;
        if let Some(lb) = x_lb {
            check_len("x_lb", lb.len(), n)?;
        }
        if let Some(ub) = x_ub {
            check_len("x_ub", ub.len(), n)?;
        }

        let mut p_utri = DMatrix::zeros(n, n);
        for j in 0..n {
            for i in 0..=j {
                p_utri[(i, j)] = p_mat[(i, j)];
            }
        }

        let mut data = Self {
            n,
            p,
            m,
            n_lb: 0,
            n_ub: 0,
            p_utri,
            at: a.transpose(),
            gt: g.transpose(),
            c: c.to_vec(),
            b: b.to_vec(),
            h: h.to_vec(),
            x_lb_n: vec![0.0; n],
            x_ub: vec![0.0; n],
            x_lb_idx: vec![0; n],
            x_ub_idx: vec![0; n],
        };
        data.rebuild_lower_bounds(x_lb);
        data.rebuild_upper_bounds(x_ub);
        Ok(data)
    }

    pub(crate) fn rebuild_lower_bounds(&mut self, x_lb: Option<&[f64]>) {
        self.n_lb = compress_lower_bounds(x_lb, &mut self.x_lb_n, &mut self.x_lb_idx);
    }

    pub(crate) fn rebuild_upper_bounds(&mut self, x_ub: Option<&[f64]>) {
        self.n_ub = compress_upper_bounds(x_ub, &mut self.x_ub, &mut self.x_ub_idx);
    }

    pub(crate) fn set_p(&mut self, p_mat: &DMatrix<f64>) -> Result<(), ProblemError> {
        check_dims("P", p_mat.nrows(), p_mat.ncols(), self.n, self.n)?;
        for j in 0..self.n {
            for i in 0..=j {
                self.p_utri[(i, j)] = p_mat[(i, j)];
            }
        }
        Ok(())
    }

    pub(crate) fn set_a(&mut self, a: &DMatrix<f64>) -> Result<(), ProblemError> {
        check_dims("A", a.nrows(), a.ncols(), self.p, self.n)?;
        self.at = a.transpose();
        Ok(())
    }

    pub(crate) fn set_g(&mut self, g: &DMatrix<f64>) -> Result<(), ProblemError> {
        check_dims("G", g.nrows(), g.ncols(), self.m, self.n)?;
        self.gt = g.transpose();
        Ok(())
    }
}

impl DataStore for DenseData {
    fn n(&self) -> usize {
        self.n
    }
    fn p(&self) -> usize {
        self.p
    }
    fn m(&self) -> usize {
        self.m
    }
    fn n_lb(&self) -> usize {
        self.n_lb
    }
    fn n_ub(&self) -> usize {
        self.n_ub
    }

    fn c(&self) -> &[f64] {
        &self.c
    }
    fn b(&self) -> &[f64] {
        &self.b
    }
    fn h(&self) -> &[f64] {
        &self.h
    }
    fn x_lb_n(&self) -> &[f64] {
        &self.x_lb_n
    }
    fn x_ub(&self) -> &[f64] {
        &self.x_ub
    }
    fn x_lb_idx(&self) -> &[usize] {
        &self.x_lb_idx
    }
    fn x_ub_idx(&self) -> &[usize] {
        &self.x_ub_idx
    }

    fn c_mut(&mut self) -> &mut [f64] {
        &mut self.c
    }
    fn b_mut(&mut self) -> &mut [f64] {
        &mut self.b
    }
    fn h_mut(&mut self) -> &mut [f64] {
        &mut self.h
    }
    fn x_lb_n_mut(&mut self) -> &mut [f64] {
        &mut self.x_lb_n
    }
    fn x_ub_mut(&mut self) -> &mut [f64] {
        &mut self.x_ub
    }

    fn mul_p_sym(&self, x: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for j in 0..self.n {
            for i in 0..=j {
                let v = self.p_utri[(i, j)];
                if v != 0.0 {
                    out[i] += v * x[j];
                    if i != j {
                        out[j] += v * x[i];
                    }
                }
            }
        }
    }

    fn mul_a(&self, x: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for j in 0..self.p {
            let mut acc = 0.0;
            for i in 0..self.n {
                acc += self.at[(i, j)] * x[i];
            }
            out[j] = acc;
        }
    }

    fn mul_at(&self, y: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for j in 0..self.p {
            let yj = y[j];
            if yj != 0.0 {
                for i in 0..self.n {
                    out[i] += self.at[(i, j)] * yj;
                }
            }
        }
    }

    fn mul_g(&self, x: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for j in 0..self.m {
            let mut acc = 0.0;
            for i in 0..self.n {
                acc += self.gt[(i, j)] * x[i];
            }
            out[j] = acc;
        }
    }

    fn mul_gt(&self, z: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for j in 0..self.m {
            let zj = z[j];
            if zj != 0.0 {
                for i in 0..self.n {
                    out[i] += self.gt[(i, j)] * zj;
                }
            }
        }
    }

    fn visit_p_utri<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        for j in 0..self.n {
            for i in 0..=j {
                let v = self.p_utri[(i, j)];
                if v != 0.0 {
                    f(i, j, v);
                }
            }
        }
    }

    fn visit_a<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        for j in 0..self.p {
            for i in 0..self.n {
                let v = self.at[(i, j)];
                if v != 0.0 {
                    f(j, i, v);
                }
            }
        }
    }

    fn visit_g<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        for j in 0..self.m {
            for i in 0..self.n {
                let v = self.gt[(i, j)];
                if v != 0.0 {
                    f(j, i, v);
                }
            }
        }
    }

    fn scale_p_utri<F: Fn(usize, usize) -> f64>(&mut self, factor: F) {
        for j in 0..self.n {
            for i in 0..=j {
                self.p_utri[(i, j)] *= factor(i, j);
            }
        }
    }

    fn scale_a<F: Fn(usize, usize) -> f64>(&mut self, factor: F) {
        for j in 0..self.p {
            for i in 0..self.n {
                self.at[(i, j)] *= factor(j, i);
            }
        }
    }

    fn scale_g<F: Fn(usize, usize) -> f64>(&mut self, factor: F) {
        for j in 0..self.m {
            for i in 0..self.n {
                self.gt[(i, j)] *= factor(j, i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;

    fn small_data() -> DenseData {
        // P = [[2, 1], [1, 2]], A = [1 1], G = [[1, 0], [0, 1]]
        let p = dmatrix![2.0, 1.0; 1.0, 2.0];
        let a = dmatrix![1.0, 1.0];
        let g = dmatrix![1.0, 0.0; 0.0, 1.0];
        DenseData::new(
            &p,
            &[1.0, -1.0],
            &a,
            &[1.0],
            &g,
            &[2.0, 3.0],
            Some(&[0.0, -1e31]),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_dims_and_bounds() {
        let d = small_data();
        assert_eq!((d.n(), d.p(), d.m()), (2, 1, 2));
        assert_eq!(d.n_lb(), 1);
        assert_eq!(d.n_ub(), 0);
        assert_eq!(d.x_lb_idx()[0], 0);
        assert_eq!(d.x_lb_n()[0], -0.0);
    }

    #[test]
    fn test_mul_p_sym_uses_both_triangles() {
        let d = small_data();
        let mut out = [0.0; 2];
        d.mul_p_sym(&[1.0, 2.0], &mut out);
        assert_eq!(out, [4.0, 5.0]);
    }

    #[test]
    fn test_mul_a_and_at() {
        let d = small_data();
        let mut ax = [0.0; 1];
        d.mul_a(&[3.0, 4.0], &mut ax);
        assert_eq!(ax, [7.0]);

        let mut aty = [0.0; 2];
        d.mul_at(&[2.0], &mut aty);
        assert_eq!(aty, [2.0, 2.0]);
    }

    #[test]
    fn test_dimension_error() {
        let p = dmatrix![1.0, 0.0; 0.0, 1.0];
        let a = dmatrix![1.0, 1.0];
        let g = dmatrix![1.0, 0.0];
        let err = DenseData::new(&p, &[0.0], &a, &[1.0], &g, &[1.0], None, None);
        assert!(err.is_err());
    }
}
