//! Sparse problem data store backed by `sprs` CSC matrices.

use super::{compress_lower_bounds, compress_upper_bounds, DataStore};
use crate::linalg::sparse::{self, SparseCsc};
use crate::problem::ProblemError;

/// Sparse store: upper triangle of P, A^T and G^T in CSC form.
#[derive(Debug, Clone)]
pub struct SparseData {
    pub(crate) n: usize,
    pub(crate) p: usize,
    pub(crate) m: usize,
    pub(crate) n_lb: usize,
    pub(crate) n_ub: usize,

    /// Upper triangle of P (n x n).
    pub(crate) p_utri: SparseCsc,
    /// A^T (n x p).
    pub(crate) at: SparseCsc,
    /// G^T (n x m).
    pub(crate) gt: SparseCsc,

    pub(crate) c: Vec<f64>,
    pub(crate) b: Vec<f64>,
    pub(crate) h: Vec<f64>,

    pub(crate) x_lb_n: Vec<f64>,
    pub(crate) x_ub: Vec<f64>,
    pub(crate) x_lb_idx: Vec<usize>,
    pub(crate) x_ub_idx: Vec<usize>,
}

fn check_shape(
    what: &'static str,
    mat: &SparseCsc,
    exp_rows: usize,
    exp_cols: usize,
) -> Result<(), ProblemError> {
    if !mat.is_csc() {
        return Err(ProblemError::NotCsc(what));
    }
    if mat.rows() != exp_rows || mat.cols() != exp_cols {
        return Err(ProblemError::Dimension {
            what,
            expected: format!("{}x{}", exp_rows, exp_cols),
            actual: format!("{}x{}", mat.rows(), mat.cols()),
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

impl SparseData {
    /// Build the store from CSC user matrices.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        p_mat: &SparseCsc,
        c: &[f64],
        a: &SparseCsc,
        b: &[f64],
        g: &SparseCsc,
        h: &[f64],
        x_lb: Option<&[f64]>,
        x_ub: Option<&[f64]>,
    ) -> Result<Self, ProblemError> {
        let n = p_mat.rows();
        let p = a.rows();
        let m = g.rows();

        check_shape("P", p_mat, n, n)?;
        check_shape("A", a, p, n)?;
        check_shape("G", g, m, n)?;
        check_len("c", c.len(), n)?;
        check_len("b", b.len(), p)?;
        check_len("h", h.len(), m)?;
        if let Some(lb) = x_lb {
            check_len("x_lb", lb.len(), n)?;
        }
        if let Some(ub) = x_ub {
            check_len("x_ub", ub.len(), n)?;
        }

        let mut data = Self {
            n,
            p,
            m,
            n_lb: 0,
            n_ub: 0,
            p_utri: sparse::upper_triangle(p_mat),
            at: sparse::transpose_csc(a),
            gt: sparse::transpose_csc(g),
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

    /// Replace the values of P; the nonzero pattern must be unchanged.
    pub(crate) fn set_p(&mut self, p_mat: &SparseCsc) -> Result<(), ProblemError> {
        check_shape("P", p_mat, self.n, self.n)?;
        let utri = sparse::upper_triangle(p_mat);
        if utri.nnz() != self.p_utri.nnz() {
            return Err(ProblemError::PatternMismatch("P"));
        }
        self.p_utri = utri;
        Ok(())
    }

    /// Replace the values of A; the nonzero pattern must be unchanged.
    pub(crate) fn set_a(&mut self, a: &SparseCsc) -> Result<(), ProblemError> {
        check_shape("A", a, self.p, self.n)?;
        if a.nnz() != self.at.nnz() {
            return Err(ProblemError::PatternMismatch("A"));
        }
        self.at = sparse::transpose_csc(a);
        Ok(())
    }

    /// Replace the values of G; the nonzero pattern must be unchanged.
    pub(crate) fn set_g(&mut self, g: &SparseCsc) -> Result<(), ProblemError> {
        check_shape("G", g, self.m, self.n)?;
        if g.nnz() != self.gt.nnz() {
            return Err(ProblemError::PatternMismatch("G"));
        }
        self.gt = sparse::transpose_csc(g);
        Ok(())
    }

    /// Nonzeros in the stored upper triangle of P.
    pub fn nnz_p_utri(&self) -> usize {
        self.p_utri.nnz()
    }

    /// Nonzeros in A.
    pub fn nnz_a(&self) -> usize {
        self.at.nnz()
    }

    /// Nonzeros in G.
    pub fn nnz_g(&self) -> usize {
        self.gt.nnz()
    }
}

impl DataStore for SparseData {
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
        for (&v, (i, j)) in self.p_utri.iter() {
            out[i] += v * x[j];
            if i != j {
                out[j] += v * x[i];
            }
        }
    }

    fn mul_a(&self, x: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        // A^T entry (i, j) is A(j, i).
        for (&v, (i, j)) in self.at.iter() {
            out[j] += v * x[i];
        }
    }

    fn mul_at(&self, y: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for (&v, (i, j)) in self.at.iter() {
            out[i] += v * y[j];
        }
    }

    fn mul_g(&self, x: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for (&v, (i, j)) in self.gt.iter() {
            out[j] += v * x[i];
        }
    }

    fn mul_gt(&self, z: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for (&v, (i, j)) in self.gt.iter() {
            out[i] += v * z[j];
        }
    }

    fn visit_p_utri<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        for (&v, (i, j)) in self.p_utri.iter() {
            f(i, j, v);
        }
    }

    fn visit_a<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        for (&v, (i, j)) in self.at.iter() {
            f(j, i, v);
        }
    }

    fn visit_g<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        for (&v, (i, j)) in self.gt.iter() {
            f(j, i, v);
        }
    }

    fn scale_p_utri<F: Fn(usize, usize) -> f64>(&mut self, factor: F) {
        self.p_utri = sparse::scale_entries(&self.p_utri, |i, j| factor(i, j));
    }

    fn scale_a<F: Fn(usize, usize) -> f64>(&mut self, factor: F) {
        self.at = sparse::scale_entries(&self.at, |i, j| factor(j, i));
    }

    fn scale_g<F: Fn(usize, usize) -> f64>(&mut self, factor: F) {
        self.gt = sparse::scale_entries(&self.gt, |i, j| factor(j, i));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::from_triplets;

    fn small_data() -> SparseData {
        let p = from_triplets(2, 2, vec![(0, 0, 2.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 2.0)]);
        let a = from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]);
        let g = from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]);
        SparseData::new(
            &p,
            &[1.0, -1.0],
            &a,
            &[1.0],
            &g,
            &[2.0, 3.0],
            None,
            Some(&[0.5, 1e30]),
        )
        .unwrap()
    }

    #[test]
    fn test_upper_triangle_stored() {
        let d = small_data();
        assert_eq!(d.nnz_p_utri(), 3);
        assert_eq!(d.nnz_a(), 2);
        assert_eq!(d.n_ub(), 1);
        assert_eq!(d.x_ub_idx()[0], 0);
        assert_eq!(d.x_ub()[0], 0.5);
    }

    #[test]
    fn test_mul_matches_dense_arithmetic() {
        let d = small_data();
        let mut px = [0.0; 2];
        d.mul_p_sym(&[1.0, 2.0], &mut px);
        assert_eq!(px, [4.0, 5.0]);

        let mut ax = [0.0; 1];
        d.mul_a(&[3.0, 4.0], &mut ax);
        assert_eq!(ax, [7.0]);

        let mut gtz = [0.0; 2];
        d.mul_gt(&[5.0, 6.0], &mut gtz);
        assert_eq!(gtz, [5.0, 6.0]);
    }

    #[test]
    fn test_set_a_rejects_pattern_change() {
        let mut d = small_data();
        let a_new = from_triplets(1, 2, vec![(0, 0, 2.0)]);
        assert!(d.set_a(&a_new).is_err());

        let a_ok = from_triplets(1, 2, vec![(0, 0, 2.0), (0, 1, 3.0)]);
        assert!(d.set_a(&a_ok).is_ok());
        let mut ax = [0.0; 1];
        d.mul_a(&[1.0, 1.0], &mut ax);
        assert_eq!(ax, [5.0]);
    }
}
