//! Sparse LDL^T factorization wrapper.
//!
//! Thin interface over the `ldl` crate for quasi-definite systems: a one-time
//! symbolic phase (elimination tree) followed by repeated numeric
//! factorizations on the same pattern, which is exactly the shape the KKT
//! operator contract needs. Natural ordering; the augmented KKT matrix is
//! assembled with its blocks already in a factorization-friendly order.

use thiserror::Error;

/// Factorization errors.
#[derive(Error, Debug)]
pub enum LdlError {
    /// Numeric breakdown (zero pivot or non-finite entry).
    #[error("LDL^T factorization broke down")]
    Breakdown,

    /// The symbolic phase rejected the pattern.
    #[error("symbolic analysis failed: {0}")]
    Symbolic(String),
}

/// LDL^T factorization of an upper-triangular CSC matrix.
///
/// `symbolic` must be called once per pattern; `factor` may then be called
/// any number of times with new values, reusing all workspaces.
pub struct LdlSolver {
    n: usize,

    etree: Vec<Option<usize>>,
    l_nz: Vec<usize>,
    symbolic_done: bool,

    // L is unit lower triangular in CSC, D diagonal.
    l_p: Vec<usize>,
    l_i: Vec<usize>,
    l_x: Vec<f64>,
    d: Vec<f64>,
    d_inv: Vec<f64>,

    // Reusable factorization workspaces.
    bwork: Vec<ldl::Marker>,
    iwork: Vec<usize>,
    fwork: Vec<f64>,
}

impl LdlSolver {
    /// Create a solver for an `n x n` system.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            etree: vec![None; n],
            l_nz: vec![0; n],
            symbolic_done: false,
            l_p: vec![0; n + 1],
            l_i: Vec::new(),
            l_x: Vec::new(),
            d: vec![0.0; n],
            d_inv: vec![0.0; n],
            bwork: vec![ldl::Marker::Unused; n],
            iwork: vec![0; 3 * n],
            fwork: vec![0.0; n],
        }
    }

    /// Compute the elimination tree for the pattern `(colptr, rowind)`.
    pub fn symbolic(&mut self, colptr: &[usize], rowind: &[usize]) -> Result<(), LdlError> {
        debug_assert_eq!(colptr.len(), self.n + 1);

        let mut work = vec![0; self.n];
        self.etree.fill(None);
        self.l_nz.fill(0);

        ldl::etree(
            self.n,
            colptr,
            rowind,
            &mut work,
            &mut self.l_nz,
            &mut self.etree,
        )
        .map_err(|_| LdlError::Symbolic("elimination tree construction failed".to_string()))?;

        let nnz_l: usize = self.l_nz.iter().sum();
        self.l_i.resize(nnz_l, 0);
        self.l_x.resize(nnz_l, 0.0);
        self.symbolic_done = true;
        Ok(())
    }

    /// Numeric factorization with the values in `values`.
    ///
    /// Fails on zero pivots or non-finite intermediates; the caller decides
    /// how to recover (the KKT driver inflates its regularization).
    pub fn factor(
        &mut self,
        colptr: &[usize],
        rowind: &[usize],
        values: &[f64],
    ) -> Result<(), LdlError> {
        assert!(self.symbolic_done, "symbolic analysis must run first");

        self.bwork.fill(ldl::Marker::Unused);
        self.iwork.fill(0);
        self.fwork.fill(0.0);

        ldl::factor(
            self.n,
            colptr,
            rowind,
            values,
            &mut self.l_p,
            &mut self.l_i,
            &mut self.l_x,
            &mut self.d,
            &mut self.d_inv,
            &self.l_nz,
            &self.etree,
            &mut self.bwork,
            &mut self.iwork,
            &mut self.fwork,
        )
        .map_err(|_| LdlError::Breakdown)?;

        if self.d.iter().any(|di| !di.is_finite() || *di == 0.0) {
            return Err(LdlError::Breakdown);
        }
        Ok(())
    }

    /// Solve `K x = b` in place using the latest factorization.
    pub fn solve_in_place(&self, x: &mut [f64]) {
        debug_assert_eq!(x.len(), self.n);
        ldl::solve(self.n, &self.l_p, &self.l_i, &self.l_x, &self.d_inv, x);
    }

    /// Pivot diagonal of the latest factorization.
    pub fn d(&self) -> &[f64] {
        &self.d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse::from_triplets;

    fn csc_parts(mat: &crate::linalg::sparse::SparseCsc) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        let indptr = mat.indptr();
        (
            indptr.raw_storage().to_vec(),
            mat.indices().to_vec(),
            mat.data().to_vec(),
        )
    }

    #[test]
    fn test_ldl_positive_definite() {
        // [[2, 1], [1, 2]] x = [3, 3] has solution [1, 1].
        let mat = from_triplets(2, 2, vec![(0, 0, 2.0), (0, 1, 1.0), (1, 1, 2.0)]);
        let (colptr, rowind, values) = csc_parts(&mat);

        let mut solver = LdlSolver::new(2);
        solver.symbolic(&colptr, &rowind).unwrap();
        solver.factor(&colptr, &rowind, &values).unwrap();

        let mut x = vec![3.0, 3.0];
        solver.solve_in_place(&mut x);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ldl_quasi_definite() {
        // [[1, 0, 1], [0, 1, 1], [1, 1, -1]]: positive block then a negative
        // pivot, the shape of a regularized KKT matrix.
        let mat = from_triplets(
            3,
            3,
            vec![
                (0, 0, 1.0),
                (1, 1, 1.0),
                (0, 2, 1.0),
                (1, 2, 1.0),
                (2, 2, -1.0),
            ],
        );
        let (colptr, rowind, values) = csc_parts(&mat);

        let mut solver = LdlSolver::new(3);
        solver.symbolic(&colptr, &rowind).unwrap();
        solver.factor(&colptr, &rowind, &values).unwrap();

        assert!(solver.d()[0] > 0.0);
        assert!(solver.d()[1] > 0.0);
        assert!(solver.d()[2] < 0.0);

        // Verify K x = b via the residual.
        let b = [1.0, 2.0, 0.0];
        let mut x = b.to_vec();
        solver.solve_in_place(&mut x);
        let kx = [
            x[0] + x[2],
            x[1] + x[2],
            x[0] + x[1] - x[2],
        ];
        for i in 0..3 {
            assert!((kx[i] - b[i]).abs() < 1e-12, "row {}: {} vs {}", i, kx[i], b[i]);
        }
    }

    #[test]
    fn test_ldl_refactor_same_pattern() {
        let mat = from_triplets(2, 2, vec![(0, 0, 2.0), (0, 1, 1.0), (1, 1, 2.0)]);
        let (colptr, rowind, mut values) = csc_parts(&mat);

        let mut solver = LdlSolver::new(2);
        solver.symbolic(&colptr, &rowind).unwrap();
        solver.factor(&colptr, &rowind, &values).unwrap();

        // Same pattern, new values.
        for v in values.iter_mut() {
            *v *= 2.0;
        }
        solver.factor(&colptr, &rowind, &values).unwrap();

        let mut x = vec![6.0, 6.0];
        solver.solve_in_place(&mut x);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }
}
