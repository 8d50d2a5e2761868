//! Sparse matrix helpers on top of `sprs` CSC storage.

use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format.
pub type SparseCsc = CsMat<f64>;

/// Build a sparse CSC matrix from triplets (row, col, value).
pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((nrows, ncols));
    for (i, j, v) in triplets {
        tri.add_triplet(i, j, v);
    }
    tri.to_csc()
}

/// Extract the upper triangle (row <= col) of a square matrix.
pub fn upper_triangle(mat: &SparseCsc) -> SparseCsc {
    let n = mat.rows();
    let mut tri = TriMat::new((n, n));
    for (&val, (row, col)) in mat.iter() {
        if row <= col {
            tri.add_triplet(row, col, val);
        }
    }
    tri.to_csc()
}

/// Transpose a CSC matrix into CSC storage (counting sort over rows).
pub fn transpose_csc(mat: &SparseCsc) -> SparseCsc {
    let (rows, cols) = (mat.rows(), mat.cols());
    let mut tri = TriMat::new((cols, rows));
    for (&val, (row, col)) in mat.iter() {
        tri.add_triplet(col, row, val);
    }
    tri.to_csc()
}

/// Rebuild a matrix with every entry multiplied by `factor(row, col)`.
///
/// The nonzero pattern is preserved, so index maps into the original matrix
/// stay valid for the result.
pub fn scale_entries<F>(mat: &SparseCsc, factor: F) -> SparseCsc
where
    F: Fn(usize, usize) -> f64,
{
    let mut tri = TriMat::new((mat.rows(), mat.cols()));
    for (&val, (row, col)) in mat.iter() {
        tri.add_triplet(row, col, val * factor(row, col));
    }
    tri.to_csc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_triplets() {
        let mat = from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 2.0), (0, 1, 3.0)]);
        assert_eq!(mat.rows(), 2);
        assert_eq!(mat.cols(), 2);
        assert_eq!(mat.nnz(), 3);
    }

    #[test]
    fn test_upper_triangle() {
        let mat = from_triplets(
            2,
            2,
            vec![(0, 0, 2.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)],
        );
        let utri = upper_triangle(&mat);
        assert_eq!(utri.nnz(), 3);
        for (_, (row, col)) in utri.iter() {
            assert!(row <= col);
        }
    }

    #[test]
    fn test_transpose_csc() {
        let mat = from_triplets(2, 3, vec![(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0)]);
        let t = transpose_csc(&mat);
        assert_eq!(t.rows(), 3);
        assert_eq!(t.cols(), 2);
        assert_eq!(t.get(0, 0), Some(&1.0));
        assert_eq!(t.get(2, 0), Some(&2.0));
        assert_eq!(t.get(1, 1), Some(&3.0));
    }

    #[test]
    fn test_scale_entries_preserves_pattern() {
        let mat = from_triplets(2, 2, vec![(0, 0, 1.0), (0, 1, 2.0), (1, 1, 4.0)]);
        let scaled = scale_entries(&mat, |row, col| if row == col { 2.0 } else { 0.5 });
        assert_eq!(scaled.nnz(), mat.nnz());
        assert_eq!(scaled.get(0, 0), Some(&2.0));
        assert_eq!(scaled.get(0, 1), Some(&1.0));
        assert_eq!(scaled.get(1, 1), Some(&8.0));
    }
}
