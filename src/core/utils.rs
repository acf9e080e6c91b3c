//! Utility functions for single-qubit linear algebra.
//!
//! This module contains helper functions for:
//! - Matrix operations (trace, adjoint, outer product).
//! - Kraus map application.
//! - Completeness, Hermiticity and positivity checks.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use num_complex::Complex64;

/// Computes the trace of a matrix (sum of diagonal elements).
pub fn trace(matrix: &Array2<Complex64>) -> Complex64 {
    matrix.diag().sum()
}

/// Conjugate transpose $A^\dagger$.
pub fn adjoint(matrix: &Array2<Complex64>) -> Array2<Complex64> {
    matrix.t().mapv(|c| c.conj())
}

/// Computes the outer product of two vectors $|a\rangle\langle b|$.
pub fn outer_product(a: &Array1<Complex64>, b: &Array1<Complex64>) -> Array2<Complex64> {
    let n = a.len();
    let m = b.len();
    let mut res = Array2::zeros((n, m));

    for i in 0..n {
        for j in 0..m {
            res[[i, j]] = a[i] * b[j].conj();
        }
    }
    res
}

/// Applies a Kraus set: $\rho' = \sum_k E_k \rho E_k^\dagger$.
pub fn apply_kraus(ops: &[Array2<Complex64>], rho: &Array2<Complex64>) -> Array2<Complex64> {
    let dim = rho.nrows();
    ops.iter()
        .fold(Array2::<Complex64>::zeros((dim, dim)), |acc, k| {
            acc + k.dot(rho).dot(&adjoint(k))
        })
}

/// Checks completeness relation for measurement and Kraus operators.
///
/// Verifies if $\sum M_k^\dagger M_k = I$.
pub fn check_completeness(ops: &[Array2<Complex64>], dim: usize) -> bool {
    let eye = Array2::<Complex64>::eye(dim);
    let sum = ops
        .iter()
        .fold(Array2::<Complex64>::zeros((dim, dim)), |acc, op| {
            acc + adjoint(op).dot(op)
        });
    sum.iter()
        .zip(eye.iter())
        .all(|(a, b)| (a - b).norm() < 1e-9)
}

/// Checks if a matrix is Hermitian
pub fn is_hermitian(mat: &Array2<Complex64>, tol: f64) -> bool {
    mat.iter()
        .zip(mat.t().iter())
        .all(|(a, b)| (a - b.conj()).norm() < tol)
}

/// Smallest eigenvalue of a Hermitian matrix.
///
/// Uses nalgebra's symmetric eigen-decomposition, which is valid for complex Hermitian input.
pub fn min_eigenvalue(mat: &Array2<Complex64>) -> f64 {
    let (rows, cols) = mat.dim();
    let na_mat = DMatrix::from_fn(rows, cols, |r, c| mat[[r, c]]);
    na_mat
        .symmetric_eigen()
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_trace_and_adjoint() {
        let m = array![[c(1.0, 0.0), c(2.0, 1.0)], [c(3.0, -1.0), c(4.0, 0.0)]];
        assert_eq!(trace(&m), c(5.0, 0.0));

        let dag = adjoint(&m);
        assert_eq!(dag[[0, 1]], c(3.0, 1.0));
        assert_eq!(dag[[1, 0]], c(2.0, -1.0));
    }

    #[test]
    fn test_outer_product_projector() {
        let one = array![c(0.0, 0.0), c(1.0, 0.0)];
        let p = outer_product(&one, &one);
        assert_eq!(p[[1, 1]], c(1.0, 0.0));
        assert_eq!(trace(&p), c(1.0, 0.0));
    }

    #[test]
    fn test_identity_is_complete() {
        let eye = Array2::<Complex64>::eye(2);
        assert!(check_completeness(&[eye.clone()], 2));
        assert!(!check_completeness(&[eye.clone(), eye], 2));
    }

    #[test]
    fn test_hermitian_and_eigenvalues() {
        let h = array![[c(0.5, 0.0), c(0.0, -0.5)], [c(0.0, 0.5), c(0.5, 0.0)]];
        assert!(is_hermitian(&h, 1e-12));
        assert!(min_eigenvalue(&h).abs() < 1e-9);

        let not_psd = array![[c(1.5, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(-0.5, 0.0)]];
        assert!(min_eigenvalue(&not_psd) < -0.4);

        let skew = array![[c(0.0, 0.0), c(1.0, 0.0)], [c(-1.0, 0.0), c(0.0, 0.0)]];
        assert!(!is_hermitian(&skew, 1e-12));
    }
}
