use crate::core::errors::GateError;
use crate::core::utils;
use ndarray::{Array1, Array2, arr2};
use num_complex::Complex64;

/// Represents a single-qubit quantum gate.
///
/// A gate is defined by its 2x2 unitary matrix. Gates prepare the BB84/B92
/// kets from |0> and provide the Pauli operators of the noise channels.
#[derive(Clone, Debug, PartialEq)]
pub struct Gate {
    /// The unitary matrix of the gate.
    pub matrix: Array2<Complex64>,
}

impl Gate {
    /// Creates a new `Gate` from a unitary matrix.
    ///
    /// # Errors
    ///
    /// Returns a `GateError` if:
    /// - The matrix is not square.
    /// - The matrix is not 2x2.
    /// - The matrix is not unitary.
    pub fn new(matrix: Array2<Complex64>) -> Result<Self, GateError> {
        let (rows, cols) = matrix.dim();

        if rows != cols {
            return Err(GateError::NotSquareMatrix);
        }

        if rows != 2 {
            return Err(GateError::InvalidDimensions);
        }

        if !Self::check_unitary(&matrix) {
            return Err(GateError::NonUnitary);
        }

        Ok(Self { matrix })
    }

    /// Checks if a given matrix is unitary
    fn check_unitary(matrix: &Array2<Complex64>) -> bool {
        let (rows, _) = matrix.dim();
        let eye = Array2::<Complex64>::eye(rows);

        let product = matrix.dot(&utils::adjoint(matrix));

        product
            .iter()
            .zip(eye.iter())
            .all(|(a, b)| (*a - *b).norm() < 1e-6)
    }

    /// Applies the gate to a state vector.
    pub fn apply(&self, ket: &Array1<Complex64>) -> Array1<Complex64> {
        self.matrix.dot(ket)
    }

    /// Gate scaled by a real weight, as used for Kraus operators.
    pub fn scaled(&self, weight: f64) -> Array2<Complex64> {
        self.matrix.mapv(|x| x * weight)
    }

    // --- Standard Gates ---

    /// Creates an Identity gate.
    pub fn i() -> Gate {
        Gate {
            matrix: arr2(&[
                [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
                [Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)],
            ]),
        }
    }

    /// Creates a Pauli-X gate (NOT gate).
    pub fn x() -> Gate {
        Gate {
            matrix: arr2(&[
                [Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)],
                [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
            ]),
        }
    }

    /// Creates a Pauli-Y gate.
    pub fn y() -> Gate {
        Gate {
            matrix: arr2(&[
                [Complex64::new(0.0, 0.0), Complex64::new(0.0, -1.0)],
                [Complex64::new(0.0, 1.0), Complex64::new(0.0, 0.0)],
            ]),
        }
    }

    /// Creates a Pauli-Z gate.
    pub fn z() -> Gate {
        Gate {
            matrix: arr2(&[
                [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
                [Complex64::new(0.0, 0.0), Complex64::new(-1.0, 0.0)],
            ]),
        }
    }

    /// Creates a Hadamard gate.
    pub fn h() -> Gate {
        let factor = 1.0 / 2.0_f64.sqrt();
        Gate {
            matrix: arr2(&[
                [Complex64::new(factor, 0.0), Complex64::new(factor, 0.0)],
                [Complex64::new(factor, 0.0), Complex64::new(-factor, 0.0)],
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standard_gates_are_unitary() {
        for gate in [Gate::i(), Gate::x(), Gate::y(), Gate::z(), Gate::h()] {
            assert!(Gate::new(gate.matrix.clone()).is_ok());
        }
    }

    #[test]
    fn test_rejects_invalid_matrices() {
        let not_unitary = Gate::x().scaled(2.0);
        assert_eq!(Gate::new(not_unitary), Err(GateError::NonUnitary));

        let three = Array2::<Complex64>::eye(3);
        assert_eq!(Gate::new(three), Err(GateError::InvalidDimensions));

        let rect = Array2::<Complex64>::zeros((2, 3));
        assert_eq!(Gate::new(rect), Err(GateError::NotSquareMatrix));
    }

    #[test]
    fn test_x_flips_zero() {
        let zero = array![Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)];
        let one = Gate::x().apply(&zero);
        assert_eq!(one[1], Complex64::new(1.0, 0.0));
    }
}
