use crate::core::errors::MeasurementError;
use crate::core::state::{Basis, Ket};
use crate::core::utils;
use ndarray::Array2;
use num_complex::Complex64;

/// Probabilities below this are rounding noise from the Hadamard factors.
const PROBABILITY_FLOOR: f64 = 1e-12;

#[derive(Clone, Debug)]
pub struct Measurement {
    /// List of measurement operators
    pub operators: Vec<Array2<Complex64>>,
    /// Associated outcome value of each operator
    pub values: Vec<u8>,
}

impl Measurement {
    pub fn new(operators: Vec<Array2<Complex64>>, values: Vec<u8>) -> Result<Self, MeasurementError> {
        if operators.len() != values.len() {
            return Err(MeasurementError::CountMismatch {
                ops: operators.len(),
                vals: values.len(),
            });
        }

        if operators.is_empty() {
            return Err(MeasurementError::InvalidDimensions);
        }

        for op in &operators {
            if op.dim() != (2, 2) {
                return Err(MeasurementError::InvalidDimensions);
            }
        }

        if !utils::check_completeness(&operators, 2) {
            return Err(MeasurementError::NotComplete);
        }

        Ok(Self { operators, values })
    }

    /// Projectors of a basis, ordered by outcome.
    fn projective(low: Ket, high: Ket) -> Measurement {
        let v0 = low.state_vector();
        let v1 = high.state_vector();

        Measurement {
            operators: vec![utils::outer_product(&v0, &v0), utils::outer_product(&v1, &v1)],
            values: vec![0, 1],
        }
    }

    /// Z basis (Computational) -> {|0>, |1>}.
    pub fn z_basis() -> Measurement {
        Self::projective(Ket::Zero, Ket::One)
    }

    /// X basis (Hadamard) -> {|+>, |->}.
    pub fn x_basis() -> Measurement {
        Self::projective(Ket::Plus, Ket::Minus)
    }

    pub fn for_basis(basis: Basis) -> Measurement {
        match basis {
            Basis::Z => Self::z_basis(),
            Basis::X => Self::x_basis(),
        }
    }

    /// Returns the probability of each operator on `rho`: p_k = tr(M_k rho M_k†).
    pub fn probabilities(&self, rho: &Array2<Complex64>) -> Result<Vec<f64>, MeasurementError> {
        if rho.dim() != (2, 2) {
            return Err(MeasurementError::InvalidDimensions);
        }

        let mut probs = Vec::with_capacity(self.operators.len());
        let mut sum_probs = 0.0;

        for op in &self.operators {
            let unnormalized_rho_prime = op.dot(rho).dot(&utils::adjoint(op));
            let p_k = utils::trace(&unnormalized_rho_prime).re;
            let p_k = if p_k < PROBABILITY_FLOOR { 0.0 } else { p_k };

            probs.push(p_k);
            sum_probs += p_k;
        }

        if sum_probs <= 0.0 {
            return Err(MeasurementError::NotComplete);
        }

        // Due to float, renormalization of probabilities to ensure completeness
        for p in &mut probs {
            *p /= sum_probs;
        }

        Ok(probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::DensityMatrix;

    #[test]
    fn test_bases_are_complete() {
        let z = Measurement::z_basis();
        let x = Measurement::x_basis();
        assert!(Measurement::new(z.operators, z.values).is_ok());
        assert!(Measurement::new(x.operators, x.values).is_ok());
    }

    #[test]
    fn test_rejects_incomplete_sets() {
        let z = Measurement::z_basis();
        let half = vec![z.operators[0].clone()];
        assert_eq!(
            Measurement::new(half, vec![0]).unwrap_err(),
            MeasurementError::NotComplete
        );
        assert_eq!(
            Measurement::new(z.operators, vec![0]).unwrap_err(),
            MeasurementError::CountMismatch { ops: 2, vals: 1 }
        );
    }

    #[test]
    fn test_maximally_mixed_is_uniform_in_both_bases() {
        let rho = Array2::<Complex64>::eye(2).mapv(|x| x * 0.5);
        let rho = DensityMatrix::from_matrix(rho).unwrap();
        for basis in [Basis::Z, Basis::X] {
            let probs = Measurement::for_basis(basis)
                .probabilities(rho.matrix())
                .unwrap();
            assert!((probs[0] - 0.5).abs() < 1e-12);
            assert!((probs[1] - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_probabilities_use_rotated_diagonal() {
        let plus = DensityMatrix::from_ket(Ket::Plus);
        let probs = Measurement::x_basis().probabilities(plus.matrix()).unwrap();
        assert_eq!(probs[1], 0.0);
        assert!((probs[0] - 1.0).abs() < 1e-12);
    }
}
