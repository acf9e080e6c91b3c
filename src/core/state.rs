use crate::core::errors::StateError;
use crate::core::gates::Gate;
use crate::core::measurements::Measurement;
use crate::core::utils::{self, trace};
use ndarray::{Array1, Array2, array};
use num_complex::Complex64;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const TOLERANCE: f64 = 1e-9;

/// Measurement / preparation basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Basis {
    /// Computational basis {|0>, |1>}.
    Z,
    /// Hadamard basis {|+>, |->}.
    X,
}

impl Basis {
    /// Uniformly random basis.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.random_bool(0.5) { Basis::X } else { Basis::Z }
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Basis::Z => write!(f, "Z"),
            Basis::X => write!(f, "X"),
        }
    }
}

/// The four BB84 kets. B92 only uses `Zero` and `Plus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ket {
    Zero,
    One,
    Plus,
    Minus,
}

impl Ket {
    /// Encodes a bit in the given basis: Z maps to {|0>, |1>}, X maps to {|+>, |->}.
    pub fn encode(bit: u8, basis: Basis) -> Result<Ket, StateError> {
        match (basis, bit) {
            (Basis::Z, 0) => Ok(Ket::Zero),
            (Basis::Z, 1) => Ok(Ket::One),
            (Basis::X, 0) => Ok(Ket::Plus),
            (Basis::X, 1) => Ok(Ket::Minus),
            (_, other) => Err(StateError::InvalidBit(other)),
        }
    }

    /// The basis this ket is an eigenstate of.
    pub fn basis(self) -> Basis {
        match self {
            Ket::Zero | Ket::One => Basis::Z,
            Ket::Plus | Ket::Minus => Basis::X,
        }
    }

    /// Bit value the ket carries in its own basis.
    pub fn bit(self) -> u8 {
        match self {
            Ket::Zero | Ket::Plus => 0,
            Ket::One | Ket::Minus => 1,
        }
    }

    /// State vector built from |0> with X and H gates.
    pub fn state_vector(self) -> Array1<Complex64> {
        let zero = array![Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)];
        match self {
            Ket::Zero => zero,
            Ket::One => Gate::x().apply(&zero),
            Ket::Plus => Gate::h().apply(&zero),
            Ket::Minus => Gate::h().apply(&Gate::x().apply(&zero)),
        }
    }

    /// Born-rule outcome probabilities `[p(0), p(1)]` in `basis`.
    ///
    /// Same basis is certain, the conjugate basis is uniform.
    pub fn outcome_probabilities(self, basis: Basis) -> [f64; 2] {
        if self.basis() == basis {
            match self.bit() {
                0 => [1.0, 0.0],
                _ => [0.0, 1.0],
            }
        } else {
            [0.5, 0.5]
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Ket::Zero => "|0>",
            Ket::One => "|1>",
            Ket::Plus => "|+>",
            Ket::Minus => "|->",
        }
    }
}

/// Validated single-qubit density matrix (Hermitian, trace one, positive semi-definite).
#[derive(Clone, Debug, PartialEq)]
pub struct DensityMatrix {
    matrix: Array2<Complex64>,
}

impl DensityMatrix {
    /// Checks the validity of a density matrix
    fn check_density_matrix(matrix: &Array2<Complex64>) -> Result<(), StateError> {
        let (rows, cols) = matrix.dim();

        if rows != 2 || cols != 2 {
            return Err(StateError::InvalidDimensions { rows, cols });
        }

        if !utils::is_hermitian(matrix, TOLERANCE) {
            return Err(StateError::NotHermitian);
        }

        let tr = trace(matrix);
        if (tr - Complex64::new(1.0, 0.0)).norm() > TOLERANCE {
            return Err(StateError::InvalidTrace(tr));
        }

        let min_eig = utils::min_eigenvalue(matrix);
        if min_eig < -TOLERANCE {
            return Err(StateError::NotPositive(min_eig));
        }

        Ok(())
    }

    /// Creates a DensityMatrix from a generic 2x2 matrix.
    pub fn from_matrix(matrix: Array2<Complex64>) -> Result<Self, StateError> {
        Self::check_density_matrix(&matrix)?;
        Ok(Self { matrix })
    }

    /// Compute the density matrix of the pure state: rho = |psi><psi|
    pub fn from_ket(ket: Ket) -> Self {
        let psi = ket.state_vector();
        Self {
            matrix: utils::outer_product(&psi, &psi),
        }
    }

    /// Checks if the matrix is still a valid state.
    pub fn is_valid(&self) -> Result<(), StateError> {
        Self::check_density_matrix(&self.matrix)
    }

    pub fn matrix(&self) -> &Array2<Complex64> {
        &self.matrix
    }

    /// Applies a Kraus map without re-validating; Kraus sets are checked for completeness on construction.
    pub(crate) fn map(&self, kraus_ops: &[Array2<Complex64>]) -> Self {
        Self {
            matrix: utils::apply_kraus(kraus_ops, &self.matrix),
        }
    }

    /// Purity tr(rho^2). One for pure states, one half for the maximally mixed state.
    pub fn purity(&self) -> f64 {
        trace(&self.matrix.dot(&self.matrix)).re
    }
}

/// A qubit in flight: a named ket until noise turns it into a (possibly mixed) density matrix.
#[derive(Clone, Debug, PartialEq)]
pub enum QuantumState {
    Pure(Ket),
    Mixed(DensityMatrix),
}

impl QuantumState {
    /// Prepares the ket encoding `bit` in `basis`.
    pub fn prepare(bit: u8, basis: Basis) -> Result<Self, StateError> {
        Ok(QuantumState::Pure(Ket::encode(bit, basis)?))
    }

    pub fn to_density_matrix(&self) -> DensityMatrix {
        match self {
            QuantumState::Pure(ket) => DensityMatrix::from_ket(*ket),
            QuantumState::Mixed(rho) => rho.clone(),
        }
    }

    pub fn is_pure(&self) -> bool {
        matches!(self, QuantumState::Pure(_))
    }

    /// Outcome probabilities `[p(0), p(1)]` for a projective measurement in `basis`.
    pub fn outcome_probabilities(&self, basis: Basis) -> Result<[f64; 2], StateError> {
        match self {
            QuantumState::Pure(ket) => Ok(ket.outcome_probabilities(basis)),
            QuantumState::Mixed(rho) => {
                rho.is_valid()?;
                let probs = Measurement::for_basis(basis).probabilities(rho.matrix())?;
                Ok([probs[0], probs[1]])
            }
        }
    }

    /// Physical measurement: samples an outcome with Born-rule probabilities.
    pub fn measure<R: Rng + ?Sized>(&self, basis: Basis, rng: &mut R) -> Result<u8, StateError> {
        let probs = self.outcome_probabilities(basis)?;
        Ok(pick_outcome(&probs, rng) as u8)
    }

    pub fn label(&self) -> String {
        match self {
            QuantumState::Pure(ket) => ket.label().to_string(),
            QuantumState::Mixed(rho) => format!("mixed(purity={:.4})", rho.purity()),
        }
    }
}

impl From<Ket> for QuantumState {
    fn from(ket: Ket) -> Self {
        QuantumState::Pure(ket)
    }
}

/// Randomly selects an outcome index weighted by `probs`
pub(crate) fn pick_outcome<R: Rng + ?Sized>(probs: &[f64], rng: &mut R) -> usize {
    let roll: f64 = rng.random();

    let mut cumulative = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if roll < cumulative {
            return i;
        }
    }
    // Rounding left the cumulative sum just under one: take the last outcome with mass.
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_encode_table() {
        assert_eq!(Ket::encode(0, Basis::Z), Ok(Ket::Zero));
        assert_eq!(Ket::encode(1, Basis::Z), Ok(Ket::One));
        assert_eq!(Ket::encode(0, Basis::X), Ok(Ket::Plus));
        assert_eq!(Ket::encode(1, Basis::X), Ok(Ket::Minus));
    }

    #[test]
    fn test_invalid_bit_is_rejected() {
        assert_eq!(
            QuantumState::prepare(2, Basis::Z),
            Err(StateError::InvalidBit(2))
        );
        assert_eq!(Ket::encode(7, Basis::X), Err(StateError::InvalidBit(7)));
    }

    #[test]
    fn test_same_basis_measurement_is_certain() {
        let mut rng = StdRng::seed_from_u64(1);
        for ket in [Ket::Zero, Ket::One, Ket::Plus, Ket::Minus] {
            let state = QuantumState::from(ket);
            for _ in 0..200 {
                assert_eq!(state.measure(ket.basis(), &mut rng).unwrap(), ket.bit());
            }
        }
    }

    #[test]
    fn test_conjugate_basis_measurement_is_random() {
        let mut rng = StdRng::seed_from_u64(7);
        let cases = [
            (Ket::Zero, Basis::X),
            (Ket::One, Basis::X),
            (Ket::Plus, Basis::Z),
            (Ket::Minus, Basis::Z),
        ];
        for (ket, basis) in cases {
            let state = QuantumState::from(ket);
            let ones: usize = (0..2000)
                .map(|_| state.measure(basis, &mut rng).unwrap() as usize)
                .sum();
            // Both outcomes occur and the split is near 50/50.
            assert!((850..=1150).contains(&ones), "{ket:?} in {basis}: {ones}");
        }
    }

    #[test]
    fn test_pure_density_matrix_matches_table() {
        for ket in [Ket::Zero, Ket::One, Ket::Plus, Ket::Minus] {
            let rho = DensityMatrix::from_ket(ket);
            assert!(rho.is_valid().is_ok());
            assert!((rho.purity() - 1.0).abs() < 1e-9);

            let mixed = QuantumState::Mixed(rho);
            for basis in [Basis::Z, Basis::X] {
                let from_rho = mixed.outcome_probabilities(basis).unwrap();
                let table = ket.outcome_probabilities(basis);
                assert!((from_rho[0] - table[0]).abs() < 1e-9);
                assert!((from_rho[1] - table[1]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_rejects_invalid_density_matrices() {
        let zero = Complex64::new(0.0, 0.0);
        let one = Complex64::new(1.0, 0.0);

        let bad_trace = array![[one, zero], [zero, one]];
        assert!(matches!(
            DensityMatrix::from_matrix(bad_trace),
            Err(StateError::InvalidTrace(_))
        ));

        let negative = array![
            [Complex64::new(1.5, 0.0), zero],
            [zero, Complex64::new(-0.5, 0.0)]
        ];
        assert!(matches!(
            DensityMatrix::from_matrix(negative),
            Err(StateError::NotPositive(_))
        ));

        let skew = array![
            [Complex64::new(0.5, 0.0), Complex64::new(0.5, 0.0)],
            [Complex64::new(-0.5, 0.0), Complex64::new(0.5, 0.0)]
        ];
        assert_eq!(
            DensityMatrix::from_matrix(skew),
            Err(StateError::NotHermitian)
        );

        let wide = Array2::<Complex64>::zeros((2, 3));
        assert_eq!(
            DensityMatrix::from_matrix(wide),
            Err(StateError::InvalidDimensions { rows: 2, cols: 3 })
        );
    }

    #[test]
    fn test_pick_outcome_never_selects_zero_mass() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            assert_eq!(pick_outcome(&[0.0, 1.0], &mut rng), 1);
            assert_eq!(pick_outcome(&[1.0, 0.0], &mut rng), 0);
        }
    }
}
