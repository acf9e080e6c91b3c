use crate::core::errors::{ChannelError, ConfigurationError};
use crate::core::gates::Gate;
use crate::core::state::{DensityMatrix, QuantumState};
use crate::core::utils;
use ndarray::{Array2, array};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Noise process applied to every qubit that survives the fibre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseKind {
    #[default]
    None,
    #[serde(alias = "transmutation")]
    BitFlip,
    Depolarizing,
    AmplitudeDamping,
    PhaseDamping,
}

impl NoiseKind {
    /// Builds the Kraus channel for `strength`; `None` means the identity (no-op).
    pub fn channel(self, strength: f64) -> Result<Option<NoiseChannel>, ChannelError> {
        match self {
            NoiseKind::None => Ok(None),
            NoiseKind::BitFlip => NoiseChannel::bit_flip(strength).map(Some),
            NoiseKind::Depolarizing => NoiseChannel::depolarizing(strength).map(Some),
            NoiseKind::AmplitudeDamping => NoiseChannel::amplitude_damping(strength).map(Some),
            NoiseKind::PhaseDamping => NoiseChannel::phase_damping(strength).map(Some),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoiseKind::None => "none",
            NoiseKind::BitFlip => "bit_flip",
            NoiseKind::Depolarizing => "depolarizing",
            NoiseKind::AmplitudeDamping => "amplitude_damping",
            NoiseKind::PhaseDamping => "phase_damping",
        }
    }
}

impl fmt::Display for NoiseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoiseKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" | "" => Ok(NoiseKind::None),
            "bit_flip" | "bitflip" | "transmutation" => Ok(NoiseKind::BitFlip),
            "depolarizing" => Ok(NoiseKind::Depolarizing),
            "amplitude_damping" => Ok(NoiseKind::AmplitudeDamping),
            "phase_damping" => Ok(NoiseKind::PhaseDamping),
            _ => Err(ConfigurationError::UnknownNoiseModel(s.to_string())),
        }
    }
}

/// Trace-preserving single-qubit channel given by its Kraus operators.
#[derive(Clone, Debug)]
pub struct NoiseChannel {
    pub kraus_ops: Vec<Array2<Complex64>>,
}

impl NoiseChannel {
    pub fn new(kraus_ops: Vec<Array2<Complex64>>) -> Result<Self, ChannelError> {
        if kraus_ops.is_empty() {
            return Err(ChannelError::Empty);
        }

        for op in &kraus_ops {
            if op.dim() != (2, 2) {
                return Err(ChannelError::InvalidDimensions);
            }
        }

        if !utils::check_completeness(&kraus_ops, 2) {
            return Err(ChannelError::NotComplete);
        }

        Ok(Self { kraus_ops })
    }

    /// Converts the qubit to rho = |psi><psi| and returns sum_k E_k rho E_k†.
    pub fn apply(&self, state: &QuantumState) -> QuantumState {
        QuantumState::Mixed(self.apply_to(&state.to_density_matrix()))
    }

    pub fn apply_to(&self, rho: &DensityMatrix) -> DensityMatrix {
        rho.map(&self.kraus_ops)
    }

    /// Bit Flip Channel -> X with probability p, as the two-operator Kraus map.
    pub fn bit_flip(p: f64) -> Result<NoiseChannel, ChannelError> {
        validate_prob(p)?;

        let k0 = Gate::i().scaled((1.0 - p).sqrt());
        let k1 = Gate::x().scaled(p.sqrt());

        NoiseChannel::new(vec![k0, k1])
    }

    /// Depolarizing Channel
    /// E0 = sqrt(1-3p/4) I, E1..E3 = sqrt(p/4) {X, Y, Z}
    pub fn depolarizing(p: f64) -> Result<NoiseChannel, ChannelError> {
        validate_prob(p)?;

        let weight_i = (1.0 - 0.75 * p).sqrt();
        let weight_xyz = (p / 4.0).sqrt();

        NoiseChannel::new(vec![
            Gate::i().scaled(weight_i),
            Gate::x().scaled(weight_xyz),
            Gate::y().scaled(weight_xyz),
            Gate::z().scaled(weight_xyz),
        ])
    }

    /// Amplitude Damping -> T1 relaxation
    pub fn amplitude_damping(gamma: f64) -> Result<NoiseChannel, ChannelError> {
        validate_prob(gamma)?;

        let g_sqrt = gamma.sqrt();
        let one_minus_g_sqrt = (1.0 - gamma).sqrt();

        let k0 = array![
            [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
            [
                Complex64::new(0.0, 0.0),
                Complex64::new(one_minus_g_sqrt, 0.0)
            ]
        ];

        let k1 = array![
            [Complex64::new(0.0, 0.0), Complex64::new(g_sqrt, 0.0)],
            [Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)]
        ];

        NoiseChannel::new(vec![k0, k1])
    }

    /// Phase Damping -> T2 relaxation
    pub fn phase_damping(gamma: f64) -> Result<NoiseChannel, ChannelError> {
        validate_prob(gamma)?;

        let sqrt_one_minus_gamma = (1.0 - gamma).sqrt();
        let sqrt_gamma = gamma.sqrt();

        let k0 = array![
            [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
            [
                Complex64::new(0.0, 0.0),
                Complex64::new(sqrt_one_minus_gamma, 0.0)
            ]
        ];

        let k1 = array![
            [Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)],
            [Complex64::new(0.0, 0.0), Complex64::new(sqrt_gamma, 0.0)]
        ];

        NoiseChannel::new(vec![k0, k1])
    }
}

/// Validate probability parameter
fn validate_prob(p: f64) -> Result<(), ChannelError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(ChannelError::InvalidProbability(p));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Basis, Ket};

    const KINDS: [NoiseKind; 4] = [
        NoiseKind::BitFlip,
        NoiseKind::Depolarizing,
        NoiseKind::AmplitudeDamping,
        NoiseKind::PhaseDamping,
    ];

    #[test]
    fn test_noise_preserves_density_matrix_invariants() {
        let strengths = [0.0, 0.01, 0.1, 0.25, 0.5, 0.75, 0.99, 1.0];
        for kind in KINDS {
            for &p in &strengths {
                let channel = kind.channel(p).unwrap().unwrap();
                for ket in [Ket::Zero, Ket::One, Ket::Plus, Ket::Minus] {
                    let QuantumState::Mixed(rho) = channel.apply(&ket.into()) else {
                        panic!("noise must produce a density matrix");
                    };
                    let tr = utils::trace(rho.matrix());
                    assert!((tr.re - 1.0).abs() < 1e-9, "{kind} p={p} trace {tr}");
                    assert!(tr.im.abs() < 1e-9);
                    assert!(utils::is_hermitian(rho.matrix(), 1e-9), "{kind} p={p}");
                    assert!(rho.is_valid().is_ok(), "{kind} p={p} {ket:?}");
                }
            }
        }
    }

    #[test]
    fn test_none_kind_has_no_channel() {
        assert!(NoiseKind::None.channel(0.5).unwrap().is_none());
    }

    #[test]
    fn test_rejects_strength_out_of_range() {
        for kind in KINDS {
            assert_eq!(
                kind.channel(1.5).unwrap_err(),
                ChannelError::InvalidProbability(1.5)
            );
            assert_eq!(
                kind.channel(-0.1).unwrap_err(),
                ChannelError::InvalidProbability(-0.1)
            );
        }
    }

    #[test]
    fn test_full_bit_flip_inverts_z_outcome() {
        let channel = NoiseChannel::bit_flip(1.0).unwrap();
        let flipped = channel.apply(&Ket::Zero.into());
        let probs = flipped.outcome_probabilities(Basis::Z).unwrap();
        assert!((probs[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_full_depolarizing_is_maximally_mixed() {
        let channel = NoiseChannel::depolarizing(1.0).unwrap();
        let state = channel.apply(&Ket::Plus.into());
        for basis in [Basis::Z, Basis::X] {
            let probs = state.outcome_probabilities(basis).unwrap();
            assert!((probs[0] - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_amplitude_damping_relaxes_to_ground() {
        let channel = NoiseChannel::amplitude_damping(1.0).unwrap();
        let state = channel.apply(&Ket::One.into());
        let probs = state.outcome_probabilities(Basis::Z).unwrap();
        assert!((probs[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_phase_damping_keeps_populations_and_kills_coherence() {
        let channel = NoiseChannel::phase_damping(1.0).unwrap();
        let state = channel.apply(&Ket::Plus.into());
        let z = state.outcome_probabilities(Basis::Z).unwrap();
        let x = state.outcome_probabilities(Basis::X).unwrap();
        assert!((z[0] - 0.5).abs() < 1e-12);
        assert!((x[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_noise_names() {
        assert_eq!("transmutation".parse::<NoiseKind>(), Ok(NoiseKind::BitFlip));
        assert_eq!("Phase-Damping".parse::<NoiseKind>(), Ok(NoiseKind::PhaseDamping));
        assert_eq!("none".parse::<NoiseKind>(), Ok(NoiseKind::None));
        assert!("thermal".parse::<NoiseKind>().is_err());

        let parsed: NoiseKind = serde_json::from_str("\"transmutation\"").unwrap();
        assert_eq!(parsed, NoiseKind::BitFlip);
    }

    #[test]
    fn test_rejects_non_trace_preserving_set() {
        let k = Gate::x().scaled(0.5);
        assert_eq!(NoiseChannel::new(vec![k]).unwrap_err(), ChannelError::NotComplete);
        assert_eq!(NoiseChannel::new(vec![]).unwrap_err(), ChannelError::Empty);
    }
}
