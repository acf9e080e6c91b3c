use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BusConfig;
use crate::core::errors::{ConfigurationError, StateError};
use crate::core::{Basis, Ket, NoiseChannel, QuantumState};
use crate::events::EventBus;
use crate::host::HostId;
use crate::link::{ChannelConfig, QuantumChannel};
use crate::protocols::ProtocolKind;

/// Repeats a preparation and measurement many times to get empirical statistics.
///
/// Optionally passes the state through a noise channel before each measurement.
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    /// Optional noise to apply to the state before measurement.
    pub channel: Option<NoiseChannel>,
}

impl Sampler {
    /// Creates a noise-free `Sampler`.
    pub fn new() -> Self {
        Self { channel: None }
    }

    /// Sets the noise channel for the sampler.
    pub fn with_channel(mut self, channel: NoiseChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Measures `state` in `basis` `shots` times.
    ///
    /// Returns a map from outcome (0 or 1) to count; outcomes that never occur are absent.
    pub fn outcome_counts<R: Rng + ?Sized>(
        &self,
        state: &QuantumState,
        basis: Basis,
        shots: usize,
        rng: &mut R,
    ) -> Result<BTreeMap<u8, usize>, StateError> {
        let state = match &self.channel {
            Some(channel) => channel.apply(state),
            None => state.clone(),
        };

        // Probabilities are computed once; each shot only draws.
        let probs = state.outcome_probabilities(basis)?;

        let mut raw_counts = [0usize; 2];
        for _ in 0..shots {
            raw_counts[crate::core::pick_outcome(&probs, rng)] += 1;
        }

        Ok(raw_counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(outcome, &count)| (outcome as u8, count))
            .collect())
    }

    /// Fraction of `trials` qubits a link with `config` loses.
    pub fn loss_rate<R: Rng>(
        &self,
        config: &ChannelConfig,
        trials: usize,
        rng: &mut R,
    ) -> Result<f64, ConfigurationError> {
        if trials == 0 {
            return Ok(0.0);
        }

        let bus = EventBus::with_config(BusConfig {
            max_history: 1,
            replay_count: 0,
            mailbox_capacity: 1,
        })?;
        let from = HostId::from("sampler");
        let mut link = QuantumChannel::new(
            config.clone(),
            (from.clone(), HostId::from("sink")),
            ProtocolKind::Bb84,
            bus,
            StdRng::from_rng(rng),
        )?;

        let probe = QuantumState::from(Ket::Zero);
        let lost = (0..trials)
            .filter(|&slot| link.transmit(probe.clone(), &from, slot).is_err())
            .count();
        Ok(lost as f64 / trials as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NoiseKind;

    #[test]
    fn test_noise_free_counts() {
        let mut rng = StdRng::seed_from_u64(21);
        let sampler = Sampler::new();

        let counts = sampler
            .outcome_counts(&Ket::Minus.into(), Basis::X, 500, &mut rng)
            .unwrap();
        assert_eq!(counts.get(&1), Some(&500));
        assert_eq!(counts.get(&0), None);

        let counts = sampler
            .outcome_counts(&Ket::Zero.into(), Basis::X, 2000, &mut rng)
            .unwrap();
        let zeros = counts[&0];
        assert!((850..=1150).contains(&zeros), "{zeros}");
    }

    #[test]
    fn test_counts_under_bit_flip() {
        let mut rng = StdRng::seed_from_u64(22);
        let sampler = Sampler::new().with_channel(NoiseChannel::bit_flip(0.2).unwrap());

        let counts = sampler
            .outcome_counts(&Ket::Zero.into(), Basis::Z, 5000, &mut rng)
            .unwrap();
        let flipped = counts[&1] as f64 / 5000.0;
        assert!((flipped - 0.2).abs() < 0.03, "{flipped}");
    }

    #[test]
    fn test_loss_rate_tracks_p_loss() {
        let mut rng = StdRng::seed_from_u64(23);
        let config = ChannelConfig::new(20.0, 0.03, NoiseKind::None, 0.0).unwrap();
        let rate = Sampler::new().loss_rate(&config, 10_000, &mut rng).unwrap();
        assert!((rate - config.p_loss()).abs() < 0.03, "{rate}");

        let lossless = ChannelConfig::default();
        assert_eq!(Sampler::new().loss_rate(&lossless, 1000, &mut rng).unwrap(), 0.0);
    }
}
