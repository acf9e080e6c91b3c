//! # Quantum Channel
//!
//! Fibre between exactly two hosts. Each transmission first samples photon
//! loss, `p_loss = 1 - (1 - loss_per_km)^length_km`, and only a surviving
//! qubit goes through the configured noise model. Loss is an expected
//! outcome: it is reported, never retried.

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_ERROR_RATE_THRESHOLD;
use crate::core::errors::{ConfigurationError, QubitLost, TransmitError};
use crate::core::{NoiseChannel, NoiseKind, QuantumState};
use crate::events::{Event, EventBus, EventKind};
use crate::host::HostId;
use crate::protocols::ProtocolKind;

/// Physical link parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub length_km: f64,
    /// Loss probability per kilometre (not dB).
    pub loss_per_km: f64,
    pub noise_model: NoiseKind,
    pub noise_strength: f64,
    /// QBER above which a run is reported as insecure.
    pub error_rate_threshold: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            length_km: 0.0,
            loss_per_km: 0.0,
            noise_model: NoiseKind::None,
            noise_strength: 0.01,
            error_rate_threshold: DEFAULT_ERROR_RATE_THRESHOLD,
        }
    }
}

impl ChannelConfig {
    pub fn new(
        length_km: f64,
        loss_per_km: f64,
        noise_model: NoiseKind,
        noise_strength: f64,
    ) -> Result<Self, ConfigurationError> {
        let config = Self {
            length_km,
            loss_per_km,
            noise_model,
            noise_strength,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.length_km.is_finite() || self.length_km < 0.0 {
            return Err(ConfigurationError::InvalidLength(self.length_km));
        }
        if !(0.0..=1.0).contains(&self.loss_per_km) {
            return Err(ConfigurationError::InvalidLossPerKm(self.loss_per_km));
        }
        if !(0.0..=1.0).contains(&self.noise_strength) {
            return Err(ConfigurationError::InvalidNoiseStrength(self.noise_strength));
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(ConfigurationError::InvalidThreshold(self.error_rate_threshold));
        }
        Ok(())
    }

    /// Probability that a photon is absorbed over the whole fibre.
    pub fn p_loss(&self) -> f64 {
        1.0 - (1.0 - self.loss_per_km).powf(self.length_km)
    }
}

/// A qubit that made it through the fibre.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub to: HostId,
    pub slot: usize,
    pub state: QuantumState,
}

/// Running counters for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub transmitted: usize,
    pub delivered: usize,
    pub lost: usize,
}

pub struct QuantumChannel {
    config: ChannelConfig,
    noise: Option<NoiseChannel>,
    endpoints: (HostId, HostId),
    protocol: ProtocolKind,
    bus: EventBus,
    rng: StdRng,
    stats: ChannelStats,
}

impl QuantumChannel {
    /// Validates the configuration and builds the noise model up front.
    pub fn new(
        config: ChannelConfig,
        endpoints: (HostId, HostId),
        protocol: ProtocolKind,
        bus: EventBus,
        rng: StdRng,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let noise = config
            .noise_model
            .channel(config.noise_strength)
            .map_err(|_| ConfigurationError::InvalidNoiseStrength(config.noise_strength))?;

        debug!(
            protocol = %protocol,
            from = %endpoints.0,
            to = %endpoints.1,
            length_km = config.length_km,
            p_loss = config.p_loss(),
            noise = %config.noise_model,
            "Quantum channel created"
        );

        Ok(Self {
            config,
            noise,
            endpoints,
            protocol,
            bus,
            rng,
            stats: ChannelStats::default(),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn name(&self) -> String {
        format!("{}-{}", self.endpoints.0, self.endpoints.1)
    }

    /// Sends one qubit from `from` to the other endpoint.
    ///
    /// Emits exactly one event: `qubit_transmitted` or `qubit_lost`.
    pub fn transmit(
        &mut self,
        state: QuantumState,
        from: &HostId,
        slot: usize,
    ) -> Result<Delivered, QubitLost> {
        let to = self.survive(from, slot)?;
        let state = match &self.noise {
            Some(noise) => noise.apply(&state),
            None => state,
        };
        Ok(self.deliver(from, to, slot, state))
    }

    /// Like [`transmit`](Self::transmit), with `strength` replacing the configured noise strength.
    pub fn transmit_with_strength(
        &mut self,
        state: QuantumState,
        from: &HostId,
        slot: usize,
        strength: Option<f64>,
    ) -> Result<Delivered, TransmitError> {
        let Some(strength) = strength else {
            return Ok(self.transmit(state, from, slot)?);
        };

        let noise = self.config.noise_model.channel(strength)?;
        let to = self.survive(from, slot)?;
        let state = match noise {
            Some(noise) => noise.apply(&state),
            None => state,
        };
        Ok(self.deliver(from, to, slot, state))
    }

    /// Samples loss; on survival returns the receiving endpoint.
    fn survive(&mut self, from: &HostId, slot: usize) -> Result<HostId, QubitLost> {
        self.stats.transmitted += 1;

        let Some(to) = self.peer_of(from) else {
            warn!(channel = %self.name(), from = %from, slot, "Transmit from a host outside this link");
            return Err(self.lose(from, slot, "sender is not an endpoint of this link".into(), 1.0, 0.0));
        };

        let p_loss = self.config.p_loss();
        let r: f64 = self.rng.random();
        if r < p_loss {
            let reason = format!(
                "Qubit lost during transmission in connection {} over {} km",
                self.name(),
                self.config.length_km
            );
            return Err(self.lose(from, slot, reason, p_loss, r));
        }

        Ok(to)
    }

    fn lose(&mut self, from: &HostId, slot: usize, reason: String, p_loss: f64, r: f64) -> QubitLost {
        self.stats.lost += 1;
        debug!(
            protocol = %self.protocol,
            from = %from,
            slot,
            p_loss,
            r,
            "Qubit lost"
        );
        self.bus.emit(
            Event::new(EventKind::QubitLost, from.clone())
                .with_protocol(self.protocol)
                .with("slot", slot)
                .with("reason", reason.clone())
                .with("p_loss", p_loss)
                .with("random_value", r),
        );
        QubitLost {
            slot,
            reason,
            p_loss,
            r,
        }
    }

    fn deliver(&mut self, from: &HostId, to: HostId, slot: usize, state: QuantumState) -> Delivered {
        self.stats.delivered += 1;
        debug!(protocol = %self.protocol, from = %from, to = %to, slot, "Qubit transmitted");
        self.bus.emit(
            Event::new(EventKind::QubitTransmitted, from.clone())
                .with_protocol(self.protocol)
                .with("slot", slot)
                .with("to", to.as_str())
                .with("noise", self.config.noise_model.as_str())
                .with("state", state.label()),
        );
        Delivered { to, slot, state }
    }

    fn peer_of(&self, from: &HostId) -> Option<HostId> {
        if *from == self.endpoints.0 {
            Some(self.endpoints.1.clone())
        } else if *from == self.endpoints.1 {
            Some(self.endpoints.0.clone())
        } else {
            None
        }
    }
}
