//! Simulation configuration: defaults, JSON and environment loading.

use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::core::NoiseKind;
use crate::core::errors::ConfigurationError;
use crate::link::ChannelConfig;
use crate::protocols::ProtocolKind;

/// Default number of events kept by the bus.
pub const DEFAULT_MAX_HISTORY: usize = 1000;
/// Default number of events replayed to a new subscriber.
pub const DEFAULT_REPLAY_COUNT: usize = 50;
/// Default per-subscriber mailbox size.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
/// Largest mailbox a bounded tokio channel can hold.
pub const MAX_MAILBOX_CAPACITY: usize = Semaphore::MAX_PERMITS;

pub const DEFAULT_NUM_QUBITS: usize = 16;
/// Largest run a host accepts, from the driver or from a peer's `start`.
pub const MAX_QUBITS: usize = 1 << 20;
pub const DEFAULT_CHECK_RATIO: f64 = 0.5;
/// QBER above which a run is reported insecure.
pub const DEFAULT_ERROR_RATE_THRESHOLD: f64 = 0.11;
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 5000;

/// Which protocol a session runs. Chosen explicitly at session creation.
pub type ProtocolSelection = ProtocolKind;

/// Event bus sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub max_history: usize,
    pub replay_count: usize,
    pub mailbox_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            replay_count: DEFAULT_REPLAY_COUNT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_history == 0 {
            return Err(ConfigurationError::ZeroCapacity {
                field: "max_history",
            });
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigurationError::ZeroCapacity {
                field: "mailbox_capacity",
            });
        }
        for (field, value) in [
            ("mailbox_capacity", self.mailbox_capacity),
            ("replay_count", self.replay_count),
        ] {
            if value > MAX_MAILBOX_CAPACITY {
                return Err(ConfigurationError::CapacityTooLarge {
                    field,
                    value,
                    max: MAX_MAILBOX_CAPACITY,
                });
            }
        }
        Ok(())
    }
}

/// Everything needed to run one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub protocol: ProtocolSelection,
    pub num_qubits: usize,
    /// Seeds every random draw of the run. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Fraction of the sifted key disclosed for error estimation.
    pub check_ratio: f64,
    /// How long a host waits for its next input before aborting.
    pub run_timeout_ms: u64,
    pub channel: ChannelConfig,
    pub bus: BusConfig,
    pub sender_name: String,
    pub receiver_name: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::Bb84,
            num_qubits: DEFAULT_NUM_QUBITS,
            seed: None,
            check_ratio: DEFAULT_CHECK_RATIO,
            run_timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            channel: ChannelConfig::default(),
            bus: BusConfig::default(),
            sender_name: "Alice".to_string(),
            receiver_name: "Bob".to_string(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.num_qubits == 0 {
            return Err(ConfigurationError::NoQubits);
        }
        if self.num_qubits > MAX_QUBITS {
            return Err(ConfigurationError::TooManyQubits {
                requested: self.num_qubits,
                max: MAX_QUBITS,
            });
        }
        if !(0.0..=1.0).contains(&self.check_ratio) {
            return Err(ConfigurationError::InvalidCheckRatio(self.check_ratio));
        }
        if self.run_timeout_ms == 0 {
            return Err(ConfigurationError::ZeroCapacity {
                field: "run_timeout_ms",
            });
        }
        self.channel.validate()?;
        self.bus.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigurationError::Unreadable(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Unreadable(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Defaults overridden by environment variables.
    ///
    /// - `QKD_PROTOCOL`: bb84 | b92
    /// - `QKD_NUM_QUBITS`, `QKD_SEED`, `QKD_CHECK_RATIO`, `QKD_TIMEOUT_MS`
    /// - `QKD_LENGTH_KM`, `QKD_LOSS_PER_KM`, `QKD_NOISE_MODEL`, `QKD_NOISE_STRENGTH`
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let mut config = Self::default();

        if let Some(v) = lookup("QKD_PROTOCOL") {
            config.protocol = v.parse()?;
        }
        if let Some(v) = lookup("QKD_NUM_QUBITS") {
            config.num_qubits = parse_var("QKD_NUM_QUBITS", &v)?;
        }
        if let Some(v) = lookup("QKD_SEED") {
            config.seed = Some(parse_var("QKD_SEED", &v)?);
        }
        if let Some(v) = lookup("QKD_CHECK_RATIO") {
            config.check_ratio = parse_var("QKD_CHECK_RATIO", &v)?;
        }
        if let Some(v) = lookup("QKD_TIMEOUT_MS") {
            config.run_timeout_ms = parse_var("QKD_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("QKD_LENGTH_KM") {
            config.channel.length_km = parse_var("QKD_LENGTH_KM", &v)?;
        }
        if let Some(v) = lookup("QKD_LOSS_PER_KM") {
            config.channel.loss_per_km = parse_var("QKD_LOSS_PER_KM", &v)?;
        }
        if let Some(v) = lookup("QKD_NOISE_MODEL") {
            config.channel.noise_model = v.parse::<NoiseKind>()?;
        }
        if let Some(v) = lookup("QKD_NOISE_STRENGTH") {
            config.channel.noise_strength = parse_var("QKD_NOISE_STRENGTH", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigurationError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigurationError::InvalidEnv {
            key,
            value: value.to_string(),
        })
}
