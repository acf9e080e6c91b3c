//! Point-to-point QKD link simulator.
//!
//! Two hosts run BB84 or B92 over a lossy, noisy [`QuantumChannel`]; every
//! step is reported on an [`EventBus`]. A [`Session`] wires the pieces
//! together for a single run.

pub mod config;
pub mod core;
pub mod events;
pub mod host;
pub mod link;
pub mod protocols;
mod sampler;
pub mod session;
pub mod telemetry;

pub use crate::config::{BusConfig, ProtocolSelection, SimulationConfig};
pub use crate::core::errors::{
    ChannelError, ConfigurationError, ProtocolError, QkdError, QubitLost, StateError,
};
pub use crate::core::{Basis, DensityMatrix, Ket, NoiseChannel, NoiseKind, QuantumState};
pub use crate::events::{Event, EventBus, EventFilter, EventKind, Observer, Subscription};
pub use crate::host::{ClassicalMessage, HostId, HostPhase, HostReport, ProtocolHost, ProtocolRecord};
pub use crate::link::{ChannelConfig, Delivered, QuantumChannel};
pub use crate::protocols::{B92, Bb84, Protocol, ProtocolKind};
pub use crate::sampler::Sampler;
pub use crate::session::{Session, SessionReport};
