//! Protocol hosts: one party of a QKD run.

mod message;
mod protocol_host;
mod record;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::QuantumState;
use crate::core::errors::{ProtocolError, QubitLost};

pub use message::{ClassicalMessage, SiftingData};
pub use protocol_host::{HostReport, ProtocolHost};
pub use record::ProtocolRecord;

/// Name of a host on the link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for HostId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

/// Where a host is in its current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPhase {
    #[default]
    Idle,
    Sending,
    Receiving,
    ReadyForReconciliation,
    Reconciling,
    ErrorChecking,
    Complete,
    Aborted,
}

impl HostPhase {
    /// True while a run is in progress.
    pub fn is_active(self) -> bool {
        !matches!(self, HostPhase::Idle | HostPhase::Complete | HostPhase::Aborted)
    }
}

/// A host's view of its peer: the quantum channel and the classical transport.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Pushes one qubit through the quantum channel.
    async fn transmit(&self, slot: usize, state: QuantumState) -> Result<(), QubitLost>;

    /// Fire-and-forget delivery to the peer.
    async fn send_classical(&self, message: ClassicalMessage) -> Result<(), ProtocolError>;
}
