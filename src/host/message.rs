use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::Basis;

/// Classical channel traffic between the two hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClassicalMessage {
    /// Opens a run; the receiver expects `num_qubits` slots.
    Start { run_id: Uuid, num_qubits: usize },
    Sifting(SiftingData),
    /// Disclosed check bits.
    EstimateErrorRate {
        sample_positions: Vec<usize>,
        reference_bits: Vec<u8>,
    },
    Complete { error_rate: f64 },
}

impl ClassicalMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClassicalMessage::Start { .. } => "start",
            ClassicalMessage::Sifting(_) => "sifting",
            ClassicalMessage::EstimateErrorRate { .. } => "estimate_error_rate",
            ClassicalMessage::Complete { .. } => "complete",
        }
    }
}

/// Sifting payloads. BB84 exchanges bases both ways; B92 sends the bits and
/// gets back the conclusive slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiftingData {
    /// One entry per slot; `None` where the receiver saw no photon.
    Bases(Vec<Option<Basis>>),
    SentBits(Vec<u8>),
    Conclusive(Vec<usize>),
}

impl SiftingData {
    pub fn name(&self) -> &'static str {
        match self {
            SiftingData::Bases(_) => "bases",
            SiftingData::SentBits(_) => "sent_bits",
            SiftingData::Conclusive(_) => "conclusive",
        }
    }
}
