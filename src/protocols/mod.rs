//! QKD protocol strategies.
//!
//! A [`Protocol`] captures everything that differs between BB84 and B92:
//! how a bit is encoded, what the sifting exchange carries, and which
//! positions are compared during error estimation. The phase machine in
//! [`crate::host`] is shared.

pub mod qkd;

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::errors::{ConfigurationError, ProtocolError, StateError};
use crate::core::{Basis, QuantumState};
use crate::host::{ProtocolRecord, SiftingData};

pub use qkd::{B92, Bb84};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Bb84,
    B92,
}

impl ProtocolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::Bb84 => "bb84",
            ProtocolKind::B92 => "b92",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bb84" => Ok(ProtocolKind::Bb84),
            "b92" => Ok(ProtocolKind::B92),
            _ => Err(ConfigurationError::UnknownProtocol(s.to_string())),
        }
    }
}

/// A qubit ready to leave the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub bit: u8,
    pub basis: Basis,
    pub state: QuantumState,
}

/// Result of sifting on one side: kept slots and their bits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sifted {
    pub indices: Vec<usize>,
    pub bits: Vec<u8>,
}

/// Receiver-side outcome of an error check.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorCheck {
    pub error_rate: f64,
    pub comparisons: usize,
    /// Sifted-key positions the sender disclosed.
    pub disclosed: Vec<usize>,
}

pub trait Protocol: Send + Sync + fmt::Debug + 'static {
    fn kind(&self) -> ProtocolKind;

    /// Expected `sifted / sent` on an ideal link.
    fn theoretical_efficiency(&self) -> f64;

    /// Draws a random bit (and basis, where the protocol has one) and encodes it.
    fn prepare<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Prepared, StateError>;

    /// Measures in a uniformly random basis.
    fn measure<R: Rng + ?Sized>(
        &self,
        state: &QuantumState,
        rng: &mut R,
    ) -> Result<(Basis, u8), StateError> {
        let basis = Basis::random(rng);
        let outcome = state.measure(basis, rng)?;
        Ok((basis, outcome))
    }

    /// What the sender discloses once every qubit has left.
    fn sifting_request(&self, record: &ProtocolRecord) -> SiftingData;

    /// Receiver sifting against the sender's request.
    fn sift_as_receiver(
        &self,
        record: &ProtocolRecord,
        request: &SiftingData,
    ) -> Result<Sifted, ProtocolError>;

    /// The receiver's answer to a sifting request.
    fn sifting_reply(&self, record: &ProtocolRecord, sifted: &Sifted) -> SiftingData;

    /// Sender sifting against the receiver's reply.
    fn sift_as_sender(
        &self,
        record: &ProtocolRecord,
        reply: &SiftingData,
    ) -> Result<Sifted, ProtocolError>;

    /// Turns sampled sifted-key positions into the `(positions, reference_bits)` sent on the wire.
    fn disclose(&self, record: &ProtocolRecord, sample: &[usize]) -> (Vec<usize>, Vec<u8>);

    /// Receiver side of the error check.
    fn check(
        &self,
        record: &ProtocolRecord,
        positions: &[usize],
        references: &[u8],
    ) -> Result<ErrorCheck, ProtocolError>;
}

/// Indices where both sides used the same basis. Empty slots never match.
pub fn reconcile_bases(own: &[Option<Basis>], peer: &[Option<Basis>]) -> Vec<usize> {
    own.iter()
        .zip(peer)
        .enumerate()
        .filter_map(|(i, pair)| match pair {
            (Some(a), Some(b)) if a == b => Some(i),
            _ => None,
        })
        .collect()
}

/// Fraction of disagreeing pairs among the sampled positions that have a recorded outcome.
///
/// Returns 0.0 when nothing could be compared.
pub fn estimate_error_rate(
    outcomes: &[Option<u8>],
    sample_positions: &[usize],
    reference_bits: &[u8],
) -> f64 {
    let (comparisons, errors) = compare(outcomes, sample_positions, reference_bits);
    ratio(errors, comparisons)
}

pub(crate) fn ratio(errors: usize, comparisons: usize) -> f64 {
    if comparisons == 0 {
        0.0
    } else {
        errors as f64 / comparisons as f64
    }
}

/// `(comparisons, errors)` over the sampled positions.
pub(crate) fn compare(
    outcomes: &[Option<u8>],
    sample_positions: &[usize],
    reference_bits: &[u8],
) -> (usize, usize) {
    sample_positions
        .iter()
        .zip(reference_bits)
        .filter_map(|(&pos, &reference)| {
            outcomes
                .get(pos)
                .copied()
                .flatten()
                .map(|observed| observed != reference)
        })
        .fold((0, 0), |(n, errors), differs| (n + 1, errors + usize::from(differs)))
}

pub(crate) fn check_lengths(expected: usize, got: usize) -> Result<(), ProtocolError> {
    if expected != got {
        return Err(ProtocolError::LengthMismatch { expected, got });
    }
    Ok(())
}
