//! BB84: four states in two conjugate bases.
//!
//! The sender encodes a random bit in a random basis; the receiver measures
//! in a random basis. Slots where the bases agree form the sifted key, about
//! half of what arrives.

use rand::Rng;

use crate::core::errors::{ProtocolError, StateError};
use crate::core::{Basis, QuantumState};
use crate::host::{ProtocolRecord, SiftingData};
use crate::protocols::{
    ErrorCheck, Prepared, Protocol, ProtocolKind, Sifted, check_lengths, compare, ratio,
    reconcile_bases,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Bb84;

impl Bb84 {
    /// Z-basis: bit -> {|0>, |1>}; X-basis: bit -> {|+>, |->}.
    pub fn prepare_bit(bit: u8, basis: Basis) -> Result<QuantumState, StateError> {
        QuantumState::prepare(bit, basis)
    }

    fn peer_bases<'a>(data: &'a SiftingData) -> Result<&'a [Option<Basis>], ProtocolError> {
        match data {
            SiftingData::Bases(bases) => Ok(bases.as_slice()),
            other => Err(ProtocolError::UnexpectedPayload {
                protocol: "bb84",
                payload: other.name(),
            }),
        }
    }

    fn sift(
        record: &ProtocolRecord,
        peer: &[Option<Basis>],
        bit_at: impl Fn(usize) -> Option<u8>,
    ) -> Result<Sifted, ProtocolError> {
        check_lengths(record.num_qubits(), peer.len())?;

        let mut sifted = Sifted::default();
        for i in reconcile_bases(record.chosen_bases(), peer) {
            if let Some(bit) = bit_at(i) {
                sifted.indices.push(i);
                sifted.bits.push(bit);
            }
        }
        Ok(sifted)
    }
}

impl Protocol for Bb84 {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Bb84
    }

    fn theoretical_efficiency(&self) -> f64 {
        0.5
    }

    fn prepare<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Prepared, StateError> {
        let bit = u8::from(rng.random_bool(0.5));
        let basis = Basis::random(rng);
        Ok(Prepared {
            bit,
            basis,
            state: Self::prepare_bit(bit, basis)?,
        })
    }

    fn sifting_request(&self, record: &ProtocolRecord) -> SiftingData {
        SiftingData::Bases(record.chosen_bases().to_vec())
    }

    fn sift_as_receiver(
        &self,
        record: &ProtocolRecord,
        request: &SiftingData,
    ) -> Result<Sifted, ProtocolError> {
        let peer = Self::peer_bases(request)?;
        let outcomes = record.outcomes();
        Self::sift(record, peer, |i| outcomes.get(i).copied().flatten())
    }

    fn sifting_reply(&self, record: &ProtocolRecord, _sifted: &Sifted) -> SiftingData {
        SiftingData::Bases(record.chosen_bases().to_vec())
    }

    fn sift_as_sender(
        &self,
        record: &ProtocolRecord,
        reply: &SiftingData,
    ) -> Result<Sifted, ProtocolError> {
        let peer = Self::peer_bases(reply)?;
        let sent = record.sent_bits();
        Self::sift(record, peer, |i| sent.get(i).copied())
    }

    /// Positions are raw slot indices, references the sent bits.
    fn disclose(&self, record: &ProtocolRecord, sample: &[usize]) -> (Vec<usize>, Vec<u8>) {
        sample
            .iter()
            .filter_map(|&p| {
                let slot = *record.sifted_indices().get(p)?;
                let bit = *record.sent_bits().get(slot)?;
                Some((slot, bit))
            })
            .unzip()
    }

    fn check(
        &self,
        record: &ProtocolRecord,
        positions: &[usize],
        references: &[u8],
    ) -> Result<ErrorCheck, ProtocolError> {
        check_lengths(positions.len(), references.len())?;

        let (comparisons, errors) = compare(record.outcomes(), positions, references);
        let disclosed = positions
            .iter()
            .filter_map(|slot| record.sifted_indices().binary_search(slot).ok())
            .collect();

        Ok(ErrorCheck {
            error_rate: ratio(errors, comparisons),
            comparisons,
            disclosed,
        })
    }
}
