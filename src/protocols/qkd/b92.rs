//! B92 Quantum Key Distribution Protocol.
//!
//! B92 uses only two non-orthogonal states: bit 0 is sent as |0> and bit 1
//! as |+>. The receiver measures in a random basis and only outcome 1 is
//! conclusive: a click in Z rules out |0> (bit 1 was sent), a click in X
//! rules out |+> (bit 0 was sent). About a quarter of the qubits survive.

use rand::Rng;

use crate::core::errors::{ProtocolError, StateError};
use crate::core::{Basis, Ket, QuantumState};
use crate::host::{ProtocolRecord, SiftingData};
use crate::protocols::{
    ErrorCheck, Prepared, Protocol, ProtocolKind, Sifted, check_lengths, compare, ratio,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct B92;

impl B92 {
    /// Bit 0 -> |0>, bit 1 -> |+>.
    pub fn encode(bit: u8) -> Result<Ket, StateError> {
        match bit {
            0 => Ok(Ket::Zero),
            1 => Ok(Ket::Plus),
            other => Err(StateError::InvalidBit(other)),
        }
    }

    /// The bit a conclusive outcome in `basis` points to.
    pub fn implied_bit(basis: Basis) -> u8 {
        match basis {
            Basis::Z => 1,
            Basis::X => 0,
        }
    }

    /// Keeps conclusive slots whose implied bit agrees with the bit that was sent.
    pub fn sifting(sent_bits: &[u8], bases: &[Option<Basis>], outcomes: &[Option<u8>]) -> Sifted {
        let mut sifted = Sifted::default();
        for (slot, (basis, outcome)) in bases.iter().zip(outcomes).enumerate() {
            let (Some(basis), Some(1)) = (basis, outcome) else {
                continue;
            };
            let implied = Self::implied_bit(*basis);
            if sent_bits.get(slot) == Some(&implied) {
                sifted.indices.push(slot);
                sifted.bits.push(implied);
            }
        }
        sifted
    }

    fn unexpected(payload: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedPayload {
            protocol: "b92",
            payload,
        }
    }
}

impl Protocol for B92 {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::B92
    }

    fn theoretical_efficiency(&self) -> f64 {
        0.25
    }

    fn prepare<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Prepared, StateError> {
        let bit = u8::from(rng.random_bool(0.5));
        let ket = Self::encode(bit)?;
        Ok(Prepared {
            bit,
            basis: ket.basis(),
            state: QuantumState::from(ket),
        })
    }

    fn sifting_request(&self, record: &ProtocolRecord) -> SiftingData {
        SiftingData::SentBits(record.sent_bits().to_vec())
    }

    fn sift_as_receiver(
        &self,
        record: &ProtocolRecord,
        request: &SiftingData,
    ) -> Result<Sifted, ProtocolError> {
        let SiftingData::SentBits(sent_bits) = request else {
            return Err(Self::unexpected(request.name()));
        };
        check_lengths(record.num_qubits(), sent_bits.len())?;
        Ok(Self::sifting(sent_bits, record.chosen_bases(), record.outcomes()))
    }

    fn sifting_reply(&self, _record: &ProtocolRecord, sifted: &Sifted) -> SiftingData {
        SiftingData::Conclusive(sifted.indices.clone())
    }

    fn sift_as_sender(
        &self,
        record: &ProtocolRecord,
        reply: &SiftingData,
    ) -> Result<Sifted, ProtocolError> {
        let SiftingData::Conclusive(indices) = reply else {
            return Err(Self::unexpected(reply.name()));
        };
        if !indices.windows(2).all(|w| w[0] < w[1]) {
            return Err(Self::unexpected("unordered conclusive slots"));
        }

        let bits = indices
            .iter()
            .map(|&slot| record.sent_bits().get(slot).copied())
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| Self::unexpected("conclusive slot out of range"))?;

        Ok(Sifted {
            indices: indices.clone(),
            bits,
        })
    }

    /// Positions index the sifted key, references are sifted bits.
    fn disclose(&self, record: &ProtocolRecord, sample: &[usize]) -> (Vec<usize>, Vec<u8>) {
        sample
            .iter()
            .filter_map(|&p| record.sifted_key().get(p).map(|&bit| (p, bit)))
            .unzip()
    }

    fn check(
        &self,
        record: &ProtocolRecord,
        positions: &[usize],
        references: &[u8],
    ) -> Result<ErrorCheck, ProtocolError> {
        check_lengths(positions.len(), references.len())?;

        let sifted: Vec<Option<u8>> = record.sifted_key().iter().copied().map(Some).collect();
        let (comparisons, errors) = compare(&sifted, positions, references);
        let disclosed = positions
            .iter()
            .copied()
            .filter(|&p| p < sifted.len())
            .collect();

        Ok(ErrorCheck {
            error_rate: ratio(errors, comparisons),
            comparisons,
            disclosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NoiseChannel;
    use crate::host::Role;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use uuid::Uuid;

    #[test]
    fn test_encoding() {
        assert_eq!(B92::encode(0), Ok(Ket::Zero));
        assert_eq!(B92::encode(1), Ok(Ket::Plus));
        assert_eq!(B92::encode(2), Err(StateError::InvalidBit(2)));
    }

    #[test]
    fn test_never_sifts_inconclusive_outcomes() {
        let sent = [0, 1, 0, 1];
        let bases = [Some(Basis::X), Some(Basis::Z), Some(Basis::Z), Some(Basis::X)];
        let outcomes = [Some(0), Some(0), Some(0), Some(0)];
        assert!(B92::sifting(&sent, &bases, &outcomes).indices.is_empty());
    }

    #[test]
    fn test_cross_check_discards_disagreeing_claims() {
        // Slot 0: Z click implies bit 1 but 0 was claimed.
        // Slot 1: X click implies bit 0, claim agrees.
        // Slot 2: lost.
        let sent = [0, 0, 1];
        let bases = [Some(Basis::Z), Some(Basis::X), None];
        let outcomes = [Some(1), Some(1), None];

        let sifted = B92::sifting(&sent, &bases, &outcomes);
        assert_eq!(sifted.indices, vec![1]);
        assert_eq!(sifted.bits, vec![0]);
    }

    #[test]
    fn test_ideal_efficiency_near_a_quarter() {
        let mut rng = StdRng::seed_from_u64(92);
        let n = 8000;
        let mut record = ProtocolRecord::new(Uuid::new_v4(), Role::Receiver, n);
        let mut sent = Vec::with_capacity(n);

        for slot in 0..n {
            let prepared = B92.prepare(&mut rng).unwrap();
            sent.push(prepared.bit);
            let (basis, outcome) = B92.measure(&prepared.state, &mut rng).unwrap();
            record.record_outcome(slot, basis, outcome).unwrap();
        }

        let sifted = B92
            .sift_as_receiver(&record, &SiftingData::SentBits(sent.clone()))
            .unwrap();
        let efficiency = sifted.indices.len() as f64 / n as f64;
        assert!((efficiency - 0.25).abs() < 0.02, "efficiency {efficiency}");
        for (&slot, &bit) in sifted.indices.iter().zip(&sifted.bits) {
            assert_eq!(sent[slot], bit);
        }
    }

    #[test]
    fn test_noise_never_leaks_into_sifted_key() {
        let mut rng = StdRng::seed_from_u64(4);
        let noise = NoiseChannel::depolarizing(0.5).unwrap();
        let n = 2000;
        let mut record = ProtocolRecord::new(Uuid::new_v4(), Role::Receiver, n);
        let mut sent = Vec::with_capacity(n);

        for slot in 0..n {
            let prepared = B92.prepare(&mut rng).unwrap();
            sent.push(prepared.bit);
            let noisy = noise.apply(&prepared.state);
            let (basis, outcome) = B92.measure(&noisy, &mut rng).unwrap();
            record.record_outcome(slot, basis, outcome).unwrap();
        }

        let sifted = B92::sifting(&sent, record.chosen_bases(), record.outcomes());
        assert!(!sifted.indices.is_empty());
        for (&slot, &bit) in sifted.indices.iter().zip(&sifted.bits) {
            assert_eq!(sent[slot], bit);
        }
    }

    #[test]
    fn test_sender_side_rejects_bad_replies() {
        let mut record = ProtocolRecord::new(Uuid::new_v4(), Role::Sender, 2);
        record.record_sent(0, Basis::Z).unwrap();
        record.record_sent(1, Basis::X).unwrap();

        let ok = B92
            .sift_as_sender(&record, &SiftingData::Conclusive(vec![1]))
            .unwrap();
        assert_eq!(ok.bits, vec![1]);

        assert!(B92.sift_as_sender(&record, &SiftingData::Conclusive(vec![5])).is_err());
        assert!(B92.sift_as_sender(&record, &SiftingData::Conclusive(vec![1, 0])).is_err());
        assert!(B92.sift_as_sender(&record, &SiftingData::Bases(vec![])).is_err());
    }
}
