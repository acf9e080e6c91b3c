use serde::Serialize;
use uuid::Uuid;

use crate::config::MAX_QUBITS;
use crate::core::Basis;
use crate::core::errors::ProtocolError;
use crate::host::Role;

/// Protocol memory of one host for one run.
///
/// Slots are appended strictly in arrival order. Receiver entries are `None`
/// where the qubit was lost, so slot indices never shift. Once sealed the
/// record only answers reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolRecord {
    run_id: Uuid,
    role: Role,
    num_qubits: usize,
    sent_bits: Vec<u8>,
    chosen_bases: Vec<Option<Basis>>,
    outcomes: Vec<Option<u8>>,
    sifted_indices: Vec<usize>,
    sifted_key: Vec<u8>,
    /// Sifted-key positions disclosed for error estimation, ascending.
    check_positions: Vec<usize>,
    error_rate: Option<f64>,
    sealed: bool,
}

impl ProtocolRecord {
    pub fn new(run_id: Uuid, role: Role, num_qubits: usize) -> Self {
        Self {
            run_id,
            role,
            num_qubits,
            sent_bits: Vec::with_capacity(num_qubits.min(MAX_QUBITS)),
            chosen_bases: Vec::with_capacity(num_qubits.min(MAX_QUBITS)),
            outcomes: Vec::with_capacity(num_qubits.min(MAX_QUBITS)),
            sifted_indices: Vec::new(),
            sifted_key: Vec::new(),
            check_positions: Vec::new(),
            error_rate: None,
            sealed: false,
        }
    }

    fn writable(&self) -> Result<(), ProtocolError> {
        if self.sealed {
            return Err(ProtocolError::RecordSealed);
        }
        Ok(())
    }

    fn next_slot(&self, slot: usize) -> Result<(), ProtocolError> {
        let expected = self.chosen_bases.len();
        if slot != expected || slot >= self.num_qubits {
            return Err(ProtocolError::SlotOutOfOrder {
                expected,
                got: slot,
            });
        }
        Ok(())
    }

    /// Sender side: the bit and preparation basis of the next slot.
    pub fn record_sent(&mut self, bit: u8, basis: Basis) -> Result<usize, ProtocolError> {
        self.writable()?;
        let slot = self.chosen_bases.len();
        self.next_slot(slot)?;
        self.sent_bits.push(bit);
        self.chosen_bases.push(Some(basis));
        Ok(slot)
    }

    /// Receiver side: a detection in `slot`.
    pub fn record_outcome(&mut self, slot: usize, basis: Basis, outcome: u8) -> Result<(), ProtocolError> {
        self.writable()?;
        self.next_slot(slot)?;
        self.chosen_bases.push(Some(basis));
        self.outcomes.push(Some(outcome));
        Ok(())
    }

    /// Receiver side: `slot` stayed dark.
    pub fn record_vacancy(&mut self, slot: usize) -> Result<(), ProtocolError> {
        self.writable()?;
        self.next_slot(slot)?;
        self.chosen_bases.push(None);
        self.outcomes.push(None);
        Ok(())
    }

    pub fn set_sifted(&mut self, indices: Vec<usize>, key: Vec<u8>) -> Result<(), ProtocolError> {
        self.writable()?;
        if indices.len() != key.len() {
            return Err(ProtocolError::LengthMismatch {
                expected: indices.len(),
                got: key.len(),
            });
        }
        self.sifted_indices = indices;
        self.sifted_key = key;
        Ok(())
    }

    pub fn set_check_positions(&mut self, mut positions: Vec<usize>) -> Result<(), ProtocolError> {
        self.writable()?;
        positions.retain(|&p| p < self.sifted_key.len());
        positions.sort_unstable();
        positions.dedup();
        self.check_positions = positions;
        Ok(())
    }

    pub fn set_error_rate(&mut self, error_rate: f64) -> Result<(), ProtocolError> {
        self.writable()?;
        self.error_rate = Some(error_rate);
        Ok(())
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Slots accounted for so far (detections plus vacancies on the receiver).
    pub fn slots_filled(&self) -> usize {
        self.chosen_bases.len()
    }

    pub fn is_filled(&self) -> bool {
        self.slots_filled() == self.num_qubits
    }

    pub fn received_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_some()).count()
    }

    pub fn sent_bits(&self) -> &[u8] {
        &self.sent_bits
    }

    pub fn chosen_bases(&self) -> &[Option<Basis>] {
        &self.chosen_bases
    }

    pub fn outcomes(&self) -> &[Option<u8>] {
        &self.outcomes
    }

    pub fn sifted_indices(&self) -> &[usize] {
        &self.sifted_indices
    }

    pub fn sifted_key(&self) -> &[u8] {
        &self.sifted_key
    }

    pub fn check_positions(&self) -> &[usize] {
        &self.check_positions
    }

    pub fn error_rate(&self) -> Option<f64> {
        self.error_rate
    }

    /// Sifted key without the disclosed check bits.
    pub fn established_key(&self) -> Vec<u8> {
        self.sifted_key
            .iter()
            .enumerate()
            .filter(|(i, _)| self.check_positions.binary_search(i).is_err())
            .map(|(_, &bit)| bit)
            .collect()
    }
}
