//! # Protocol Host
//!
//! Phase machine shared by every protocol. The host owns its record and
//! mutates it only from its own calls, in the order qubits and messages
//! arrive. Any error aborts the run and is handed back to the caller.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_CHECK_RATIO, DEFAULT_ERROR_RATE_THRESHOLD, MAX_QUBITS};
use crate::core::QuantumState;
use crate::core::errors::ProtocolError;
use crate::events::{Event, EventBus, EventKind};
use crate::host::{
    ClassicalMessage, HostId, HostPhase, PeerLink, ProtocolRecord, Role, SiftingData,
};
use crate::protocols::{Protocol, ProtocolKind};

/// Final view of a host, handed to the driver when a run ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostReport {
    pub node: HostId,
    pub protocol: ProtocolKind,
    pub phase: HostPhase,
    pub record: Option<ProtocolRecord>,
    pub established_key: Vec<u8>,
    pub secure: Option<bool>,
}

pub struct ProtocolHost<P: Protocol> {
    id: HostId,
    protocol: P,
    phase: HostPhase,
    record: Option<ProtocolRecord>,
    /// A sifting request that overtook the last qubits.
    pending_sifting: Option<SiftingData>,
    secure: Option<bool>,
    check_ratio: f64,
    error_rate_threshold: f64,
    bus: EventBus,
    rng: StdRng,
}

impl<P: Protocol> ProtocolHost<P> {
    pub fn new(id: HostId, protocol: P, bus: EventBus, rng: StdRng) -> Self {
        Self {
            id,
            protocol,
            phase: HostPhase::Idle,
            record: None,
            pending_sifting: None,
            secure: None,
            check_ratio: DEFAULT_CHECK_RATIO,
            error_rate_threshold: DEFAULT_ERROR_RATE_THRESHOLD,
            bus,
            rng,
        }
    }

    #[must_use]
    pub fn with_check_ratio(mut self, check_ratio: f64) -> Self {
        self.check_ratio = check_ratio;
        self
    }

    #[must_use]
    pub fn with_error_rate_threshold(mut self, threshold: f64) -> Self {
        self.error_rate_threshold = threshold;
        self
    }

    pub fn id(&self) -> &HostId {
        &self.id
    }

    pub fn phase(&self) -> HostPhase {
        self.phase
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// The record of the current (or last) run.
    pub fn record(&self) -> Option<&ProtocolRecord> {
        self.record.as_ref()
    }

    pub fn report(&self) -> HostReport {
        HostReport {
            node: self.id.clone(),
            protocol: self.protocol.kind(),
            phase: self.phase,
            record: self.record.clone(),
            established_key: self
                .record
                .as_ref()
                .map(ProtocolRecord::established_key)
                .unwrap_or_default(),
            secure: self.secure,
        }
    }

    /// Starts a run as sender: `start`, `num_qubits` qubits, then the sifting request.
    pub async fn send<L: PeerLink + ?Sized>(
        &mut self,
        num_qubits: usize,
        link: &L,
    ) -> Result<(), ProtocolError> {
        let result = self.run_sender(num_qubits, link).await;
        result.map_err(|e| self.fail(e))
    }

    /// A qubit arrived in `slot`.
    pub async fn receive<L: PeerLink + ?Sized>(
        &mut self,
        state: QuantumState,
        slot: usize,
        link: &L,
    ) -> Result<(), ProtocolError> {
        let result = self.on_slot(Some(state), slot, link).await;
        result.map_err(|e| self.fail(e))
    }

    /// The qubit for `slot` was lost in the channel.
    pub async fn record_vacancy<L: PeerLink + ?Sized>(
        &mut self,
        slot: usize,
        link: &L,
    ) -> Result<(), ProtocolError> {
        let result = self.on_slot(None, slot, link).await;
        result.map_err(|e| self.fail(e))
    }

    pub async fn notify_classical_message<L: PeerLink + ?Sized>(
        &mut self,
        message: ClassicalMessage,
        link: &L,
    ) -> Result<(), ProtocolError> {
        let result = self.dispatch(message, link).await;
        result.map_err(|e| self.fail(e))
    }

    /// Ends the current run without a key. No-op if already aborted.
    pub fn abort(&mut self, reason: &str) {
        if self.phase == HostPhase::Aborted {
            return;
        }
        let phase = self.phase;
        self.phase = HostPhase::Aborted;
        self.pending_sifting = None;

        warn!(
            node = %self.id,
            protocol = %self.protocol.kind(),
            phase = ?phase,
            reason,
            "Protocol run aborted"
        );
        self.bus.emit(
            self.event(EventKind::ProtocolAborted)
                .with("reason", reason)
                .with("phase", format!("{phase:?}")),
        );
    }

    fn fail(&mut self, error: ProtocolError) -> ProtocolError {
        self.abort(&error.to_string());
        error
    }

    async fn run_sender<L: PeerLink + ?Sized>(
        &mut self,
        num_qubits: usize,
        link: &L,
    ) -> Result<(), ProtocolError> {
        if self.phase.is_active() {
            return Err(ProtocolError::Sequence {
                phase: self.phase,
                message: "send",
            });
        }
        check_run_size(num_qubits)?;

        let run_id = Uuid::new_v4();
        self.begin(run_id, Role::Sender, num_qubits, HostPhase::Sending);
        self.send_message(ClassicalMessage::Start { run_id, num_qubits }, link)
            .await?;

        let mut lost = 0usize;
        for _ in 0..num_qubits {
            let prepared = self.protocol.prepare(&mut self.rng)?;
            let slot = self
                .record_mut()?
                .record_sent(prepared.bit, prepared.basis)?;

            debug!(node = %self.id, slot, bit = prepared.bit, basis = %prepared.basis, "Qubit prepared");
            self.bus.emit(
                self.event(EventKind::QubitPrepared)
                    .with("slot", slot)
                    .with("bit", prepared.bit)
                    .with("basis", prepared.basis.to_string())
                    .with("state", prepared.state.label()),
            );

            if link.transmit(slot, prepared.state).await.is_err() {
                lost += 1;
            }
        }

        if num_qubits > 0 && lost * 2 > num_qubits {
            warn!(node = %self.id, lost, num_qubits, "More than half of the qubits were lost");
        }

        let request = self.protocol.sifting_request(self.record_ref()?);
        self.transition(HostPhase::ReadyForReconciliation);
        self.send_message(ClassicalMessage::Sifting(request), link)
            .await
    }

    async fn on_slot<L: PeerLink + ?Sized>(
        &mut self,
        state: Option<QuantumState>,
        slot: usize,
        link: &L,
    ) -> Result<(), ProtocolError> {
        if self.phase != HostPhase::Receiving {
            return Err(ProtocolError::Sequence {
                phase: self.phase,
                message: if state.is_some() { "qubit" } else { "vacancy" },
            });
        }

        match state {
            Some(state) => {
                let (basis, outcome) = self.protocol.measure(&state, &mut self.rng)?;
                self.record_mut()?.record_outcome(slot, basis, outcome)?;
                debug!(node = %self.id, slot, basis = %basis, outcome, "Qubit measured");
                self.bus.emit(
                    self.event(EventKind::QubitMeasured)
                        .with("slot", slot)
                        .with("basis", basis.to_string())
                        .with("outcome", outcome),
                );
            }
            None => {
                self.record_mut()?.record_vacancy(slot)?;
                debug!(node = %self.id, slot, "Empty slot");
            }
        }

        if self.record_ref()?.is_filled() {
            self.on_filled(link).await?;
        }
        Ok(())
    }

    async fn on_filled<L: PeerLink + ?Sized>(&mut self, link: &L) -> Result<(), ProtocolError> {
        self.transition(HostPhase::ReadyForReconciliation);
        let record = self.record_ref()?;
        info!(
            node = %self.id,
            received = record.received_count(),
            expected = record.num_qubits(),
            "All slots accounted for"
        );

        if let Some(request) = self.pending_sifting.take() {
            debug!(node = %self.id, "Replaying queued sifting request");
            self.reconcile_as_receiver(request, link).await?;
        }
        Ok(())
    }

    async fn dispatch<L: PeerLink + ?Sized>(
        &mut self,
        message: ClassicalMessage,
        link: &L,
    ) -> Result<(), ProtocolError> {
        let role = self.record.as_ref().map(ProtocolRecord::role);

        match (message, self.phase, role) {
            (ClassicalMessage::Start { run_id, num_qubits }, phase, _) if !phase.is_active() => {
                check_run_size(num_qubits)?;
                self.begin(run_id, Role::Receiver, num_qubits, HostPhase::Receiving);
                if num_qubits == 0 {
                    self.on_filled(link).await?;
                }
                Ok(())
            }
            (ClassicalMessage::Sifting(request), HostPhase::Receiving, _)
                if self.pending_sifting.is_none() =>
            {
                debug!(node = %self.id, "Sifting request before the last qubit, queued");
                self.pending_sifting = Some(request);
                Ok(())
            }
            (
                ClassicalMessage::Sifting(request),
                HostPhase::ReadyForReconciliation,
                Some(Role::Receiver),
            ) => self.reconcile_as_receiver(request, link).await,
            (
                ClassicalMessage::Sifting(reply),
                HostPhase::ReadyForReconciliation,
                Some(Role::Sender),
            ) => self.reconcile_as_sender(reply, link).await,
            (
                ClassicalMessage::EstimateErrorRate {
                    sample_positions,
                    reference_bits,
                },
                HostPhase::ErrorChecking,
                Some(Role::Receiver),
            ) => {
                self.check_errors(&sample_positions, &reference_bits, link)
                    .await
            }
            (ClassicalMessage::Complete { error_rate }, HostPhase::ErrorChecking, Some(Role::Sender)) => {
                self.finish_sender(error_rate)
            }
            (message, phase, _) => Err(ProtocolError::Sequence {
                phase,
                message: message.name(),
            }),
        }
    }

    async fn reconcile_as_receiver<L: PeerLink + ?Sized>(
        &mut self,
        request: SiftingData,
        link: &L,
    ) -> Result<(), ProtocolError> {
        self.transition(HostPhase::Reconciling);
        self.bus.emit(self.event(EventKind::SiftingStarted));

        let record = self.record_ref()?;
        let sifted = self.protocol.sift_as_receiver(record, &request)?;
        let reply = self.protocol.sifting_reply(record, &sifted);
        let sifted_len = sifted.indices.len();
        self.record_mut()?.set_sifted(sifted.indices, sifted.bits)?;
        self.sifting_completed(sifted_len);

        self.transition(HostPhase::ErrorChecking);
        self.send_message(ClassicalMessage::Sifting(reply), link)
            .await
    }

    async fn reconcile_as_sender<L: PeerLink + ?Sized>(
        &mut self,
        reply: SiftingData,
        link: &L,
    ) -> Result<(), ProtocolError> {
        self.transition(HostPhase::Reconciling);
        self.bus.emit(self.event(EventKind::SiftingStarted));

        let sifted = self.protocol.sift_as_sender(self.record_ref()?, &reply)?;
        let sifted_len = sifted.indices.len();
        self.record_mut()?.set_sifted(sifted.indices, sifted.bits)?;
        self.sifting_completed(sifted_len);

        let sample = sample_check_positions(sifted_len, self.check_ratio, &mut self.rng);
        self.record_mut()?.set_check_positions(sample.clone())?;
        let (sample_positions, reference_bits) = self.protocol.disclose(self.record_ref()?, &sample);

        self.transition(HostPhase::ErrorChecking);
        self.send_message(
            ClassicalMessage::EstimateErrorRate {
                sample_positions,
                reference_bits,
            },
            link,
        )
        .await
    }

    async fn check_errors<L: PeerLink + ?Sized>(
        &mut self,
        sample_positions: &[usize],
        reference_bits: &[u8],
        link: &L,
    ) -> Result<(), ProtocolError> {
        let check = self
            .protocol
            .check(self.record_ref()?, sample_positions, reference_bits)?;

        let record = self.record_mut()?;
        record.set_check_positions(check.disclosed)?;
        record.set_error_rate(check.error_rate)?;
        self.judge(check.error_rate, check.comparisons);

        self.send_message(
            ClassicalMessage::Complete {
                error_rate: check.error_rate,
            },
            link,
        )
        .await?;
        self.complete()
    }

    fn finish_sender(&mut self, error_rate: f64) -> Result<(), ProtocolError> {
        if !(0.0..=1.0).contains(&error_rate) {
            return Err(ProtocolError::Aborted(format!(
                "peer reported an impossible error rate {error_rate}"
            )));
        }
        self.record_mut()?.set_error_rate(error_rate)?;
        self.secure = Some(error_rate <= self.error_rate_threshold);
        self.complete()
    }

    /// Compares the QBER against the threshold. Reported, never fatal.
    fn judge(&mut self, error_rate: f64, comparisons: usize) {
        let secure = error_rate <= self.error_rate_threshold;
        self.secure = Some(secure);

        if secure {
            info!(node = %self.id, error_rate, comparisons, "Error rate computed");
        } else {
            warn!(
                node = %self.id,
                error_rate,
                threshold = self.error_rate_threshold,
                "Error rate above threshold, channel may be compromised"
            );
        }
        self.bus.emit(
            self.event(EventKind::ErrorRateComputed)
                .with("error_rate", error_rate)
                .with("comparisons", comparisons)
                .with("threshold", self.error_rate_threshold)
                .with("secure", secure),
        );
    }

    fn complete(&mut self) -> Result<(), ProtocolError> {
        let record = self.record_mut()?;
        record.seal();
        let sifted_len = record.sifted_key().len();
        let key_len = record.established_key().len();
        let error_rate = record.error_rate();

        self.transition(HostPhase::Complete);
        info!(
            node = %self.id,
            protocol = %self.protocol.kind(),
            sifted_len,
            key_len,
            error_rate = ?error_rate,
            "Protocol completed"
        );

        let mut event = self
            .event(EventKind::ProtocolCompleted)
            .with("sifted_length", sifted_len)
            .with("key_length", key_len)
            .with("error_rate", error_rate);
        if let Some(secure) = self.secure {
            event = event.with("secure", secure);
        }
        self.bus.emit(event);
        Ok(())
    }

    /// Installs a fresh record for a new run.
    fn begin(&mut self, run_id: Uuid, role: Role, num_qubits: usize, phase: HostPhase) {
        self.record = Some(ProtocolRecord::new(run_id, role, num_qubits));
        self.pending_sifting = None;
        self.secure = None;
        self.transition(phase);

        info!(
            node = %self.id,
            protocol = %self.protocol.kind(),
            %run_id,
            ?role,
            num_qubits,
            "Protocol started"
        );
        self.bus.emit(
            self.event(EventKind::ProtocolStarted)
                .with("role", format!("{role:?}").to_lowercase())
                .with("num_qubits", num_qubits),
        );
    }

    fn sifting_completed(&self, sifted_len: usize) {
        debug!(node = %self.id, sifted_len, "Sifting completed");
        self.bus.emit(
            self.event(EventKind::SiftingCompleted)
                .with("sifted_length", sifted_len),
        );
    }

    async fn send_message<L: PeerLink + ?Sized>(
        &self,
        message: ClassicalMessage,
        link: &L,
    ) -> Result<(), ProtocolError> {
        debug!(node = %self.id, message = message.name(), "Classical message sent");
        self.bus.emit(
            self.event(EventKind::ClassicalMessageSent)
                .with("message", message.name()),
        );
        link.send_classical(message).await
    }

    fn transition(&mut self, phase: HostPhase) {
        debug!(node = %self.id, from = ?self.phase, to = ?phase, "Phase transition");
        self.phase = phase;
    }

    fn event(&self, kind: EventKind) -> Event {
        let event = Event::new(kind, self.id.clone()).with_protocol(self.protocol.kind());
        match &self.record {
            Some(record) => event.with("run_id", record.run_id().to_string()),
            None => event,
        }
    }

    fn record_ref(&self) -> Result<&ProtocolRecord, ProtocolError> {
        self.record
            .as_ref()
            .ok_or_else(|| ProtocolError::Aborted("no active run".into()))
    }

    fn record_mut(&mut self) -> Result<&mut ProtocolRecord, ProtocolError> {
        self.record
            .as_mut()
            .ok_or_else(|| ProtocolError::Aborted("no active run".into()))
    }
}

fn check_run_size(num_qubits: usize) -> Result<(), ProtocolError> {
    if num_qubits > MAX_QUBITS {
        return Err(ProtocolError::TooManyQubits {
            requested: num_qubits,
            max: MAX_QUBITS,
        });
    }
    Ok(())
}

/// `ceil(ratio * len)` distinct positions (at least one when possible), ascending.
fn sample_check_positions(len: usize, ratio: f64, rng: &mut StdRng) -> Vec<usize> {
    if len == 0 || ratio <= 0.0 {
        return Vec::new();
    }
    let count = ((ratio * len as f64).ceil() as usize).clamp(1, len);

    let mut positions: Vec<usize> = (0..len).collect();
    positions.shuffle(rng);
    positions.truncate(count);
    positions.sort_unstable();
    positions
}
