//! # Session
//!
//! Drives one QKD run between two hosts. Each host runs as its own task
//! with a bounded inbox; the quantum channel sits between them behind a
//! [`ChannelEndpoint`], which routes delivered qubits (and empty slots for
//! lost ones) to the peer's inbox.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::core::QuantumState;
use crate::core::errors::{ProtocolError, QkdError, QubitLost};
use crate::events::EventBus;
use crate::host::{ClassicalMessage, HostId, HostPhase, HostReport, PeerLink, ProtocolHost};
use crate::link::{ChannelStats, QuantumChannel};
use crate::protocols::{B92, Bb84, Protocol, ProtocolKind};

/// Inbox size of each host task.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Everything a host task reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum HostInput {
    /// Driver command: start a run as sender.
    Send { num_qubits: usize },
    Qubit { slot: usize, state: QuantumState },
    /// The qubit for `slot` never arrived.
    Vacancy { slot: usize },
    Classical(ClassicalMessage),
}

/// How a host task ended.
#[derive(Debug, Clone)]
pub struct HostOutcome {
    pub report: HostReport,
    pub error: Option<QkdError>,
}

/// One side of the quantum channel plus the classical line to the peer.
pub struct ChannelEndpoint {
    node: HostId,
    channel: Arc<Mutex<QuantumChannel>>,
    peer: mpsc::Sender<HostInput>,
}

impl ChannelEndpoint {
    pub fn new(node: HostId, channel: Arc<Mutex<QuantumChannel>>, peer: mpsc::Sender<HostInput>) -> Self {
        Self {
            node,
            channel,
            peer,
        }
    }
}

#[async_trait::async_trait]
impl PeerLink for ChannelEndpoint {
    async fn transmit(&self, slot: usize, state: QuantumState) -> Result<(), QubitLost> {
        let outcome = self.channel.lock().await.transmit(state, &self.node, slot);

        let (input, result) = match outcome {
            Ok(delivered) => (
                HostInput::Qubit {
                    slot: delivered.slot,
                    state: delivered.state,
                },
                Ok(()),
            ),
            Err(lost) => (HostInput::Vacancy { slot }, Err(lost)),
        };
        if self.peer.send(input).await.is_err() {
            debug!(node = %self.node, slot, "Peer inbox closed, qubit dropped");
        }
        result
    }

    async fn send_classical(&self, message: ClassicalMessage) -> Result<(), ProtocolError> {
        self.peer
            .send(HostInput::Classical(message))
            .await
            .map_err(|_| ProtocolError::TransportClosed)
    }
}

/// Handle to a running host task.
pub struct HostHandle {
    node: HostId,
    outcome: oneshot::Receiver<HostOutcome>,
    task: JoinHandle<()>,
}

impl HostHandle {
    pub fn node(&self) -> &HostId {
        &self.node
    }

    /// Waits for the task to finish.
    pub async fn join(self) -> Result<HostOutcome, QkdError> {
        match self.outcome.await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                self.task.abort();
                Err(QkdError::HostPanicked(self.node.to_string()))
            }
        }
    }
}

/// Runs `host` on its own task until its run completes, fails, times out, or its inbox closes.
pub fn spawn_host<P, L>(
    host: ProtocolHost<P>,
    link: L,
    inbox: mpsc::Receiver<HostInput>,
    run_timeout: Duration,
) -> HostHandle
where
    P: Protocol,
    L: PeerLink + 'static,
{
    let node = host.id().clone();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let outcome = host_loop(host, link, inbox, run_timeout).await;
        // The driver may have stopped waiting.
        let _ = outcome_tx.send(outcome);
    });

    HostHandle {
        node,
        outcome: outcome_rx,
        task,
    }
}

async fn host_loop<P: Protocol, L: PeerLink>(
    mut host: ProtocolHost<P>,
    link: L,
    mut inbox: mpsc::Receiver<HostInput>,
    run_timeout: Duration,
) -> HostOutcome {
    let error = loop {
        let input = if host.phase().is_active() {
            match time::timeout(run_timeout, inbox.recv()).await {
                Ok(input) => input,
                Err(_) => {
                    let phase = host.phase();
                    host.abort("timed out waiting for the next input");
                    break Some(QkdError::Timeout {
                        node: host.id().to_string(),
                        phase,
                    });
                }
            }
        } else {
            inbox.recv().await
        };

        let Some(input) = input else {
            if host.phase().is_active() {
                host.abort("peer disconnected");
                break Some(ProtocolError::TransportClosed.into());
            }
            break None;
        };

        let result = match input {
            HostInput::Send { num_qubits } => host.send(num_qubits, &link).await,
            HostInput::Qubit { slot, state } => host.receive(state, slot, &link).await,
            HostInput::Vacancy { slot } => host.record_vacancy(slot, &link).await,
            HostInput::Classical(message) => host.notify_classical_message(message, &link).await,
        };

        if let Err(e) = result {
            break Some(e.into());
        }
        if host.phase() == HostPhase::Complete {
            break None;
        }
    };

    HostOutcome {
        report: host.report(),
        error,
    }
}

/// Summary of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub protocol: ProtocolKind,
    pub run_id: Option<Uuid>,
    pub num_qubits: usize,
    pub transmitted: usize,
    pub received: usize,
    pub lost: usize,
    pub sifted_length: usize,
    /// `sifted_length / num_qubits`.
    pub efficiency: f64,
    pub theoretical_efficiency: f64,
    pub error_rate: Option<f64>,
    pub secure: bool,
    pub sender_key: Vec<u8>,
    pub receiver_key: Vec<u8>,
    pub keys_match: bool,
    pub sender: HostReport,
    pub receiver: HostReport,
}

pub struct Session {
    config: SimulationConfig,
    bus: EventBus,
}

impl Session {
    /// Validates the configuration and creates a fresh event bus.
    pub fn new(config: SimulationConfig) -> Result<Self, QkdError> {
        config.validate()?;
        let bus = EventBus::with_config(config.bus.clone())?;
        Ok(Self { config, bus })
    }

    /// Uses an existing bus, e.g. one observers are already attached to.
    pub fn with_bus(config: SimulationConfig, bus: EventBus) -> Result<Self, QkdError> {
        config.validate()?;
        Ok(Self { config, bus })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<SessionReport, QkdError> {
        match self.config.protocol {
            ProtocolKind::Bb84 => self.run_with(Bb84).await,
            ProtocolKind::B92 => self.run_with(B92).await,
        }
    }

    fn rng(&self, offset: u64) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(offset)),
            None => StdRng::from_os_rng(),
        }
    }

    async fn run_with<P: Protocol + Clone>(&self, protocol: P) -> Result<SessionReport, QkdError> {
        let config = &self.config;
        let sender_id = HostId::new(config.sender_name.clone());
        let receiver_id = HostId::new(config.receiver_name.clone());
        let run_timeout = Duration::from_millis(config.run_timeout_ms);

        info!(
            protocol = %protocol.kind(),
            num_qubits = config.num_qubits,
            length_km = config.channel.length_km,
            noise = %config.channel.noise_model,
            seed = ?config.seed,
            "Starting QKD session"
        );

        let channel = Arc::new(Mutex::new(QuantumChannel::new(
            config.channel.clone(),
            (sender_id.clone(), receiver_id.clone()),
            protocol.kind(),
            self.bus.clone(),
            self.rng(2),
        )?));

        let (sender_tx, sender_rx) = mpsc::channel(DEFAULT_INBOX_CAPACITY);
        let (receiver_tx, receiver_rx) = mpsc::channel(DEFAULT_INBOX_CAPACITY);

        let sender = ProtocolHost::new(sender_id.clone(), protocol.clone(), self.bus.clone(), self.rng(0))
            .with_check_ratio(config.check_ratio)
            .with_error_rate_threshold(config.channel.error_rate_threshold);
        let receiver = ProtocolHost::new(receiver_id.clone(), protocol.clone(), self.bus.clone(), self.rng(1))
            .with_check_ratio(config.check_ratio)
            .with_error_rate_threshold(config.channel.error_rate_threshold);

        let receiver_handle = spawn_host(
            receiver,
            ChannelEndpoint::new(receiver_id, channel.clone(), sender_tx.clone()),
            receiver_rx,
            run_timeout,
        );
        let sender_handle = spawn_host(
            sender,
            ChannelEndpoint::new(sender_id, channel.clone(), receiver_tx),
            sender_rx,
            run_timeout,
        );

        sender_tx
            .send(HostInput::Send {
                num_qubits: config.num_qubits,
            })
            .await
            .map_err(|_| ProtocolError::TransportClosed)?;
        drop(sender_tx);

        let sender = sender_handle.join().await?;
        let receiver = receiver_handle.join().await?;
        let stats = channel.lock().await.stats();

        if let Some(error) = root_cause(&sender, &receiver) {
            warn!(error = %error, "QKD session failed");
            return Err(error);
        }

        let report = build_report(&protocol, config.num_qubits, stats, sender.report, receiver.report);
        info!(
            protocol = %report.protocol,
            sifted = report.sifted_length,
            lost = report.lost,
            error_rate = ?report.error_rate,
            secure = report.secure,
            "QKD session complete"
        );
        Ok(report)
    }
}

/// The first error that is not just the echo of the peer going away.
fn root_cause(sender: &HostOutcome, receiver: &HostOutcome) -> Option<QkdError> {
    let errors = [&sender.error, &receiver.error];
    errors
        .iter()
        .filter_map(|e| e.as_ref())
        .find(|e| !matches!(e, QkdError::Protocol(ProtocolError::TransportClosed)))
        .or_else(|| errors.iter().find_map(|e| e.as_ref()))
        .cloned()
}

fn build_report<P: Protocol>(
    protocol: &P,
    num_qubits: usize,
    stats: ChannelStats,
    sender: HostReport,
    receiver: HostReport,
) -> SessionReport {
    let received = receiver
        .record
        .as_ref()
        .map_or(0, |r| r.received_count());
    let sifted_length = receiver
        .record
        .as_ref()
        .map_or(0, |r| r.sifted_key().len());
    let error_rate = receiver.record.as_ref().and_then(|r| r.error_rate());
    let efficiency = if num_qubits == 0 {
        0.0
    } else {
        sifted_length as f64 / num_qubits as f64
    };

    SessionReport {
        protocol: protocol.kind(),
        run_id: sender.record.as_ref().map(|r| r.run_id()),
        num_qubits,
        transmitted: stats.transmitted,
        received,
        lost: stats.lost,
        sifted_length,
        efficiency,
        theoretical_efficiency: protocol.theoretical_efficiency(),
        error_rate,
        secure: receiver.secure.unwrap_or(false),
        keys_match: sender.established_key == receiver.established_key,
        sender_key: sender.established_key.clone(),
        receiver_key: receiver.established_key.clone(),
        sender,
        receiver,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NoiseKind;
    use crate::events::{EventFilter, EventKind};

    fn config(protocol: ProtocolKind, num_qubits: usize, seed: u64) -> SimulationConfig {
        SimulationConfig {
            protocol,
            num_qubits,
            seed: Some(seed),
            ..SimulationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bb84_session_completes() {
        let session = Session::new(config(ProtocolKind::Bb84, 64, 5)).unwrap();
        let report = session.run().await.unwrap();

        assert_eq!(report.transmitted, 64);
        assert_eq!(report.received, 64);
        assert_eq!(report.error_rate, Some(0.0));
        assert!(report.secure);
        assert!(report.keys_match);
        assert_eq!(report.sender.phase, HostPhase::Complete);
        assert_eq!(report.receiver.phase, HostPhase::Complete);
        assert_eq!(report.theoretical_efficiency, 0.5);
    }

    #[tokio::test]
    async fn test_session_reports_loss() {
        let mut cfg = config(ProtocolKind::B92, 200, 17);
        cfg.channel.length_km = 10.0;
        cfg.channel.loss_per_km = 0.05;
        let session = Session::new(cfg).unwrap();
        let report = session.run().await.unwrap();

        assert_eq!(report.transmitted, 200);
        assert_eq!(report.received + report.lost, 200);
        assert!(report.lost > 0);
        assert!(report.keys_match);

        let lost_events = session
            .bus()
            .history()
            .iter()
            .filter(|e| e.kind == EventKind::QubitLost)
            .count();
        assert_eq!(lost_events, report.lost);
    }

    #[tokio::test]
    async fn test_noisy_bb84_reports_insecure_link() {
        let mut cfg = config(ProtocolKind::Bb84, 400, 3);
        cfg.channel.noise_model = NoiseKind::Depolarizing;
        cfg.channel.noise_strength = 0.8;
        let report = Session::new(cfg).unwrap().run().await.unwrap();

        let qber = report.error_rate.unwrap();
        assert!(qber > 0.11, "qber {qber}");
        assert!(!report.secure);
        // Above-threshold error rates are reported, not fatal.
        assert_eq!(report.receiver.phase, HostPhase::Complete);
    }

    #[tokio::test]
    async fn test_receiver_times_out_without_qubits() {
        let bus = EventBus::new();
        let receiver = ProtocolHost::new(
            HostId::from("Bob"),
            Bb84,
            bus.clone(),
            StdRng::seed_from_u64(0),
        );
        let channel = QuantumChannel::new(
            Default::default(),
            (HostId::from("Alice"), HostId::from("Bob")),
            ProtocolKind::Bb84,
            bus.clone(),
            StdRng::seed_from_u64(1),
        )
        .unwrap();
        let (peer_tx, _peer_rx) = mpsc::channel(8);
        let (tx, rx) = mpsc::channel(8);
        let link = ChannelEndpoint::new(HostId::from("Bob"), Arc::new(Mutex::new(channel)), peer_tx);

        let handle = spawn_host(receiver, link, rx, Duration::from_millis(50));
        tx.send(HostInput::Classical(ClassicalMessage::Start {
            run_id: Uuid::new_v4(),
            num_qubits: 5,
        }))
        .await
        .unwrap();

        let outcome = time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("host task hung")
            .unwrap();
        assert_eq!(
            outcome.error,
            Some(QkdError::Timeout {
                node: "Bob".to_string(),
                phase: HostPhase::Receiving
            })
        );
        assert_eq!(outcome.report.phase, HostPhase::Aborted);

        let aborted = bus.recent(1);
        assert!(EventFilter::kinds(vec![EventKind::ProtocolAborted]).matches(&aborted[0]));
        drop(tx);
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut cfg = SimulationConfig::default();
        cfg.channel.loss_per_km = -0.1;
        assert!(matches!(
            Session::new(cfg),
            Err(QkdError::Configuration(_))
        ));
    }
}
