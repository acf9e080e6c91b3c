//! Full sessions over the public API.

use std::time::Duration;

use async_trait::async_trait;
use qkd_link::core::errors::QubitLost;
use qkd_link::events::{EventFilter, EventKind};
use qkd_link::host::{HostPhase, PeerLink};
use qkd_link::protocols::reconcile_bases;
use qkd_link::session::{HostInput, spawn_host};
use qkd_link::{
    Bb84, ClassicalMessage, EventBus, HostId, NoiseKind, ProtocolError, ProtocolHost, ProtocolKind,
    QkdError, QuantumState, Session, SessionReport, SimulationConfig,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

fn ideal(protocol: ProtocolKind, num_qubits: usize, seed: u64) -> SimulationConfig {
    SimulationConfig {
        protocol,
        num_qubits,
        seed: Some(seed),
        ..SimulationConfig::default()
    }
}

async fn run(config: SimulationConfig) -> (Session, SessionReport) {
    let session = Session::new(config).unwrap();
    let report = timeout(Duration::from_secs(10), session.run())
        .await
        .expect("session hung")
        .unwrap();
    (session, report)
}

#[tokio::test]
async fn test_bb84_ideal_link() {
    let (_, report) = run(ideal(ProtocolKind::Bb84, 100, 2024)).await;

    let sender = report.sender.record.as_ref().unwrap();
    let receiver = report.receiver.record.as_ref().unwrap();
    let matching = reconcile_bases(sender.chosen_bases(), receiver.chosen_bases());

    assert_eq!(report.sifted_length, matching.len());
    assert_eq!(sender.sifted_indices(), matching.as_slice());
    assert!((25..=75).contains(&matching.len()), "{}", matching.len());
    assert_eq!(report.error_rate, Some(0.0));
    assert!(report.secure);
    assert!(report.keys_match);
    assert!(!report.sender_key.is_empty());
    assert_eq!(sender.sifted_key(), receiver.sifted_key());
}

#[tokio::test]
async fn test_b92_ideal_link() {
    let (_, report) = run(ideal(ProtocolKind::B92, 200, 92)).await;

    assert!((25..=75).contains(&report.sifted_length), "{}", report.sifted_length);
    assert_eq!(report.error_rate, Some(0.0));
    assert!(report.keys_match);
    assert_eq!(report.theoretical_efficiency, 0.25);

    // Every sifted slot was a conclusive click.
    let receiver = report.receiver.record.as_ref().unwrap();
    for &slot in receiver.sifted_indices() {
        assert_eq!(receiver.outcomes()[slot], Some(1));
    }
}

#[tokio::test]
async fn test_lossy_link_still_completes() {
    let mut config = ideal(ProtocolKind::Bb84, 300, 8);
    config.channel.length_km = 25.0;
    config.channel.loss_per_km = 0.04;

    let (session, report) = run(config).await;

    assert!(report.lost > 0);
    assert_eq!(report.received + report.lost, 300);
    assert_eq!(report.sender.phase, HostPhase::Complete);
    assert_eq!(report.receiver.phase, HostPhase::Complete);
    assert!(report.keys_match);

    let receiver = report.receiver.record.as_ref().unwrap();
    assert_eq!(receiver.outcomes().len(), 300);
    assert!(
        receiver
            .sifted_indices()
            .iter()
            .all(|&slot| receiver.outcomes()[slot].is_some())
    );

    let history = session.bus().history();
    let lost = history.iter().filter(|e| e.kind == EventKind::QubitLost).count();
    let transmitted = history
        .iter()
        .filter(|e| e.kind == EventKind::QubitTransmitted)
        .count();
    assert_eq!(lost, report.lost);
    assert_eq!(lost + transmitted, 300);
}

#[tokio::test]
async fn test_same_seed_same_run() {
    let mut config = ideal(ProtocolKind::B92, 150, 77);
    config.channel.length_km = 5.0;
    config.channel.loss_per_km = 0.05;
    config.channel.noise_model = NoiseKind::Depolarizing;
    config.channel.noise_strength = 0.1;

    let (_, first) = run(config.clone()).await;
    let (_, second) = run(config).await;

    assert_eq!(first.lost, second.lost);
    assert_eq!(first.sifted_length, second.sifted_length);
    assert_eq!(first.sender_key, second.sender_key);
    assert_eq!(first.receiver_key, second.receiver_key);
}

#[tokio::test]
async fn test_late_subscriber_gets_replay() {
    let mut config = ideal(ProtocolKind::Bb84, 40, 1);
    config.bus.replay_count = 10;
    let (session, _) = run(config).await;

    let mut subscription = session.bus().subscribe(EventFilter::all());
    let replayed = subscription.drain();
    assert_eq!(replayed.len(), 10);
    assert_eq!(replayed, session.bus().recent(10));
    assert_eq!(replayed.last().unwrap().kind, EventKind::ProtocolCompleted);
}

#[tokio::test]
async fn test_event_json_is_observer_ready() {
    let (session, _) = run(ideal(ProtocolKind::B92, 20, 3)).await;

    for event in session.bus().history() {
        let json = event.to_json();
        assert!(json["kind"].is_string());
        assert!(json["node"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["protocol"], "b92");
        assert!(json["payload"].is_object());
    }
}

/// Swallows everything; the peer never answers.
struct Silent;

#[async_trait]
impl PeerLink for Silent {
    async fn transmit(&self, _slot: usize, _state: QuantumState) -> Result<(), QubitLost> {
        Ok(())
    }

    async fn send_classical(&self, _message: ClassicalMessage) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_sender_without_peer_times_out() {
    let bus = EventBus::new();
    let alice = ProtocolHost::new(
        HostId::from("Alice"),
        Bb84,
        bus.clone(),
        StdRng::seed_from_u64(4),
    );
    let (tx, rx) = mpsc::channel(16);
    let handle = spawn_host(alice, Silent, rx, Duration::from_millis(50));

    tx.send(HostInput::Send { num_qubits: 8 }).await.unwrap();
    let outcome = timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("host task hung")
        .unwrap();

    assert!(matches!(
        outcome.error,
        Some(QkdError::Timeout {
            phase: HostPhase::ReadyForReconciliation,
            ..
        })
    ));
    assert_eq!(outcome.report.phase, HostPhase::Aborted);
    assert!(outcome.report.established_key.is_empty());
}

#[tokio::test]
async fn test_out_of_order_message_reaches_driver() {
    let bus = EventBus::new();
    let bob = ProtocolHost::new(HostId::from("Bob"), Bb84, bus.clone(), StdRng::seed_from_u64(5));
    let (tx, rx) = mpsc::channel(16);
    let handle = spawn_host(bob, Silent, rx, Duration::from_secs(1));

    tx.send(HostInput::Classical(ClassicalMessage::Start {
        run_id: Uuid::new_v4(),
        num_qubits: 2,
    }))
    .await
    .unwrap();
    tx.send(HostInput::Classical(ClassicalMessage::Complete { error_rate: 0.0 }))
        .await
        .unwrap();

    let outcome = timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("host task hung")
        .unwrap();
    assert_eq!(
        outcome.error,
        Some(QkdError::Protocol(ProtocolError::Sequence {
            phase: HostPhase::Receiving,
            message: "complete",
        }))
    );
    assert_eq!(outcome.report.phase, HostPhase::Aborted);
}
