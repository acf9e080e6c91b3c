//! # Protocol Events
//!
//! Every protocol step and channel outcome is reported as an [`Event`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::host::HostId;
use crate::protocols::ProtocolKind;

/// Closed set of things that can happen on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A host opened a new run.
    ProtocolStarted,
    /// The sender encoded a bit into a qubit.
    QubitPrepared,
    /// The channel delivered a qubit to the peer.
    QubitTransmitted,
    /// The channel absorbed a qubit.
    QubitLost,
    /// The receiver measured a qubit.
    QubitMeasured,
    /// A classical message left a host.
    ClassicalMessageSent,
    SiftingStarted,
    SiftingCompleted,
    ErrorRateComputed,
    ProtocolCompleted,
    /// The run ended without a key (sequence error or timeout).
    ProtocolAborted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ProtocolStarted => "protocol_started",
            EventKind::QubitPrepared => "qubit_prepared",
            EventKind::QubitTransmitted => "qubit_transmitted",
            EventKind::QubitLost => "qubit_lost",
            EventKind::QubitMeasured => "qubit_measured",
            EventKind::ClassicalMessageSent => "classical_message_sent",
            EventKind::SiftingStarted => "sifting_started",
            EventKind::SiftingCompleted => "sifting_completed",
            EventKind::ErrorRateComputed => "error_rate_computed",
            EventKind::ProtocolCompleted => "protocol_completed",
            EventKind::ProtocolAborted => "protocol_aborted",
        }
    }
}

/// Immutable record of one protocol step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub node: HostId,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub protocol: Option<ProtocolKind>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, node: HostId) -> Self {
        Self {
            kind,
            node,
            timestamp: Utc::now(),
            protocol: None,
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// JSON object `{kind, node, timestamp, protocol, payload}` pushed to observers.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Kinds to include. Empty means all kinds.
    pub kinds: Vec<EventKind>,
    /// Nodes to include. Empty means all nodes.
    pub nodes: Vec<HostId>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds,
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn nodes(nodes: Vec<HostId>) -> Self {
        Self {
            kinds: Vec::new(),
            nodes,
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let kind_match = self.kinds.is_empty() || self.kinds.contains(&event.kind);
        let node_match = self.nodes.is_empty() || self.nodes.contains(&event.node);
        kind_match && node_match
    }
}
