//! # Event Bus
//!
//! Bounded-history broadcaster. Every emitted event is appended to a ring
//! buffer and then offered to each subscriber's bounded mailbox with a
//! non-blocking send, so a slow or vanished subscriber never stalls the
//! protocol or the other subscribers. A subscriber whose mailbox is full or
//! closed is dropped, not retried.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::BusConfig;
use crate::core::errors::ConfigurationError;
use crate::events::{Event, EventFilter};

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscriber was dropped by the bus or the bus is gone.
    #[error("Subscription closed")]
    Closed,
}

/// Delivery failure reported by an [`Observer`]; the observer is detached.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObserverError {
    #[error("Observer disconnected: {0}")]
    Disconnected(String),

    #[error("Observer failed: {0}")]
    Failed(String),
}

pub type SubscriberId = u64;

/// Push-model consumer, e.g. a WebSocket session.
#[async_trait]
pub trait Observer: Send + 'static {
    async fn on_event(&mut self, event: &Event) -> Result<(), ObserverError>;
}

struct Subscriber {
    id: SubscriberId,
    filter: EventFilter,
    sender: mpsc::Sender<Event>,
}

struct BusState {
    history: VecDeque<Event>,
    subscribers: Vec<Subscriber>,
    next_id: SubscriberId,
}

/// Shared handle; cloning gives another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
    config: BusConfig,
    emitted: Arc<AtomicU64>,
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    // Appends are plain data moves; a poisoned guard still holds a consistent buffer.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    /// Create a bus with the default history and mailbox sizes.
    #[must_use]
    pub fn new() -> Self {
        Self::build(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: BusConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                history: VecDeque::with_capacity(config.max_history.min(4096)),
                subscribers: Vec::new(),
                next_id: 1,
            })),
            config,
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Append to the history, then fan out to every matching subscriber.
    pub fn emit(&self, event: Event) {
        self.emitted.fetch_add(1, Ordering::Relaxed);

        let mut state = lock(&self.state);
        state.history.push_back(event.clone());
        while state.history.len() > self.config.max_history {
            state.history.pop_front();
        }

        state.subscribers.retain(|sub| {
            if !sub.filter.matches(&event) {
                return true;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber = sub.id,
                        kind = event.kind.as_str(),
                        "Subscriber mailbox full, dropping subscriber"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = sub.id, "Subscriber disconnected");
                    false
                }
            }
        });
    }

    /// Subscribe and receive a replay of the most recent matching events.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let capacity = self
            .config
            .mailbox_capacity
            .max(self.config.replay_count)
            .max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;

        let mut replay: Vec<&Event> = state
            .history
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(self.config.replay_count)
            .collect();
        replay.reverse();
        let replayed = replay.len();
        for event in replay {
            // Capacity covers the replay window, so this cannot fill up.
            let _ = sender.try_send(event.clone());
        }

        state.subscribers.push(Subscriber {
            id,
            filter: filter.clone(),
            sender,
        });
        debug!(subscriber = id, replayed, "New subscription created");

        Subscription {
            id,
            receiver,
            filter,
            bus: Arc::downgrade(&self.state),
        }
    }

    /// Detach a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = lock(&self.state);
        let before = state.subscribers.len();
        state.subscribers.retain(|sub| sub.id != id);
        before != state.subscribers.len()
    }

    /// Run an observer on its own task, fed by a dedicated subscription.
    ///
    /// The task ends (and the subscription is released) on the first delivery error.
    pub fn spawn_observer<O: Observer>(&self, filter: EventFilter, mut observer: O) -> JoinHandle<()> {
        let mut subscription = self.subscribe(filter);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let Err(e) = observer.on_event(&event).await {
                    warn!(
                        subscriber = subscription.id(),
                        error = %e,
                        "Observer delivery failed, detaching"
                    );
                    break;
                }
            }
        })
    }

    /// Snapshot of the buffered history, oldest first.
    pub fn history(&self) -> Vec<Event> {
        lock(&self.state).history.iter().cloned().collect()
    }

    /// The `count` most recent events, oldest first.
    pub fn recent(&self, count: usize) -> Vec<Event> {
        let state = lock(&self.state);
        let skip = state.history.len().saturating_sub(count);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        lock(&self.state).history.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    /// Total events emitted over the bus lifetime, including evicted ones.
    pub fn events_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription handle for receiving events.
///
/// When dropped, the subscriber is removed from the bus.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Event>,
    filter: EventFilter,
    bus: Weak<Mutex<BusState>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Receive the next event; `None` once the bus dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Try to receive the next event without blocking.
    pub fn try_recv(&mut self) -> Result<Option<Event>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    /// Everything currently queued in the mailbox.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(state) = self.bus.upgrade() else {
            return;
        };
        lock(&state).subscribers.retain(|sub| sub.id != self.id);
        debug!(subscriber = self.id, "Subscription dropped");
    }
}
