//! Observability: protocol events and the bus that fans them out.

mod bus;
mod event;

pub use bus::{EventBus, Observer, ObserverError, SubscriberId, Subscription, SubscriptionError};
pub use event::{Event, EventFilter, EventKind};
