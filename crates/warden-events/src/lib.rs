//! Warden Events - the lifecycle event sink.
//!
//! Approval transitions and sandbox executions are published as
//! [`WardenEvent`]s on an [`EventBus`]. Delivery is best-effort: publishers
//! never wait on subscribers, and a bus with no subscribers drops events.
//!
//! ```rust
//! use warden_events::{EventBus, EventMetadata, WardenEvent};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe_prefix("request:");
//! bus.publish(WardenEvent::RequestExpired {
//!     metadata: EventMetadata::new("docs"),
//!     request_id: uuid::Uuid::new_v4(),
//! });
//! assert!(rx.try_recv().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bus;
mod event;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{EventMetadata, WardenEvent};
