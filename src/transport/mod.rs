//! Message transport carrying change events from writers to the delta applier.
//!
//! The engine assumes nothing beyond [`MessageTransport`]: events are published
//! per document id and delivered one at a time, with no ordering guarantee and
//! possibly duplicated or lost. [`ChannelTransport`] is an in-process
//! implementation:
//! - Broadcast to every subscription
//! - Bounded buffers that hold back publishers (or drop slow subscribers)
//! - A bounded backlog while nobody is subscribed
//!
//! # Example
//!
//! ```ignore
//! let transport = ChannelTransport::default();
//! let subscription = transport.subscribe();
//!
//! transport.publish(DocumentId(4), r#"{"new_job_title": "Engineer", "version": "2"}"#)?;
//!
//! loop {
//!     match subscription.recv() {
//!         Ok(TransportEvent::Delta { id, payload }) => println!("{}: {}", id, payload),
//!         Ok(TransportEvent::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod channel;
mod types;

pub use channel::ChannelTransport;
pub use types::{
    DropReason, OverflowPolicy, Subscription, SubscriptionId, TransportConfig, TransportEvent,
};

use crate::error::Result;
use crate::types::DocumentId;

/// Publish/subscribe transport for change events.
pub trait MessageTransport: Send + Sync {
    /// Publish `payload` for document `id`.
    fn publish(&self, id: DocumentId, payload: &str) -> Result<()>;

    /// Open a new subscription.
    fn subscribe(&self) -> Subscription;
}

impl<T: MessageTransport + ?Sized> MessageTransport for std::sync::Arc<T> {
    fn publish(&self, id: DocumentId, payload: &str) -> Result<()> {
        (**self).publish(id, payload)
    }

    fn subscribe(&self) -> Subscription {
        (**self).subscribe()
    }
}
