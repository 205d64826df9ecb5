//! Transport event and subscription types.

use crate::types::DocumentId;
use serde::{Deserialize, Serialize};

/// What the transport does when a subscriber's buffer is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Hold the publisher until the subscriber makes room. No event is lost,
    /// at the cost of writes stalling behind a slow consumer.
    #[default]
    Block,
    /// Drop the subscriber with `Dropped { BufferOverflow }`.
    DropSubscriber,
}

/// Configuration for the in-process transport.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Max buffered events per subscriber.
    /// Also bounds the backlog kept while nobody is subscribed.
    /// Default: 10000
    pub buffer_size: usize,
    /// Behavior when a subscriber's buffer is full. Default: block
    pub overflow: OverflowPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Events delivered to a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A change event published for document `id`.
    Delta { id: DocumentId, payload: String },

    /// Subscription was dropped; no further events follow.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// The transport was closed.
    Closed,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a subscription.
pub struct Subscription {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<TransportEvent>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, receiver: crossbeam_channel::Receiver<TransportEvent>) -> Self {
        Self { id, receiver }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<TransportEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<TransportEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<TransportEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Events currently buffered.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}
