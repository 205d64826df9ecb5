//! In-process transport built on bounded crossbeam channels.

use super::types::{
    DropReason, OverflowPolicy, Subscription, SubscriptionId, TransportConfig, TransportEvent,
};
use super::MessageTransport;
use crate::error::{IndexError, Result};
use crate::types::DocumentId;
use crossbeam_channel::{bounded, SendTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// How often a blocked publisher checks that its subscriber is still there.
const BLOCKED_SEND_POLL: Duration = Duration::from_millis(50);

/// Internal subscriber state. Under [`OverflowPolicy::DropSubscriber`] the
/// channel holds one slot beyond `buffer_size` so the `Dropped` notice fits.
struct Subscriber {
    sender: Sender<TransportEvent>,
}

/// Broadcasts published change events to every live subscription.
///
/// Events published while nobody is subscribed are kept in a bounded backlog
/// (oldest dropped first) and handed to the next subscriber. There is no
/// acknowledgement: an event handed to a subscriber is considered delivered.
///
/// With [`OverflowPolicy::Block`] a full subscriber holds `publish` back until
/// it drains, is unsubscribed or the transport closes, so a consumer that falls
/// behind slows writers down instead of losing events.
pub struct ChannelTransport {
    config: TransportConfig,
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscriber>>,
    /// Events published with no subscriber attached.
    backlog: Mutex<VecDeque<TransportEvent>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            subscriptions: RwLock::new(HashMap::new()),
            backlog: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Best effort
            let _ = sub.sender.try_send(TransportEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Close the transport. Every subscription receives `Dropped { Closed }` and
    /// then disconnects; later publishes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let subs: Vec<Subscriber> = self.subscriptions.write().drain().map(|(_, s)| s).collect();
        for sub in subs {
            let _ = sub.sender.try_send(TransportEvent::Dropped {
                reason: DropReason::Closed,
            });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Events waiting for a subscriber.
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    /// Send to every subscriber. Returns the number of subscribers reached.
    fn broadcast(&self, event: TransportEvent) -> usize {
        let targets: Vec<(SubscriptionId, Sender<TransportEvent>)> = self
            .subscriptions
            .read()
            .iter()
            .map(|(id, sub)| (*id, sub.sender.clone()))
            .collect();

        let mut to_remove = Vec::new();
        let mut delivered = 0;
        for (id, sender) in targets {
            match self.send(id, &sender, event.clone()) {
                Delivery::Sent => delivered += 1,
                Delivery::Overflowed | Delivery::Disconnected => to_remove.push(id),
                Delivery::Abandoned => {}
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow subscriber");
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = sub.sender.try_send(TransportEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }

        delivered
    }

    fn send(&self, id: SubscriptionId, sender: &Sender<TransportEvent>, event: TransportEvent) -> Delivery {
        if self.config.overflow == OverflowPolicy::DropSubscriber {
            // The spare slot is kept for the Dropped notice
            if sender.len() >= self.config.buffer_size.max(1) {
                return Delivery::Overflowed;
            }
            return match sender.try_send(event) {
                Ok(()) => Delivery::Sent,
                Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
                Err(TrySendError::Full(_)) => Delivery::Overflowed,
            };
        }

        let mut event = match sender.try_send(event) {
            Ok(()) => return Delivery::Sent,
            Err(TrySendError::Disconnected(_)) => return Delivery::Disconnected,
            Err(TrySendError::Full(event)) => event,
        };

        tracing::debug!(subscription = id.0, "subscriber buffer full, holding publisher");
        loop {
            match sender.send_timeout(event, BLOCKED_SEND_POLL) {
                Ok(()) => return Delivery::Sent,
                Err(SendTimeoutError::Disconnected(_)) => return Delivery::Disconnected,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.is_closed() || !self.subscriptions.read().contains_key(&id) {
                        return Delivery::Abandoned;
                    }
                    event = pending;
                }
            }
        }
    }
}

/// Outcome of handing one event to one subscriber.
enum Delivery {
    Sent,
    /// Buffer full under [`OverflowPolicy::DropSubscriber`].
    Overflowed,
    /// The receiver is gone.
    Disconnected,
    /// Gave up waiting: the subscriber was removed or the transport closed.
    Abandoned,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl MessageTransport for ChannelTransport {
    fn publish(&self, id: DocumentId, payload: &str) -> Result<()> {
        if self.is_closed() {
            return Err(IndexError::TransportClosed);
        }

        let event = TransportEvent::Delta {
            id,
            payload: payload.to_string(),
        };

        // Hold the backlog lock so a concurrent subscribe can't miss this event
        let mut backlog = self.backlog.lock();
        if self.broadcast(event.clone()) == 0 {
            if self.is_closed() {
                return Err(IndexError::TransportClosed);
            }
            if backlog.len() >= self.config.buffer_size.max(1) {
                tracing::warn!(%id, "transport backlog full, dropping oldest event");
                backlog.pop_front();
            }
            backlog.push_back(event);
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let limit = self.config.buffer_size.max(1);
        let spare = usize::from(self.config.overflow == OverflowPolicy::DropSubscriber);
        let (sender, receiver) = bounded(limit + spare);

        if self.is_closed() {
            // Receiver sees Dropped, then disconnects
            let _ = sender.try_send(TransportEvent::Dropped {
                reason: DropReason::Closed,
            });
            return Subscription::new(id, receiver);
        }

        let mut backlog = self.backlog.lock();
        while sender.len() < limit {
            match backlog.pop_front() {
                Some(event) => {
                    let _ = sender.try_send(event);
                }
                None => break,
            }
        }

        self.subscriptions.write().insert(id, Subscriber { sender });
        Subscription::new(id, receiver)
    }
}
