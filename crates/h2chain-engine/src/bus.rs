//! Topic-addressed pub/sub transport.
//!
//! [`Bus`] is the seam between actors and the broker. [`LocalBus`] is the
//! in-process implementation used when no NATS URL is configured and in
//! tests; [`crate::nats_bus::NatsBus`] talks to a real NATS server.
//!
//! Subjects follow NATS conventions: tokens separated by `.`, `*` matches
//! exactly one token and a trailing `>` matches one or more tokens.

use std::sync::{Arc, Mutex, PoisonError};

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt as _, StreamExt as _};
use tracing::trace;

use crate::error::BusError;

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete subject the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Stream of messages matching one subscription.
pub type Subscription = BoxStream<'static, BusMessage>;

/// A pub/sub transport shared by every actor.
pub trait Bus: Send + Sync + std::fmt::Debug {
    /// Publish `payload` on `topic`.
    fn publish(&self, topic: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), BusError>>;

    /// Subscribe to `pattern`. The subscription is active once the
    /// returned future resolves.
    fn subscribe(&self, pattern: String) -> BoxFuture<'_, Result<Subscription, BusError>>;

    /// Deliver everything published so far.
    fn flush(&self) -> BoxFuture<'_, Result<(), BusError>> {
        async { Ok(()) }.boxed()
    }
}

/// Whether `subject` matches the subscription `pattern`.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug)]
struct LocalSubscriber {
    pattern: String,
    sender: mpsc::UnboundedSender<BusMessage>,
}

/// In-process bus with NATS-style wildcard matching.
///
/// Delivery order is preserved per subscription. Messages published before
/// a subscription exists are not delivered to it.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    subscribers: Arc<Mutex<Vec<LocalSubscriber>>>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn deliver(&self, topic: &str, payload: &[u8]) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Dropped receivers are pruned on the next publish.
        subscribers.retain(|sub| !sub.sender.is_closed());
        for sub in subscribers.iter().filter(|s| subject_matches(&s.pattern, topic)) {
            let message = BusMessage {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
            };
            if sub.sender.unbounded_send(message).is_err() {
                trace!(pattern = sub.pattern, "subscriber went away during publish");
            }
        }
    }
}

impl Bus for LocalBus {
    fn publish(&self, topic: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), BusError>> {
        self.deliver(&topic, &payload);
        async { Ok(()) }.boxed()
    }

    fn subscribe(&self, pattern: String) -> BoxFuture<'_, Result<Subscription, BusError>> {
        let (sender, receiver) = mpsc::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LocalSubscriber { pattern, sender });
        async move { Ok(receiver.boxed()) }.boxed()
    }
}
