//! Actor runtime: a handler table per actor, one task per route.
//!
//! Each [`Actor`] owns its state behind one mutex. Every route subscribes
//! to a subject and drains it in its own task, so handlers of the same
//! actor may run concurrently and serialize on the mutex. Handlers return
//! the messages to publish; those are sent after the lock is released.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::bus::{Bus, BusMessage};
use crate::error::{BusError, MessageError};

/// A message ready to go out on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Destination subject.
    pub topic: String,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Encode `value` as JSON for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Encode`] if serialization fails.
    pub fn json<T: Serialize>(topic: impl Into<String>, value: &T) -> Result<Self, MessageError> {
        let topic = topic.into();
        match serde_json::to_vec(value) {
            Ok(payload) => Ok(Self { topic, payload }),
            Err(source) => Err(MessageError::Encode { topic, source }),
        }
    }

    /// Plain-text payload for a control subject.
    pub fn text(topic: impl Into<String>, value: &str) -> Self {
        Self {
            topic: topic.into(),
            payload: value.as_bytes().to_vec(),
        }
    }
}

/// Decode a JSON payload.
///
/// # Errors
///
/// Returns [`MessageError::Decode`] if the payload does not match `T`.
pub fn decode<T: DeserializeOwned>(message: &BusMessage) -> Result<T, MessageError> {
    serde_json::from_slice(&message.payload).map_err(|source| MessageError::Decode {
        topic: message.topic.clone(),
        source,
    })
}

/// Decode a plain-text payload, trimmed.
///
/// # Errors
///
/// Returns [`MessageError::Text`] if the payload is not UTF-8.
pub fn decode_text(message: &BusMessage) -> Result<String, MessageError> {
    std::str::from_utf8(&message.payload)
        .map(|s| s.trim().to_owned())
        .map_err(|_utf8| MessageError::Text {
            topic: message.topic.clone(),
            value: String::from_utf8_lossy(&message.payload).into_owned(),
        })
}

/// Decode a plain-text speed factor.
///
/// # Errors
///
/// Returns [`MessageError::Text`] if the payload is not a number.
pub fn decode_speed_factor(message: &BusMessage) -> Result<f64, MessageError> {
    decode_text(message)?
        .parse::<f64>()
        .map_err(|_parse| MessageError::Text {
            topic: message.topic.clone(),
            value: String::from_utf8_lossy(&message.payload).into_owned(),
        })
}

/// Publish every envelope, logging failures.
pub async fn publish_all(bus: &dyn Bus, envelopes: Vec<Envelope>) {
    for envelope in envelopes {
        if let Err(e) = bus.publish(envelope.topic, envelope.payload).await {
            warn!(error = %e, "publish failed");
        }
    }
}

type MessageHandler<S> =
    Box<dyn Fn(&mut S, &BusMessage) -> Result<Vec<Envelope>, MessageError> + Send + Sync>;
type TimerHandler<S> = Box<dyn Fn(&mut S) -> Vec<Envelope> + Send + Sync>;

struct Route<S> {
    topic: String,
    handler: MessageHandler<S>,
}

struct Timer<S> {
    period: Duration,
    handler: TimerHandler<S>,
}

/// An actor under construction: state plus its handler table.
pub struct Actor<S> {
    name: String,
    state: Arc<Mutex<S>>,
    routes: Vec<Route<S>>,
    timers: Vec<Timer<S>>,
}

impl<S: Send + 'static> Actor<S> {
    /// Create an actor with no routes.
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(state)),
            routes: Vec::new(),
            timers: Vec::new(),
        }
    }

    /// Handle every message matching `topic`.
    #[must_use]
    pub fn route<F>(mut self, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut S, &BusMessage) -> Result<Vec<Envelope>, MessageError> + Send + Sync + 'static,
    {
        self.routes.push(Route {
            topic: topic.into(),
            handler: Box::new(handler),
        });
        self
    }

    /// Run `handler` every `period`.
    #[must_use]
    pub fn every<F>(mut self, period: Duration, handler: F) -> Self
    where
        F: Fn(&mut S) -> Vec<Envelope> + Send + Sync + 'static,
    {
        self.timers.push(Timer {
            period,
            handler: Box::new(handler),
        });
        self
    }

    /// Shared handle to the actor state.
    pub fn state(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.state)
    }

    /// Subscribe every route, then spawn one task per route and timer.
    ///
    /// All subscriptions are active when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Subscribe`] if any subscription fails.
    pub async fn spawn(self, bus: Arc<dyn Bus>) -> Result<Vec<JoinHandle<()>>, BusError> {
        let mut handles = Vec::with_capacity(self.routes.len().saturating_add(self.timers.len()));
        let name: Arc<str> = Arc::from(self.name);

        for route in self.routes {
            let mut subscription = bus.subscribe(route.topic.clone()).await?;
            debug!(actor = %name, topic = route.topic, "route subscribed");
            let state = Arc::clone(&self.state);
            let bus = Arc::clone(&bus);
            let name = Arc::clone(&name);
            handles.push(tokio::spawn(async move {
                while let Some(message) = subscription.next().await {
                    let outcome = {
                        let mut guard = state.lock().await;
                        (route.handler)(&mut *guard, &message)
                    };
                    match outcome {
                        Ok(envelopes) => publish_all(bus.as_ref(), envelopes).await,
                        Err(e) => warn!(actor = %name, error = %e, "message dropped"),
                    }
                }
                debug!(actor = %name, topic = route.topic, "subscription closed");
            }));
        }

        for timer in self.timers {
            let state = Arc::clone(&self.state);
            let bus = Arc::clone(&bus);
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(timer.period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    let envelopes = {
                        let mut guard = state.lock().await;
                        (timer.handler)(&mut *guard)
                    };
                    publish_all(bus.as_ref(), envelopes).await;
                }
            }));
        }

        Ok(handles)
    }
}

impl<S> std::fmt::Debug for Actor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field(
                "routes",
                &self.routes.iter().map(|r| r.topic.as_str()).collect::<Vec<_>>(),
            )
            .field("timers", &self.timers.len())
            .finish()
    }
}

/// Collect envelopes, logging and skipping any that failed to encode.
pub fn collect_envelopes(
    envelopes: impl IntoIterator<Item = Result<Envelope, MessageError>>,
) -> Vec<Envelope> {
    envelopes
        .into_iter()
        .filter_map(|envelope| match envelope {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!(error = %e, "outgoing message dropped");
                None
            }
        })
        .collect()
}
