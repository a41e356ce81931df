//! NATS implementation of [`Bus`].

use futures::future::BoxFuture;
use futures::{FutureExt as _, StreamExt as _};
use tracing::{debug, info};

use crate::bus::{Bus, BusMessage, Subscription};
use crate::error::BusError;

/// Bus backed by a single NATS connection.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connect`] if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        info!(url = url, "connecting to NATS server");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connect {
                url: url.to_owned(),
                message: e.to_string(),
            })?;
        info!("NATS connection established");
        Ok(Self { client })
    }

    /// Wrap an already connected client.
    pub const fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

impl Bus for NatsBus {
    fn publish(&self, topic: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), BusError>> {
        async move {
            self.client
                .publish(topic.clone(), payload.into())
                .await
                .map_err(|e| BusError::Publish {
                    topic,
                    message: e.to_string(),
                })
        }
        .boxed()
    }

    fn subscribe(&self, pattern: String) -> BoxFuture<'_, Result<Subscription, BusError>> {
        async move {
            debug!(subject = pattern, "subscribing");
            let subscriber = self
                .client
                .subscribe(pattern.clone())
                .await
                .map_err(|e| BusError::Subscribe {
                    topic: pattern,
                    message: e.to_string(),
                })?;
            let stream = subscriber.map(|msg| BusMessage {
                topic: msg.subject.to_string(),
                payload: msg.payload.to_vec(),
            });
            Ok(stream.boxed())
        }
        .boxed()
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), BusError>> {
        async move {
            self.client.flush().await.map_err(|e| BusError::Flush {
                message: e.to_string(),
            })
        }
        .boxed()
    }
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("state", &self.client.connection_state())
            .finish()
    }
}
