//! NATS-backed implementation of the core channel abstraction.
//!
//! Events are published as JSON-encoded payload maps on plain NATS
//! subjects; subscriptions forward decoded messages into the core
//! subscription queue. Undecodable messages are dropped with a warning so
//! one malformed producer cannot wedge the coordinator's receive loop.

use async_trait::async_trait;
use futures::StreamExt;
use obsrun_core::event::{Event, EventBuilder};
use obsrun_core::metadata::Metadata;
use obsrun_core::transport::{Channel, Error, Subscription};
use tokio::sync::mpsc;
use tracing::warn;

/// Queue size for decoded inbound messages per subscription.
const SUBSCRIPTION_BUFFER_SIZE: usize = 1024;

/// Channel over a connected NATS client.
#[derive(Debug, Clone)]
pub struct NatsChannel {
    client: async_nats::Client,
}

impl NatsChannel {
    pub fn new(client: async_nats::Client) -> Self {
        NatsChannel { client }
    }
}

#[async_trait]
impl Channel for NatsChannel {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), Error> {
        let bytes = serde_json::to_vec(&event.payload).map_err(|source| Error::Publish {
            topic: topic.to_string(),
            source: Box::new(source),
        })?;

        self.client
            .publish(topic.to_string(), bytes.into())
            .await
            .map_err(|source| Error::Publish {
                topic: topic.to_string(),
                source: Box::new(source),
            })
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, Error> {
        let mut subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|source| Error::Subscribe {
                topic: topic.to_string(),
                source: Box::new(source),
            })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER_SIZE);
        let topic = topic.to_string();

        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let payload: Metadata = match serde_json::from_slice(&message.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Dropping undecodable message on {}: {}", topic, e);
                        continue;
                    }
                };

                let event = EventBuilder::new()
                    .payload(payload)
                    .subject(topic.clone())
                    .build();
                match event {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping message on {}: {}", topic, e),
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_round_trips_as_json() {
        let mut payload = Metadata::new();
        payload.insert("visitId".to_string(), json!(871034));
        payload.insert("filter".to_string(), json!("r"));

        let event = EventBuilder::new()
            .payload(payload.clone())
            .subject("visit.trigger0".to_string())
            .build()
            .unwrap();

        let bytes = serde_json::to_vec(&event.payload).unwrap();
        let decoded: Metadata = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }
}
