//! Topic-addressed publish/subscribe channel abstraction.
//!
//! The coordinator and the cadence generator each own exactly one channel
//! handle for their lifetime. The trait keeps the transport injectable so
//! runs and tests can use the in-process [`LocalChannel`] while deployments
//! plug in a broker-backed implementation.

use crate::event::{Event, SenderExt};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::warn;

/// Buffer size for per-topic fan-out and subscription queues.
const DEFAULT_TOPIC_BUFFER_SIZE: usize = 1024;

/// Errors that can occur during channel operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to publish an event to a topic.
    #[error("Failed to publish to topic {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Failed to subscribe to a topic.
    #[error("Failed to subscribe to topic {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A live subscription to one topic.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Event>) -> Self {
        Subscription { rx }
    }

    /// Receives the next event; `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Bounded receive: `None` when `wait` elapses with no event, or when
    /// the subscription is closed.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<Event> {
        tokio::time::timeout(wait, self.rx.recv()).await.ok().flatten()
    }
}

/// Publish/subscribe by exact topic name.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), Error>;
    async fn subscribe(&self, topic: &str) -> Result<Subscription, Error>;
}

/// In-process channel backed by per-topic broadcast fan-out.
///
/// Events published to a topic with no subscribers are dropped, matching
/// broker pub/sub semantics.
#[derive(Debug, Default)]
pub struct LocalChannel {
    topics: Mutex<HashMap<String, broadcast::Sender<Event>>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<Event> {
        self.topics
            .lock()
            .await
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(DEFAULT_TOPIC_BUFFER_SIZE).0)
            .clone()
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), Error> {
        // A send error only means no subscriber is listening right now.
        let _ = self.sender(topic).await.send_with_logging(event.clone());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, Error> {
        let mut rx = self.sender(topic).await.subscribe();
        let (tx, out) = mpsc::channel(DEFAULT_TOPIC_BUFFER_SIZE);
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Subscription to {} lagged; {} events dropped", topic, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(out))
    }
}
