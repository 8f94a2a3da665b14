//! Event types for publishing visit and control messages.
//!
//! Provides the canonical event structure, subject helpers and logging
//! send support for the in-process broadcast path.

use crate::metadata::Metadata;
use chrono::Utc;
use tracing::info;

/// Default log message emitted when an event is handed to a channel.
pub const DEFAULT_LOG_MESSAGE: &str = "Event sent";

/// Errors that can occur while constructing events.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Required builder attribute was not provided.
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
}

/// Canonical event: an ordered key-value payload addressed to a topic.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Event {
    /// Subject (topic) the event is addressed to.
    pub subject: String,
    /// Ordered canonical field record.
    pub payload: Metadata,
    /// Optional unique identifier for the event.
    pub id: Option<String>,
    /// Event creation timestamp in microseconds since Unix epoch.
    pub timestamp: i64,
}

impl Event {
    /// Reads a payload field as an unsigned integer, if present and numeric.
    pub fn field_u64(&self, name: &str) -> Option<u64> {
        self.payload.get(name).and_then(serde_json::Value::as_u64)
    }
}

/// Extension trait for broadcast senders with automatic event logging.
pub trait SenderExt {
    /// Sends an event and logs its subject.
    fn send_with_logging(
        &self,
        event: Event,
    ) -> Result<usize, tokio::sync::broadcast::error::SendError<Event>>;
}

impl SenderExt for tokio::sync::broadcast::Sender<Event> {
    fn send_with_logging(
        &self,
        event: Event,
    ) -> Result<usize, tokio::sync::broadcast::error::SendError<Event>> {
        let subject = event.subject.clone();
        let result = self.send(event)?;
        info!("{}: {}", DEFAULT_LOG_MESSAGE, subject);
        Ok(result)
    }
}

/// Builds the topic for one exposure of a visit.
///
/// Exposure-0 and exposure-1 events route to `<root>0` and `<root>1`; the
/// parity must come from the exposure sequence number carried in the
/// payload, not from loop position.
pub fn exposure_topic(root_topic: &str, parity: u64) -> String {
    format!("{}{}", root_topic, parity & 1)
}

/// Builder for constructing Event instances with validation.
#[derive(Default, Debug)]
pub struct EventBuilder {
    payload: Option<Metadata>,
    subject: Option<String>,
    id: Option<String>,
    timestamp: i64,
}

impl EventBuilder {
    pub fn new() -> Self {
        EventBuilder {
            timestamp: Utc::now().timestamp_micros(),
            ..Default::default()
        }
    }

    pub fn payload(mut self, payload: Metadata) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn subject(mut self, subject: String) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn id(mut self, id: String) -> Self {
        self.id = Some(id);
        self
    }

    pub fn time(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn build(self) -> Result<Event, Error> {
        Ok(Event {
            payload: self
                .payload
                .ok_or_else(|| Error::MissingRequiredAttribute("payload".to_string()))?,
            subject: self
                .subject
                .ok_or_else(|| Error::MissingRequiredAttribute("subject".to_string()))?,
            id: self.id,
            timestamp: self.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn sample_payload() -> Metadata {
        let mut payload = Metadata::new();
        payload.insert("visitId".to_string(), json!(871034));
        payload.insert("exposureId".to_string(), json!(1));
        payload
    }

    #[test]
    fn test_event_builder_success() {
        let event = EventBuilder::new()
            .payload(sample_payload())
            .subject("visit.trigger1".to_string())
            .id("event-1".to_string())
            .build()
            .unwrap();

        assert_eq!(event.subject, "visit.trigger1");
        assert_eq!(event.id, Some("event-1".to_string()));
        assert!(event.timestamp > 0);
        assert_eq!(event.payload.get("visitId"), Some(&json!(871034)));
    }

    #[test]
    fn test_event_builder_missing_payload() {
        let result = EventBuilder::new()
            .subject("visit.trigger0".to_string())
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Missing required attribute: payload"));
    }

    #[test]
    fn test_event_builder_missing_subject() {
        let result = EventBuilder::new().payload(sample_payload()).build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Missing required attribute: subject"));
    }

    #[test]
    fn test_field_u64() {
        let mut payload = sample_payload();
        payload.insert("filter".to_string(), Value::String("r".to_string()));
        let event = EventBuilder::new()
            .payload(payload)
            .subject("visit.trigger0".to_string())
            .build()
            .unwrap();

        assert_eq!(event.field_u64("exposureId"), Some(1));
        assert_eq!(event.field_u64("filter"), None);
        assert_eq!(event.field_u64("absent"), None);
    }

    #[test]
    fn test_exposure_topic_parity() {
        assert_eq!(exposure_topic("visit.trigger", 0), "visit.trigger0");
        assert_eq!(exposure_topic("visit.trigger", 1), "visit.trigger1");
        // Only the low bit of the sequence number selects the suffix.
        assert_eq!(exposure_topic("visit.trigger", 3), "visit.trigger1");
    }
}
