//! Message bus capability and the loopback bus of the local platform.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use draco_events::{Event, EventError, SAGA_SUBJECT};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("could not encode event: {0}")]
    Encode(#[from] EventError),

    #[error("publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },
}

/// One message as handed to the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic_arn: String,
    pub subject: String,
    pub message: String,
}

impl Publication {
    /// Decodes a saga message body.
    pub fn event(&self) -> Result<Event, EventError> {
        Event::decode(&self.message)
    }
}

/// Publish/subscribe capability.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message and return its id.
    async fn publish(&self, publication: Publication) -> Result<String, BusError>;
}

/// Publishes a saga event to `topic_arn`.
pub async fn publish_event(
    bus: &dyn MessageBus,
    topic_arn: &str,
    event: &Event,
) -> Result<String, BusError> {
    let publication = Publication {
        topic_arn: topic_arn.to_string(),
        subject: SAGA_SUBJECT.to_string(),
        message: event.encode()?,
    };
    let message_id = bus.publish(publication).await?;
    info!(
        event_type = %event.event_type,
        snapshot_type = %event.snapshot_type,
        source_arn = %event.source_arn,
        topic = %topic_arn,
        message_id = %message_id,
        "Published"
    );
    Ok(message_id)
}

/// In-process bus: records every publication and forwards it to a channel
/// when one is attached.
pub struct LoopbackBus {
    tx: Option<mpsc::UnboundedSender<Publication>>,
    published: Mutex<Vec<Publication>>,
}

impl LoopbackBus {
    /// A bus that only records.
    pub fn recording() -> Self {
        Self {
            tx: None,
            published: Mutex::new(Vec::new()),
        }
    }

    /// A bus that records and forwards to the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Publication>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Self {
            tx: Some(tx),
            published: Mutex::new(Vec::new()),
        };
        (bus, rx)
    }

    fn log(&self) -> MutexGuard<'_, Vec<Publication>> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn published(&self) -> Vec<Publication> {
        self.log().clone()
    }

    /// Decoded events published to `topic_arn`, in order.
    pub fn events_on(&self, topic_arn: &str) -> Vec<Event> {
        self.log()
            .iter()
            .filter(|p| p.topic_arn == topic_arn)
            .filter_map(|p| p.event().ok())
            .collect()
    }
}

#[async_trait]
impl MessageBus for LoopbackBus {
    async fn publish(&self, publication: Publication) -> Result<String, BusError> {
        let message_id = Uuid::new_v4().to_string();
        debug!(topic = %publication.topic_arn, message = %publication.message, "Loopback publish");
        self.log().push(publication.clone());
        if let Some(tx) = &self.tx {
            tx.send(publication).map_err(|e| BusError::Publish {
                topic: e.0.topic_arn,
                message: "no subscriber".to_string(),
            })?;
        }
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draco_events::{EventType, SnapshotType};

    const TOPIC: &str = "arn:aws:sns:us-east-1:111111111111:DracoConsumer";

    fn event() -> Event {
        Event::new(
            EventType::SnapshotCopyRequest,
            SnapshotType::DatabaseInstance,
            "arn:aws:rds:us-east-1:222222222222:snapshot:orders-1",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_event_records_and_forwards() {
        let (bus, mut rx) = LoopbackBus::channel();
        publish_event(&bus, TOPIC, &event()).await.unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.subject, SAGA_SUBJECT);
        assert_eq!(delivered.event().unwrap(), event());
        assert_eq!(bus.events_on(TOPIC), vec![event()]);
        assert!(bus.events_on("other").is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_fails_publish() {
        let (bus, rx) = LoopbackBus::channel();
        drop(rx);
        let err = publish_event(&bus, TOPIC, &event()).await.unwrap_err();
        assert!(matches!(err, BusError::Publish { .. }));
    }
}
