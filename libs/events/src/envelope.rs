//! Inbound envelopes and the event normaliser.
//!
//! Three shapes arrive at the handlers:
//!
//! - bus notifications (`Records[0].Sns`) whose subject selects the parse
//!   path: native database lifecycle notifications or saga messages
//! - scheduled-backup notifications (`version = "0"`) for volume snapshots
//!
//! All of them are reduced to one [`Event`] or acknowledged as
//! [`Inbound::Informational`]. Normalisation has no side effects.

use serde::{Deserialize, Serialize};

use crate::arn::Arn;
use crate::error::EventError;
use crate::types::{Event, EventType, SnapshotType, SAGA_SUBJECT};

/// Subject of native database lifecycle notifications.
pub const RDS_NOTIFICATION_SUBJECT: &str = "RDS Notification Message";

/// Event source tag of bus-delivered records.
pub const BUS_EVENT_SOURCE: &str = "aws:sns";

/// Result of normalising one inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A canonical saga event.
    Event(Event),
    /// A well-formed notification that requires no action.
    Informational(String),
}

/// Bus delivery wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BusEnvelope {
    pub records: Vec<BusRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BusRecord {
    pub event_source: String,
    pub sns: BusMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BusMessage {
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub topic_arn: String,
}

impl BusEnvelope {
    /// Wraps a saga message body the way the bus delivers it.
    pub fn saga(topic_arn: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            records: vec![BusRecord {
                event_source: BUS_EVENT_SOURCE.to_string(),
                sns: BusMessage {
                    subject: Some(SAGA_SUBJECT.to_string()),
                    message: message.into(),
                    topic_arn: topic_arn.into(),
                },
            }],
        }
    }
}

/// Body of a native database lifecycle notification.
#[derive(Debug, Deserialize)]
struct DatabaseNotification {
    #[serde(rename = "Event ID")]
    event_id: String,
    #[serde(rename = "Source ID")]
    source_id: String,
}

/// Scheduled-backup notification.
#[derive(Debug, Deserialize)]
struct ScheduledNotification {
    version: String,
    source: String,
    detail: ScheduledDetail,
}

#[derive(Debug, Deserialize)]
struct ScheduledDetail {
    event: String,
    #[serde(default)]
    result: Option<String>,
    snapshot_id: String,
    #[serde(default)]
    source: Option<String>,
}

/// Normalises a raw inbound notification into a canonical event.
pub fn normalize(raw: &serde_json::Value) -> Result<Inbound, EventError> {
    if raw.get("Records").is_some() {
        let envelope: BusEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| EventError::UnrecognizedInput(format!("malformed bus envelope: {e}")))?;
        return normalize_bus(envelope);
    }

    if raw.get("version").and_then(|v| v.as_str()) == Some("0") {
        let notification: ScheduledNotification = serde_json::from_value(raw.clone())
            .map_err(|e| EventError::UnrecognizedInput(format!("malformed scheduled notification: {e}")))?;
        return normalize_scheduled(notification);
    }

    Err(EventError::UnrecognizedInput(
        "unrecognized input format".to_string(),
    ))
}

fn normalize_bus(envelope: BusEnvelope) -> Result<Inbound, EventError> {
    let Some(record) = envelope.records.into_iter().next() else {
        return Err(EventError::UnrecognizedInput("no records".to_string()));
    };
    if record.event_source != BUS_EVENT_SOURCE {
        return Err(EventError::UnrecognizedInput(format!(
            "unhandled source: {}",
            record.event_source
        )));
    }

    match record.sns.subject.as_deref() {
        Some(SAGA_SUBJECT) => Event::decode(&record.sns.message).map(Inbound::Event),
        Some(RDS_NOTIFICATION_SUBJECT) => {
            normalize_database(&record.sns.message, &record.sns.topic_arn)
        }
        other => Err(EventError::UnrecognizedInput(format!(
            "unhandled subject: {}",
            other.unwrap_or("<none>")
        ))),
    }
}

fn normalize_database(message: &str, topic_arn: &str) -> Result<Inbound, EventError> {
    // Subscription confirmations and test notices are plain text.
    if message.starts_with("This") {
        return Ok(Inbound::Informational(message.to_string()));
    }

    let notification: DatabaseNotification = serde_json::from_str(message)
        .map_err(|e| EventError::UnrecognizedInput(format!("malformed notification: {e}")))?;

    let code = notification
        .event_id
        .split_once('#')
        .map(|(_, code)| code)
        .unwrap_or(notification.event_id.as_str());
    if !is_database_event_code(code) {
        return Err(EventError::UnrecognizedInput(format!(
            "unhandled event type: {code}"
        )));
    }

    let (snapshot_type, automated) = match code {
        "RDS-EVENT-0091" => (SnapshotType::DatabaseInstance, true),
        "RDS-EVENT-0042" => (SnapshotType::DatabaseInstance, false),
        "RDS-EVENT-0169" => (SnapshotType::DatabaseCluster, true),
        "RDS-EVENT-0075" => (SnapshotType::DatabaseCluster, false),
        other => return Ok(Inbound::Informational(format!("ignored {other}"))),
    };

    let topic = Arn::parse(topic_arn)?;
    let source_arn = Arn::new(
        "rds",
        topic.region(),
        topic.account(),
        snapshot_type.arn_resource_type(),
        ':',
        notification.source_id.as_str(),
    );

    let name_hint = if automated {
        strip_automated_prefix(&notification.source_id)
    } else {
        notification.source_id.as_str()
    };

    let event = Event::new(EventType::SnapshotCreated, snapshot_type, source_arn.to_string())?
        .with_source_name(name_hint)
        .with_region(topic.region());
    Ok(Inbound::Event(event))
}

fn normalize_scheduled(notification: ScheduledNotification) -> Result<Inbound, EventError> {
    if notification.version != "0" {
        return Err(EventError::UnrecognizedInput(format!(
            "unsupported notification version {}",
            notification.version
        )));
    }

    let event_type = format!("{}.{}", notification.source, notification.detail.event);
    if event_type != "aws.ec2.createSnapshot" {
        return Ok(Inbound::Informational(format!("ignored {event_type}")));
    }
    if let Some(result) = notification.detail.result.as_deref() {
        if result != "succeeded" {
            return Ok(Inbound::Informational(format!(
                "snapshot creation {result}: {}",
                notification.detail.snapshot_id
            )));
        }
    }

    let snapshot = Arn::parse(&notification.detail.snapshot_id)?;
    let mut event = Event::new(
        EventType::SnapshotCreated,
        SnapshotType::Volume,
        notification.detail.snapshot_id.as_str(),
    )?;
    if let Some(region) = snapshot.effective_region() {
        event = event.with_region(region);
    }
    if let Some(volume) = notification.detail.source.as_deref() {
        let name = Arn::parse(volume)
            .map(|a| a.resource_id().to_string())
            .unwrap_or_else(|_| volume.to_string());
        event = event.with_source_name(name);
    }
    Ok(Inbound::Event(event))
}

/// Automated database snapshots are named `rds:{name}`.
pub fn strip_automated_prefix(snapshot_id: &str) -> &str {
    snapshot_id.strip_prefix("rds:").unwrap_or(snapshot_id)
}

fn is_database_event_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() >= 4 && bytes[bytes.len() - 4..].iter().all(u8::is_ascii_digit)
}
