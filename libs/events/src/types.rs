//! Canonical event definitions for the replication saga.
//!
//! Every hop of the saga exchanges a single [`Event`] record. Field names on
//! the wire are PascalCase to stay compatible with the message bus payloads
//! already in flight.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::arn::Arn;
use crate::error::EventError;
use crate::tags::TagList;

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    pub const SNAPSHOT_CREATED: &str = "snapshot-created";
    pub const SNAPSHOT_COPY_REQUEST: &str = "snapshot-copy-request";
    pub const SNAPSHOT_COPY_INITIATE: &str = "snapshot-copy-initiate";
    pub const SNAPSHOT_COPY_COMPLETED: &str = "snapshot-copy-completed";
    pub const SNAPSHOT_COPY_SHARED: &str = "snapshot-copy-shared";
    pub const SNAPSHOT_DELETE_SHARED: &str = "snapshot-delete-shared";
    pub const SNAPSHOT_NO_COPY: &str = "snapshot-no-copy";
}

/// Subject used for every saga message on the bus.
pub const SAGA_SUBJECT: &str = "DRACO Event";

// =============================================================================
// Snapshot Type
// =============================================================================

/// Kind of snapshot being replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SnapshotType {
    /// Database instance snapshot.
    DatabaseInstance,
    /// Database cluster snapshot.
    DatabaseCluster,
    /// Block volume snapshot.
    Volume,
}

impl SnapshotType {
    pub const ALL: [SnapshotType; 3] = [
        SnapshotType::DatabaseInstance,
        SnapshotType::DatabaseCluster,
        SnapshotType::Volume,
    ];

    /// Wire tag used in saga messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::DatabaseInstance => "RDS",
            SnapshotType::DatabaseCluster => "RDS Cluster",
            SnapshotType::Volume => "EBS",
        }
    }

    /// Resource type component of this kind's arns.
    pub fn arn_resource_type(&self) -> &'static str {
        match self {
            SnapshotType::DatabaseInstance | SnapshotType::Volume => "snapshot",
            SnapshotType::DatabaseCluster => "cluster-snapshot",
        }
    }

    /// Returns true for the database kinds (instance or cluster).
    pub fn is_database(&self) -> bool {
        !matches!(self, SnapshotType::Volume)
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RDS" => Ok(SnapshotType::DatabaseInstance),
            "RDS Cluster" => Ok(SnapshotType::DatabaseCluster),
            "EBS" => Ok(SnapshotType::Volume),
            other => Err(EventError::UnknownSnapshotType(other.to_string())),
        }
    }
}

impl Serialize for SnapshotType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SnapshotType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Event Type
// =============================================================================

/// Tag identifying a saga hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A new snapshot exists in the source account (normalised notification).
    SnapshotCreated,
    /// Producer asks the consumer whether and how to copy.
    SnapshotCopyRequest,
    /// Consumer tells the producer to start the transit copy.
    SnapshotCopyInitiate,
    /// A copy (transit or DR) reached a terminal state.
    SnapshotCopyCompleted,
    /// Producer shared the transit copy with the DR account.
    SnapshotCopyShared,
    /// Consumer asks the producer to delete the transit copy.
    SnapshotDeleteShared,
    /// Consumer declined to copy this snapshot.
    SnapshotNoCopy,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        use event_types::*;
        match self {
            EventType::SnapshotCreated => SNAPSHOT_CREATED,
            EventType::SnapshotCopyRequest => SNAPSHOT_COPY_REQUEST,
            EventType::SnapshotCopyInitiate => SNAPSHOT_COPY_INITIATE,
            EventType::SnapshotCopyCompleted => SNAPSHOT_COPY_COMPLETED,
            EventType::SnapshotCopyShared => SNAPSHOT_COPY_SHARED,
            EventType::SnapshotDeleteShared => SNAPSHOT_DELETE_SHARED,
            EventType::SnapshotNoCopy => SNAPSHOT_NO_COPY,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use event_types::*;
        match s {
            SNAPSHOT_CREATED => Ok(EventType::SnapshotCreated),
            SNAPSHOT_COPY_REQUEST => Ok(EventType::SnapshotCopyRequest),
            SNAPSHOT_COPY_INITIATE => Ok(EventType::SnapshotCopyInitiate),
            SNAPSHOT_COPY_COMPLETED => Ok(EventType::SnapshotCopyCompleted),
            SNAPSHOT_COPY_SHARED => Ok(EventType::SnapshotCopyShared),
            SNAPSHOT_DELETE_SHARED => Ok(EventType::SnapshotDeleteShared),
            SNAPSHOT_NO_COPY => Ok(EventType::SnapshotNoCopy),
            other => Err(EventError::UnknownEventType(other.to_string())),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Event
// =============================================================================

/// The canonical saga message.
///
/// Handlers never edit a received event in place across a publish
/// boundary: [`Event::next`] and the `with_*` methods consume or clone and
/// return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    pub event_type: EventType,

    pub snapshot_type: SnapshotType,

    /// Identifier of the production snapshot, derived from `SourceArn`.
    #[serde(default)]
    pub source_id: String,

    /// Arn of the production snapshot.
    pub source_arn: String,

    /// Logical owner: instance, cluster or volume identifier.
    #[serde(default)]
    pub source_name: String,

    #[serde(default)]
    pub encrypted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_kms_id: Option<String>,

    /// DR-owned key chosen by the consumer for this source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_kms_id: Option<String>,

    /// Intermediate copy in the source account, once it exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit_arn: Option<String>,

    /// DR-owned copy, once it exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default)]
    pub tag_list: TagList,

    /// Why the consumer declined to copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Diagnostic carried by compensating messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    /// Creates an event for a source snapshot; `SourceId` is derived from the arn.
    pub fn new(
        event_type: EventType,
        snapshot_type: SnapshotType,
        source_arn: impl Into<String>,
    ) -> Result<Self, EventError> {
        let source_arn = source_arn.into();
        let source_id = Arn::parse(&source_arn)?.resource_id().to_string();
        Ok(Self {
            event_type,
            snapshot_type,
            source_id,
            source_arn,
            source_name: String::new(),
            encrypted: false,
            source_kms_id: None,
            target_kms_id: None,
            transit_id: None,
            transit_arn: None,
            target_id: None,
            target_arn: None,
            region: None,
            tag_list: TagList::new(),
            reason: None,
            error: None,
        })
    }

    /// Decodes a saga message body, deriving `SourceId` from `SourceArn`.
    pub fn decode(message: &str) -> Result<Self, EventError> {
        let mut event: Event = serde_json::from_str(message)
            .map_err(|e| EventError::InvalidPayload(e.to_string()))?;
        event.source_id = Arn::parse(&event.source_arn)?.resource_id().to_string();
        Ok(event)
    }

    /// Encodes the event as a saga message body.
    pub fn encode(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Derives the event for the next hop, keeping every field.
    #[must_use]
    pub fn next(&self, event_type: EventType) -> Event {
        Event {
            event_type,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    #[must_use]
    pub fn with_encryption(mut self, source_kms_id: Option<String>) -> Self {
        self.encrypted = source_kms_id.is_some();
        self.source_kms_id = source_kms_id;
        self
    }

    #[must_use]
    pub fn with_target_kms_id(mut self, key_id: impl Into<String>) -> Self {
        self.target_kms_id = Some(key_id.into());
        self
    }

    #[must_use]
    pub fn with_transit(mut self, id: impl Into<String>, arn: impl Into<String>) -> Self {
        self.transit_id = Some(id.into());
        self.transit_arn = Some(arn.into());
        self
    }

    #[must_use]
    pub fn with_target(mut self, id: impl Into<String>, arn: impl Into<String>) -> Self {
        self.target_id = Some(id.into());
        self.target_arn = Some(arn.into());
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagList) -> Self {
        self.tag_list = tags;
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Identifier of the transit copy, from `TransitId` or parsed from `TransitArn`.
    pub fn transit_snapshot_id(&self) -> Option<String> {
        if let Some(id) = &self.transit_id {
            return Some(id.clone());
        }
        let arn = self.transit_arn.as_deref()?;
        Arn::parse(arn).ok().map(|a| a.resource_id().to_string())
    }

    /// Account that owns the production snapshot.
    pub fn source_account(&self) -> Option<String> {
        Arn::parse(&self.source_arn)
            .ok()
            .map(|a| a.account().to_string())
            .filter(|a| !a.is_empty())
    }
}
