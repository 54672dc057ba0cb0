//! Snapshot service capabilities.
//!
//! Each snapshot kind is served by one [`SnapshotStore`]; the saga and the
//! poller go through [`SnapshotServices`] and never match on the kind to pick
//! a call. Status vocabulary differs between kinds at the provider and is
//! normalised into [`SnapshotStatus`] here.

mod fallback;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draco_events::{SnapshotType, TagList};
use draco_retention::Dated;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fallback::{CopyStrategy, KeyFallback};

/// Errors returned by snapshot services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The snapshot does not exist (or is not visible to the caller).
    #[error("snapshot not found: {0}")]
    NotFound(String),

    /// The request was rejected as invalid, e.g. an encrypted copy of a
    /// plaintext cluster snapshot.
    #[error("invalid parameter value: {0}")]
    InvalidParameterValue(String),

    /// The caller may not act on the snapshot.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Any other failed request.
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    /// Short error name, as carried in compensating messages.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderError::NotFound(_) => "SnapshotNotFound",
            ProviderError::InvalidParameterValue(_) => "InvalidParameterValue",
            ProviderError::AccessDenied(_) => "AccessDenied",
            ProviderError::Request { .. } => "RequestFailed",
        }
    }
}

/// Snapshot status, normalised across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Available,
    Pending,
    Failed,
}

impl SnapshotStatus {
    /// Maps provider vocabulary onto the normalised status.
    ///
    /// Volume snapshots report `completed`/`error`, database snapshots
    /// `available`/`failed` plus a handful of transitional states.
    pub fn from_provider(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "available" | "completed" => SnapshotStatus::Available,
            "failed" | "error" | "incompatible-restore" | "incompatible-parameters" => {
                SnapshotStatus::Failed
            }
            _ => SnapshotStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Available => "available",
            SnapshotStatus::Pending => "pending",
            SnapshotStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SnapshotStatus::Pending)
    }
}

/// A concrete snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub kind: SnapshotType,
    pub id: String,
    pub arn: String,
    pub created_at: DateTime<Utc>,
    pub status: SnapshotStatus,
}

impl Dated for SnapshotRef {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Metadata returned by `describe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDescription {
    #[serde(flatten)]
    pub snapshot: SnapshotRef,

    /// Instance, cluster or volume the snapshot was taken from.
    pub source_name: String,

    /// Key the snapshot is encrypted under, if any.
    pub kms_key_id: Option<String>,
}

impl SnapshotDescription {
    pub fn encrypted(&self) -> bool {
        self.kms_key_id.is_some()
    }
}

/// Parameters of a copy call.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyRequest {
    /// Id or arn of the snapshot to copy.
    pub source: String,

    /// Identifier of the new snapshot. Volume snapshot ids are
    /// provider-generated, so this is ignored for volumes.
    pub target_id: Option<String>,

    /// Key for the copy; `None` keeps the source encryption.
    pub kms_key_id: Option<String>,

    /// Tags applied to the copy.
    pub tags: TagList,

    pub description: Option<String>,
}

impl CopyRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target_id: None,
            kms_key_id: None,
            tags: TagList::new(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_target_id(mut self, target_id: Option<String>) -> Self {
        self.target_id = target_id;
        self
    }

    #[must_use]
    pub fn with_key(mut self, kms_key_id: Option<String>) -> Self {
        self.kms_key_id = kms_key_id;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagList) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One page of snapshots owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPage {
    pub snapshots: Vec<OwnedSnapshot>,

    /// Marker for the next page; `None` on the last page.
    pub marker: Option<String>,
}

/// A snapshot owned by the caller, with the source it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedSnapshot {
    pub snapshot: SnapshotRef,
    pub source_name: String,
}

/// Snapshot service for one kind.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Kind served by this store.
    fn kind(&self) -> SnapshotType;

    /// Look up a snapshot by id or arn.
    async fn describe(&self, id_or_arn: &str) -> Result<SnapshotDescription, ProviderError>;

    /// Start a copy; the returned snapshot is usually still pending.
    async fn copy(&self, request: &CopyRequest) -> Result<SnapshotRef, ProviderError>;

    /// Allow another account to copy or restore the snapshot.
    async fn share(&self, id: &str, account: &str) -> Result<(), ProviderError>;

    /// Delete a snapshot owned by the caller.
    async fn delete(&self, id: &str) -> Result<(), ProviderError>;

    /// Tags on a snapshot.
    async fn list_tags(&self, id_or_arn: &str) -> Result<TagList, ProviderError>;

    /// Page through the snapshots owned by the caller.
    async fn list_owned(&self, marker: Option<&str>) -> Result<SnapshotPage, ProviderError>;
}

/// One store per snapshot kind.
#[derive(Clone)]
pub struct SnapshotServices {
    instances: Arc<dyn SnapshotStore>,
    clusters: Arc<dyn SnapshotStore>,
    volumes: Arc<dyn SnapshotStore>,
}

impl SnapshotServices {
    pub fn new(
        instances: Arc<dyn SnapshotStore>,
        clusters: Arc<dyn SnapshotStore>,
        volumes: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            instances,
            clusters,
            volumes,
        }
    }

    pub fn for_kind(&self, kind: SnapshotType) -> &Arc<dyn SnapshotStore> {
        match kind {
            SnapshotType::DatabaseInstance => &self.instances,
            SnapshotType::DatabaseCluster => &self.clusters,
            SnapshotType::Volume => &self.volumes,
        }
    }
}
