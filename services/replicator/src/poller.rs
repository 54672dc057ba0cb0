//! Completion poller.
//!
//! One stateless check per invocation; iteration bookkeeping is carried in
//! the request and echoed back so the orchestrator can loop on it.

use draco_events::SnapshotType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::provider::{SnapshotServices, SnapshotStatus};

/// Iteration state round-tripped through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollIterator {
    pub count: u32,
    pub maxcount: u32,
    #[serde(default)]
    pub exhausted: bool,
}

impl PollIterator {
    pub fn start(maxcount: u32) -> Self {
        Self {
            count: 0,
            maxcount,
            exhausted: false,
        }
    }

    /// The iterator after one more poll.
    pub fn advance(&self) -> Self {
        let count = self.count.saturating_add(1);
        Self {
            count,
            maxcount: self.maxcount,
            exhausted: count >= self.maxcount,
        }
    }
}

/// Poll request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRequest {
    #[serde(rename = "SnapshotType")]
    pub snapshot_type: SnapshotType,
    #[serde(rename = "SourceArn", default)]
    pub source_arn: String,
    pub iterator: PollIterator,
}

/// Poll response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterator: Option<PollIterator>,
    pub status: Option<SnapshotStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollResponse {
    pub fn failed(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            status_code,
            iterator: None,
            status: None,
            info: None,
            error: Some(error.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == 404
    }
}

/// Reports whether a snapshot has reached a terminal state.
#[derive(Clone)]
pub struct Poller {
    services: SnapshotServices,
}

impl Poller {
    pub fn new(services: SnapshotServices) -> Self {
        Self { services }
    }

    #[instrument(skip(self, request), fields(snapshot_type = %request.snapshot_type, source_arn = %request.source_arn))]
    pub async fn check(&self, request: &PollRequest) -> PollResponse {
        let iterator = request.iterator.advance();
        if request.source_arn.is_empty() {
            return PollResponse::failed(500, "SourceArn not provided".to_string());
        }

        debug!(count = iterator.count, maxcount = iterator.maxcount, "Checking snapshot");
        let store = self.services.for_kind(request.snapshot_type);
        match store.describe(&request.source_arn).await {
            Ok(description) => {
                let status = description.snapshot.status;
                info!(status = status.as_str(), count = iterator.count, "Snapshot status");
                PollResponse {
                    status_code: 200,
                    iterator: Some(iterator),
                    status: Some(status),
                    info: serde_json::to_value(&description).ok(),
                    error: None,
                }
            }
            Err(e) if e.is_not_found() => {
                debug!(error = %e, "Snapshot not visible yet");
                PollResponse::failed(404, e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Snapshot check failed");
                PollResponse::failed(500, e.to_string())
            }
        }
    }
}
