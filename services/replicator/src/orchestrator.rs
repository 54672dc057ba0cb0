//! Completion waits.
//!
//! A wait repeatedly invokes the [`Poller`] for one snapshot and, once the
//! snapshot reaches a terminal state, publishes the follow-up event. When the
//! copy fails or polling is exhausted the follow-up is still delivered, with
//! `Error` set, so the receiving role compensates instead of waiting forever.

use std::sync::Arc;

use async_trait::async_trait;
use draco_events::{Event, SnapshotType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::bus::{publish_event, MessageBus};
use crate::config::PollConfig;
use crate::poller::{PollIterator, PollRequest, Poller};
use crate::provider::SnapshotStatus;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("workflow {workflow} rejected execution: {message}")]
    Rejected { workflow: String, message: String },
}

/// Input of one wait execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitRequest {
    pub snapshot_type: SnapshotType,

    /// Arn of the snapshot being created.
    pub arn: String,

    /// Event delivered when the wait ends.
    pub then: Event,

    /// Topic the follow-up event is published to.
    pub notify_topic: String,
}

/// Workflow orchestration capability.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Starts a wait and returns the execution name.
    async fn start_wait(&self, request: WaitRequest) -> Result<String, OrchestratorError>;
}

/// Orchestrator of the local platform: one tokio task per wait.
pub struct LocalOrchestrator {
    workflow_arn: String,
    poller: Poller,
    bus: Arc<dyn MessageBus>,
    poll: PollConfig,
    accepting: bool,
}

impl LocalOrchestrator {
    pub fn new(
        workflow_arn: impl Into<String>,
        poller: Poller,
        bus: Arc<dyn MessageBus>,
        poll: PollConfig,
    ) -> Self {
        Self {
            workflow_arn: workflow_arn.into(),
            poller,
            bus,
            poll,
            accepting: true,
        }
    }

    /// An orchestrator that rejects every execution.
    pub fn rejecting(mut self) -> Self {
        self.accepting = false;
        self
    }
}

#[async_trait]
impl Orchestrator for LocalOrchestrator {
    async fn start_wait(&self, request: WaitRequest) -> Result<String, OrchestratorError> {
        if !self.accepting {
            return Err(OrchestratorError::Rejected {
                workflow: self.workflow_arn.clone(),
                message: "executions disabled".to_string(),
            });
        }

        let execution = Uuid::new_v4().to_string();
        info!(
            workflow = %self.workflow_arn,
            execution = %execution,
            snapshot_type = %request.snapshot_type,
            arn = %request.arn,
            "Started wait4copy"
        );

        let span = tracing::info_span!("wait4copy", execution = %execution);
        let poller = self.poller.clone();
        let bus = self.bus.clone();
        let poll = self.poll;
        tokio::spawn(
            async move {
                let outcome = wait_for(&poller, &request, poll).await;
                let then = match outcome {
                    Ok(()) => request.then,
                    Err(reason) => {
                        warn!(arn = %request.arn, reason = %reason, "Wait ended without a copy");
                        request.then.with_error(reason)
                    }
                };
                if let Err(e) = publish_event(bus.as_ref(), &request.notify_topic, &then).await {
                    error!(error = %e, "Failed to deliver wait result");
                }
            }
            .instrument(span),
        );

        Ok(execution)
    }
}

/// Polls until the snapshot is available; any other ending is an error
/// message for the follow-up event.
async fn wait_for(poller: &Poller, request: &WaitRequest, poll: PollConfig) -> Result<(), String> {
    let mut iterator = PollIterator::start(poll.max_iterations);
    loop {
        tokio::time::sleep(poll.interval).await;
        let response = poller
            .check(&PollRequest {
                snapshot_type: request.snapshot_type,
                source_arn: request.arn.clone(),
                iterator,
            })
            .await;

        // Not-found responses carry no iterator; count them here.
        iterator = response.iterator.unwrap_or_else(|| iterator.advance());
        match (response.status_code, response.status) {
            (200, Some(SnapshotStatus::Available)) => return Ok(()),
            (200, Some(SnapshotStatus::Failed)) => {
                return Err(format!("Copy failed: {} entered failed state", request.arn))
            }
            (200, _) | (404, _) if !iterator.exhausted => continue,
            (200, _) | (404, _) => {
                return Err(format!(
                    "Copy timed out: {} not available after {} checks",
                    request.arn, iterator.count
                ))
            }
            (_, _) => {
                return Err(format!(
                    "Copy check failed: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                ))
            }
        }
    }
}
