//! Producer role.
//!
//! Runs in the source account. It turns new-snapshot notifications into copy
//! requests, creates the transit copy when the consumer asks for it, shares
//! it with the DR account and deletes it again once the consumer is done.

use std::sync::Arc;

use draco_events::{normalize, strip_automated_prefix, Event, EventType, Inbound, SnapshotType, TagList};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{publish_event, MessageBus};
use crate::config::Config;
use crate::error::{HandlerResponse, SagaError};
use crate::orchestrator::{Orchestrator, WaitRequest};
use crate::provider::{CopyRequest, CopyStrategy, SnapshotServices, SnapshotStore};
use crate::saga::{transition, Action, Role, StepOutcome, Transition};

/// Suffix of database transit copy identifiers.
pub const TRANSIT_SUFFIX: &str = "-dr";

/// Identifier of the transit copy of a database snapshot.
pub fn transit_id_for(snapshot_type: SnapshotType, source_id: &str) -> Option<String> {
    snapshot_type
        .is_database()
        .then(|| format!("{}{TRANSIT_SUFFIX}", strip_automated_prefix(source_id)))
}

pub struct Producer {
    config: Arc<Config>,
    services: SnapshotServices,
    bus: Arc<dyn MessageBus>,
    orchestrator: Arc<dyn Orchestrator>,
}

impl Producer {
    pub fn new(
        config: Arc<Config>,
        services: SnapshotServices,
        bus: Arc<dyn MessageBus>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        Self {
            config,
            services,
            bus,
            orchestrator,
        }
    }

    /// Handles one raw inbound notification.
    #[instrument(skip_all, fields(role = "producer"))]
    pub async fn handle(&self, raw: &Value) -> HandlerResponse {
        debug!(raw = %raw, "Incoming event");
        let result = match normalize(raw) {
            Ok(Inbound::Event(event)) => self.process(event).await,
            Ok(Inbound::Informational(reason)) => {
                info!(reason = %reason, "Informational notification");
                Ok(StepOutcome::Ignored { reason })
            }
            Err(e) => {
                error!(raw = %raw, "Raw event");
                Err(e.into())
            }
        };
        HandlerResponse::from_result(result)
    }

    /// Performs the producer step for a normalised event.
    pub async fn process(&self, event: Event) -> Result<StepOutcome, SagaError> {
        debug!(event = ?event, "Normalized event");
        let step = transition(Role::Producer, &event)?;
        match step.action {
            Action::RequestCopy => self.request_copy(event, &step).await,
            Action::StartTransitCopy => self.start_transit_copy(event, &step).await,
            Action::ShareTransit => self.share_transit(event, &step).await,
            Action::DiscardTransit => self.discard_transit(event).await,
            Action::DeleteTransit => self.delete_transit(event, &step).await,
            Action::AcknowledgeNoCopy => {
                info!(
                    source_arn = %event.source_arn,
                    reason = event.reason.as_deref().unwrap_or(""),
                    "Copy declined"
                );
                Ok(StepOutcome::Completed { state: step.to })
            }
            _ => Err(SagaError::Unhandled {
                role: Role::Producer,
                event_type: event.event_type,
            }),
        }
    }

    fn store(&self, kind: SnapshotType) -> &Arc<dyn SnapshotStore> {
        self.services.for_kind(kind)
    }

    async fn publish(
        &self,
        event: &Event,
        step: &Transition,
    ) -> Result<StepOutcome, SagaError> {
        publish_event(self.bus.as_ref(), &self.config.dr_topic_arn, event).await?;
        Ok(StepOutcome::Published {
            event_type: event.event_type.to_string(),
            state: step.to,
        })
    }

    async fn request_copy(&self, event: Event, step: &Transition) -> Result<StepOutcome, SagaError> {
        let store = self.store(event.snapshot_type);
        let description = store.describe(&event.source_arn).await?;
        let tags = store.list_tags(&event.source_arn).await?.without_reserved();

        let source_name = if description.source_name.is_empty() {
            event.source_name.clone()
        } else {
            description.source_name.clone()
        };
        let request = event
            .next(EventType::SnapshotCopyRequest)
            .with_source_name(source_name)
            .with_encryption(description.kms_key_id)
            .with_tags(tags);
        self.publish(&request, step).await
    }

    async fn start_transit_copy(&self, event: Event, step: &Transition) -> Result<StepOutcome, SagaError> {
        let kind = event.snapshot_type;
        let store = self.store(kind);

        // Encrypted cluster copies of plaintext sources are rejected by the provider.
        let key = if kind == SnapshotType::DatabaseCluster && !event.encrypted {
            None
        } else {
            self.config
                .transit_key_arn
                .clone()
                .or_else(|| event.target_kms_id.clone())
        };
        let request = CopyRequest::new(event.source_arn.clone())
            .with_target_id(transit_id_for(kind, &event.source_id))
            .with_key(key)
            .with_tags(event.tag_list.clone())
            .with_description(format!(
                "Draco transient snapshot of {} from {}",
                event.source_name, event.source_id
            ));
        let transit = CopyStrategy::for_kind(kind)
            .copy(store.as_ref(), request)
            .await?;
        info!(
            snapshot_type = %kind,
            source_id = %event.source_id,
            transit_id = %transit.id,
            "Initiated transit copy"
        );

        let then = event
            .next(EventType::SnapshotCopyCompleted)
            .with_transit(transit.id.clone(), transit.arn.clone());
        let wait = WaitRequest {
            snapshot_type: kind,
            arn: transit.arn.clone(),
            then,
            notify_topic: self.config.producer_topic_arn.clone(),
        };
        match self.orchestrator.start_wait(wait).await {
            Ok(execution) => Ok(StepOutcome::WaitStarted {
                execution,
                state: step.to,
            }),
            Err(e) => {
                self.delete_quietly(kind, &transit.id).await;
                Err(e.into())
            }
        }
    }

    async fn share_transit(&self, event: Event, step: &Transition) -> Result<StepOutcome, SagaError> {
        let transit_id = event
            .transit_snapshot_id()
            .ok_or_else(|| SagaError::missing("TransitId"))?;
        match self.share_and_forward(&event, &transit_id, step).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.delete_quietly(event.snapshot_type, &transit_id).await;
                Err(e)
            }
        }
    }

    async fn share_and_forward(
        &self,
        event: &Event,
        transit_id: &str,
        step: &Transition,
    ) -> Result<StepOutcome, SagaError> {
        let store = self.store(event.snapshot_type);
        store.share(transit_id, &self.config.dr_account).await?;
        info!(transit_id = %transit_id, dr_account = %self.config.dr_account, "Shared transit copy");

        // Tags can be lost on the copy; the request's tags fill the gaps.
        let listed = store.list_tags(transit_id).await?.without_reserved();
        let shared = event
            .next(EventType::SnapshotCopyShared)
            .with_tags(TagList::merge(&listed, &event.tag_list));
        self.publish(&shared, step).await
    }

    async fn discard_transit(&self, event: Event) -> Result<StepOutcome, SagaError> {
        let error = event.error.clone().unwrap_or_default();
        warn!(source_arn = %event.source_arn, error = %error, "Transit copy did not complete");
        if let Some(transit_id) = event.transit_snapshot_id() {
            self.delete(event.snapshot_type, &transit_id).await?;
        }
        Ok(StepOutcome::Compensated { error })
    }

    async fn delete_transit(&self, event: Event, step: &Transition) -> Result<StepOutcome, SagaError> {
        if let Some(err) = &event.error {
            error!(dr_account = %self.config.dr_account, "In DR account {}: {}", self.config.dr_account, err);
        }
        let transit_id = event
            .transit_snapshot_id()
            .ok_or_else(|| SagaError::missing("TransitId"))?;
        self.delete(event.snapshot_type, &transit_id).await?;
        Ok(StepOutcome::Completed { state: step.to })
    }

    /// Deletes a transit copy; one that is already gone counts as deleted.
    async fn delete(&self, kind: SnapshotType, id: &str) -> Result<(), SagaError> {
        match self.store(kind).delete(id).await {
            Ok(()) => {
                info!(snapshot_type = %kind, snapshot_id = %id, "Deleted transit copy");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(snapshot_type = %kind, snapshot_id = %id, "Transit copy already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_quietly(&self, kind: SnapshotType, id: &str) {
        if let Err(e) = self.delete(kind, id).await {
            error!(snapshot_id = %id, error = %e, "Failed to remove transit copy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackBus;
    use crate::config::PollConfig;
    use crate::orchestrator::LocalOrchestrator;
    use crate::poller::Poller;
    use crate::provider::memory::{MemoryCloud, MemoryOperation, MemorySnapshotStore};
    use crate::provider::ProviderError;
    use crate::saga::SagaState;
    use chrono::Utc;
    use draco_events::{BusEnvelope, Tag, LIFECYCLE_TAG};
    use serde_json::json;
    use std::time::Duration;

    const PROD: &str = "222222222222";

    struct Harness {
        config: Arc<Config>,
        instances: Arc<MemorySnapshotStore>,
        bus: Arc<LoopbackBus>,
        producer: Producer,
    }

    fn harness() -> Harness {
        let config = Arc::new(Config::dev().unwrap());
        let cloud = Arc::new(MemoryCloud::new());
        let store = |kind| Arc::new(MemorySnapshotStore::new(cloud.clone(), kind, PROD, "us-east-1"));
        let instances = store(SnapshotType::DatabaseInstance);
        let services = SnapshotServices::new(
            instances.clone(),
            store(SnapshotType::DatabaseCluster),
            store(SnapshotType::Volume),
        );
        let bus = Arc::new(LoopbackBus::recording());
        let orchestrator = Arc::new(LocalOrchestrator::new(
            config.workflow_arn.clone(),
            Poller::new(services.clone()),
            bus.clone(),
            PollConfig {
                max_iterations: 5,
                interval: Duration::from_millis(5),
            },
        ));
        let producer = Producer::new(config.clone(), services, bus.clone(), orchestrator);
        Harness {
            config,
            instances,
            bus,
            producer,
        }
    }

    fn lifecycle_tags() -> TagList {
        TagList::from(vec![Tag::new(LIFECYCLE_TAG, "Weekly")])
    }

    #[test]
    fn test_transit_ids() {
        assert_eq!(
            transit_id_for(SnapshotType::DatabaseInstance, "rds:orders-2024-01-01"),
            Some("orders-2024-01-01-dr".to_string())
        );
        assert_eq!(transit_id_for(SnapshotType::Volume, "snap-1"), None);
    }

    #[tokio::test]
    async fn test_creation_publishes_copy_request() {
        let h = harness();
        let key = Some("arn:aws:kms:us-east-1:222222222222:key/source".to_string());
        h.instances
            .seed("orders", "orders-1", Utc::now(), key.clone(), lifecycle_tags());

        let raw = json!({
            "Records": [{
                "EventSource": "aws:sns",
                "Sns": {
                    "Subject": "RDS Notification Message",
                    "Message": "{\"Event ID\":\"http://docs.amazonwebservices.com/AmazonRDS/latest/UserGuide/USER_Events.html#RDS-EVENT-0042\",\"Source ID\":\"orders-1\"}",
                    "TopicArn": "arn:aws:sns:us-east-1:222222222222:rds-events"
                }
            }]
        });
        let response = h.producer.handle(&raw).await;
        assert!(response.is_success(), "{response:?}");

        let published = h.bus.events_on(&h.config.dr_topic_arn);
        assert_eq!(published.len(), 1);
        let request = &published[0];
        assert_eq!(request.event_type, EventType::SnapshotCopyRequest);
        assert_eq!(request.source_name, "orders");
        assert!(request.encrypted);
        assert_eq!(request.source_kms_id, key);
        assert_eq!(request.tag_list.lifecycle(), Some("Weekly"));
    }

    #[tokio::test]
    async fn test_reserved_tags_are_not_forwarded() {
        let h = harness();
        let mut tags: Vec<Tag> = lifecycle_tags().iter().cloned().collect();
        tags.push(Tag::new("aws:backup:source-resource", "orders"));
        h.instances
            .seed("orders", "orders-1", Utc::now(), None, TagList::from(tags));
        let transit = h.instances.seed(
            "orders",
            "orders-1-dr",
            Utc::now(),
            None,
            TagList::from(vec![Tag::new("aws:copy-source", "orders-1")]),
        );

        let created = Event::new(
            EventType::SnapshotCreated,
            SnapshotType::DatabaseInstance,
            h.instances.arn_for("orders-1"),
        )
        .unwrap();
        h.producer.process(created).await.unwrap();

        let completed = Event::new(
            EventType::SnapshotCopyCompleted,
            SnapshotType::DatabaseInstance,
            h.instances.arn_for("orders-1"),
        )
        .unwrap()
        .with_tags(lifecycle_tags())
        .with_transit(transit.id.clone(), transit.arn);
        h.producer.process(completed).await.unwrap();

        let published = h.bus.events_on(&h.config.dr_topic_arn);
        assert_eq!(published.len(), 2);
        for event in &published {
            assert_eq!(event.tag_list, lifecycle_tags(), "{:?}", event.event_type);
        }
    }

    #[tokio::test]
    async fn test_unrecognized_input_fails() {
        let h = harness();
        let response = h.producer.handle(&json!({"hello": "world"})).await;
        assert_eq!(response.status_code, 500);
    }

    #[tokio::test]
    async fn test_unhandled_event_is_acknowledged() {
        let h = harness();
        let event = Event::new(
            EventType::SnapshotCopyShared,
            SnapshotType::DatabaseInstance,
            h.instances.arn_for("orders-1"),
        )
        .unwrap();
        let raw = serde_json::to_value(BusEnvelope::saga(
            h.config.producer_topic_arn.clone(),
            event.encode().unwrap(),
        ))
        .unwrap();
        let response = h.producer.handle(&raw).await;
        assert_eq!(response.status_code, 200);
        assert!(h.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_initiate_starts_transit_copy_and_wait() {
        let h = harness();
        let source = h
            .instances
            .seed("orders", "orders-1", Utc::now(), None, lifecycle_tags());
        let initiate = Event::new(EventType::SnapshotCopyInitiate, SnapshotType::DatabaseInstance, source.arn)
            .unwrap()
            .with_source_name("orders")
            .with_tags(lifecycle_tags())
            .with_target_kms_id("dr-key");

        let outcome = h.producer.process(initiate).await.unwrap();
        assert!(matches!(outcome, StepOutcome::WaitStarted { state: SagaState::TransitCopying, .. }));

        let transit = h.instances.snapshot("orders-1-dr").unwrap();
        assert_eq!(transit.kms_key_id.as_deref(), Some("dr-key"));
        assert_eq!(transit.tags.lifecycle(), Some("Weekly"));
    }

    #[tokio::test]
    async fn test_failed_share_removes_transit() {
        let h = harness();
        let source = h
            .instances
            .seed("orders", "orders-1", Utc::now(), None, lifecycle_tags());
        let transit = h
            .instances
            .seed("orders", "orders-1-dr", Utc::now(), None, lifecycle_tags());
        h.instances.fail(
            MemoryOperation::Share,
            ProviderError::Request { operation: "share", message: "throttled".into() },
        );

        let completed = Event::new(EventType::SnapshotCopyCompleted, SnapshotType::DatabaseInstance, source.arn)
            .unwrap()
            .with_transit(transit.id.clone(), transit.arn);
        assert!(h.producer.process(completed).await.is_err());
        assert!(h.instances.snapshot(&transit.id).is_none());
        assert!(h.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_delete_shared_tolerates_missing_transit() {
        let h = harness();
        let deletion = Event::new(
            EventType::SnapshotDeleteShared,
            SnapshotType::DatabaseInstance,
            h.instances.arn_for("orders-1"),
        )
        .unwrap()
        .with_transit("orders-1-dr", h.instances.arn_for("orders-1-dr"))
        .with_error("Copy failed (AccessDenied: no)");

        let outcome = h.producer.process(deletion).await.unwrap();
        assert_eq!(outcome.state(), Some(SagaState::Compensated));
    }
}
