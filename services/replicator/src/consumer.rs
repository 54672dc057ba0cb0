//! Consumer role.
//!
//! Runs in the DR account. It gates copy requests on the lifecycle tag,
//! provisions the per-source key, copies the shared transit snapshot into a
//! DR-owned copy and, once that copy exists, asks the producer to clean up
//! and applies retention.

use std::sync::Arc;

use draco_events::{normalize, Event, EventType, Inbound, SnapshotType, TagList};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{publish_event, MessageBus};
use crate::config::Config;
use crate::error::{HandlerResponse, SagaError};
use crate::keys::KeyProvisioner;
use crate::lifecycle::LifecycleRunner;
use crate::orchestrator::{Orchestrator, WaitRequest};
use crate::producer::TRANSIT_SUFFIX;
use crate::provider::{CopyRequest, CopyStrategy, SnapshotRef, SnapshotServices, SnapshotStore};
use crate::saga::{transition, Action, Role, StepOutcome, Transition};

/// Identifier of the DR copy made from a database transit copy.
pub fn dr_id_for(snapshot_type: SnapshotType, transit_id: &str) -> Option<String> {
    snapshot_type.is_database().then(|| {
        transit_id
            .strip_suffix(TRANSIT_SUFFIX)
            .unwrap_or(transit_id)
            .to_string()
    })
}

/// Error text carried by the compensating delete request.
fn copy_failure(err: &SagaError) -> String {
    match err {
        SagaError::Provider(e) => format!("Copy failed ({}: {e})", e.name()),
        SagaError::Orchestrator(e) => format!("Copy failed (WaitNotStarted: {e})"),
        other => format!("Copy failed ({other})"),
    }
}

pub struct Consumer {
    config: Arc<Config>,
    services: SnapshotServices,
    keys: Arc<KeyProvisioner>,
    bus: Arc<dyn MessageBus>,
    orchestrator: Arc<dyn Orchestrator>,
    lifecycle: LifecycleRunner,
}

impl Consumer {
    pub fn new(
        config: Arc<Config>,
        services: SnapshotServices,
        keys: Arc<KeyProvisioner>,
        bus: Arc<dyn MessageBus>,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        let lifecycle = LifecycleRunner::new(services.clone(), config.dry_run);
        Self {
            config,
            services,
            keys,
            bus,
            orchestrator,
            lifecycle,
        }
    }

    /// Handles one raw inbound notification.
    #[instrument(skip_all, fields(role = "consumer"))]
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

    /// Performs the consumer step for a normalised event.
    pub async fn process(&self, event: Event) -> Result<StepOutcome, SagaError> {
        debug!(event = ?event, "Normalized event");
        let step = transition(Role::Consumer, &event)?;
        match step.action {
            Action::Decline(reason) => {
                info!(source_arn = %event.source_arn, reason = %reason, "Not copying");
                let declined = event.next(EventType::SnapshotNoCopy).with_reason(reason);
                self.publish(&declined, &step).await
            }
            Action::ProvisionKey => self.provision_key(event, &step).await,
            Action::CopyToDr => self.copy_to_dr(event, &step).await,
            Action::CleanupAfterFailure => self.cleanup_after_failure(event).await,
            Action::CleanupAndRetain => self.cleanup_and_retain(event, &step).await,
            _ => Err(SagaError::Unhandled {
                role: Role::Consumer,
                event_type: event.event_type,
            }),
        }
    }

    fn store(&self, kind: SnapshotType) -> &Arc<dyn SnapshotStore> {
        self.services.for_kind(kind)
    }

    async fn publish(&self, event: &Event, step: &Transition) -> Result<StepOutcome, SagaError> {
        publish_event(self.bus.as_ref(), &self.config.producer_topic_arn, event).await?;
        Ok(StepOutcome::Published {
            event_type: event.event_type.to_string(),
            state: step.to,
        })
    }

    async fn provision_key(&self, event: Event, step: &Transition) -> Result<StepOutcome, SagaError> {
        if event.source_name.is_empty() {
            return Err(SagaError::missing("SourceName"));
        }
        let producer_account = event
            .source_account()
            .ok_or_else(|| SagaError::missing("SourceArn account"))?;

        match self
            .keys
            .get_or_create_key(&event.source_name, &event.tag_list, &producer_account)
            .await
        {
            Ok(key_id) => {
                let initiate = event
                    .next(EventType::SnapshotCopyInitiate)
                    .with_target_kms_id(key_id);
                self.publish(&initiate, step).await
            }
            Err(e) => {
                // The producer has nothing to clean up yet; tell it to stand down.
                let declined = event
                    .next(EventType::SnapshotNoCopy)
                    .with_reason("Key provisioning failed")
                    .with_error(e.to_string());
                if let Err(publish_err) =
                    publish_event(self.bus.as_ref(), &self.config.producer_topic_arn, &declined).await
                {
                    error!(error = %publish_err, "Failed to publish no-copy");
                }
                Err(e.into())
            }
        }
    }

    async fn copy_to_dr(&self, event: Event, step: &Transition) -> Result<StepOutcome, SagaError> {
        let mut created: Option<SnapshotRef> = None;
        match self.start_dr_copy(&event, &mut created).await {
            Ok(execution) => Ok(StepOutcome::WaitStarted {
                execution,
                state: step.to,
            }),
            Err(err) => {
                if let Some(copy) = created {
                    self.delete_quietly(event.snapshot_type, &copy.id).await;
                }
                let error = copy_failure(&err);
                warn!(source_arn = %event.source_arn, error = %error, "DR copy failed, requesting transit cleanup");
                let cleanup = event
                    .next(EventType::SnapshotDeleteShared)
                    .with_error(error.clone());
                publish_event(self.bus.as_ref(), &self.config.producer_topic_arn, &cleanup).await?;
                Ok(StepOutcome::Compensated { error })
            }
        }
    }

    async fn start_dr_copy(
        &self,
        event: &Event,
        created: &mut Option<SnapshotRef>,
    ) -> Result<String, SagaError> {
        let kind = event.snapshot_type;
        let transit_arn = event
            .transit_arn
            .clone()
            .ok_or_else(|| SagaError::missing("TransitArn"))?;
        let transit_id = event
            .transit_snapshot_id()
            .ok_or_else(|| SagaError::missing("TransitId"))?;

        let tags = TagList::merge(&event.tag_list, &TagList::from(vec![self.config.dr_tag.clone()]));
        let request = CopyRequest::new(transit_arn)
            .with_target_id(dr_id_for(kind, &transit_id))
            .with_key(event.target_kms_id.clone())
            .with_tags(tags)
            .with_description(format!("Draco DR copy of {}", event.source_name));
        let copy = CopyStrategy::for_kind(kind)
            .copy(self.store(kind).as_ref(), request)
            .await?;
        info!(snapshot_type = %kind, transit_id = %transit_id, target_id = %copy.id, "Initiated DR copy");
        *created = Some(copy.clone());

        let wait = WaitRequest {
            snapshot_type: kind,
            arn: copy.arn.clone(),
            then: event
                .next(EventType::SnapshotCopyCompleted)
                .with_target(copy.id, copy.arn),
            notify_topic: self.config.dr_topic_arn.clone(),
        };
        Ok(self.orchestrator.start_wait(wait).await?)
    }

    async fn cleanup_after_failure(&self, event: Event) -> Result<StepOutcome, SagaError> {
        let error = event.error.clone().unwrap_or_default();
        warn!(source_arn = %event.source_arn, error = %error, "DR copy did not complete");
        if let Some(target_id) = &event.target_id {
            self.delete_quietly(event.snapshot_type, target_id).await;
        }
        let cleanup = event.next(EventType::SnapshotDeleteShared);
        publish_event(self.bus.as_ref(), &self.config.producer_topic_arn, &cleanup).await?;
        Ok(StepOutcome::Compensated { error })
    }

    async fn cleanup_and_retain(&self, event: Event, step: &Transition) -> Result<StepOutcome, SagaError> {
        info!(
            source_name = %event.source_name,
            target_id = event.target_id.as_deref().unwrap_or(""),
            "DR copy complete"
        );
        let cleanup = event.next(EventType::SnapshotDeleteShared);
        let outcome = self.publish(&cleanup, step).await?;

        // Retention problems never fail the saga message.
        if let Err(e) = self.lifecycle.run(event.snapshot_type).await {
            error!(snapshot_type = %event.snapshot_type, error = %e, "Lifecycle pass failed");
        }
        Ok(outcome)
    }

    async fn delete_quietly(&self, kind: SnapshotType, id: &str) {
        match self.store(kind).delete(id).await {
            Ok(()) => info!(snapshot_id = %id, "Removed incomplete DR copy"),
            Err(e) if e.is_not_found() => {}
            Err(e) => error!(snapshot_id = %id, error = %e, "Failed to remove DR copy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackBus;
    use crate::config::PollConfig;
    use crate::keys::memory::MemoryKeyManager;
    use crate::keys::KeyDirectory;
    use crate::orchestrator::LocalOrchestrator;
    use crate::poller::Poller;
    use crate::provider::memory::{MemoryCloud, MemoryOperation, MemorySnapshotStore};
    use crate::provider::ProviderError;
    use crate::saga::REASON_NO_LIFECYCLE;
    use chrono::Utc;
    use draco_events::{Tag, LIFECYCLE_TAG};
    use std::time::Duration;

    const PROD: &str = "222222222222";

    struct Harness {
        config: Arc<Config>,
        prod: Arc<MemorySnapshotStore>,
        dr: Arc<MemorySnapshotStore>,
        keys: Arc<MemoryKeyManager>,
        bus: Arc<LoopbackBus>,
        consumer: Consumer,
    }

    fn harness_with(keys: MemoryKeyManager) -> Harness {
        let config = Arc::new(Config::dev().unwrap());
        let cloud = Arc::new(MemoryCloud::new());
        let prod = Arc::new(MemorySnapshotStore::new(
            cloud.clone(),
            SnapshotType::DatabaseInstance,
            PROD,
            "us-east-1",
        ));
        let dr_store = |kind| {
            Arc::new(MemorySnapshotStore::new(cloud.clone(), kind, config.dr_account.clone(), "us-east-1"))
        };
        let dr = dr_store(SnapshotType::DatabaseInstance);
        let services = SnapshotServices::new(
            dr.clone(),
            dr_store(SnapshotType::DatabaseCluster),
            dr_store(SnapshotType::Volume),
        );
        let keys = Arc::new(keys);
        let provisioner = Arc::new(KeyProvisioner::new(
            keys.clone(),
            KeyDirectory::Alias,
            config.dr_account.clone(),
            "us-east-1",
            config.dr_tag.clone(),
        ));
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
        let consumer = Consumer::new(config.clone(), services, provisioner, bus.clone(), orchestrator);
        Harness {
            config,
            prod,
            dr,
            keys,
            bus,
            consumer,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryKeyManager::new())
    }

    fn request(h: &Harness, tags: TagList) -> Event {
        Event::new(
            EventType::SnapshotCopyRequest,
            SnapshotType::DatabaseInstance,
            h.prod.arn_for("orders-1"),
        )
        .unwrap()
        .with_source_name("orders")
        .with_tags(tags)
    }

    fn weekly() -> TagList {
        TagList::from(vec![Tag::new(LIFECYCLE_TAG, "Weekly")])
    }

    /// Seeds a transit copy shared with the DR account.
    async fn shared_transit(h: &Harness) -> Event {
        let transit = h.prod.seed("orders", "orders-1-dr", Utc::now(), None, weekly());
        h.prod.share(&transit.id, &h.config.dr_account).await.unwrap();
        Event::new(
            EventType::SnapshotCopyShared,
            SnapshotType::DatabaseInstance,
            h.prod.arn_for("orders-1"),
        )
        .unwrap()
        .with_source_name("orders")
        .with_tags(weekly())
        .with_target_kms_id("dr-key")
        .with_transit(transit.id, transit.arn)
    }

    #[test]
    fn test_dr_ids() {
        assert_eq!(
            dr_id_for(SnapshotType::DatabaseCluster, "aurora-1-dr"),
            Some("aurora-1".to_string())
        );
        assert_eq!(dr_id_for(SnapshotType::Volume, "snap-1"), None);
    }

    #[tokio::test]
    async fn test_untagged_request_declines_without_copy() {
        let h = harness();
        let outcome = h.consumer.process(request(&h, TagList::new())).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Published { .. }));

        let published = h.bus.events_on(&h.config.producer_topic_arn);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, EventType::SnapshotNoCopy);
        assert_eq!(published[0].reason.as_deref(), Some(REASON_NO_LIFECYCLE));
        assert_eq!(h.keys.key_count(), 0);
        assert!(h.dr.calls(MemoryOperation::Copy).is_empty());
    }

    #[tokio::test]
    async fn test_eligible_request_provisions_key_once() {
        let h = harness();
        h.consumer.process(request(&h, weekly())).await.unwrap();
        h.consumer.process(request(&h, weekly())).await.unwrap();

        let published = h.bus.events_on(&h.config.producer_topic_arn);
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|e| e.event_type == EventType::SnapshotCopyInitiate));
        assert_eq!(published[0].target_kms_id, published[1].target_kms_id);
        assert_eq!(h.keys.key_count(), 1);
    }

    #[tokio::test]
    async fn test_key_failure_declines_and_fails() {
        let h = harness_with(MemoryKeyManager::failing());
        let err = h.consumer.process(request(&h, weekly())).await.unwrap_err();
        assert!(matches!(err, SagaError::Key(_)));

        let published = h.bus.events_on(&h.config.producer_topic_arn);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, EventType::SnapshotNoCopy);
        assert!(published[0].error.is_some());
    }

    #[tokio::test]
    async fn test_copy_shared_creates_tagged_dr_copy() {
        let h = harness();
        let shared = shared_transit(&h).await;
        let outcome = h.consumer.process(shared).await.unwrap();
        assert!(matches!(outcome, StepOutcome::WaitStarted { .. }));

        let copy = h.dr.snapshot("orders-1").unwrap();
        assert_eq!(copy.owner, h.config.dr_account);
        assert_eq!(copy.kms_key_id.as_deref(), Some("dr-key"));
        assert_eq!(copy.tags.lifecycle(), Some("Weekly"));
        assert_eq!(copy.tags.get(&h.config.dr_tag.key), Some(h.config.dr_tag.value.as_str()));
    }

    #[tokio::test]
    async fn test_copy_failure_requests_exactly_one_delete() {
        let h = harness();
        let shared = shared_transit(&h).await;
        let transit_arn = shared.transit_arn.clone();
        h.dr.fail(
            MemoryOperation::Copy,
            ProviderError::AccessDenied("key not usable".into()),
        );

        let outcome = h.consumer.process(shared).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Compensated { .. }));

        let published = h.bus.events_on(&h.config.producer_topic_arn);
        assert_eq!(published.len(), 1);
        let cleanup = &published[0];
        assert_eq!(cleanup.event_type, EventType::SnapshotDeleteShared);
        assert_eq!(cleanup.transit_arn, transit_arn);
        assert!(cleanup.error.as_deref().unwrap().starts_with("Copy failed (AccessDenied"));
    }

    #[tokio::test]
    async fn test_failed_completion_cleans_up() {
        let h = harness();
        let failed = Event::new(
            EventType::SnapshotCopyCompleted,
            SnapshotType::DatabaseInstance,
            h.prod.arn_for("orders-1"),
        )
        .unwrap()
        .with_transit("orders-1-dr", h.prod.arn_for("orders-1-dr"))
        .with_error("Copy timed out");

        let outcome = h.consumer.process(failed).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Compensated { error: "Copy timed out".to_string() }
        );
        let published = h.bus.events_on(&h.config.producer_topic_arn);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].error.as_deref(), Some("Copy timed out"));
    }
}
