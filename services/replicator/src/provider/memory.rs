//! In-memory snapshot service for development and testing.
//!
//! A [`MemoryCloud`] holds every snapshot of every account and kind; a
//! [`MemorySnapshotStore`] is one account's view of one kind. Sharing makes
//! a snapshot visible to another account's view, which is all the saga needs
//! to cross the account boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draco_events::{Arn, SnapshotType, TagList};
use tracing::{debug, info};

use super::{
    CopyRequest, OwnedSnapshot, ProviderError, SnapshotDescription, SnapshotPage, SnapshotRef,
    SnapshotStatus, SnapshotStore,
};

/// Default number of `describe` calls a new copy stays pending for.
pub const DEFAULT_COPY_POLLS: u32 = 1;

/// Default page size of `list_owned`.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Operations recorded and subject to failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOperation {
    Describe,
    Copy,
    Share,
    Delete,
    ListTags,
    ListOwned,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCall {
    pub account: String,
    pub kind: SnapshotType,
    pub operation: MemoryOperation,
    pub target: String,
}

/// A stored snapshot with everything the provider knows about it.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    pub snapshot: SnapshotRef,
    pub owner: String,
    pub source_name: String,
    pub kms_key_id: Option<String>,
    pub tags: TagList,
    pub description: Option<String>,
    pub shared_with: Vec<String>,
    polls_remaining: u32,
}

impl MemorySnapshot {
    fn visible_to(&self, account: &str) -> bool {
        self.owner == account || self.shared_with.iter().any(|a| a == account)
    }

    fn matches(&self, kind: SnapshotType, id_or_arn: &str) -> bool {
        self.snapshot.kind == kind
            && (self.snapshot.id == id_or_arn || self.snapshot.arn == id_or_arn)
    }

    fn describe(&self) -> SnapshotDescription {
        SnapshotDescription {
            snapshot: self.snapshot.clone(),
            source_name: self.source_name.clone(),
            kms_key_id: self.kms_key_id.clone(),
        }
    }
}

struct InjectedFailure {
    account: String,
    kind: SnapshotType,
    operation: MemoryOperation,
    target: Option<String>,
    error: ProviderError,
}

#[derive(Default)]
struct CloudState {
    snapshots: Vec<MemorySnapshot>,
    calls: Vec<ProviderCall>,
    failures: Vec<InjectedFailure>,
}

/// Backing store shared by every account and kind.
pub struct MemoryCloud {
    state: Mutex<CloudState>,
    sequence: AtomicU64,
    copy_polls: u32,
    page_size: usize,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_COPY_POLLS, DEFAULT_PAGE_SIZE)
    }

    /// Copies stay pending for `copy_polls` describes; listings return
    /// `page_size` snapshots per page.
    pub fn with_settings(copy_polls: u32, page_size: usize) -> Self {
        Self {
            state: Mutex::new(CloudState::default()),
            sequence: AtomicU64::new(0),
            copy_polls,
            page_size: page_size.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every stored snapshot, across accounts and kinds.
    pub fn snapshots(&self) -> Vec<MemorySnapshot> {
        self.state().snapshots.clone()
    }

    /// Every recorded call.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// One account's view of one snapshot kind.
#[derive(Clone)]
pub struct MemorySnapshotStore {
    cloud: Arc<MemoryCloud>,
    kind: SnapshotType,
    account: String,
    region: String,
}

impl MemorySnapshotStore {
    pub fn new(
        cloud: Arc<MemoryCloud>,
        kind: SnapshotType,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            cloud,
            kind,
            account: account.into(),
            region: region.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Arn of a snapshot of this kind in this account.
    pub fn arn_for(&self, id: &str) -> String {
        let (service, separator) = match self.kind {
            SnapshotType::Volume => ("ec2", '/'),
            SnapshotType::DatabaseInstance | SnapshotType::DatabaseCluster => ("rds", ':'),
        };
        Arn::new(
            service,
            self.region.as_str(),
            self.account.as_str(),
            self.kind.arn_resource_type(),
            separator,
            id,
        )
        .to_string()
    }

    /// Creates an available snapshot owned by this account.
    pub fn seed(
        &self,
        source_name: &str,
        id: &str,
        created_at: DateTime<Utc>,
        kms_key_id: Option<String>,
        tags: TagList,
    ) -> SnapshotRef {
        let snapshot = SnapshotRef {
            kind: self.kind,
            id: id.to_string(),
            arn: self.arn_for(id),
            created_at,
            status: SnapshotStatus::Available,
        };
        self.cloud.state().snapshots.push(MemorySnapshot {
            snapshot: snapshot.clone(),
            owner: self.account.clone(),
            source_name: source_name.to_string(),
            kms_key_id,
            tags,
            description: None,
            shared_with: Vec::new(),
            polls_remaining: 0,
        });
        snapshot
    }

    /// Forces the status of a stored snapshot.
    pub fn set_status(&self, id: &str, status: SnapshotStatus) {
        let mut state = self.cloud.state();
        if let Some(stored) = state
            .snapshots
            .iter_mut()
            .find(|s| s.owner == self.account && s.matches(self.kind, id))
        {
            stored.snapshot.status = status;
            stored.polls_remaining = 0;
        }
    }

    /// Fails every future `operation` of this view.
    pub fn fail(&self, operation: MemoryOperation, error: ProviderError) {
        self.inject(operation, None, error);
    }

    /// Fails future `operation`s that target `target`.
    pub fn fail_for(&self, operation: MemoryOperation, target: &str, error: ProviderError) {
        self.inject(operation, Some(target.to_string()), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.cloud.state();
        state
            .failures
            .retain(|f| !(f.account == self.account && f.kind == self.kind));
    }

    /// Calls of `operation` made through this view.
    pub fn calls(&self, operation: MemoryOperation) -> Vec<ProviderCall> {
        self.cloud
            .state()
            .calls
            .iter()
            .filter(|c| c.account == self.account && c.kind == self.kind && c.operation == operation)
            .cloned()
            .collect()
    }

    /// Snapshot visible to this view, by id or arn.
    pub fn snapshot(&self, id_or_arn: &str) -> Option<MemorySnapshot> {
        self.cloud
            .state()
            .snapshots
            .iter()
            .find(|s| s.matches(self.kind, id_or_arn) && s.visible_to(&self.account))
            .cloned()
    }

    /// Snapshots of this kind owned by this account.
    pub fn owned(&self) -> Vec<MemorySnapshot> {
        self.cloud
            .state()
            .snapshots
            .iter()
            .filter(|s| s.snapshot.kind == self.kind && s.owner == self.account)
            .cloned()
            .collect()
    }

    fn inject(&self, operation: MemoryOperation, target: Option<String>, error: ProviderError) {
        self.cloud.state().failures.push(InjectedFailure {
            account: self.account.clone(),
            kind: self.kind,
            operation,
            target,
            error,
        });
    }

    /// Records the call and returns an injected failure, if any.
    fn enter(&self, operation: MemoryOperation, target: &str) -> Result<MutexGuard<'_, CloudState>, ProviderError> {
        let mut state = self.cloud.state();
        state.calls.push(ProviderCall {
            account: self.account.clone(),
            kind: self.kind,
            operation,
            target: target.to_string(),
        });
        let injected = state.failures.iter().find(|f| {
            f.account == self.account
                && f.kind == self.kind
                && f.operation == operation
                && f.target.as_deref().is_none_or(|t| t == target)
        });
        match injected {
            Some(failure) => Err(failure.error.clone()),
            None => Ok(state),
        }
    }

    fn next_volume_id(&self) -> String {
        let sequence = self.cloud.sequence.fetch_add(1, Ordering::SeqCst);
        format!("snap-{:08x}{:09x}", rand::random::<u32>(), sequence)
    }
}

fn not_found(id: &str) -> ProviderError {
    ProviderError::NotFound(id.to_string())
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    fn kind(&self) -> SnapshotType {
        self.kind
    }

    async fn describe(&self, id_or_arn: &str) -> Result<SnapshotDescription, ProviderError> {
        let mut state = self.enter(MemoryOperation::Describe, id_or_arn)?;
        let stored = state
            .snapshots
            .iter_mut()
            .find(|s| s.matches(self.kind, id_or_arn) && s.visible_to(&self.account))
            .ok_or_else(|| not_found(id_or_arn))?;

        if stored.snapshot.status == SnapshotStatus::Pending {
            if stored.polls_remaining == 0 {
                stored.snapshot.status = SnapshotStatus::Available;
            } else {
                stored.polls_remaining -= 1;
            }
        }
        Ok(stored.describe())
    }

    async fn copy(&self, request: &CopyRequest) -> Result<SnapshotRef, ProviderError> {
        let mut state = self.enter(MemoryOperation::Copy, &request.source)?;
        let source = state
            .snapshots
            .iter()
            .find(|s| s.matches(self.kind, &request.source) && s.visible_to(&self.account))
            .cloned()
            .ok_or_else(|| not_found(&request.source))?;

        if self.kind == SnapshotType::DatabaseCluster
            && request.kms_key_id.is_some()
            && source.kms_key_id.is_none()
        {
            return Err(ProviderError::InvalidParameterValue(
                "cannot encrypt a copy of an unencrypted cluster snapshot".to_string(),
            ));
        }

        let id = match (self.kind, &request.target_id) {
            (SnapshotType::Volume, _) | (_, None) => self.next_volume_id(),
            (_, Some(target)) => target.clone(),
        };
        if state
            .snapshots
            .iter()
            .any(|s| s.owner == self.account && s.matches(self.kind, &id))
        {
            return Err(ProviderError::Request {
                operation: "copy",
                message: format!("snapshot {id} already exists"),
            });
        }

        let snapshot = SnapshotRef {
            kind: self.kind,
            id: id.clone(),
            arn: self.arn_for(&id),
            created_at: Utc::now(),
            status: SnapshotStatus::Pending,
        };
        state.snapshots.push(MemorySnapshot {
            snapshot: snapshot.clone(),
            owner: self.account.clone(),
            source_name: source.source_name.clone(),
            kms_key_id: request.kms_key_id.clone().or(source.kms_key_id),
            tags: request.tags.clone(),
            description: request.description.clone(),
            shared_with: Vec::new(),
            polls_remaining: self.cloud.copy_polls,
        });

        info!(
            account = %self.account,
            snapshot_type = %self.kind,
            source = %request.source,
            target = %id,
            "[MEMORY] Copy started"
        );
        Ok(snapshot)
    }

    async fn share(&self, id: &str, account: &str) -> Result<(), ProviderError> {
        let mut state = self.enter(MemoryOperation::Share, id)?;
        let stored = state
            .snapshots
            .iter_mut()
            .find(|s| s.matches(self.kind, id) && s.visible_to(&self.account))
            .ok_or_else(|| not_found(id))?;
        if stored.owner != self.account {
            return Err(ProviderError::AccessDenied(format!(
                "{} does not own {id}",
                self.account
            )));
        }
        if !stored.shared_with.iter().any(|a| a == account) {
            stored.shared_with.push(account.to_string());
        }
        debug!(snapshot = %id, account = %account, "[MEMORY] Shared");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.enter(MemoryOperation::Delete, id)?;
        let position = state
            .snapshots
            .iter()
            .position(|s| s.owner == self.account && s.matches(self.kind, id))
            .ok_or_else(|| not_found(id))?;
        state.snapshots.remove(position);
        debug!(account = %self.account, snapshot = %id, "[MEMORY] Deleted");
        Ok(())
    }

    async fn list_tags(&self, id_or_arn: &str) -> Result<TagList, ProviderError> {
        let state = self.enter(MemoryOperation::ListTags, id_or_arn)?;
        state
            .snapshots
            .iter()
            .find(|s| s.matches(self.kind, id_or_arn) && s.visible_to(&self.account))
            .map(|s| s.tags.clone())
            .ok_or_else(|| not_found(id_or_arn))
    }

    async fn list_owned(&self, marker: Option<&str>) -> Result<SnapshotPage, ProviderError> {
        let state = self.enter(MemoryOperation::ListOwned, marker.unwrap_or(""))?;
        let offset = match marker {
            Some(m) => m.parse::<usize>().map_err(|_| {
                ProviderError::InvalidParameterValue(format!("invalid marker {m}"))
            })?,
            None => 0,
        };

        let mut owned: Vec<&MemorySnapshot> = state
            .snapshots
            .iter()
            .filter(|s| s.snapshot.kind == self.kind && s.owner == self.account)
            .collect();
        owned.sort_by(|a, b| a.snapshot.id.cmp(&b.snapshot.id));

        let page_size = self.cloud.page_size;
        let snapshots = owned
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|s| OwnedSnapshot {
                snapshot: s.snapshot.clone(),
                source_name: s.source_name.clone(),
            })
            .collect();
        let next = offset + page_size;
        Ok(SnapshotPage {
            snapshots,
            marker: (next < owned.len()).then(|| next.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draco_events::Tag;

    const PROD: &str = "222222222222";
    const DR: &str = "111111111111";

    fn stores(kind: SnapshotType) -> (MemorySnapshotStore, MemorySnapshotStore) {
        let cloud = Arc::new(MemoryCloud::new());
        (
            MemorySnapshotStore::new(cloud.clone(), kind, PROD, "us-east-1"),
            MemorySnapshotStore::new(cloud, kind, DR, "us-east-1"),
        )
    }

    #[test]
    fn test_arns_per_kind() {
        let (instances, _) = stores(SnapshotType::DatabaseInstance);
        let (clusters, _) = stores(SnapshotType::DatabaseCluster);
        let (volumes, _) = stores(SnapshotType::Volume);
        assert_eq!(instances.arn_for("db-1"), "arn:aws:rds:us-east-1:222222222222:snapshot:db-1");
        assert_eq!(
            clusters.arn_for("c-1"),
            "arn:aws:rds:us-east-1:222222222222:cluster-snapshot:c-1"
        );
        assert_eq!(volumes.arn_for("snap-1"), "arn:aws:ec2:us-east-1:222222222222:snapshot/snap-1");
    }

    #[tokio::test]
    async fn test_copy_is_pending_until_polled() {
        let (prod, _) = stores(SnapshotType::DatabaseInstance);
        prod.seed("orders", "orders-1", Utc::now(), None, TagList::new());

        let copy = prod
            .copy(&CopyRequest::new("orders-1").with_target_id(Some("orders-1-dr".into())))
            .await
            .unwrap();
        assert_eq!(copy.status, SnapshotStatus::Pending);
        assert_eq!(prod.describe(&copy.arn).await.unwrap().snapshot.status, SnapshotStatus::Pending);
        assert_eq!(prod.describe(&copy.arn).await.unwrap().snapshot.status, SnapshotStatus::Available);
        assert_eq!(prod.describe(&copy.id).await.unwrap().source_name, "orders");
    }

    #[tokio::test]
    async fn test_sharing_crosses_accounts() {
        let (prod, dr) = stores(SnapshotType::DatabaseInstance);
        let transit = prod.seed("orders", "orders-1-dr", Utc::now(), None, TagList::new());

        assert!(dr.describe(&transit.arn).await.unwrap_err().is_not_found());
        prod.share(&transit.id, DR).await.unwrap();
        dr.copy(&CopyRequest::new(transit.arn.clone()).with_target_id(Some("orders-1".into())))
            .await
            .unwrap();

        assert_eq!(dr.owned().len(), 1);
        // Shared, not owned: the DR account cannot delete the transit copy.
        assert!(dr.delete(&transit.id).await.unwrap_err().is_not_found());
        assert!(matches!(
            dr.share(&transit.id, PROD).await,
            Err(ProviderError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_volume_ids_are_generated() {
        let (prod, _) = stores(SnapshotType::Volume);
        prod.seed("vol-1", "snap-source", Utc::now(), None, TagList::new());
        let copy = prod
            .copy(&CopyRequest::new("snap-source").with_target_id(Some("ignored".into())))
            .await
            .unwrap();
        assert!(copy.id.starts_with("snap-"));
        assert_ne!(copy.id, "ignored");
    }

    #[tokio::test]
    async fn test_duplicate_target_rejected() {
        let (prod, _) = stores(SnapshotType::DatabaseInstance);
        prod.seed("orders", "orders-1", Utc::now(), None, TagList::new());
        let request = CopyRequest::new("orders-1").with_target_id(Some("orders-1-dr".into()));
        prod.copy(&request).await.unwrap();
        assert!(prod.copy(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_list_owned_pages() {
        let cloud = Arc::new(MemoryCloud::with_settings(0, 2));
        let dr = MemorySnapshotStore::new(cloud, SnapshotType::DatabaseInstance, DR, "us-east-1");
        for i in 0..5 {
            dr.seed("orders", &format!("orders-{i}"), Utc::now(), None, TagList::new());
        }

        let mut marker = None;
        let mut seen = Vec::new();
        loop {
            let page = dr.list_owned(marker.as_deref()).await.unwrap();
            seen.extend(page.snapshots.into_iter().map(|s| s.snapshot.id));
            marker = page.marker;
            if marker.is_none() {
                break;
            }
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(dr.calls(MemoryOperation::ListOwned).len(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection_targets() {
        let (prod, _) = stores(SnapshotType::DatabaseInstance);
        prod.seed("orders", "a", Utc::now(), None, TagList::from(vec![Tag::new("k", "v")]));
        prod.seed("orders", "b", Utc::now(), None, TagList::new());
        prod.fail_for(
            MemoryOperation::Delete,
            "a",
            ProviderError::Request { operation: "delete", message: "busy".into() },
        );

        assert!(prod.delete("a").await.is_err());
        prod.delete("b").await.unwrap();
        prod.clear_failures();
        prod.delete("a").await.unwrap();
        assert!(prod.owned().is_empty());
    }
}
