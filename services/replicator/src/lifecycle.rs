//! Retention pass over the DR copies of one snapshot kind.
//!
//! Snapshots are grouped by source; the lifecycle tag of each source's
//! youngest copy picks the policy. Sources without a tag, or with a policy
//! the engine does not implement, are left alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use draco_events::SnapshotType;
use draco_retention::{implement_policy, RetentionPolicy};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::provider::{ProviderError, SnapshotRef, SnapshotServices, SnapshotStatus, SnapshotStore};

/// All available DR copies of one source, youngest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceGroup {
    pub source_name: String,
    pub snapshots: Vec<SnapshotRef>,
}

impl SourceGroup {
    pub fn new(source_name: impl Into<String>, mut snapshots: Vec<SnapshotRef>) -> Self {
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self {
            source_name: source_name.into(),
            snapshots,
        }
    }

    pub fn youngest(&self) -> Option<&SnapshotRef> {
        self.snapshots.first()
    }
}

/// A delete that failed during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteFailure {
    pub snapshot_id: String,
    pub error: String,
}

/// Summary of one retention pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleReport {
    pub kind: SnapshotType,
    pub sources_evaluated: usize,
    /// Sources left untouched, with the reason.
    pub skipped: Vec<(String, String)>,
    pub retained: Vec<String>,
    pub deleted: Vec<String>,
    /// Deletions suppressed by dry run.
    pub would_delete: Vec<String>,
    pub failures: Vec<DeleteFailure>,
}

impl LifecycleReport {
    fn new(kind: SnapshotType) -> Self {
        Self {
            kind,
            sources_evaluated: 0,
            skipped: Vec::new(),
            retained: Vec::new(),
            deleted: Vec::new(),
            would_delete: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Applies retention policies to DR-owned snapshots.
#[derive(Clone)]
pub struct LifecycleRunner {
    services: SnapshotServices,
    dry_run: bool,
}

impl LifecycleRunner {
    pub fn new(services: SnapshotServices, dry_run: bool) -> Self {
        Self { services, dry_run }
    }

    /// Runs one pass over every source of `kind`.
    ///
    /// Only a failed listing fails the pass; per-snapshot delete failures are
    /// collected in the report.
    #[instrument(skip(self), fields(dry_run = self.dry_run))]
    pub async fn run(&self, kind: SnapshotType) -> Result<LifecycleReport, ProviderError> {
        let store = self.services.for_kind(kind);
        let groups = self.source_groups(store.as_ref()).await?;

        let mut report = LifecycleReport::new(kind);
        for group in groups {
            report.sources_evaluated += 1;
            self.apply(store, group, &mut report).await;
        }

        info!(
            snapshot_type = %kind,
            sources = report.sources_evaluated,
            retained = report.retained.len(),
            deleted = report.deleted.len(),
            would_delete = report.would_delete.len(),
            failures = report.failures.len(),
            "Lifecycle pass complete"
        );
        Ok(report)
    }

    /// Pages through the owned snapshots and groups the available ones by source.
    pub async fn source_groups(&self, store: &dyn SnapshotStore) -> Result<Vec<SourceGroup>, ProviderError> {
        let mut by_source: BTreeMap<String, Vec<SnapshotRef>> = BTreeMap::new();
        let mut marker: Option<String> = None;
        loop {
            let page = store.list_owned(marker.as_deref()).await?;
            for owned in page.snapshots {
                if owned.snapshot.status == SnapshotStatus::Available {
                    by_source
                        .entry(owned.source_name)
                        .or_default()
                        .push(owned.snapshot);
                }
            }
            match page.marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(by_source
            .into_iter()
            .map(|(source_name, snapshots)| SourceGroup::new(source_name, snapshots))
            .collect())
    }

    async fn apply(&self, store: &Arc<dyn SnapshotStore>, group: SourceGroup, report: &mut LifecycleReport) {
        let Some(youngest) = group.youngest() else {
            return;
        };

        let tags = match store.list_tags(&youngest.arn).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(source = %group.source_name, error = %e, "Could not read lifecycle tag");
                report.skipped.push((group.source_name, e.to_string()));
                return;
            }
        };
        let Some(name) = tags.lifecycle() else {
            debug!(source = %group.source_name, "No lifecycle tag");
            report
                .skipped
                .push((group.source_name, "no lifecycle tag".to_string()));
            return;
        };
        let policy: RetentionPolicy = match name.parse() {
            Ok(policy) => policy,
            Err(e) => {
                warn!(source = %group.source_name, error = %e, "Skipping source");
                report.skipped.push((group.source_name, e.to_string()));
                return;
            }
        };

        debug!(source = %group.source_name, policy = policy.as_str(), count = group.snapshots.len(), "Applying policy");
        for marked in implement_policy(group.snapshots, policy) {
            let snapshot = marked.snapshot;
            if marked.retain {
                report.retained.push(snapshot.id);
                continue;
            }
            if self.dry_run {
                info!(snapshot_id = %snapshot.id, "Dry Run - Not Deleting");
                report.would_delete.push(snapshot.id);
                continue;
            }
            match store.delete(&snapshot.id).await {
                Ok(()) => {
                    info!(snapshot_id = %snapshot.id, policy = policy.as_str(), "Deleted expired snapshot");
                    report.deleted.push(snapshot.id);
                }
                Err(e) => {
                    warn!(snapshot_id = %snapshot.id, error = %e, "Delete failed");
                    report.failures.push(DeleteFailure {
                        snapshot_id: snapshot.id,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}
