//! Declared fallback for keyed copies.

use draco_events::SnapshotType;
use tracing::warn;

use super::{CopyRequest, ProviderError, SnapshotRef, SnapshotStore};

/// What to do when a keyed copy is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFallback {
    /// Surface the rejection.
    Never,
    /// On `InvalidParameterValue`, retry once without the key.
    RetryWithoutKey,
}

/// Two-step copy strategy: attempt with the requested key, then apply the
/// declared fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyStrategy {
    fallback: KeyFallback,
}

impl CopyStrategy {
    pub fn new(fallback: KeyFallback) -> Self {
        Self { fallback }
    }

    /// Cluster copies cannot encrypt a plaintext source, so they may drop the key.
    pub fn for_kind(kind: SnapshotType) -> Self {
        match kind {
            SnapshotType::DatabaseCluster => Self::new(KeyFallback::RetryWithoutKey),
            SnapshotType::DatabaseInstance | SnapshotType::Volume => Self::new(KeyFallback::Never),
        }
    }

    pub fn fallback(&self) -> KeyFallback {
        self.fallback
    }

    pub async fn copy(
        &self,
        store: &dyn SnapshotStore,
        request: CopyRequest,
    ) -> Result<SnapshotRef, ProviderError> {
        match store.copy(&request).await {
            Err(ProviderError::InvalidParameterValue(message))
                if self.fallback == KeyFallback::RetryWithoutKey
                    && request.kms_key_id.is_some() =>
            {
                warn!(
                    source = %request.source,
                    error = %message,
                    "Keyed copy rejected, retrying without key"
                );
                store.copy(&request.with_key(None)).await
            }
            other => other,
        }
    }
}
