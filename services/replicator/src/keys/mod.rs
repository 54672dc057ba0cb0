//! Encryption key provisioning.
//!
//! Every source gets one DR-owned key, created lazily on its first copy
//! request and found again through a key directory on every later one.
//!
//! Two first-time requests for the same source racing each other can both
//! miss the directory and create a key each. With the alias directory the
//! second alias is rejected, so the losing request fails with a [`KeyError`]
//! and its key is left unreferenced; the object-store directory keeps the
//! later write.

pub mod memory;
pub mod policy;

use std::sync::Arc;

use async_trait::async_trait;
use draco_events::{Tag, TagList};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, KeyDirectoryKind};

/// Errors from the key service or the key directory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key service: {0}")]
    Service(String),

    #[error("object store: {0}")]
    Store(String),

    #[error("key directory entry {0} does not hold a key id")]
    InvalidEntry(String),
}

/// Parameters of a new key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySpec {
    pub policy: serde_json::Value,
    pub description: String,
    pub tags: TagList,
}

/// Key management capability.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Create a key and return its id.
    async fn create_key(&self, spec: &KeySpec) -> Result<String, KeyError>;

    async fn enable_rotation(&self, key_id: &str) -> Result<(), KeyError>;

    async fn create_alias(&self, alias: &str, key_id: &str) -> Result<(), KeyError>;

    /// Target key of an alias, or `None` if the alias does not exist.
    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, KeyError>;
}

/// Object store capability used by the legacy key directory.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Object body, or `None` if the object does not exist.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KeyError>;

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), KeyError>;
}

/// Where a source's key id is recorded.
#[derive(Clone)]
pub enum KeyDirectory {
    /// An alias named after the source.
    Alias,
    /// An object per source in the DR key bucket.
    ObjectStore {
        store: Arc<dyn ObjectStore>,
        bucket: String,
    },
}

/// Get-or-create for per-source DR keys.
#[derive(Clone)]
pub struct KeyProvisioner {
    keys: Arc<dyn KeyManager>,
    directory: KeyDirectory,
    dr_account: String,
    region: String,
    dr_tag: Tag,
}

impl KeyProvisioner {
    pub fn new(
        keys: Arc<dyn KeyManager>,
        directory: KeyDirectory,
        dr_account: impl Into<String>,
        region: impl Into<String>,
        dr_tag: Tag,
    ) -> Self {
        Self {
            keys,
            directory,
            dr_account: dr_account.into(),
            region: region.into(),
            dr_tag,
        }
    }

    /// Builds the provisioner selected by the configuration.
    pub fn from_config(
        config: &Config,
        keys: Arc<dyn KeyManager>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let directory = match config.key_directory {
            KeyDirectoryKind::Alias => KeyDirectory::Alias,
            KeyDirectoryKind::ObjectStore => KeyDirectory::ObjectStore {
                store: objects,
                bucket: config.key_bucket.clone(),
            },
        };
        Self::new(
            keys,
            directory,
            config.dr_account.clone(),
            config.region.clone(),
            config.dr_tag.clone(),
        )
    }

    /// Returns the key for `source_name`, creating it on first use.
    ///
    /// `producer_account` is granted use of a newly created key.
    pub async fn get_or_create_key(
        &self,
        source_name: &str,
        tags: &TagList,
        producer_account: &str,
    ) -> Result<String, KeyError> {
        if let Some(key_id) = self.lookup(source_name).await? {
            debug!(source = %source_name, key_id = %key_id, "Found existing key");
            return Ok(key_id);
        }

        debug!(source = %source_name, "Key not found, allocating");
        let spec = KeySpec {
            policy: policy::key_policy(&self.dr_account, producer_account, &self.region),
            description: policy::key_description(source_name),
            tags: TagList::merge(&TagList::from(vec![self.dr_tag.clone()]), tags),
        };
        let key_id = self.keys.create_key(&spec).await?;
        self.keys.enable_rotation(&key_id).await?;
        self.record(source_name, &key_id).await?;

        info!(source = %source_name, key_id = %key_id, "Provisioned DR key");
        Ok(key_id)
    }

    async fn lookup(&self, source_name: &str) -> Result<Option<String>, KeyError> {
        match &self.directory {
            KeyDirectory::Alias => {
                self.keys
                    .resolve_alias(&policy::alias_name(source_name))
                    .await
            }
            KeyDirectory::ObjectStore { store, bucket } => {
                let key = policy::object_key(source_name);
                match store.get(bucket, &key).await? {
                    Some(body) => String::from_utf8(body)
                        .map(|id| Some(id.trim().to_string()))
                        .map_err(|_| KeyError::InvalidEntry(key)),
                    None => Ok(None),
                }
            }
        }
    }

    async fn record(&self, source_name: &str, key_id: &str) -> Result<(), KeyError> {
        match &self.directory {
            KeyDirectory::Alias => {
                self.keys
                    .create_alias(&policy::alias_name(source_name), key_id)
                    .await
            }
            KeyDirectory::ObjectStore { store, bucket } => {
                store
                    .put(bucket, &policy::object_key(source_name), key_id.as_bytes().to_vec())
                    .await
            }
        }
    }
}
