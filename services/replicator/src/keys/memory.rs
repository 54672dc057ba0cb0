//! In-memory key service and object store for development and testing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{KeyError, KeyManager, KeySpec, ObjectStore};

struct StoredKey {
    spec: KeySpec,
    rotation: bool,
}

#[derive(Default)]
struct KeyState {
    keys: HashMap<String, StoredKey>,
    aliases: HashMap<String, String>,
}

/// In-memory key service.
pub struct MemoryKeyManager {
    state: Mutex<KeyState>,
    fail_creates: bool,
}

impl MemoryKeyManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KeyState::default()),
            fail_creates: false,
        }
    }

    /// A key service that refuses to create keys.
    pub fn failing() -> Self {
        Self {
            state: Mutex::new(KeyState::default()),
            fail_creates: true,
        }
    }

    fn state(&self) -> MutexGuard<'_, KeyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key_count(&self) -> usize {
        self.state().keys.len()
    }

    pub fn rotation_enabled(&self, key_id: &str) -> bool {
        self.state().keys.get(key_id).is_some_and(|k| k.rotation)
    }

    pub fn spec(&self, key_id: &str) -> Option<KeySpec> {
        self.state().keys.get(key_id).map(|k| k.spec.clone())
    }
}

impl Default for MemoryKeyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyManager for MemoryKeyManager {
    async fn create_key(&self, spec: &KeySpec) -> Result<String, KeyError> {
        if self.fail_creates {
            return Err(KeyError::Service("key creation disabled".to_string()));
        }
        let key_id = Uuid::new_v4().to_string();
        self.state().keys.insert(
            key_id.clone(),
            StoredKey {
                spec: spec.clone(),
                rotation: false,
            },
        );
        info!(key_id = %key_id, description = %spec.description, "[MEMORY] Created key");
        Ok(key_id)
    }

    async fn enable_rotation(&self, key_id: &str) -> Result<(), KeyError> {
        match self.state().keys.get_mut(key_id) {
            Some(key) => {
                key.rotation = true;
                Ok(())
            }
            None => Err(KeyError::Service(format!("key {key_id} not found"))),
        }
    }

    async fn create_alias(&self, alias: &str, key_id: &str) -> Result<(), KeyError> {
        let mut state = self.state();
        if !state.keys.contains_key(key_id) {
            return Err(KeyError::Service(format!("key {key_id} not found")));
        }
        if state.aliases.contains_key(alias) {
            return Err(KeyError::Service(format!("alias {alias} already exists")));
        }
        state.aliases.insert(alias.to_string(), key_id.to_string());
        Ok(())
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, KeyError> {
        Ok(self.state().aliases.get(alias).cloned())
    }
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<(String, String), Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, KeyError> {
        Ok(self
            .objects()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), KeyError> {
        self.objects()
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}
