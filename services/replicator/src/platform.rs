//! In-memory platform for development and tests.
//!
//! Wires both roles to one [`MemoryCloud`] holding a production account and
//! the DR account, a loopback bus and one local orchestrator per account.

use std::collections::HashMap;
use std::sync::Arc;

use draco_events::{Arn, SnapshotType};
use tokio::sync::mpsc;

use crate::bus::{LoopbackBus, Publication};
use crate::config::Config;
use crate::consumer::Consumer;
use crate::dispatch::Dispatcher;
use crate::keys::memory::{MemoryKeyManager, MemoryObjectStore};
use crate::keys::KeyProvisioner;
use crate::orchestrator::LocalOrchestrator;
use crate::poller::Poller;
use crate::producer::Producer;
use crate::provider::memory::{MemoryCloud, MemorySnapshotStore};
use crate::provider::SnapshotServices;

/// Production account of the local platform.
pub const DEV_PRODUCER_ACCOUNT: &str = "222222222222";

pub struct LocalPlatform {
    pub config: Arc<Config>,
    pub producer_account: String,
    pub cloud: Arc<MemoryCloud>,
    pub bus: Arc<LoopbackBus>,
    pub keys: Arc<MemoryKeyManager>,
    pub objects: Arc<MemoryObjectStore>,
    pub producer: Option<Arc<Producer>>,
    pub consumer: Option<Arc<Consumer>>,
    pub dispatcher: Dispatcher,
    pollers: HashMap<String, Poller>,
}

impl LocalPlatform {
    /// Builds the platform; the receiver feeds [`Dispatcher::run`].
    pub fn build(config: Arc<Config>) -> (Self, mpsc::UnboundedReceiver<Publication>) {
        Self::with_cloud(config, Arc::new(MemoryCloud::new()))
    }

    pub fn with_cloud(
        config: Arc<Config>,
        cloud: Arc<MemoryCloud>,
    ) -> (Self, mpsc::UnboundedReceiver<Publication>) {
        let (bus, messages) = LoopbackBus::channel();
        let bus = Arc::new(bus);
        let producer_account = DEV_PRODUCER_ACCOUNT.to_string();

        let producer_services = services(&cloud, &producer_account, &config.region);
        let dr_services = services(&cloud, &config.dr_account, &config.region);
        let pollers = HashMap::from([
            (producer_account.clone(), Poller::new(producer_services.clone())),
            (config.dr_account.clone(), Poller::new(dr_services.clone())),
        ]);

        let orchestrator = |poller: &Poller| {
            Arc::new(LocalOrchestrator::new(
                config.workflow_arn.clone(),
                poller.clone(),
                bus.clone(),
                config.poll,
            ))
        };

        let producer = config.role.runs_producer().then(|| {
            Arc::new(Producer::new(
                config.clone(),
                producer_services.clone(),
                bus.clone(),
                orchestrator(&pollers[&producer_account]),
            ))
        });

        let keys = Arc::new(MemoryKeyManager::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let consumer = config.role.runs_consumer().then(|| {
            let provisioner = KeyProvisioner::from_config(&config, keys.clone(), objects.clone());
            Arc::new(Consumer::new(
                config.clone(),
                dr_services.clone(),
                Arc::new(provisioner),
                bus.clone(),
                orchestrator(&pollers[&config.dr_account]),
            ))
        });

        let dispatcher = Dispatcher::new(&config, producer.clone(), consumer.clone());
        let platform = Self {
            config,
            producer_account,
            cloud,
            bus,
            keys,
            objects,
            producer,
            consumer,
            dispatcher,
            pollers,
        };
        (platform, messages)
    }

    /// The production account's view of `kind`.
    pub fn producer_store(&self, kind: SnapshotType) -> MemorySnapshotStore {
        MemorySnapshotStore::new(self.cloud.clone(), kind, self.producer_account.clone(), self.config.region.clone())
    }

    /// The DR account's view of `kind`.
    pub fn dr_store(&self, kind: SnapshotType) -> MemorySnapshotStore {
        MemorySnapshotStore::new(self.cloud.clone(), kind, self.config.dr_account.clone(), self.config.region.clone())
    }

    /// Poller of the account that owns `arn`.
    pub fn poller_for(&self, arn: &str) -> Option<&Poller> {
        let account = Arn::parse(arn).ok()?.account().to_string();
        self.pollers.get(&account)
    }
}

fn services(cloud: &Arc<MemoryCloud>, account: &str, region: &str) -> SnapshotServices {
    let store = |kind| Arc::new(MemorySnapshotStore::new(cloud.clone(), kind, account, region));
    SnapshotServices::new(
        store(SnapshotType::DatabaseInstance),
        store(SnapshotType::DatabaseCluster),
        store(SnapshotType::Volume),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoleSelection;

    #[test]
    fn test_pollers_follow_arn_account() {
        let config = Arc::new(Config::dev().unwrap());
        let (platform, _messages) = LocalPlatform::build(config.clone());
        assert!(platform
            .poller_for("arn:aws:rds:us-east-1:222222222222:snapshot:orders-1")
            .is_some());
        assert!(platform
            .poller_for(&format!("arn:aws:rds:us-east-1:{}:snapshot:orders-1", config.dr_account))
            .is_some());
        assert!(platform.poller_for("arn:aws:rds:us-east-1:999999999999:snapshot:x").is_none());
        assert!(platform.poller_for("not-an-arn").is_none());
    }

    #[test]
    fn test_role_selection_limits_roles() {
        let mut config = Config::dev().unwrap();
        config.role = RoleSelection::Consumer;
        let (platform, _messages) = LocalPlatform::build(Arc::new(config));
        assert!(platform.producer.is_none());
        assert!(platform.consumer.is_some());
    }
}
