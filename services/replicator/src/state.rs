//! Application state shared across request handlers.

use std::sync::Arc;

use crate::config::Config;
use crate::consumer::Consumer;
use crate::platform::LocalPlatform;
use crate::poller::Poller;
use crate::producer::Producer;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    platform: LocalPlatform,
}

impl AppState {
    /// Create a new application state.
    pub fn new(platform: LocalPlatform) -> Self {
        Self {
            inner: Arc::new(AppStateInner { platform }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.platform.config
    }

    pub fn producer(&self) -> Option<&Arc<Producer>> {
        self.inner.platform.producer.as_ref()
    }

    pub fn consumer(&self) -> Option<&Arc<Consumer>> {
        self.inner.platform.consumer.as_ref()
    }

    /// Completion poller for the account owning `arn`.
    pub fn poller_for(&self, arn: &str) -> Option<&Poller> {
        self.inner.platform.poller_for(arn)
    }

    pub fn platform(&self) -> &LocalPlatform {
        &self.inner.platform
    }
}
