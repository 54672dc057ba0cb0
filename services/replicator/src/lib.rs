//! draco replicator library.
//!
//! The crate ships the `draco` binary, but exposes its roles, capabilities
//! and the in-memory platform as a library for integration testing.

pub mod api;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod orchestrator;
pub mod platform;
pub mod poller;
pub mod producer;
pub mod provider;
pub mod saga;
pub mod state;
