//! # draco-events
//!
//! Event model for the draco snapshot replication saga.
//!
//! ## Design Principles
//!
//! - Events are immutable once published; a handler derives a *new* event
//!   for the next hop instead of editing the one it received
//! - Every inbound notification is normalised into exactly one [`Event`]
//!   (or acknowledged as informational) before any handler sees it
//! - Tags crossing an account boundary are merged first-writer-wins
//!
//! ## Inbound formats
//!
//! - Native database lifecycle notifications (`RDS Notification Message`)
//! - Internal saga messages (subject [`SAGA_SUBJECT`])
//! - Scheduled-backup notifications for volume snapshots (`aws.ec2`)
//!
//! ## Event Types
//!
//! - `snapshot-created` (normalised creation notification)
//! - `snapshot-copy-request`, `snapshot-copy-initiate`
//! - `snapshot-copy-completed`, `snapshot-copy-shared`
//! - `snapshot-delete-shared`, `snapshot-no-copy`

mod arn;
mod envelope;
mod error;
mod tags;
mod types;

pub use arn::Arn;
pub use envelope::*;
pub use error::EventError;
pub use tags::*;
pub use types::*;
