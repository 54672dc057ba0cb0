//! Replication saga state machine.
//!
//! The transition table is a pure function from (role, event) to the step
//! the role performs, the state it moves the saga to and what it emits. The
//! producer and consumer modules only execute the actions this table picks.
//!
//! ```text
//! Created -> CopyRequested -> TransitCopying -> TransitShared -> DrCopying -> Cleanup -> Done
//!                 |                 |                                 |
//!                 v                 v                                 v
//!               NoCopy         Compensated <--------------------- Compensated
//! ```

use std::fmt;

use draco_events::{Event, EventType, TagList, IGNORE_LIFECYCLE};
use serde::Serialize;

use crate::error::SagaError;

/// Reason given when a source carries no lifecycle tag.
pub const REASON_NO_LIFECYCLE: &str = "No Draco_Lifecycle tag";

/// Reason given when a source opted out.
pub const REASON_IGNORED: &str = "Ignored";

/// Which side of the account boundary handles a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Source account: creates, shares and deletes the transit copy.
    Producer,
    /// DR account: gates, provisions keys, owns the DR copy and retention.
    Consumer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Saga progress for one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SagaState {
    Created,
    CopyRequested,
    TransitCopying,
    TransitShared,
    DrCopying,
    Cleanup,
    Done,
    NoCopy,
    Compensated,
}

/// Work a role performs for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Describe the new snapshot and ask the consumer whether to copy it.
    RequestCopy,
    /// Start the transit copy and wait for it.
    StartTransitCopy,
    /// Share the finished transit copy with the DR account.
    ShareTransit,
    /// A transit copy wait failed; delete whatever was created.
    DiscardTransit,
    /// Delete the transit copy on the consumer's request.
    DeleteTransit,
    /// The consumer declined; nothing to do.
    AcknowledgeNoCopy,
    /// Refuse to copy an ineligible source.
    Decline(&'static str),
    /// Obtain the source's DR key and tell the producer to copy.
    ProvisionKey,
    /// Copy the shared transit snapshot into the DR account and wait for it.
    CopyToDr,
    /// Ask the producer to delete the transit copy, then run retention.
    CleanupAndRetain,
    /// The DR copy failed; ask the producer to delete the transit copy.
    CleanupAfterFailure,
}

/// How a step reports completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    Nothing,
    /// Publish the next event directly.
    Publish(EventType),
    /// Start a completion wait that delivers the next event.
    AfterWait(EventType),
}

/// What undoes a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    None,
    /// Delete the transit copy in the handling account.
    DeleteTransit,
    /// Publish a compensating event to the other role.
    Publish(EventType),
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub role: Role,
    pub action: Action,
    pub from: SagaState,
    pub to: SagaState,
    pub emits: Emission,
    pub on_failure: Compensation,
}

/// Result of a handled step, returned to the invoker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StepOutcome {
    /// An event was published for the next hop.
    Published { event_type: String, state: SagaState },
    /// A completion wait was started.
    WaitStarted { execution: String, state: SagaState },
    /// The step finished the saga branch.
    Completed { state: SagaState },
    /// A failure was caught and compensated.
    Compensated { error: String },
    /// A well-formed message that needs no action.
    Ignored { reason: String },
}

impl StepOutcome {
    /// State the saga branch reached, if the step moved it.
    pub fn state(&self) -> Option<SagaState> {
        match self {
            StepOutcome::Published { state, .. }
            | StepOutcome::WaitStarted { state, .. }
            | StepOutcome::Completed { state } => Some(*state),
            StepOutcome::Compensated { .. } => Some(SagaState::Compensated),
            StepOutcome::Ignored { .. } => None,
        }
    }
}

/// Whether a source may be copied, judged from its tags.
pub fn eligibility(tags: &TagList) -> Result<(), &'static str> {
    match tags.lifecycle() {
        None => Err(REASON_NO_LIFECYCLE),
        Some(policy) if policy.eq_ignore_ascii_case(IGNORE_LIFECYCLE) => Err(REASON_IGNORED),
        Some(_) => Ok(()),
    }
}

/// Looks up the step `role` performs for `event`.
pub fn transition(role: Role, event: &Event) -> Result<Transition, SagaError> {
    use EventType::*;
    use SagaState::*;

    let failed = event.error.is_some();
    let row = |action, from, to, emits, on_failure| Transition {
        role,
        action,
        from,
        to,
        emits,
        on_failure,
    };

    let step = match (role, event.event_type) {
        (Role::Producer, SnapshotCreated) => row(
            Action::RequestCopy,
            Created,
            CopyRequested,
            Emission::Publish(SnapshotCopyRequest),
            Compensation::None,
        ),
        (Role::Producer, SnapshotCopyInitiate) => row(
            Action::StartTransitCopy,
            CopyRequested,
            TransitCopying,
            Emission::AfterWait(SnapshotCopyCompleted),
            Compensation::DeleteTransit,
        ),
        (Role::Producer, SnapshotCopyCompleted) if failed => row(
            Action::DiscardTransit,
            TransitCopying,
            Compensated,
            Emission::Nothing,
            Compensation::None,
        ),
        (Role::Producer, SnapshotCopyCompleted) => row(
            Action::ShareTransit,
            TransitCopying,
            TransitShared,
            Emission::Publish(SnapshotCopyShared),
            Compensation::DeleteTransit,
        ),
        (Role::Producer, SnapshotDeleteShared) => row(
            Action::DeleteTransit,
            Cleanup,
            if failed { Compensated } else { Done },
            Emission::Nothing,
            Compensation::None,
        ),
        (Role::Producer, SnapshotNoCopy) => row(
            Action::AcknowledgeNoCopy,
            CopyRequested,
            NoCopy,
            Emission::Nothing,
            Compensation::None,
        ),
        (Role::Consumer, SnapshotCopyRequest) => match eligibility(&event.tag_list) {
            Err(reason) => row(
                Action::Decline(reason),
                CopyRequested,
                NoCopy,
                Emission::Publish(SnapshotNoCopy),
                Compensation::None,
            ),
            Ok(()) => row(
                Action::ProvisionKey,
                CopyRequested,
                CopyRequested,
                Emission::Publish(SnapshotCopyInitiate),
                Compensation::Publish(SnapshotNoCopy),
            ),
        },
        (Role::Consumer, SnapshotCopyShared) => row(
            Action::CopyToDr,
            TransitShared,
            DrCopying,
            Emission::AfterWait(SnapshotCopyCompleted),
            Compensation::Publish(SnapshotDeleteShared),
        ),
        (Role::Consumer, SnapshotCopyCompleted) if failed => row(
            Action::CleanupAfterFailure,
            DrCopying,
            Compensated,
            Emission::Publish(SnapshotDeleteShared),
            Compensation::None,
        ),
        (Role::Consumer, SnapshotCopyCompleted) => row(
            Action::CleanupAndRetain,
            DrCopying,
            Cleanup,
            Emission::Publish(SnapshotDeleteShared),
            Compensation::None,
        ),
        (role, event_type) => return Err(SagaError::Unhandled { role, event_type }),
    };
    Ok(step)
}
