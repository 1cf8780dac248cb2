use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadStatus;

/// Something that happened to a lead and may move it to another status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadEvent {
    CallLogged,
    NoAnswer,
    FollowUpScheduled,
    MeetingScheduled,
    QuoteCreated,
    QuoteApproved,
    DealWon,
    DealLost,
    QueuedForAssignment,
    WorkerAssigned,
    Reopened,
}

/// Field updates the orchestrator must apply together with the status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadAction {
    IncrementCallCount,
    RecordFollowUp,
    LinkQuote,
    RecordActualValue,
    RecordRejectionReason,
    ClearRejectionReason,
    AssignMember,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: LeadStatus,
    pub to: LeadStatus,
    pub event: LeadEvent,
    pub actions: Vec<LeadAction>,
}

impl TransitionOutcome {
    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }

    pub fn requires(&self, action: LeadAction) -> bool {
        self.actions.contains(&action)
    }
}
