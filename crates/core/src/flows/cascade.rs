//! Multi-record cascades and their persisted progress.
//!
//! A cascade is an ordered list of [`CascadeStep`]s. Every step writes a record with a
//! deterministic id, so re-running a step that already committed is harmless. The
//! [`CascadeRun`] record remembers which steps finished so a retry after a partial
//! failure resumes instead of starting over or silently stopping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::organization::OrgId;
use crate::domain::quote::QuoteId;
use crate::gateway::{Collection, Entity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStep {
    CreateQuote,
    LinkLead,
    SaveQuote,
    MarkLeadQuoteApproved,
    ApproveQuote,
    MarkLeadWon,
    EnsureCustomer,
    CreateJob,
    CancelQuote,
    MarkLeadLost,
    PersistReason,
    ClaimQueuedLead,
    CreateAssignmentJob,
    MarkMemberBusy,
}

impl CascadeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateQuote => "create_quote",
            Self::LinkLead => "link_lead",
            Self::SaveQuote => "save_quote",
            Self::MarkLeadQuoteApproved => "mark_lead_quote_approved",
            Self::ApproveQuote => "approve_quote",
            Self::MarkLeadWon => "mark_lead_won",
            Self::EnsureCustomer => "ensure_customer",
            Self::CreateJob => "create_job",
            Self::CancelQuote => "cancel_quote",
            Self::MarkLeadLost => "mark_lead_lost",
            Self::PersistReason => "persist_reason",
            Self::ClaimQueuedLead => "claim_queued_lead",
            Self::CreateAssignmentJob => "create_assignment_job",
            Self::MarkMemberBusy => "mark_member_busy",
        }
    }

    /// What the operator should do when the cascade stopped at this step.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::CreateQuote | Self::SaveQuote | Self::ApproveQuote | Self::CancelQuote => {
                "The quote could not be saved. Nothing else was changed; retry the action."
            }
            Self::LinkLead => {
                "The quote was created, but the lead could not be linked to it. Open the lead and link the quote manually."
            }
            Self::MarkLeadQuoteApproved => {
                "The quote was saved, but the lead status could not be updated. Retry saving the quote."
            }
            Self::MarkLeadWon => {
                "The quote was approved, but the lead could not be marked as won. Retry closing the deal."
            }
            Self::EnsureCustomer => {
                "Deal marked won, but the customer record could not be created. Retry closing the deal or create it manually."
            }
            Self::CreateJob => {
                "Deal marked won, but job record could not be created. Create it manually or retry closing the deal."
            }
            Self::MarkLeadLost => {
                "The quote was cancelled, but the lead could not be marked as lost. Retry closing the deal."
            }
            Self::PersistReason => {
                "The deal was closed as lost, but the new rejection reason could not be added to settings."
            }
            Self::ClaimQueuedLead | Self::CreateAssignmentJob | Self::MarkMemberBusy => {
                "The installer's availability changed, but the queued lead could not be fully assigned. Assign it manually."
            }
        }
    }
}

impl std::fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeKind {
    CloseWon,
    CloseLost,
}

impl CascadeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloseWon => "close_won",
            Self::CloseLost => "close_lost",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    #[default]
    Running,
    Failed,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CascadeRun {
    pub id: String,
    pub org_id: OrgId,
    pub kind: CascadeKind,
    pub quote_id: QuoteId,
    #[serde(default)]
    pub completed: Vec<CascadeStep>,
    #[serde(default)]
    pub status: CascadeStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CascadeRun {
    pub fn id_for(kind: CascadeKind, quote_id: &QuoteId) -> String {
        format!("{}:{}", kind.as_str(), quote_id.as_str())
    }

    pub fn is_done(&self, step: CascadeStep) -> bool {
        self.completed.contains(&step)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewCascadeRun {
    pub id: String,
    pub kind: CascadeKind,
    pub quote_id: QuoteId,
    pub completed: Vec<CascadeStep>,
    pub status: CascadeStatus,
}

impl NewCascadeRun {
    pub fn start(kind: CascadeKind, quote_id: &QuoteId) -> Self {
        Self {
            id: CascadeRun::id_for(kind, quote_id),
            kind,
            quote_id: quote_id.clone(),
            completed: Vec::new(),
            status: CascadeStatus::Running,
        }
    }
}

impl Entity for CascadeRun {
    type Draft = NewCascadeRun;
    const COLLECTION: Collection = Collection::CascadeRuns;
}

#[cfg(test)]
mod tests {
    use super::{CascadeKind, CascadeRun, CascadeStep};
    use crate::domain::quote::QuoteId;

    #[test]
    fn run_ids_are_derived_from_kind_and_quote() {
        let quote = QuoteId("q-9".to_owned());
        assert_eq!(CascadeRun::id_for(CascadeKind::CloseWon, &quote), "close_won:q-9");
        assert_ne!(
            CascadeRun::id_for(CascadeKind::CloseWon, &quote),
            CascadeRun::id_for(CascadeKind::CloseLost, &quote)
        );
    }

    #[test]
    fn steps_serialize_with_their_display_name() {
        let encoded = serde_json::to_string(&CascadeStep::EnsureCustomer).expect("encode");
        assert_eq!(encoded, format!("\"{}\"", CascadeStep::EnsureCustomer));
    }
}
