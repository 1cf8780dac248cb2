use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::member::MemberId;
use crate::domain::organization::OrgId;
use crate::domain::quote::QuoteId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    InProgress,
    NoAnswer,
    FollowUp,
    MeetingScheduled,
    MeetingHeld,
    QuoteApproved,
    WaitingForAssignment,
    Assigned,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::NoAnswer => "no_answer",
            Self::FollowUp => "follow_up",
            Self::MeetingScheduled => "meeting_scheduled",
            Self::MeetingHeld => "meeting_held",
            Self::QuoteApproved => "quote_approved",
            Self::WaitingForAssignment => "waiting_for_assignment",
            Self::Assigned => "assigned",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub org_id: OrgId,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub status: LeadStatus,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub estimated_value: Option<Decimal>,
    #[serde(default)]
    pub actual_value: Option<Decimal>,
    #[serde(default)]
    pub assigned_member_id: Option<MemberId>,
    #[serde(default)]
    pub follow_up_on: Option<NaiveDate>,
    #[serde(default)]
    pub call_count: u32,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub quote_id: Option<QuoteId>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            self.phone.as_deref().unwrap_or("unnamed lead")
        } else {
            &self.full_name
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub status: LeadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewLead {
    /// A lead needs at least a name or a phone number to be actionable.
    pub fn validate(&self) -> Result<(), DomainError> {
        let has_name = !self.full_name.trim().is_empty();
        let has_phone = self.phone.as_deref().is_some_and(|phone| !phone.trim().is_empty());
        if !has_name && !has_phone {
            return Err(DomainError::InvariantViolation(
                "a lead requires a name or a phone number".to_string(),
            ));
        }
        if self.estimated_value.is_some_and(|value| value.is_sign_negative()) {
            return Err(DomainError::InvariantViolation(
                "estimated value cannot be negative".to_string(),
            ));
        }
        if self.status.is_closed() {
            return Err(DomainError::InvariantViolation(
                "a lead cannot be created in a closed state".to_string(),
            ));
        }
        Ok(())
    }
}
