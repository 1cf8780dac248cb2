use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::lead::LeadId;
use crate::domain::member::MemberId;
use crate::domain::organization::OrgId;
use crate::domain::quote::{QuoteId, QuoteItem};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// One job per won quote.
    pub fn for_quote(quote_id: &QuoteId) -> Self {
        Self(format!("job_q_{}", quote_id.as_str()))
    }

    /// One job per lead pulled from the assignment queue.
    pub fn for_assignment(lead_id: &LeadId) -> Self {
        Self(format!("job_l_{}", lead_id.0))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Open,
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub org_id: OrgId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    #[serde(default)]
    pub quote_id: Option<QuoteId>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub assigned_member_id: Option<MemberId>,
    #[serde(default)]
    pub items: Vec<QuoteItem>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    pub title: String,
    pub lead_id: Option<LeadId>,
    pub quote_id: Option<QuoteId>,
    pub customer_id: Option<CustomerId>,
    pub assigned_member_id: Option<MemberId>,
    pub items: Vec<QuoteItem>,
    pub status: JobStatus,
}
