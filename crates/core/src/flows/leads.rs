use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::capability::Capability;
use crate::domain::job::{Job, JobId, JobStatus, NewJob};
use crate::domain::lead::{Lead, LeadId, LeadStatus, NewLead};
use crate::domain::member::{Availability, Member, MemberId, MemberRole};
use crate::domain::quote::Quote;
use crate::errors::ApplicationError;
use crate::flows::cascade::CascadeStep;
use crate::flows::orchestrator::DealOrchestrator;
use crate::flows::states::LeadEvent;
use crate::gateway::patch;
use crate::store::{Document, Filter, SortKey};
use crate::tenant::TenantContext;

const ASSIGNMENT_GRANTS: &[Capability] = &[
    Capability::StaffView,
    Capability::StaffManage,
    Capability::LeadsView,
    Capability::LeadsEdit,
    Capability::JobsView,
    Capability::JobsEdit,
    Capability::FinanceViewQuotes,
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub answered: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub member: Member,
    pub assigned_lead_id: Option<LeadId>,
    pub job_id: Option<JobId>,
}

impl DealOrchestrator {
    /// Creates a lead. Counts toward the tenant's monthly lead quota.
    pub async fn create_lead(
        &self,
        ctx: &TenantContext,
        draft: NewLead,
    ) -> Result<Lead, ApplicationError> {
        draft.validate()?;
        self.gateway.collection::<Lead>().create(ctx, &draft).await
    }

    pub async fn record_call(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
        outcome: CallOutcome,
    ) -> Result<Lead, ApplicationError> {
        self.require(ctx, Capability::LeadsEdit)?;
        let org_id = ctx.require_org()?;
        let _guard = self.locks.lock(&format!("lead:{}:{}", org_id, lead_id.0)).await;

        let lead = self.gateway.collection::<Lead>().get(ctx, &lead_id.0).await?;
        let event = if outcome.answered { LeadEvent::CallLogged } else { LeadEvent::NoAnswer };
        let mut fields = patch(json!({ "call_count": lead.call_count.saturating_add(1) }));
        if let Some(notes) = outcome.notes.filter(|notes| !notes.trim().is_empty()) {
            fields.insert("notes".to_owned(), Value::String(notes));
        }
        self.apply_lead_event(ctx, &lead, event, fields).await
    }

    pub async fn schedule_meeting(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
        on: NaiveDate,
    ) -> Result<Lead, ApplicationError> {
        self.move_lead(ctx, lead_id, LeadEvent::MeetingScheduled, patch(json!({ "follow_up_on": on })))
            .await
    }

    pub async fn schedule_follow_up(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
        on: NaiveDate,
    ) -> Result<Lead, ApplicationError> {
        self.move_lead(ctx, lead_id, LeadEvent::FollowUpScheduled, patch(json!({ "follow_up_on": on })))
            .await
    }

    /// Puts the lead into the installer queue; the next installer who becomes
    /// available picks up the oldest queued lead.
    pub async fn queue_for_assignment(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
    ) -> Result<Lead, ApplicationError> {
        self.move_lead(
            ctx,
            lead_id,
            LeadEvent::QueuedForAssignment,
            patch(json!({ "assigned_member_id": Value::Null })),
        )
        .await
    }

    pub async fn reopen_lead(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
    ) -> Result<Lead, ApplicationError> {
        self.move_lead(ctx, lead_id, LeadEvent::Reopened, patch(json!({}))).await
    }

    /// Assigns a lead to a member of the same organization.
    pub async fn assign_lead(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
        member_id: &MemberId,
    ) -> Result<Lead, ApplicationError> {
        self.require(ctx, Capability::LeadsAssign)?;
        let cascade_ctx = ctx.escalate("assign_lead", ASSIGNMENT_GRANTS);

        match self.gateway.collection::<Member>().get(&cascade_ctx, &member_id.0).await {
            Ok(_) => {}
            Err(ApplicationError::NotFound { .. }) => {
                return Err(ApplicationError::ValidationFailed(format!(
                    "member `{}` does not belong to this organization",
                    member_id.0
                )));
            }
            Err(error) => return Err(error),
        }

        let lead = self.gateway.collection::<Lead>().get(&cascade_ctx, &lead_id.0).await?;
        let fields = patch(json!({ "assigned_member_id": member_id }));
        if lead.status == LeadStatus::WaitingForAssignment {
            self.apply_lead_event(&cascade_ctx, &lead, LeadEvent::WorkerAssigned, fields).await
        } else {
            self.gateway.collection::<Lead>().update(&cascade_ctx, &lead_id.0, fields).await
        }
    }

    /// Updates a member's availability. An installer who becomes available is handed the
    /// oldest unassigned queued lead: a job is opened for it and the installer is marked
    /// busy.
    pub async fn set_member_availability(
        &self,
        ctx: &TenantContext,
        member_id: &MemberId,
        availability: Availability,
    ) -> Result<AvailabilityReport, ApplicationError> {
        let is_self = ctx.actor().member_id.as_ref() == Some(member_id);
        if !is_self {
            self.require(ctx, Capability::StaffManage)?;
        }
        let org_id = ctx.require_org()?.clone();
        let cascade_ctx = ctx.escalate("set_member_availability", ASSIGNMENT_GRANTS);
        let members = self.gateway.collection::<Member>();

        let member = members
            .update(&cascade_ctx, &member_id.0, patch(json!({ "availability": availability })))
            .await?;
        let idle = AvailabilityReport { member, assigned_lead_id: None, job_id: None };

        if availability != Availability::Available || idle.member.role != MemberRole::Installer {
            return Ok(idle);
        }
        let settings = self.gateway.settings(&cascade_ctx).await?;
        if !settings.assignment.auto_assign_installers {
            return Ok(idle);
        }

        let _guard = self.locks.lock(&format!("assignment-queue:{org_id}")).await;
        let queued = self
            .gateway
            .collection::<Lead>()
            .filter(
                &cascade_ctx,
                Filter::new()
                    .eq("status", LeadStatus::WaitingForAssignment.as_str())
                    .eq("assigned_member_id", Value::Null),
                Some(&SortKey::ascending("created_at")),
            )
            .await?;
        let Some(lead) = queued.into_iter().next() else {
            return Ok(idle);
        };

        let subject = lead.id.0.clone();
        let mut completed = Vec::new();

        let claimed = self
            .apply_lead_event(
                &cascade_ctx,
                &lead,
                LeadEvent::WorkerAssigned,
                patch(json!({ "assigned_member_id": member_id })),
            )
            .await?;
        completed.push(CascadeStep::ClaimQueuedLead);

        let job_id = JobId::for_assignment(&claimed.id);
        if let Err(error) = self.open_assignment_job(&cascade_ctx, &claimed, &job_id, member_id).await {
            return Err(self.partial_failure(ctx, &subject, completed, CascadeStep::CreateAssignmentJob, error));
        }
        completed.push(CascadeStep::CreateAssignmentJob);

        let member = match members
            .update(&cascade_ctx, &member_id.0, patch(json!({ "availability": Availability::Busy })))
            .await
        {
            Ok(member) => member,
            Err(error) => {
                return Err(self.partial_failure(ctx, &subject, completed, CascadeStep::MarkMemberBusy, error));
            }
        };

        info!(
            event_name = "lifecycle.lead_auto_assigned",
            correlation_id = %ctx.correlation_id(),
            org_id = %org_id,
            lead_id = %claimed.id.0,
            member_id = %member_id.0,
            "queued lead assigned to available installer"
        );
        Ok(AvailabilityReport { member, assigned_lead_id: Some(claimed.id), job_id: Some(job_id) })
    }

    async fn move_lead(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
        event: LeadEvent,
        fields: Document,
    ) -> Result<Lead, ApplicationError> {
        self.require(ctx, Capability::LeadsEdit)?;
        let lead = self.gateway.collection::<Lead>().get(ctx, &lead_id.0).await?;
        self.apply_lead_event(ctx, &lead, event, fields).await
    }

    async fn open_assignment_job(
        &self,
        ctx: &TenantContext,
        lead: &Lead,
        job_id: &JobId,
        member_id: &MemberId,
    ) -> Result<(), ApplicationError> {
        let items = match &lead.quote_id {
            Some(quote_id) => match self.gateway.collection::<Quote>().get(ctx, quote_id.as_str()).await {
                Ok(quote) => quote.items,
                Err(ApplicationError::NotFound { .. }) => Vec::new(),
                Err(error) => return Err(error),
            },
            None => Vec::new(),
        };
        let draft = NewJob {
            id: Some(job_id.clone()),
            title: format!("Installation for {}", lead.display_name()),
            lead_id: Some(lead.id.clone()),
            quote_id: lead.quote_id.clone(),
            customer_id: None,
            assigned_member_id: Some(member_id.clone()),
            items,
            status: JobStatus::Scheduled,
        };
        match self.gateway.collection::<Job>().create(ctx, &draft).await {
            Ok(_) | Err(ApplicationError::Conflict { .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }
}
