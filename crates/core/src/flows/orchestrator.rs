//! Deal lifecycle procedures composed from several gateway calls.
//!
//! The store offers no multi-record transactions, so every procedure either validates
//! everything before its first write or runs as a cascade of idempotent steps whose
//! progress is persisted in a [`CascadeRun`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::attachments::{AttachmentStore, StoredPath};
use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use crate::capability::Capability;
use crate::domain::customer::{normalize_phone, Customer, CustomerId, NewCustomer};
use crate::domain::job::{Job, JobId, JobStatus, NewJob};
use crate::domain::lead::{Lead, LeadId, LeadStatus};
use crate::domain::member::MemberId;
use crate::domain::quote::{NewQuote, Quote, QuoteDraft, QuoteId, QuoteStatus};
use crate::domain::settings::Settings;
use crate::errors::{ApplicationError, DomainError};
use crate::flows::cascade::{CascadeKind, CascadeRun, CascadeStatus, CascadeStep, NewCascadeRun};
use crate::flows::engine::{FlowEngine, LeadFlow};
use crate::flows::states::{LeadAction, LeadEvent};
use crate::gateway::{patch, EntityGateway};
use crate::locks::KeyedLocks;
use crate::store::{Document, Filter, SortKey};
use crate::tenant::TenantContext;

pub const DEFAULT_DOCUMENT_URL_TTL: Duration = Duration::from_secs(15 * 60);

const QUOTE_GRANTS: &[Capability] = &[
    Capability::LeadsView,
    Capability::LeadsEdit,
    Capability::FinanceViewQuotes,
];

const CLOSE_WON_GRANTS: &[Capability] = &[
    Capability::FinanceViewQuotes,
    Capability::FinanceEditQuotes,
    Capability::LeadsView,
    Capability::LeadsEdit,
    Capability::CustomersView,
    Capability::CustomersEdit,
    Capability::JobsView,
    Capability::JobsEdit,
];

const CLOSE_LOST_GRANTS: &[Capability] = &[
    Capability::FinanceViewQuotes,
    Capability::FinanceEditQuotes,
    Capability::LeadsView,
    Capability::LeadsEdit,
    Capability::SettingsEdit,
];

/// Why a deal was lost. `reason` is either one of the tenant's configured rejection
/// reasons or free text, which is then added to the configured list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossReason {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl LossReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), notes: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseWonReport {
    pub quote_id: QuoteId,
    pub lead_id: Option<LeadId>,
    pub customer_id: Option<CustomerId>,
    pub job_id: JobId,
    pub completed: Vec<CascadeStep>,
    /// The deal or the quote was already closed; nothing was written.
    pub already_completed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseLostReport {
    pub quote_id: QuoteId,
    pub lead_id: Option<LeadId>,
    pub reason: String,
    pub reason_added: bool,
    pub completed: Vec<CascadeStep>,
    pub already_completed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteDocument {
    pub quote: Quote,
    pub path: StoredPath,
    pub url: String,
}

#[derive(Clone)]
pub struct DealOrchestrator {
    pub(crate) gateway: EntityGateway,
    pub(crate) engine: FlowEngine<LeadFlow>,
    pub(crate) locks: KeyedLocks,
    pub(crate) audit: Arc<dyn AuditSink>,
    attachments: Option<Arc<dyn AttachmentStore>>,
    document_url_ttl: Duration,
}

impl DealOrchestrator {
    pub fn new(gateway: EntityGateway) -> Self {
        Self {
            gateway,
            engine: FlowEngine::default(),
            locks: KeyedLocks::new(),
            audit: Arc::new(TracingAuditSink),
            attachments: None,
            document_url_ttl: DEFAULT_DOCUMENT_URL_TTL,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_attachments(mut self, store: Arc<dyn AttachmentStore>, url_ttl: Duration) -> Self {
        self.attachments = Some(store);
        self.document_url_ttl = url_ttl;
        self
    }

    pub fn gateway(&self) -> &EntityGateway {
        &self.gateway
    }

    /// Creates a quote for `lead_id` and advances the lead to `meeting_held`. Contact
    /// fields left blank in the draft are taken from the lead.
    pub async fn create_quote_from_lead(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
        mut draft: QuoteDraft,
    ) -> Result<Quote, ApplicationError> {
        self.require(ctx, Capability::FinanceEditQuotes)?;
        let cascade_ctx = ctx.escalate("create_quote_from_lead", QUOTE_GRANTS);

        let lead = self.gateway.collection::<Lead>().get(&cascade_ctx, &lead_id.0).await?;
        self.engine.apply(lead.status, LeadEvent::QuoteCreated).map_err(DomainError::from)?;

        if draft.customer_name.trim().is_empty() {
            draft.customer_name = lead.display_name().to_owned();
        }
        draft.phone = draft.phone.or_else(|| lead.phone.clone());
        draft.email = draft.email.or_else(|| lead.email.clone());
        draft.address = draft.address.or_else(|| lead.address.clone());

        let quote = self.insert_quote(&cascade_ctx, draft, Some(lead.id.clone())).await?;

        let linked = self
            .apply_lead_event(
                &cascade_ctx,
                &lead,
                LeadEvent::QuoteCreated,
                patch(json!({ "quote_id": quote.id })),
            )
            .await;
        if let Err(error) = linked {
            return Err(self.partial_failure(
                ctx,
                quote.id.as_str(),
                vec![CascadeStep::CreateQuote],
                CascadeStep::LinkLead,
                error,
            ));
        }

        info!(
            event_name = "lifecycle.quote_created",
            correlation_id = %ctx.correlation_id(),
            quote_id = %quote.id.as_str(),
            lead_id = %lead.id.0,
            serial = %quote.serial(),
            "quote created from lead"
        );
        self.audit_success(ctx, &quote.id, "lifecycle.quote_created_from_lead", &[("lead_id", lead.id.0.as_str())]);
        Ok(quote)
    }

    /// Creates a quote that is not linked to any lead.
    pub async fn create_quote(
        &self,
        ctx: &TenantContext,
        draft: QuoteDraft,
    ) -> Result<Quote, ApplicationError> {
        self.require(ctx, Capability::FinanceEditQuotes)?;
        let cascade_ctx = ctx.escalate("create_quote", &[Capability::FinanceViewQuotes]);
        let quote = self.insert_quote(&cascade_ctx, draft, None).await?;
        self.audit_success(ctx, &quote.id, "lifecycle.quote_created", &[]);
        Ok(quote)
    }

    /// Saves an edit of an existing quote. Totals are recomputed from the items. Moving
    /// the quote to `approved` advances its lead to `quote_approved`; cancelling it here
    /// leaves the lead untouched.
    pub async fn save_quote(
        &self,
        ctx: &TenantContext,
        quote_id: &QuoteId,
        draft: QuoteDraft,
    ) -> Result<Quote, ApplicationError> {
        self.require(ctx, Capability::FinanceEditQuotes)?;
        let quotes = self.gateway.collection::<Quote>();
        let current = quotes.get(ctx, quote_id.as_str()).await?;

        let next_status = draft.status.unwrap_or(current.status);
        let mut candidate = current.clone();
        candidate.transition_to(next_status)?;
        let totals = draft.totals()?;

        let saved = quotes
            .update(
                ctx,
                quote_id.as_str(),
                patch(json!({
                    "customer_name": draft.customer_name,
                    "phone": draft.phone,
                    "email": draft.email,
                    "address": draft.address,
                    "items": draft.items,
                    "discount": totals.discount,
                    "subtotal": totals.subtotal,
                    "vat": totals.vat,
                    "total": totals.total,
                    "status": next_status,
                    "valid_until": draft.valid_until,
                })),
            )
            .await?;

        let newly_approved =
            next_status == QuoteStatus::Approved && current.status != QuoteStatus::Approved;
        if let (true, Some(lead_id)) = (newly_approved, saved.lead_id.as_ref()) {
            let cascade_ctx = ctx.escalate("save_quote", QUOTE_GRANTS);
            let result = match self.find_lead(&cascade_ctx, lead_id).await {
                Ok(Some(lead)) => self
                    .apply_lead_event(
                        &cascade_ctx,
                        &lead,
                        LeadEvent::QuoteApproved,
                        patch(json!({ "quote_id": saved.id })),
                    )
                    .await
                    .map(|_| ()),
                Ok(None) => Ok(()),
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                return Err(self.partial_failure(
                    ctx,
                    quote_id.as_str(),
                    vec![CascadeStep::SaveQuote],
                    CascadeStep::MarkLeadQuoteApproved,
                    error,
                ));
            }
        }

        self.audit_success(ctx, quote_id, "lifecycle.quote_saved", &[("status", next_status.as_str())]);
        Ok(saved)
    }

    /// Closes the deal as won: approves the quote, marks its lead won, and makes sure
    /// exactly one customer and one job exist for it. Safe to call again; a finished
    /// close is a no-op and an interrupted one resumes at the failed step.
    pub async fn close_won(
        &self,
        ctx: &TenantContext,
        quote_id: &QuoteId,
    ) -> Result<CloseWonReport, ApplicationError> {
        self.require(ctx, Capability::FinanceCloseDeals)?;
        let org_id = ctx.require_org()?.clone();
        let _guard = self.locks.lock(&format!("quote:{}:{}", org_id, quote_id.as_str())).await;
        let cascade_ctx = ctx.escalate("close_won", CLOSE_WON_GRANTS);

        let mut quote = self.gateway.collection::<Quote>().get(&cascade_ctx, quote_id.as_str()).await?;
        let job_id = JobId::for_quote(&quote.id);
        if !quote.can_transition_to(QuoteStatus::Approved) {
            info!(
                event_name = "lifecycle.close_won_skipped",
                correlation_id = %ctx.correlation_id(),
                quote_id = %quote.id.as_str(),
                status = %quote.status.as_str(),
                "quote is already closed; close-won is a no-op"
            );
            return Ok(CloseWonReport {
                quote_id: quote.id.clone(),
                lead_id: quote.lead_id.clone(),
                customer_id: None,
                job_id,
                completed: Vec::new(),
                already_completed: true,
            });
        }

        let mut run = self.load_run(&cascade_ctx, CascadeKind::CloseWon, &quote.id).await?;
        if run.status == CascadeStatus::Completed {
            let customer_id = self.find_customer(&cascade_ctx, &quote).await?.map(|customer| customer.id);
            return Ok(CloseWonReport {
                quote_id: quote.id.clone(),
                lead_id: quote.lead_id.clone(),
                customer_id,
                job_id,
                completed: run.completed,
                already_completed: true,
            });
        }

        let lead = match &quote.lead_id {
            Some(lead_id) => self.find_lead(&cascade_ctx, lead_id).await?,
            None => None,
        };

        let mut plan = vec![CascadeStep::ApproveQuote];
        if lead.is_some() {
            plan.push(CascadeStep::MarkLeadWon);
        }
        plan.extend([CascadeStep::EnsureCustomer, CascadeStep::CreateJob]);

        let mut customer_id = None;
        for step in plan {
            if run.is_done(step) {
                if step == CascadeStep::EnsureCustomer {
                    customer_id = self.find_customer(&cascade_ctx, &quote).await?.map(|customer| customer.id);
                }
                continue;
            }

            let result = match step {
                CascadeStep::ApproveQuote => self.approve_quote(&cascade_ctx, &mut quote).await,
                CascadeStep::MarkLeadWon => match &lead {
                    Some(lead) => self
                        .apply_lead_event(
                            &cascade_ctx,
                            lead,
                            LeadEvent::DealWon,
                            patch(json!({ "actual_value": quote.total, "quote_id": quote.id })),
                        )
                        .await
                        .map(|_| ()),
                    None => Ok(()),
                },
                CascadeStep::EnsureCustomer => match self.ensure_customer(&cascade_ctx, &quote).await {
                    Ok(id) => {
                        customer_id = Some(id);
                        Ok(())
                    }
                    Err(error) => Err(error),
                },
                CascadeStep::CreateJob => {
                    let assignee = lead.as_ref().and_then(|lead| lead.assigned_member_id.clone());
                    self.create_job(&cascade_ctx, &quote, customer_id.clone(), assignee).await
                }
                _ => Ok(()),
            };

            match result {
                Ok(()) => {
                    run.completed.push(step);
                    self.save_run(&cascade_ctx, &mut run, CascadeStatus::Running, None).await?;
                }
                Err(error) => return Err(self.fail_run(&cascade_ctx, &mut run, step, error).await),
            }
        }

        self.save_run(&cascade_ctx, &mut run, CascadeStatus::Completed, None).await?;
        info!(
            event_name = "lifecycle.deal_won",
            correlation_id = %ctx.correlation_id(),
            org_id = %org_id,
            quote_id = %quote.id.as_str(),
            total = %quote.total,
            "deal closed as won"
        );
        self.audit_success(ctx, &quote.id, "lifecycle.close_won", &[("total", quote.total.to_string().as_str())]);

        Ok(CloseWonReport {
            quote_id: quote.id.clone(),
            lead_id: lead.map(|lead| lead.id),
            customer_id,
            job_id,
            completed: run.completed,
            already_completed: false,
        })
    }

    /// Closes the deal as lost with a mandatory reason. Unknown reasons are added to the
    /// tenant's rejection reason list.
    pub async fn close_lost(
        &self,
        ctx: &TenantContext,
        quote_id: &QuoteId,
        reason: LossReason,
    ) -> Result<CloseLostReport, ApplicationError> {
        self.require(ctx, Capability::FinanceCloseDeals)?;
        let reason_text = reason.reason.trim().to_owned();
        if reason_text.is_empty() {
            return Err(ApplicationError::ValidationFailed(
                "select or enter a reason before closing the deal as lost".to_owned(),
            ));
        }
        let org_id = ctx.require_org()?.clone();
        let _guard = self.locks.lock(&format!("quote:{}:{}", org_id, quote_id.as_str())).await;
        let cascade_ctx = ctx.escalate("close_lost", CLOSE_LOST_GRANTS);

        let mut quote = self.gateway.collection::<Quote>().get(&cascade_ctx, quote_id.as_str()).await?;
        if !quote.can_transition_to(QuoteStatus::Cancelled) {
            info!(
                event_name = "lifecycle.close_lost_skipped",
                correlation_id = %ctx.correlation_id(),
                quote_id = %quote.id.as_str(),
                status = %quote.status.as_str(),
                "quote is already closed; close-lost is a no-op"
            );
            return Ok(CloseLostReport {
                quote_id: quote.id.clone(),
                lead_id: quote.lead_id.clone(),
                reason: reason_text,
                reason_added: false,
                completed: Vec::new(),
                already_completed: true,
            });
        }

        let settings = self.gateway.settings(&cascade_ctx).await?;
        let known = settings.find_rejection_reason(&reason_text).map(str::to_owned);
        let reason_added = known.is_none();
        let stored_reason = known.unwrap_or(reason_text);

        let mut run = self.load_run(&cascade_ctx, CascadeKind::CloseLost, &quote.id).await?;
        if run.status == CascadeStatus::Completed {
            return Ok(CloseLostReport {
                quote_id: quote.id.clone(),
                lead_id: quote.lead_id.clone(),
                reason: stored_reason,
                reason_added: false,
                completed: run.completed,
                already_completed: true,
            });
        }

        let lead = match &quote.lead_id {
            Some(lead_id) => self.find_lead(&cascade_ctx, lead_id).await?,
            None => None,
        };

        // A lead already won through another quote stays won.
        let mut plan = vec![CascadeStep::CancelQuote];
        if lead.as_ref().is_some_and(|lead| lead.status != LeadStatus::Won) {
            plan.push(CascadeStep::MarkLeadLost);
        }
        if reason_added {
            plan.push(CascadeStep::PersistReason);
        }

        for step in plan {
            if run.is_done(step) {
                continue;
            }
            let result = match step {
                CascadeStep::CancelQuote => self.cancel_quote(&cascade_ctx, &mut quote).await,
                CascadeStep::MarkLeadLost => match &lead {
                    Some(lead) => {
                        let mut fields = patch(json!({ "rejection_reason": stored_reason }));
                        if let Some(notes) = reason.notes.as_ref().filter(|notes| !notes.trim().is_empty()) {
                            fields.insert("notes".to_owned(), Value::String(notes.clone()));
                        }
                        self.apply_lead_event(&cascade_ctx, lead, LeadEvent::DealLost, fields)
                            .await
                            .map(|_| ())
                    }
                    None => Ok(()),
                },
                CascadeStep::PersistReason => self.persist_reason(&cascade_ctx, &stored_reason).await,
                _ => Ok(()),
            };

            match result {
                Ok(()) => {
                    run.completed.push(step);
                    self.save_run(&cascade_ctx, &mut run, CascadeStatus::Running, None).await?;
                }
                Err(error) => return Err(self.fail_run(&cascade_ctx, &mut run, step, error).await),
            }
        }

        self.save_run(&cascade_ctx, &mut run, CascadeStatus::Completed, None).await?;
        info!(
            event_name = "lifecycle.deal_lost",
            correlation_id = %ctx.correlation_id(),
            org_id = %org_id,
            quote_id = %quote.id.as_str(),
            reason = %stored_reason,
            "deal closed as lost"
        );
        self.audit_success(ctx, &quote.id, "lifecycle.close_lost", &[("reason", stored_reason.as_str())]);

        Ok(CloseLostReport {
            quote_id: quote.id.clone(),
            lead_id: lead.map(|lead| lead.id),
            reason: stored_reason,
            reason_added,
            completed: run.completed,
            already_completed: false,
        })
    }

    /// Stores a generated quote document and returns a time-limited download link.
    pub async fn attach_quote_document(
        &self,
        ctx: &TenantContext,
        quote_id: &QuoteId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<QuoteDocument, ApplicationError> {
        self.require(ctx, Capability::FinanceEditQuotes)?;
        let store = self.attachments.as_ref().ok_or_else(|| {
            ApplicationError::Configuration("attachment storage is not configured".to_owned())
        })?;
        let quotes = self.gateway.collection::<Quote>();
        let quote = quotes.get(ctx, quote_id.as_str()).await?;

        let path = StoredPath::for_quote(&quote.org_id, &quote.id, file_name)?;
        let stored = store.upload(&path, bytes).await?;
        let quote = quotes
            .update(ctx, quote_id.as_str(), patch(json!({ "invoice_ref": stored.as_str() })))
            .await?;
        let url = store.sign(&stored, self.document_url_ttl)?;

        self.audit_success(ctx, quote_id, "lifecycle.quote_document_attached", &[("path", stored.as_str())]);
        Ok(QuoteDocument { quote, path: stored, url })
    }

    pub(crate) fn require(
        &self,
        ctx: &TenantContext,
        capability: Capability,
    ) -> Result<(), ApplicationError> {
        self.gateway.capabilities().require(ctx.actor(), capability)
    }

    /// Applies a lead event and writes the resulting status together with `fields`.
    pub(crate) async fn apply_lead_event(
        &self,
        ctx: &TenantContext,
        lead: &Lead,
        event: LeadEvent,
        mut fields: Document,
    ) -> Result<Lead, ApplicationError> {
        let outcome = self
            .engine
            .apply_with_audit(lead.status, event, &lead.id.0, self.audit.as_ref(), &AuditContext::from_tenant(ctx))
            .map_err(DomainError::from)?;

        fields.insert("status".to_owned(), json!(outcome.to));
        if outcome.requires(LeadAction::ClearRejectionReason) {
            fields.insert("rejection_reason".to_owned(), Value::Null);
        }
        self.gateway.collection::<Lead>().update(ctx, &lead.id.0, fields).await
    }

    pub(crate) async fn find_lead(
        &self,
        ctx: &TenantContext,
        lead_id: &LeadId,
    ) -> Result<Option<Lead>, ApplicationError> {
        match self.gateway.collection::<Lead>().get(ctx, &lead_id.0).await {
            Ok(lead) => Ok(Some(lead)),
            Err(ApplicationError::NotFound { .. }) => {
                warn!(
                    event_name = "lifecycle.linked_lead_missing",
                    correlation_id = %ctx.correlation_id(),
                    lead_id = %lead_id.0,
                    "linked lead no longer exists; skipping lead-side steps"
                );
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub(crate) fn partial_failure(
        &self,
        ctx: &TenantContext,
        subject: &str,
        completed: Vec<CascadeStep>,
        failed_step: CascadeStep,
        cause: ApplicationError,
    ) -> ApplicationError {
        error!(
            event_name = "lifecycle.cascade_step_failed",
            correlation_id = %ctx.correlation_id(),
            subject_id = %subject,
            failed_step = %failed_step,
            error = %cause,
            "cascade step failed after earlier steps committed"
        );
        self.audit.emit(
            AuditContext::from_tenant(ctx)
                .event(
                    Some(subject.to_owned()),
                    "lifecycle.cascade_step_failed",
                    AuditCategory::Lifecycle,
                    AuditOutcome::Failed,
                )
                .with_metadata("failed_step", failed_step.as_str())
                .with_metadata("error", cause.to_string()),
        );
        ApplicationError::PartialCascadeFailure { completed, failed_step, message: cause.to_string() }
    }

    pub(crate) fn audit_success(
        &self,
        ctx: &TenantContext,
        subject: &QuoteId,
        event_type: &str,
        metadata: &[(&str, &str)],
    ) {
        let mut event = AuditContext::from_tenant(ctx).event(
            Some(subject.as_str().to_owned()),
            event_type,
            AuditCategory::Lifecycle,
            AuditOutcome::Success,
        );
        for (key, value) in metadata {
            event = event.with_metadata(*key, *value);
        }
        self.audit.emit(event);
    }

    async fn insert_quote(
        &self,
        ctx: &TenantContext,
        draft: QuoteDraft,
        lead_id: Option<LeadId>,
    ) -> Result<Quote, ApplicationError> {
        let settings = self.gateway.settings(ctx).await?;
        let prefix = settings.serial_prefix().to_owned();
        let mut new_quote = NewQuote::priced(draft, prefix.clone(), 0, lead_id)?;

        let current_max = self
            .gateway
            .collection::<Quote>()
            .filter(
                ctx,
                Filter::new().eq("serial_prefix", prefix.clone()),
                Some(&SortKey::descending("serial_number")),
            )
            .await?
            .first()
            .map(|quote| quote.serial_number)
            .unwrap_or(0);
        new_quote.serial_number =
            self.gateway.next_sequence(ctx, &format!("quote_serial:{prefix}"), current_max).await?;

        self.gateway.collection::<Quote>().create(ctx, &new_quote).await
    }

    async fn approve_quote(&self, ctx: &TenantContext, quote: &mut Quote) -> Result<(), ApplicationError> {
        if quote.status == QuoteStatus::Approved {
            return Ok(());
        }
        quote.transition_to(QuoteStatus::Approved)?;
        self.gateway
            .collection::<Quote>()
            .update(ctx, quote.id.as_str(), patch(json!({ "status": QuoteStatus::Approved })))
            .await?;
        Ok(())
    }

    async fn cancel_quote(&self, ctx: &TenantContext, quote: &mut Quote) -> Result<(), ApplicationError> {
        if quote.status == QuoteStatus::Cancelled {
            return Ok(());
        }
        quote.transition_to(QuoteStatus::Cancelled)?;
        self.gateway
            .collection::<Quote>()
            .update(ctx, quote.id.as_str(), patch(json!({ "status": QuoteStatus::Cancelled })))
            .await?;
        Ok(())
    }

    fn customer_id_for(&self, quote: &Quote) -> CustomerId {
        match quote.phone.as_deref().map(str::trim).filter(|phone| !phone.is_empty()) {
            Some(phone) => CustomerId::for_phone(&quote.org_id, phone),
            None => CustomerId::for_quote(&quote.id),
        }
    }

    async fn find_customer(
        &self,
        ctx: &TenantContext,
        quote: &Quote,
    ) -> Result<Option<Customer>, ApplicationError> {
        let customers = self.gateway.collection::<Customer>();
        if let Some(phone) = quote.phone.as_deref().map(str::trim).filter(|phone| !phone.is_empty()) {
            let filter = Filter::new().eq("phone", normalize_phone(phone));
            if let Some(found) = customers.find_one(ctx, filter).await? {
                return Ok(Some(found));
            }
        }
        match customers.get(ctx, &self.customer_id_for(quote).0).await {
            Ok(found) => Ok(Some(found)),
            Err(ApplicationError::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn ensure_customer(
        &self,
        ctx: &TenantContext,
        quote: &Quote,
    ) -> Result<CustomerId, ApplicationError> {
        if let Some(existing) = self.find_customer(ctx, quote).await? {
            return Ok(existing.id);
        }

        let id = self.customer_id_for(quote);
        let draft = NewCustomer {
            id: Some(id.clone()),
            full_name: quote.customer_name.clone(),
            phone: quote.phone.clone().filter(|phone| !phone.trim().is_empty()),
            email: quote.email.clone(),
            address: quote.address.clone(),
            source_quote_id: Some(quote.id.clone()),
        };
        match self.gateway.collection::<Customer>().create(ctx, &draft).await {
            Ok(created) => Ok(created.id),
            Err(ApplicationError::Conflict { id: existing, .. }) => Ok(CustomerId(existing)),
            Err(error) => Err(error),
        }
    }

    async fn create_job(
        &self,
        ctx: &TenantContext,
        quote: &Quote,
        customer_id: Option<CustomerId>,
        assignee: Option<MemberId>,
    ) -> Result<(), ApplicationError> {
        let draft = NewJob {
            id: Some(JobId::for_quote(&quote.id)),
            title: format!("Quote {} for {}", quote.serial(), quote.customer_name),
            lead_id: quote.lead_id.clone(),
            quote_id: Some(quote.id.clone()),
            customer_id,
            assigned_member_id: assignee,
            items: quote.items.clone(),
            status: JobStatus::Open,
        };
        match self.gateway.collection::<Job>().create(ctx, &draft).await {
            Ok(_) | Err(ApplicationError::Conflict { .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn persist_reason(&self, ctx: &TenantContext, reason: &str) -> Result<(), ApplicationError> {
        let records = self.gateway.collection::<Settings>();
        match records.find_one(ctx, Filter::new()).await? {
            Some(settings) => {
                if settings.find_rejection_reason(reason).is_some() {
                    return Ok(());
                }
                let mut reasons = settings.rejection_reasons.clone();
                reasons.push(reason.to_owned());
                records
                    .update(ctx, &settings.id, patch(json!({ "rejection_reasons": reasons })))
                    .await?;
            }
            None => {
                let org_id = ctx.require_org()?;
                let mut settings = Settings::for_org(org_id);
                settings.rejection_reasons.push(reason.to_owned());
                records.create(ctx, &settings).await?;
            }
        }
        Ok(())
    }

    async fn load_run(
        &self,
        ctx: &TenantContext,
        kind: CascadeKind,
        quote_id: &QuoteId,
    ) -> Result<CascadeRun, ApplicationError> {
        let runs = self.gateway.collection::<CascadeRun>();
        match runs.get(ctx, &CascadeRun::id_for(kind, quote_id)).await {
            Ok(run) => Ok(run),
            Err(ApplicationError::NotFound { .. }) => {
                runs.create(ctx, &NewCascadeRun::start(kind, quote_id)).await
            }
            Err(error) => Err(error),
        }
    }

    async fn save_run(
        &self,
        ctx: &TenantContext,
        run: &mut CascadeRun,
        status: CascadeStatus,
        last_error: Option<String>,
    ) -> Result<(), ApplicationError> {
        *run = self
            .gateway
            .collection::<CascadeRun>()
            .update(
                ctx,
                &run.id,
                patch(json!({
                    "completed": run.completed,
                    "status": status,
                    "last_error": last_error,
                })),
            )
            .await?;
        Ok(())
    }

    /// Records the failure on the run. Failing before anything committed surfaces the
    /// original error; failing later is a partial success.
    async fn fail_run(
        &self,
        ctx: &TenantContext,
        run: &mut CascadeRun,
        step: CascadeStep,
        cause: ApplicationError,
    ) -> ApplicationError {
        if let Err(save_error) =
            self.save_run(ctx, run, CascadeStatus::Failed, Some(cause.to_string())).await
        {
            warn!(
                event_name = "lifecycle.cascade_run_not_saved",
                correlation_id = %ctx.correlation_id(),
                cascade_run_id = %run.id,
                error = %save_error,
                "could not record cascade failure"
            );
        }
        if run.completed.is_empty() {
            return cause;
        }
        self.partial_failure(ctx, run.quote_id.as_str(), run.completed.clone(), step, cause)
    }
}
