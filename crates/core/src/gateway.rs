//! Tenant-scoped access to every persisted collection.
//!
//! All reads and writes conjoin `org_id = ctx.org_id` (or `id = ctx.org_id` for the
//! organization record itself) before reaching the [`RecordStore`]. A record belonging
//! to another tenant is indistinguishable from a missing one.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use crate::capability::{Capability, CapabilityEngine};
use crate::domain::customer::{normalize_phone, Customer, CustomerId, NewCustomer};
use crate::domain::job::{Job, NewJob};
use crate::domain::lead::{Lead, NewLead};
use crate::domain::member::{Member, NewMember};
use crate::domain::organization::{OrgId, Organization};
use crate::domain::quote::{NewQuote, Quote};
use crate::domain::settings::Settings;
use crate::errors::ApplicationError;
use crate::flows::cascade::CascadeRun;
use crate::store::{
    decode_document, document_created_at, encode_document, merge_patch, Document, Filter,
    RecordStore, SortKey,
};
use crate::tenant::TenantContext;

/// Keys a caller can never set or change; the gateway owns them.
const PROTECTED_KEYS: [&str; 3] = ["id", "org_id", "created_at"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Organizations,
    Members,
    Leads,
    Quotes,
    Customers,
    Jobs,
    Settings,
    CascadeRuns,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Open,
    Requires(Capability),
    /// Written only by the deal lifecycle, on behalf of a caller holding the capability.
    Lifecycle(Capability),
    Closed,
}

/// Who issues a write. Lifecycle writes come from [`crate::flows::DealOrchestrator`]
/// and may touch the fields it owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    Client,
    Lifecycle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessPolicy {
    pub read: Gate,
    pub create: Gate,
    pub update: Gate,
    pub delete: Gate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaKind {
    /// Records created in the current UTC calendar month.
    MonthlyLeads,
    /// Records alive at any time.
    Seats,
}

impl Collection {
    pub const ALL: [Self; 8] = [
        Self::Organizations,
        Self::Members,
        Self::Leads,
        Self::Quotes,
        Self::Customers,
        Self::Jobs,
        Self::Settings,
        Self::CascadeRuns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organizations => "organizations",
            Self::Members => "members",
            Self::Leads => "leads",
            Self::Quotes => "quotes",
            Self::Customers => "customers",
            Self::Jobs => "jobs",
            Self::Settings => "settings",
            Self::CascadeRuns => "cascade_runs",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|collection| collection.as_str() == value)
    }

    pub fn policy(&self) -> AccessPolicy {
        use Capability::*;
        use Gate::{Closed, Lifecycle, Open, Requires};

        match self {
            Self::Organizations => {
                AccessPolicy { read: Open, create: Closed, update: Closed, delete: Closed }
            }
            Self::Members => AccessPolicy {
                read: Requires(StaffView),
                create: Requires(StaffManage),
                update: Requires(StaffManage),
                delete: Requires(StaffManage),
            },
            Self::Leads => AccessPolicy {
                read: Requires(LeadsView),
                create: Requires(LeadsCreate),
                update: Requires(LeadsEdit),
                delete: Requires(LeadsDelete),
            },
            Self::Quotes => AccessPolicy {
                read: Requires(FinanceViewQuotes),
                create: Lifecycle(FinanceEditQuotes),
                update: Requires(FinanceEditQuotes),
                delete: Requires(FinanceDeleteQuotes),
            },
            Self::Customers => AccessPolicy {
                read: Requires(CustomersView),
                create: Requires(CustomersEdit),
                update: Requires(CustomersEdit),
                delete: Requires(CustomersDelete),
            },
            Self::Jobs => AccessPolicy {
                read: Requires(JobsView),
                create: Requires(JobsEdit),
                update: Requires(JobsEdit),
                delete: Requires(JobsDelete),
            },
            Self::Settings => AccessPolicy {
                read: Open,
                create: Requires(SettingsEdit),
                update: Requires(SettingsEdit),
                delete: Closed,
            },
            Self::CascadeRuns => AccessPolicy {
                read: Requires(FinanceViewQuotes),
                create: Lifecycle(FinanceCloseDeals),
                update: Lifecycle(FinanceCloseDeals),
                delete: Closed,
            },
        }
    }

    pub fn quota(&self) -> Option<QuotaKind> {
        match self {
            Self::Leads => Some(QuotaKind::MonthlyLeads),
            Self::Members => Some(QuotaKind::Seats),
            _ => None,
        }
    }

    /// Fields that must be unique within a tenant.
    pub fn unique_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Members => &["email"],
            Self::Customers => &["phone"],
            _ => &[],
        }
    }

    /// Fields derived or advanced by the deal lifecycle. Direct writes that carry them
    /// are rejected.
    pub fn lifecycle_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Leads => &[
                "status",
                "actual_value",
                "quote_id",
                "rejection_reason",
                "assigned_member_id",
            ],
            Self::Quotes => &[
                "status",
                "serial_prefix",
                "serial_number",
                "lead_id",
                "items",
                "discount",
                "subtotal",
                "vat",
                "total",
                "invoice_ref",
            ],
            Self::Members => &["availability"],
            _ => &[],
        }
    }

    fn scope(&self, org_id: &OrgId) -> Filter {
        match self {
            Self::Organizations => Filter::new().eq("id", org_id.as_str()),
            _ => Filter::new().eq("org_id", org_id.as_str()),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record type stored in one gateway collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Client-supplied shape accepted by `create`.
    type Draft: Serialize + Send + Sync;
    const COLLECTION: Collection;
}

impl Entity for Member {
    type Draft = NewMember;
    const COLLECTION: Collection = Collection::Members;
}

impl Entity for Lead {
    type Draft = NewLead;
    const COLLECTION: Collection = Collection::Leads;
}

impl Entity for Quote {
    type Draft = NewQuote;
    const COLLECTION: Collection = Collection::Quotes;
}

impl Entity for Customer {
    type Draft = NewCustomer;
    const COLLECTION: Collection = Collection::Customers;
}

impl Entity for Job {
    type Draft = NewJob;
    const COLLECTION: Collection = Collection::Jobs;
}

impl Entity for Settings {
    type Draft = Settings;
    const COLLECTION: Collection = Collection::Settings;
}

#[derive(Clone)]
pub struct EntityGateway {
    store: Arc<dyn RecordStore>,
    capabilities: CapabilityEngine,
    audit: Arc<dyn AuditSink>,
}

impl EntityGateway {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store, capabilities: CapabilityEngine, audit: Arc::new(TracingAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn capabilities(&self) -> &CapabilityEngine {
        &self.capabilities
    }

    /// Typed view over the collection that stores `E`.
    pub fn collection<E: Entity>(&self) -> Records<'_, E> {
        Records { gateway: self, marker: PhantomData }
    }

    pub async fn list(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        sort: Option<&SortKey>,
    ) -> Result<Vec<Document>, ApplicationError> {
        self.filter(ctx, collection, Filter::new(), sort).await
    }

    pub async fn filter(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        filter: Filter,
        sort: Option<&SortKey>,
    ) -> Result<Vec<Document>, ApplicationError> {
        let Some(org_id) = ctx.org_id() else {
            return Ok(Vec::new());
        };
        self.check(ctx, collection, collection.policy().read, Origin::Client)?;
        filter.validate()?;
        let Some(scoped) = conjoin(collection.scope(org_id), filter) else {
            return Ok(Vec::new());
        };
        Ok(self.store.find(collection.as_str(), &scoped, sort).await?)
    }

    pub async fn get(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        id: &str,
    ) -> Result<Document, ApplicationError> {
        let Some(org_id) = ctx.org_id() else {
            return Err(not_found(collection, id));
        };
        self.check(ctx, collection, collection.policy().read, Origin::Client)?;
        let Some(scoped) = conjoin(collection.scope(org_id), Filter::new().eq("id", id)) else {
            return Err(not_found(collection, id));
        };
        self.store
            .find_one(collection.as_str(), &scoped)
            .await?
            .ok_or_else(|| not_found(collection, id))
    }

    /// Creates a record from caller input. Lifecycle-owned fields and ids are refused.
    pub async fn create(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        document: Document,
    ) -> Result<Document, ApplicationError> {
        self.insert_record(ctx, collection, document, Origin::Client).await
    }

    /// Patches a record from caller input. Lifecycle-owned fields are refused.
    pub async fn update(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        id: &str,
        patch: Document,
    ) -> Result<Document, ApplicationError> {
        self.patch_record(ctx, collection, id, patch, Origin::Client).await
    }

    pub(crate) async fn insert_record(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        mut document: Document,
        origin: Origin,
    ) -> Result<Document, ApplicationError> {
        let org_id = ctx.require_org()?.clone();
        self.check(ctx, collection, collection.policy().create, origin)?;
        if origin == Origin::Client {
            document.remove("id");
            reject_lifecycle_fields(collection, &document)?;
        }
        let organization = self.active_organization(ctx, &org_id).await?;

        let now = Utc::now();
        normalize_fields(collection, &mut document);
        let id = assign_id(collection, &org_id, &mut document)?;
        document.insert("id".to_owned(), Value::String(id.clone()));
        document.insert("org_id".to_owned(), Value::String(org_id.0.clone()));
        document.insert("created_at".to_owned(), timestamp(now));
        document.insert("updated_at".to_owned(), timestamp(now));
        validate_record(collection, &document)?;

        self.ensure_unique(collection, &org_id, &document, None).await?;

        let reservation = self.reserve_quota(ctx, collection, &organization, now).await?;
        match self.store.insert(collection.as_str(), document).await {
            Ok(stored) => {
                debug!(
                    event_name = "gateway.record_created",
                    correlation_id = %ctx.correlation_id(),
                    org_id = %org_id,
                    collection = %collection,
                    record_id = %id,
                    "record created"
                );
                Ok(stored)
            }
            Err(error) => {
                if let Some(key) = reservation {
                    self.store.release_counter(&key).await?;
                }
                Err(error.into())
            }
        }
    }

    /// The patch is merged onto the stored record and the result must still decode as
    /// the collection's entity before anything is written.
    pub(crate) async fn patch_record(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        id: &str,
        mut patch: Document,
        origin: Origin,
    ) -> Result<Document, ApplicationError> {
        let org_id = ctx.require_org()?.clone();
        self.check(ctx, collection, collection.policy().update, origin)?;

        for key in PROTECTED_KEYS {
            patch.remove(key);
        }
        if origin == Origin::Client {
            reject_lifecycle_fields(collection, &patch)?;
        }
        patch.insert("updated_at".to_owned(), timestamp(Utc::now()));
        normalize_fields(collection, &mut patch);

        let Some(scoped) = conjoin(collection.scope(&org_id), Filter::new().eq("id", id)) else {
            return Err(not_found(collection, id));
        };
        let mut merged = self
            .store
            .find_one(collection.as_str(), &scoped)
            .await?
            .ok_or_else(|| not_found(collection, id))?;
        merge_patch(&mut merged, patch.clone());
        validate_record(collection, &merged)?;
        self.ensure_unique(collection, &org_id, &patch, Some(id)).await?;

        self.store
            .update_where(collection.as_str(), &scoped, patch)
            .await?
            .ok_or_else(|| not_found(collection, id))
    }

    pub async fn delete(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        id: &str,
    ) -> Result<(), ApplicationError> {
        let org_id = ctx.require_org()?.clone();
        self.check(ctx, collection, collection.policy().delete, Origin::Client)?;
        let Some(scoped) = conjoin(collection.scope(&org_id), Filter::new().eq("id", id)) else {
            return Err(not_found(collection, id));
        };

        let existing = self
            .store
            .find_one(collection.as_str(), &scoped)
            .await?
            .ok_or_else(|| not_found(collection, id))?;
        if !self.store.delete_where(collection.as_str(), &scoped).await? {
            return Err(not_found(collection, id));
        }

        if let Some(kind) = collection.quota() {
            let now = Utc::now();
            let counts_toward_window = match kind {
                QuotaKind::Seats => true,
                QuotaKind::MonthlyLeads => {
                    document_created_at(&existing).is_some_and(|at| at >= month_start(now))
                }
            };
            if counts_toward_window {
                self.store.release_counter(&usage_key(&org_id, collection, kind, now)).await?;
            }
        }

        debug!(
            event_name = "gateway.record_deleted",
            correlation_id = %ctx.correlation_id(),
            org_id = %org_id,
            collection = %collection,
            record_id = %id,
            "record deleted"
        );
        Ok(())
    }

    /// Organization record of the caller's tenant.
    pub async fn current_organization(
        &self,
        ctx: &TenantContext,
    ) -> Result<Organization, ApplicationError> {
        let org_id = ctx.require_org()?;
        let document = self
            .store
            .find_one(Collection::Organizations.as_str(), &Filter::new().eq("id", org_id.as_str()))
            .await?
            .ok_or_else(|| {
                ApplicationError::Unauthorized(format!("organization `{org_id}` does not exist"))
            })?;
        Ok(decode_document(document)?)
    }

    /// Settings of the caller's tenant, with defaults when none were saved yet.
    pub async fn settings(&self, ctx: &TenantContext) -> Result<Settings, ApplicationError> {
        let Some(org_id) = ctx.org_id() else {
            return Ok(Settings::default());
        };
        let found = self
            .collection::<Settings>()
            .find_one(ctx, Filter::new())
            .await?;
        Ok(found.unwrap_or_else(|| Settings::for_org(org_id)))
    }

    /// Next value of a tenant-wide sequence. `seed` is used only when the sequence does
    /// not exist yet.
    pub async fn next_sequence(
        &self,
        ctx: &TenantContext,
        name: &str,
        seed: u64,
    ) -> Result<u64, ApplicationError> {
        let org_id = ctx.require_org()?;
        let key = format!("seq:{}:{name}", org_id.as_str());
        self.store.increment_counter(&key, seed, None).await?.ok_or_else(|| {
            ApplicationError::Persistence(format!("sequence `{name}` could not be advanced"))
        })
    }

    fn check(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        gate: Gate,
        origin: Origin,
    ) -> Result<(), ApplicationError> {
        match (gate, origin) {
            (Gate::Open, _) => Ok(()),
            (Gate::Requires(capability), _) | (Gate::Lifecycle(capability), Origin::Lifecycle) => {
                self.capabilities.require(ctx.actor(), capability)
            }
            (Gate::Lifecycle(_), Origin::Client) => Err(ApplicationError::Unauthorized(format!(
                "{collection} records are written by the deal lifecycle only"
            ))),
            (Gate::Closed, _) => Err(ApplicationError::Unauthorized(
                "this collection cannot be modified directly".to_owned(),
            )),
        }
    }

    async fn active_organization(
        &self,
        ctx: &TenantContext,
        org_id: &OrgId,
    ) -> Result<Organization, ApplicationError> {
        let organization = self.current_organization(ctx).await?;
        if !organization.is_active_on(Utc::now().date_naive()) {
            return Err(ApplicationError::Unauthorized(format!(
                "organization `{org_id}` is not active"
            )));
        }
        Ok(organization)
    }

    async fn ensure_unique(
        &self,
        collection: Collection,
        org_id: &OrgId,
        document: &Document,
        exclude_id: Option<&str>,
    ) -> Result<(), ApplicationError> {
        for field in collection.unique_fields() {
            let Some(value) = document.get(*field).filter(|value| !value.is_null()) else {
                continue;
            };
            let filter = collection.scope(org_id).eq(*field, value.clone());
            let clash = self
                .store
                .find(collection.as_str(), &filter, None)
                .await?
                .into_iter()
                .filter_map(|record| record.get("id").and_then(Value::as_str).map(str::to_owned))
                .find(|existing| Some(existing.as_str()) != exclude_id);
            if let Some(existing) = clash {
                return Err(ApplicationError::Conflict {
                    collection: collection.as_str().to_owned(),
                    id: existing,
                });
            }
        }
        Ok(())
    }

    /// Reserves one unit of the tenant's quota and returns the counter to release if the
    /// write does not go through.
    async fn reserve_quota(
        &self,
        ctx: &TenantContext,
        collection: Collection,
        organization: &Organization,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, ApplicationError> {
        let Some(kind) = collection.quota() else {
            return Ok(None);
        };
        let limit = match kind {
            QuotaKind::MonthlyLeads => organization.lead_quota(),
            QuotaKind::Seats => organization.user_quota(),
        };
        let Some(limit) = limit else {
            return Ok(None);
        };

        let key = usage_key(&organization.id, collection, kind, now);
        let since = match kind {
            QuotaKind::MonthlyLeads => month_start(now),
            QuotaKind::Seats => DateTime::<Utc>::MIN_UTC,
        };
        let seed = self
            .store
            .count_since(collection.as_str(), &collection.scope(&organization.id), since)
            .await?;

        match self.store.increment_counter(&key, seed, Some(limit)).await? {
            Some(_) => Ok(Some(key)),
            None => {
                warn!(
                    event_name = "gateway.quota_exceeded",
                    correlation_id = %ctx.correlation_id(),
                    org_id = %organization.id,
                    collection = %collection,
                    limit,
                    "quota exceeded"
                );
                self.audit.emit(
                    AuditContext::from_tenant(ctx)
                        .event(
                            None,
                            "gateway.quota_exceeded",
                            AuditCategory::Gateway,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("collection", collection.as_str())
                        .with_metadata("limit", limit.to_string()),
                );
                Err(ApplicationError::QuotaExceeded {
                    collection: collection.as_str().to_owned(),
                    limit,
                    hint: organization.plan.upgrade_hint().to_owned(),
                })
            }
        }
    }
}

/// Typed handle returned by [`EntityGateway::collection`].
pub struct Records<'a, E> {
    gateway: &'a EntityGateway,
    marker: PhantomData<E>,
}

impl<E: Entity> Records<'_, E> {
    pub async fn list(
        &self,
        ctx: &TenantContext,
        sort: Option<&SortKey>,
    ) -> Result<Vec<E>, ApplicationError> {
        decode_all(self.gateway.list(ctx, E::COLLECTION, sort).await?)
    }

    pub async fn filter(
        &self,
        ctx: &TenantContext,
        filter: Filter,
        sort: Option<&SortKey>,
    ) -> Result<Vec<E>, ApplicationError> {
        decode_all(self.gateway.filter(ctx, E::COLLECTION, filter, sort).await?)
    }

    pub async fn find_one(
        &self,
        ctx: &TenantContext,
        filter: Filter,
    ) -> Result<Option<E>, ApplicationError> {
        Ok(self.filter(ctx, filter, None).await?.into_iter().next())
    }

    pub async fn get(&self, ctx: &TenantContext, id: &str) -> Result<E, ApplicationError> {
        Ok(decode_document(self.gateway.get(ctx, E::COLLECTION, id).await?)?)
    }

    pub(crate) async fn create(
        &self,
        ctx: &TenantContext,
        draft: &E::Draft,
    ) -> Result<E, ApplicationError> {
        let document = encode_document(draft)?;
        let stored = self.gateway.insert_record(ctx, E::COLLECTION, document, Origin::Lifecycle).await?;
        Ok(decode_document(stored)?)
    }

    pub(crate) async fn update(
        &self,
        ctx: &TenantContext,
        id: &str,
        patch: Document,
    ) -> Result<E, ApplicationError> {
        let stored = self.gateway.patch_record(ctx, E::COLLECTION, id, patch, Origin::Lifecycle).await?;
        Ok(decode_document(stored)?)
    }

    pub async fn delete(&self, ctx: &TenantContext, id: &str) -> Result<(), ApplicationError> {
        self.gateway.delete(ctx, E::COLLECTION, id).await
    }
}

/// Builds a patch document from a JSON object literal; anything else is an empty patch.
pub fn patch(value: Value) -> Document {
    match value {
        Value::Object(document) => document,
        _ => Document::new(),
    }
}

/// Records that no longer decode are skipped with a warning so one bad row cannot
/// take a whole listing down.
fn decode_all<E: DeserializeOwned>(documents: Vec<Document>) -> Result<Vec<E>, ApplicationError> {
    let mut decoded = Vec::with_capacity(documents.len());
    for document in documents {
        let id = document.get("id").and_then(Value::as_str).unwrap_or_default().to_owned();
        match decode_document(document) {
            Ok(entity) => decoded.push(entity),
            Err(error) => warn!(
                event_name = "gateway.record_undecodable",
                record_id = %id,
                error = %error,
                "skipping record that does not decode"
            ),
        }
    }
    Ok(decoded)
}

fn reject_lifecycle_fields(collection: Collection, document: &Document) -> Result<(), ApplicationError> {
    match collection.lifecycle_fields().iter().find(|field| document.contains_key(**field)) {
        Some(field) => Err(ApplicationError::ValidationFailed(format!(
            "`{field}` on {collection} is set by the deal lifecycle"
        ))),
        None => Ok(()),
    }
}

fn validate_record(collection: Collection, document: &Document) -> Result<(), ApplicationError> {
    fn decodes<E: DeserializeOwned>(collection: Collection, document: &Document) -> Result<(), ApplicationError> {
        decode_document::<E>(document.clone()).map(|_| ()).map_err(|error| {
            ApplicationError::ValidationFailed(format!("invalid {collection} record: {error}"))
        })
    }

    match collection {
        Collection::Organizations => decodes::<Organization>(collection, document),
        Collection::Members => decodes::<Member>(collection, document),
        Collection::Leads => decodes::<Lead>(collection, document),
        Collection::Quotes => decodes::<Quote>(collection, document),
        Collection::Customers => decodes::<Customer>(collection, document),
        Collection::Jobs => decodes::<Job>(collection, document),
        Collection::Settings => decodes::<Settings>(collection, document),
        Collection::CascadeRuns => decodes::<CascadeRun>(collection, document),
    }
}

/// Merges the tenant scope with a caller filter. `None` when the caller asks for a
/// different tenant than the scope allows.
fn conjoin(scope: Filter, filter: Filter) -> Option<Filter> {
    let mut combined = scope;
    for (field, value) in filter.iter() {
        match combined.get(field) {
            Some(existing) if existing != value => return None,
            Some(_) => {}
            None => combined.insert(field.clone(), value.clone()),
        }
    }
    Some(combined)
}

fn assign_id(
    collection: Collection,
    org_id: &OrgId,
    document: &mut Document,
) -> Result<String, ApplicationError> {
    let supplied = match document.remove("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(id.trim().to_owned()),
        None | Some(Value::Null) | Some(Value::String(_)) => None,
        Some(_) => return Err(ApplicationError::ValidationFailed("`id` must be a string".to_owned())),
    };

    // A customer's id follows from its phone even when one was supplied.
    let derived = match collection {
        Collection::Customers => document
            .get("phone")
            .and_then(Value::as_str)
            .filter(|phone| !phone.trim().is_empty())
            .map(|phone| CustomerId::for_phone(org_id, phone).0),
        Collection::Settings => Some(Settings::id_for(org_id)),
        _ => None,
    };
    Ok(derived.or(supplied).unwrap_or_else(|| Uuid::new_v4().to_string()))
}

fn normalize_fields(collection: Collection, document: &mut Document) {
    match collection {
        Collection::Members => {
            if let Some(Value::String(email)) = document.get_mut("email") {
                *email = email.trim().to_ascii_lowercase();
            }
        }
        Collection::Customers => {
            if let Some(Value::String(phone)) = document.get("phone") {
                let normalized = normalize_phone(phone);
                let value = if normalized.is_empty() { Value::Null } else { Value::String(normalized) };
                document.insert("phone".to_owned(), value);
            }
        }
        _ => {}
    }
}

fn not_found(collection: Collection, id: &str) -> ApplicationError {
    ApplicationError::NotFound { collection: collection.as_str().to_owned(), id: id.to_owned() }
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|start| start.and_utc())
        .unwrap_or(now)
}

fn usage_key(org_id: &OrgId, collection: Collection, kind: QuotaKind, now: DateTime<Utc>) -> String {
    let window = match kind {
        QuotaKind::MonthlyLeads => format!("{:04}-{:02}", now.year(), now.month()),
        QuotaKind::Seats => "all".to_owned(),
    };
    format!("usage:{}:{}:{window}", org_id.as_str(), collection.as_str())
}
