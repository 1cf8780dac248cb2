//! JSON API over the gateway, the orchestrator and tenant provisioning.
//!
//! Identity arrives in request headers set by the upstream auth proxy; every handler
//! resolves it into a tenant context before touching a record.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use dealdesk_core::attachments::{AttachmentStore, StoredPath};
use dealdesk_core::config::AppConfig;
use chrono::NaiveDate;
use dealdesk_core::flows::{AvailabilityReport, CallOutcome, QuoteDocument};
use dealdesk_core::gateway::Collection;
use dealdesk_core::store::{Document, Filter, RecordStore, SortKey};
use dealdesk_core::{
    ApplicationError, Availability, Capability, CapabilityCategory, CloseLostReport, CloseWonReport,
    DealOrchestrator, EntityGateway, ImportSummary, InterfaceError, Lead, LeadId, LossReason, Member,
    MemberId, NewLead, OrgId, Organization, OwnerSignup, PlanTier, PlatformAdmin,
    ProvisionedTenant, Quote, QuoteDraft, QuoteId, RoleProfile, Session, TenantContext,
    TenantProvisioner, TenantResolver,
};
use dealdesk_db::LocalAttachmentStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const PLATFORM_ROLE_HEADER: &str = "x-platform-role";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn RecordStore>,
    deals: DealOrchestrator,
    provisioner: TenantProvisioner,
    attachments: Option<Arc<LocalAttachmentStore>>,
}

impl ApiState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn RecordStore>,
        attachments: Option<Arc<LocalAttachmentStore>>,
    ) -> Self {
        let mut deals = DealOrchestrator::new(EntityGateway::new(store.clone()));
        if let Some(files) = &attachments {
            let files: Arc<dyn AttachmentStore> = files.clone();
            deals = deals.with_attachments(files, config.attachments.url_ttl());
        }
        let provisioner = TenantProvisioner::new(store.clone())
            .with_defaults(config.tenancy.default_plan, config.tenancy.serial_prefix.clone());
        Self { store, deals, provisioner, attachments }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    pub detail: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

type Rejection = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, Rejection>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/context", get(current_context))
        .route("/api/provision", post(provision))
        .route("/api/entities/{collection}", get(list_entities).post(create_entity))
        .route("/api/entities/{collection}/filter", post(filter_entities))
        .route(
            "/api/entities/{collection}/{id}",
            get(get_entity).patch(update_entity).delete(delete_entity),
        )
        .route("/api/leads/import", post(import_leads))
        .route("/api/leads/{id}/quotes", post(create_quote_from_lead))
        .route("/api/leads/{id}/calls", post(record_call))
        .route("/api/leads/{id}/meeting", post(schedule_meeting))
        .route("/api/leads/{id}/follow-up", post(schedule_follow_up))
        .route("/api/leads/{id}/queue", post(queue_for_assignment))
        .route("/api/leads/{id}/reopen", post(reopen_lead))
        .route("/api/leads/{id}/assign", post(assign_lead))
        .route("/api/quotes", post(create_quote))
        .route("/api/quotes/{id}", put(save_quote))
        .route("/api/quotes/{id}/close-won", post(close_won))
        .route("/api/quotes/{id}/close-lost", post(close_lost))
        .route("/api/quotes/{id}/document", post(attach_document))
        .route("/api/members/{id}/availability", post(set_availability))
        .route("/api/members/{id}/profile", put(apply_role_profile))
        .route("/api/members/{id}/capabilities", put(set_capability_category))
        .route("/api/platform/organizations", get(list_organizations))
        .route("/api/platform/organizations/{id}/plan", put(set_plan))
        .route("/api/platform/organizations/{id}/quotas", put(set_quotas))
        .route("/api/platform/organizations/{id}/active", put(set_active))
        .route("/files/{*path}", get(download_file))
        .with_state(state)
}

// ============================================================================
// Session and errors
// ============================================================================

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|value| !value.is_empty())
}

fn correlation_id(headers: &HeaderMap) -> String {
    header_value(headers, CORRELATION_HEADER).map(str::to_owned).unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn session_from_headers(headers: &HeaderMap) -> Option<Session> {
    let user_id = header_value(headers, USER_ID_HEADER)?;
    let mut session = Session::new(user_id, header_value(headers, USER_EMAIL_HEADER).unwrap_or_default());
    session.full_name = header_value(headers, USER_NAME_HEADER).map(str::to_owned);
    session.platform_role = header_value(headers, PLATFORM_ROLE_HEADER).map(str::to_owned);
    Some(session)
}

fn unauthenticated(correlation_id: String) -> Rejection {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError {
            error: "unauthenticated",
            message: "Sign in to continue.".to_owned(),
            detail: format!("missing `{USER_ID_HEADER}` header"),
            correlation_id,
            failed_step: None,
            limit: None,
        }),
    )
}

fn reject(error: ApplicationError, correlation_id: &str) -> Rejection {
    let class = error.class();
    let detail = error.to_string();
    let interface = error.into_interface(correlation_id);
    let (status, failed_step, limit) = match &interface {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, None, None),
        InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, None, None),
        InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, None, None),
        InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, None, None),
        InterfaceError::QuotaExceeded { limit, .. } => {
            (StatusCode::TOO_MANY_REQUESTS, None, Some(*limit))
        }
        InterfaceError::PartialSuccess { failed_step, .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, Some(failed_step.as_str().to_owned()), None)
        }
        InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, None, None),
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, None, None),
    };
    if status.is_server_error() {
        warn!(
            event_name = "api.request_failed",
            correlation_id = %correlation_id,
            error_class = class,
            error = %detail,
            "request failed"
        );
    }
    (
        status,
        Json(ApiError {
            error: class,
            message: interface.user_message(),
            detail,
            correlation_id: interface.correlation_id().to_owned(),
            failed_step,
            limit,
        }),
    )
}

async fn tenant_context(state: &ApiState, headers: &HeaderMap) -> Result<TenantContext, Rejection> {
    let correlation_id = correlation_id(headers);
    let Some(session) = session_from_headers(headers) else {
        return Err(unauthenticated(correlation_id));
    };
    TenantResolver::new(state.store.clone())
        .resolve(&session)
        .await
        .map(|ctx| ctx.with_correlation_id(correlation_id.clone()))
        .map_err(|error| reject(error, &correlation_id))
}

fn parse_collection(name: &str, ctx: &TenantContext) -> Result<Collection, Rejection> {
    Collection::parse(name).ok_or_else(|| {
        reject(
            ApplicationError::NotFound { collection: "collections".to_owned(), id: name.to_owned() },
            ctx.correlation_id(),
        )
    })
}

fn parse_sort(raw: Option<&str>, ctx: &TenantContext) -> Result<Option<SortKey>, Rejection> {
    raw.map(SortKey::parse)
        .transpose()
        .map_err(|error| reject(error.into(), ctx.correlation_id()))
}

fn to_document(value: Value, ctx: &TenantContext) -> Result<Document, Rejection> {
    match value {
        Value::Object(document) => Ok(document),
        _ => Err(reject(
            ApplicationError::ValidationFailed("request body must be a JSON object".to_owned()),
            ctx.correlation_id(),
        )),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(value: Value, ctx: &TenantContext) -> Result<T, Rejection> {
    serde_json::from_value(value)
        .map_err(|error| reject(ApplicationError::ValidationFailed(error.to_string()), ctx.correlation_id()))
}

fn to_value<T: Serialize>(record: &T) -> Result<Value, ApplicationError> {
    serde_json::to_value(record).map_err(|error| ApplicationError::Persistence(error.to_string()))
}

// ============================================================================
// Context and provisioning
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub org_id: Option<String>,
    pub member_id: Option<String>,
    pub role: dealdesk_core::AppRole,
    pub platform_admin: bool,
    pub capabilities: Vec<&'static str>,
}

async fn current_context(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<ContextResponse> {
    let ctx = tenant_context(&state, &headers).await?;
    let engine = state.deals.gateway().capabilities();
    let capabilities = Capability::ALL
        .into_iter()
        .filter(|capability| engine.has_capability(ctx.actor(), *capability))
        .map(|capability| capability.key())
        .collect();
    Ok(Json(ContextResponse {
        org_id: ctx.org_id().map(|org| org.to_string()),
        member_id: ctx.actor().member_id.as_ref().map(|member| member.0.clone()),
        role: ctx.role(),
        platform_admin: ctx.is_platform_admin(),
        capabilities,
    }))
}

async fn provision(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(signup): Json<OwnerSignup>,
) -> Result<(StatusCode, Json<ProvisionedTenant>), Rejection> {
    let correlation_id = correlation_id(&headers);
    let Some(session) = session_from_headers(&headers) else {
        return Err(unauthenticated(correlation_id));
    };
    let tenant = state
        .provisioner
        .provision_owner(&session, signup)
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

// ============================================================================
// Generic entity access
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub sort: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterRequest {
    #[serde(default)]
    pub filter: Document,
    #[serde(default)]
    pub sort: Option<String>,
}

async fn list_entities(
    State(state): State<ApiState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Document>> {
    let ctx = tenant_context(&state, &headers).await?;
    let collection = parse_collection(&collection, &ctx)?;
    let sort = parse_sort(params.sort.as_deref(), &ctx)?;
    state
        .deals
        .gateway()
        .list(&ctx, collection, sort.as_ref())
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn filter_entities(
    State(state): State<ApiState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Json(request): Json<FilterRequest>,
) -> ApiResult<Vec<Document>> {
    let ctx = tenant_context(&state, &headers).await?;
    let collection = parse_collection(&collection, &ctx)?;
    let sort = parse_sort(request.sort.as_deref(), &ctx)?;
    state
        .deals
        .gateway()
        .filter(&ctx, collection, Filter::from(request.filter), sort.as_ref())
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn get_entity(
    State(state): State<ApiState>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Document> {
    let ctx = tenant_context(&state, &headers).await?;
    let collection = parse_collection(&collection, &ctx)?;
    state
        .deals
        .gateway()
        .get(&ctx, collection, &id)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

/// Leads and quotes go through the orchestrator so their lifecycle rules apply;
/// everything else is a plain gateway insert.
async fn create_entity(
    State(state): State<ApiState>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), Rejection> {
    let ctx = tenant_context(&state, &headers).await?;
    let collection = parse_collection(&collection, &ctx)?;
    let created = match collection {
        Collection::Leads => {
            let draft: NewLead = parse_body(body, &ctx)?;
            state.deals.create_lead(&ctx, draft).await.and_then(|lead| to_value(&lead))
        }
        Collection::Quotes => {
            let draft: QuoteDraft = parse_body(body, &ctx)?;
            state.deals.create_quote(&ctx, draft).await.and_then(|quote| to_value(&quote))
        }
        _ => {
            let document = to_document(body, &ctx)?;
            state.deals.gateway().create(&ctx, collection, document).await.map(Value::Object)
        }
    };
    created
        .map(|record| (StatusCode::CREATED, Json(record)))
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn update_entity(
    State(state): State<ApiState>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Document> {
    let ctx = tenant_context(&state, &headers).await?;
    let collection = parse_collection(&collection, &ctx)?;
    let patch = to_document(body, &ctx)?;
    state
        .deals
        .gateway()
        .update(&ctx, collection, &id, patch)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn delete_entity(
    State(state): State<ApiState>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, Rejection> {
    let ctx = tenant_context(&state, &headers).await?;
    let collection = parse_collection(&collection, &ctx)?;
    state
        .deals
        .gateway()
        .delete(&ctx, collection, &id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

// ============================================================================
// Deal lifecycle
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ImportParams {
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentParams {
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub availability: Availability,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub on: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub member_id: MemberId,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub profile: RoleProfile,
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub category: CapabilityCategory,
    pub enabled: bool,
}

async fn record_call(
    State(state): State<ApiState>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
    Json(outcome): Json<CallOutcome>,
) -> ApiResult<Lead> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .record_call(&ctx, &LeadId(lead_id), outcome)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn schedule_meeting(
    State(state): State<ApiState>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<Lead> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .schedule_meeting(&ctx, &LeadId(lead_id), request.on)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn schedule_follow_up(
    State(state): State<ApiState>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<Lead> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .schedule_follow_up(&ctx, &LeadId(lead_id), request.on)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn queue_for_assignment(
    State(state): State<ApiState>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Lead> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .queue_for_assignment(&ctx, &LeadId(lead_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn reopen_lead(
    State(state): State<ApiState>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Lead> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .reopen_lead(&ctx, &LeadId(lead_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn assign_lead(
    State(state): State<ApiState>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Lead> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .assign_lead(&ctx, &LeadId(lead_id), &request.member_id)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn create_quote_from_lead(
    State(state): State<ApiState>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
    Json(draft): Json<QuoteDraft>,
) -> Result<(StatusCode, Json<Quote>), Rejection> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .create_quote_from_lead(&ctx, &LeadId(lead_id), draft)
        .await
        .map(|quote| (StatusCode::CREATED, Json(quote)))
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn create_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(draft): Json<QuoteDraft>,
) -> Result<(StatusCode, Json<Quote>), Rejection> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .create_quote(&ctx, draft)
        .await
        .map(|quote| (StatusCode::CREATED, Json(quote)))
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn save_quote(
    State(state): State<ApiState>,
    Path(quote_id): Path<String>,
    headers: HeaderMap,
    Json(draft): Json<QuoteDraft>,
) -> ApiResult<Quote> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .save_quote(&ctx, &QuoteId(quote_id), draft)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn close_won(
    State(state): State<ApiState>,
    Path(quote_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<CloseWonReport> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .close_won(&ctx, &QuoteId(quote_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn close_lost(
    State(state): State<ApiState>,
    Path(quote_id): Path<String>,
    headers: HeaderMap,
    Json(reason): Json<LossReason>,
) -> ApiResult<CloseLostReport> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .close_lost(&ctx, &QuoteId(quote_id), reason)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn attach_document(
    State(state): State<ApiState>,
    Path(quote_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DocumentParams>,
    body: Bytes,
) -> ApiResult<QuoteDocument> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .attach_quote_document(&ctx, &QuoteId(quote_id), &params.file_name, body.to_vec())
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn set_availability(
    State(state): State<ApiState>,
    Path(member_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AvailabilityRequest>,
) -> ApiResult<AvailabilityReport> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .set_member_availability(&ctx, &MemberId(member_id), request.availability)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn apply_role_profile(
    State(state): State<ApiState>,
    Path(member_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ProfileRequest>,
) -> ApiResult<Member> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .apply_role_profile(&ctx, &MemberId(member_id), request.profile)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

async fn set_capability_category(
    State(state): State<ApiState>,
    Path(member_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CategoryRequest>,
) -> ApiResult<Member> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .set_capability_category(&ctx, &MemberId(member_id), request.category, request.enabled)
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

/// Body is the raw CSV file.
async fn import_leads(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<ImportParams>,
    body: Bytes,
) -> ApiResult<ImportSummary> {
    let ctx = tenant_context(&state, &headers).await?;
    state
        .deals
        .import_leads(&ctx, &body[..], params.source.as_deref())
        .await
        .map(Json)
        .map_err(|error| reject(error, ctx.correlation_id()))
}

// ============================================================================
// Platform administration
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub plan: PlanTier,
}

#[derive(Debug, Deserialize)]
pub struct QuotaRequest {
    #[serde(default)]
    pub monthly_lead_quota: Option<u64>,
    #[serde(default)]
    pub max_users: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

async fn platform_admin(
    state: &ApiState,
    headers: &HeaderMap,
) -> Result<(PlatformAdmin, String), Rejection> {
    let ctx = tenant_context(state, headers).await?;
    let correlation_id = ctx.correlation_id().to_owned();
    PlatformAdmin::authorize(&ctx, state.store.clone(), None)
        .map(|admin| (admin, correlation_id.clone()))
        .map_err(|error| reject(error, &correlation_id))
}

async fn list_organizations(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Vec<Organization>> {
    let (admin, correlation_id) = platform_admin(&state, &headers).await?;
    admin.list_organizations().await.map(Json).map_err(|error| reject(error, &correlation_id))
}

async fn set_plan(
    State(state): State<ApiState>,
    Path(org_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PlanRequest>,
) -> ApiResult<Organization> {
    let (admin, correlation_id) = platform_admin(&state, &headers).await?;
    admin
        .set_plan(&OrgId(org_id), request.plan)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn set_quotas(
    State(state): State<ApiState>,
    Path(org_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<QuotaRequest>,
) -> ApiResult<Organization> {
    let (admin, correlation_id) = platform_admin(&state, &headers).await?;
    admin
        .set_quotas(&OrgId(org_id), request.monthly_lead_quota, request.max_users)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

async fn set_active(
    State(state): State<ApiState>,
    Path(org_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ActiveRequest>,
) -> ApiResult<Organization> {
    let (admin, correlation_id) = platform_admin(&state, &headers).await?;
    admin
        .set_active(&OrgId(org_id), request.active)
        .await
        .map(Json)
        .map_err(|error| reject(error, &correlation_id))
}

// ============================================================================
// Signed downloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub expires: i64,
    pub signature: String,
}

/// Serves a stored document when the URL carries a valid, unexpired signature. No
/// session is needed; the signature is the credential.
async fn download_file(
    State(state): State<ApiState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DownloadParams>,
) -> Result<impl IntoResponse, Rejection> {
    let correlation_id = correlation_id(&headers);
    let Some(files) = state.attachments.as_ref() else {
        return Err(reject(
            ApplicationError::Configuration("attachment storage is not configured".to_owned()),
            &correlation_id,
        ));
    };
    let (path, bytes) =
        read_signed(files, &path, &params).await.map_err(|error| reject(error, &correlation_id))?;
    let content_type =
        if path.as_str().ends_with(".pdf") { "application/pdf" } else { "application/octet-stream" };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

async fn read_signed(
    files: &LocalAttachmentStore,
    raw_path: &str,
    params: &DownloadParams,
) -> Result<(StoredPath, Vec<u8>), ApplicationError> {
    let path = StoredPath::parse(raw_path)?;
    if files.verify(&path, params.expires, &params.signature).is_err() {
        return Err(ApplicationError::Unauthorized("invalid or expired download link".to_owned()));
    }
    let bytes = files.read(&path).await?;
    Ok((path, bytes))
}
