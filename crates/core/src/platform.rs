//! Cross-tenant operations reserved for platform operators.
//!
//! A [`PlatformAdmin`] can only be obtained from a context whose session carries the
//! platform-admin role. Every call is recorded with [`AuditCategory::PlatformAdmin`].

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use crate::domain::organization::{OrgId, Organization, PlanTier};
use crate::errors::ApplicationError;
use crate::gateway::{patch, Collection};
use crate::store::{decode_document, Filter, RecordStore, SortKey};
use crate::tenant::TenantContext;

pub struct PlatformAdmin {
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
    audit_context: AuditContext,
}

impl std::fmt::Debug for PlatformAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformAdmin").field("actor", &self.audit_context.actor).finish()
    }
}

impl PlatformAdmin {
    pub fn authorize(
        ctx: &TenantContext,
        store: Arc<dyn RecordStore>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self, ApplicationError> {
        let audit: Arc<dyn AuditSink> = match audit {
            Some(audit) => audit,
            None => Arc::new(TracingAuditSink),
        };
        if !ctx.is_platform_admin() {
            warn!(
                event_name = "platform.access_denied",
                correlation_id = %ctx.correlation_id(),
                actor = %ctx.actor().label(),
                "platform operation attempted without platform role"
            );
            audit.emit(AuditContext::from_tenant(ctx).event(
                None,
                "platform.access_denied",
                AuditCategory::PlatformAdmin,
                AuditOutcome::Rejected,
            ));
            return Err(ApplicationError::Unauthorized(
                "platform administration requires the platform admin role".to_owned(),
            ));
        }

        // Platform events are not attributed to the operator's own tenant.
        let audit_context = AuditContext::new(None, ctx.correlation_id(), ctx.actor().label());
        Ok(Self { store, audit, audit_context })
    }

    /// Every organization on the platform, oldest first.
    pub async fn list_organizations(&self) -> Result<Vec<Organization>, ApplicationError> {
        let documents = self
            .store
            .find(
                Collection::Organizations.as_str(),
                &Filter::new(),
                Some(&SortKey::ascending("created_at")),
            )
            .await?;
        let organizations = documents
            .into_iter()
            .map(decode_document::<Organization>)
            .collect::<Result<Vec<_>, _>>()?;

        self.record(None, "platform.organizations_listed", |event| {
            event.with_metadata("count", organizations.len().to_string())
        });
        Ok(organizations)
    }

    pub async fn organization(&self, org_id: &OrgId) -> Result<Organization, ApplicationError> {
        let document = self
            .store
            .find_one(Collection::Organizations.as_str(), &Filter::new().eq("id", org_id.as_str()))
            .await?
            .ok_or_else(|| ApplicationError::NotFound {
                collection: Collection::Organizations.as_str().to_owned(),
                id: org_id.to_string(),
            })?;
        Ok(decode_document(document)?)
    }

    /// Moves an organization to another plan and resets its quotas to the plan's defaults.
    pub async fn set_plan(
        &self,
        org_id: &OrgId,
        plan: PlanTier,
    ) -> Result<Organization, ApplicationError> {
        let previous = self.organization(org_id).await?;
        let updated = self
            .patch_organization(
                org_id,
                json!({
                    "plan": plan,
                    "monthly_lead_quota": plan.default_lead_quota(),
                    "max_users": plan.default_max_users(),
                }),
            )
            .await?;

        info!(
            event_name = "platform.plan_changed",
            correlation_id = %self.audit_context.correlation_id,
            org_id = %org_id,
            from = previous.plan.as_str(),
            to = plan.as_str(),
            "organization plan changed"
        );
        self.record(Some(org_id), "platform.plan_changed", |event| {
            event.with_metadata("from", previous.plan.as_str()).with_metadata("to", plan.as_str())
        });
        Ok(updated)
    }

    /// Explicit quota override; `0` and `None` both mean unlimited.
    pub async fn set_quotas(
        &self,
        org_id: &OrgId,
        monthly_lead_quota: Option<u64>,
        max_users: Option<u64>,
    ) -> Result<Organization, ApplicationError> {
        let updated = self
            .patch_organization(
                org_id,
                json!({ "monthly_lead_quota": monthly_lead_quota, "max_users": max_users }),
            )
            .await?;
        self.record(Some(org_id), "platform.quotas_changed", |event| {
            event
                .with_metadata("monthly_lead_quota", describe_quota(monthly_lead_quota))
                .with_metadata("max_users", describe_quota(max_users))
        });
        Ok(updated)
    }

    pub async fn set_active(
        &self,
        org_id: &OrgId,
        active: bool,
    ) -> Result<Organization, ApplicationError> {
        let updated = self.patch_organization(org_id, json!({ "active": active })).await?;
        let event_type =
            if active { "platform.organization_activated" } else { "platform.organization_deactivated" };
        info!(
            event_name = event_type,
            correlation_id = %self.audit_context.correlation_id,
            org_id = %org_id,
            "organization activation changed"
        );
        self.record(Some(org_id), event_type, |event| event);
        Ok(updated)
    }

    async fn patch_organization(
        &self,
        org_id: &OrgId,
        fields: Value,
    ) -> Result<Organization, ApplicationError> {
        let mut fields = patch(fields);
        fields.insert(
            "updated_at".to_owned(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        let updated = self
            .store
            .update_where(
                Collection::Organizations.as_str(),
                &Filter::new().eq("id", org_id.as_str()),
                fields,
            )
            .await?
            .ok_or_else(|| ApplicationError::NotFound {
                collection: Collection::Organizations.as_str().to_owned(),
                id: org_id.to_string(),
            })?;
        Ok(decode_document(updated)?)
    }

    fn record(
        &self,
        org_id: Option<&OrgId>,
        event_type: &str,
        decorate: impl FnOnce(AuditEvent) -> AuditEvent,
    ) {
        let mut event = self.audit_context.event(
            org_id.map(|id| id.to_string()),
            event_type,
            AuditCategory::PlatformAdmin,
            AuditOutcome::Success,
        );
        event.org_id = org_id.cloned();
        self.audit.emit(decorate(event));
    }
}

fn describe_quota(quota: Option<u64>) -> String {
    match quota.filter(|value| *value > 0) {
        Some(value) => value.to_string(),
        None => "unlimited".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use super::PlatformAdmin;
    use crate::audit::{AuditCategory, AuditSink, InMemoryAuditSink};
    use crate::capability::CapabilityMap;
    use crate::domain::member::UserId;
    use crate::domain::organization::{OrgId, PlanTier};
    use crate::errors::ApplicationError;
    use crate::store::{Document, InMemoryRecordStore, RecordStore};
    use crate::tenant::{Actor, AppRole, TenantContext};

    fn context(platform_admin: bool) -> TenantContext {
        TenantContext::new(
            None,
            Actor {
                user_id: UserId("operator".to_owned()),
                email: "ops@example.com".to_owned(),
                member_id: None,
                role: AppRole::Staff,
                capabilities: CapabilityMap::default(),
                is_platform_admin: platform_admin,
            },
        )
    }

    async fn seeded_store() -> Arc<InMemoryRecordStore> {
        let store = Arc::new(InMemoryRecordStore::new());
        for (id, offset) in [("org-old", 10), ("org-new", 1)] {
            let created = (Utc::now() - chrono::Duration::days(offset)).to_rfc3339();
            let document: Document = json!({
                "id": id, "name": id, "owner_user_id": "owner", "plan": "free",
                "monthly_lead_quota": 50, "max_users": 2, "active": true,
                "created_at": created, "updated_at": created,
            })
            .as_object()
            .cloned()
            .expect("object");
            store.insert("organizations", document).await.expect("seed");
        }
        store
    }

    #[tokio::test]
    async fn regular_users_cannot_obtain_the_handle() {
        let store = seeded_store().await;
        let audit = Arc::new(InMemoryAuditSink::default());
        let sink: Arc<dyn AuditSink> = audit.clone();

        let result = PlatformAdmin::authorize(&context(false), store, Some(sink));
        assert!(matches!(result, Err(ApplicationError::Unauthorized(_))));
        assert_eq!(audit.events().len(), 1);
    }

    #[tokio::test]
    async fn plan_change_resets_quotas_and_is_audited() {
        let store = seeded_store().await;
        let audit = Arc::new(InMemoryAuditSink::default());
        let sink: Arc<dyn AuditSink> = audit.clone();
        let admin = PlatformAdmin::authorize(&context(true), store, Some(sink)).expect("authorize");

        let listed = admin.list_organizations().await.expect("list");
        assert_eq!(listed.first().map(|org| org.id.as_str()), Some("org-old"));

        let updated = admin.set_plan(&OrgId("org-new".to_owned()), PlanTier::Enterprise).await.expect("plan");
        assert_eq!(updated.plan, PlanTier::Enterprise);
        assert_eq!(updated.lead_quota(), None);
        assert_eq!(updated.user_quota(), None);

        let deactivated = admin.set_active(&OrgId("org-old".to_owned()), false).await.expect("deactivate");
        assert!(!deactivated.active);

        let events = audit.events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|event| event.category == AuditCategory::PlatformAdmin));
        assert_eq!(events[1].metadata.get("to").map(String::as_str), Some("enterprise"));
    }

    #[tokio::test]
    async fn unknown_organization_is_not_found() {
        let store = seeded_store().await;
        let admin = PlatformAdmin::authorize(&context(true), store, None).expect("authorize");
        let result = admin.set_active(&OrgId("missing".to_owned()), true).await;
        assert!(matches!(result, Err(ApplicationError::NotFound { .. })));
    }
}
