//! Resolution of the acting organization and role for an authenticated session.
//!
//! There is no ambient "current tenant": every gateway and orchestrator call receives a
//! [`TenantContext`] built here, and request handlers build a fresh one per request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::capability::{Capability, CapabilityMap};
use crate::domain::member::{Member, MemberId, UserId};
use crate::domain::organization::{OrgId, Organization};
use crate::errors::ApplicationError;
use crate::store::{decode_document, Filter, RecordStore, SortKey};

pub const PLATFORM_ADMIN_ROLE: &str = "admin";

/// Identity as handed over by the external auth provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub platform_role: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self { user_id: UserId(user_id.into()), email: email.into(), full_name: None, platform_role: None }
    }

    pub fn with_platform_role(mut self, role: impl Into<String>) -> Self {
        self.platform_role = Some(role.into());
        self
    }

    pub fn is_platform_admin(&self) -> bool {
        self.platform_role.as_deref().is_some_and(|role| role.eq_ignore_ascii_case(PLATFORM_ADMIN_ROLE))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppRole {
    Admin,
    Staff,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub email: String,
    pub member_id: Option<MemberId>,
    pub role: AppRole,
    pub capabilities: CapabilityMap,
    pub is_platform_admin: bool,
}

impl Actor {
    pub fn label(&self) -> String {
        format!("user:{}", self.user_id.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantContext {
    org_id: Option<OrgId>,
    actor: Actor,
    correlation_id: String,
}

impl TenantContext {
    pub fn new(org_id: Option<OrgId>, actor: Actor) -> Self {
        Self { org_id, actor, correlation_id: Uuid::new_v4().to_string() }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn org_id(&self) -> Option<&OrgId> {
        self.org_id.as_ref()
    }

    /// Writes need a tenant; callers without one are rejected before any store access.
    pub fn require_org(&self) -> Result<&OrgId, ApplicationError> {
        self.org_id.as_ref().ok_or_else(|| {
            ApplicationError::Unauthorized("no organization is associated with this account".to_owned())
        })
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn role(&self) -> AppRole {
        self.actor.role
    }

    pub fn is_platform_admin(&self) -> bool {
        self.actor.is_platform_admin
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Grants extra capabilities for the duration of a cascade the actor was already
    /// authorized to start. The original context is left untouched.
    pub fn escalate(&self, reason: &str, capabilities: &[Capability]) -> Self {
        let mut escalated = self.clone();
        for capability in capabilities {
            escalated.actor.capabilities.set(*capability, true);
        }
        debug!(
            event_name = "tenant.context_escalated",
            correlation_id = %self.correlation_id,
            org_id = ?self.org_id.as_ref().map(OrgId::as_str),
            reason,
            granted = capabilities.len(),
            "escalated tenant context for cascade"
        );
        escalated
    }
}

pub struct TenantResolver {
    store: Arc<dyn RecordStore>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, session: &Session) -> Result<TenantContext, ApplicationError> {
        let is_platform_admin = session.is_platform_admin();
        let oldest_first = SortKey::ascending("created_at");

        let membership = self
            .store
            .find_one_sorted("members", &Filter::new().eq("user_id", session.user_id.0.clone()), &oldest_first)
            .await?;
        if let Some(document) = membership {
            let member: Member = decode_document(document)?;
            let role = member.role.normalize(&member.capabilities);
            let context = TenantContext::new(
                Some(member.org_id.clone()),
                Actor {
                    user_id: session.user_id.clone(),
                    email: session.email.clone(),
                    member_id: Some(member.id),
                    role,
                    capabilities: member.capabilities,
                    is_platform_admin,
                },
            );
            log_resolution(&context, "membership");
            return Ok(context);
        }

        let owned = self
            .store
            .find_one_sorted(
                "organizations",
                &Filter::new().eq("owner_user_id", session.user_id.0.clone()),
                &oldest_first,
            )
            .await?;
        if let Some(document) = owned {
            let organization: Organization = decode_document(document)?;
            let context = TenantContext::new(
                Some(organization.id),
                Actor {
                    user_id: session.user_id.clone(),
                    email: session.email.clone(),
                    member_id: None,
                    role: AppRole::Admin,
                    capabilities: CapabilityMap::default(),
                    is_platform_admin,
                },
            );
            log_resolution(&context, "ownership");
            return Ok(context);
        }

        let context = TenantContext::new(
            None,
            Actor {
                user_id: session.user_id.clone(),
                email: session.email.clone(),
                member_id: None,
                role: AppRole::Staff,
                capabilities: CapabilityMap::default(),
                is_platform_admin,
            },
        );
        log_resolution(&context, "none");
        Ok(context)
    }
}

fn log_resolution(context: &TenantContext, source: &'static str) {
    debug!(
        event_name = "tenant.resolved",
        correlation_id = %context.correlation_id(),
        org_id = ?context.org_id().map(OrgId::as_str),
        role = ?context.role(),
        platform_admin = context.is_platform_admin(),
        source,
        "resolved tenant context"
    );
}
