//! Bulk edits of a member's capability map.
//!
//! Both operations rewrite the stored flat map and nothing else; resolving the member
//! afterwards sees exactly what was written, including later per-key edits.

use serde_json::json;
use tracing::info;

use crate::capability::{Capability, CapabilityCategory, CapabilityMap, RoleProfile};
use crate::domain::member::{Member, MemberId};
use crate::errors::ApplicationError;
use crate::flows::orchestrator::DealOrchestrator;
use crate::gateway::patch;
use crate::tenant::TenantContext;

impl DealOrchestrator {
    /// Writes the profile's category defaults into the member's map. Keys outside the
    /// profile's categories keep their current value.
    pub async fn apply_role_profile(
        &self,
        ctx: &TenantContext,
        member_id: &MemberId,
        profile: RoleProfile,
    ) -> Result<Member, ApplicationError> {
        let member = self
            .edit_capabilities(ctx, member_id, |capabilities| capabilities.apply_profile(profile))
            .await?;
        info!(
            event_name = "staff.role_profile_applied",
            correlation_id = %ctx.correlation_id(),
            member_id = %member_id.0,
            profile = ?profile,
            "role profile applied"
        );
        Ok(member)
    }

    pub async fn set_capability_category(
        &self,
        ctx: &TenantContext,
        member_id: &MemberId,
        category: CapabilityCategory,
        enabled: bool,
    ) -> Result<Member, ApplicationError> {
        let member = self
            .edit_capabilities(ctx, member_id, |capabilities| capabilities.set_category(category, enabled))
            .await?;
        info!(
            event_name = "staff.capability_category_set",
            correlation_id = %ctx.correlation_id(),
            member_id = %member_id.0,
            category = category.as_str(),
            enabled,
            "capability category updated"
        );
        Ok(member)
    }

    async fn edit_capabilities(
        &self,
        ctx: &TenantContext,
        member_id: &MemberId,
        edit: impl FnOnce(&mut CapabilityMap),
    ) -> Result<Member, ApplicationError> {
        self.require(ctx, Capability::StaffManage)?;
        let org_id = ctx.require_org()?;
        let _guard = self.locks.lock(&format!("member:{org_id}:{}", member_id.0)).await;

        let members = self.gateway.collection::<Member>();
        let mut capabilities = members.get(ctx, &member_id.0).await?.capabilities;
        edit(&mut capabilities);
        members.update(ctx, &member_id.0, patch(json!({ "capabilities": capabilities }))).await
    }
}
