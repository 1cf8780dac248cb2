use dealdesk_core::tenant::PLATFORM_ADMIN_ROLE;
use dealdesk_core::{ApplicationError, OrgId, Organization, PlanTier, PlatformAdmin, Session, TenantResolver};
use serde::Serialize;

use crate::commands::{load_config, open_store, runtime, to_data, CommandResult};

#[derive(Debug, Clone)]
pub enum OrgsAction {
    List,
    SetPlan { org_id: String, plan: String },
    SetQuotas { org_id: String, monthly_leads: Option<u64>, max_users: Option<u64> },
    Activate { org_id: String },
    Deactivate { org_id: String },
}

impl OrgsAction {
    fn name(&self) -> &'static str {
        match self {
            Self::List => "orgs list",
            Self::SetPlan { .. } => "orgs set-plan",
            Self::SetQuotas { .. } => "orgs set-quotas",
            Self::Activate { .. } => "orgs activate",
            Self::Deactivate { .. } => "orgs deactivate",
        }
    }
}

#[derive(Debug, Serialize)]
struct OrganizationRow {
    id: String,
    name: String,
    plan: &'static str,
    active: bool,
    monthly_lead_quota: Option<u64>,
    max_users: Option<u64>,
}

impl From<&Organization> for OrganizationRow {
    fn from(organization: &Organization) -> Self {
        Self {
            id: organization.id.to_string(),
            name: organization.name.clone(),
            plan: organization.plan.as_str(),
            active: organization.active,
            monthly_lead_quota: organization.lead_quota(),
            max_users: organization.user_quota(),
        }
    }
}

/// Platform operations run as `operator`, who is always treated as a platform admin.
pub fn run(operator: &str, action: OrgsAction) -> CommandResult {
    let command = action.name();
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return failure.into_result(command),
    };
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return failure.into_result(command),
    };

    runtime.block_on(async {
        let store = match open_store(&config).await {
            Ok(store) => store,
            Err(failure) => return failure.into_result(command),
        };
        let session = Session::new(operator, format!("{operator}@operator.local"))
            .with_platform_role(PLATFORM_ADMIN_ROLE);

        let outcome = async {
            let ctx = TenantResolver::new(store.clone()).resolve(&session).await?;
            let admin = PlatformAdmin::authorize(&ctx, store, None)?;
            execute(&admin, action).await
        }
        .await;

        match outcome {
            Ok((message, data)) => CommandResult::success_with_data(command, message, data),
            Err(error) => CommandResult::from_application_error(command, &error),
        }
    })
}

async fn execute(
    admin: &PlatformAdmin,
    action: OrgsAction,
) -> Result<(String, Option<serde_json::Value>), ApplicationError> {
    match action {
        OrgsAction::List => {
            let rows: Vec<OrganizationRow> =
                admin.list_organizations().await?.iter().map(OrganizationRow::from).collect();
            Ok((format!("{} organization(s)", rows.len()), to_data(&rows)))
        }
        OrgsAction::SetPlan { org_id, plan } => {
            let plan = PlanTier::parse(&plan).ok_or_else(|| {
                ApplicationError::ValidationFailed(format!(
                    "unknown plan `{plan}`; expected free, basic, pro or enterprise"
                ))
            })?;
            let updated = admin.set_plan(&OrgId(org_id), plan).await?;
            Ok((
                format!("organization {} moved to plan {}", updated.id, plan.as_str()),
                to_data(&OrganizationRow::from(&updated)),
            ))
        }
        OrgsAction::SetQuotas { org_id, monthly_leads, max_users } => {
            let org_id = OrgId(org_id);
            let current = admin.organization(&org_id).await?;
            let updated = admin
                .set_quotas(
                    &org_id,
                    monthly_leads.or(current.monthly_lead_quota),
                    max_users.or(current.max_users),
                )
                .await?;
            Ok((
                format!("quotas updated for organization {}", updated.id),
                to_data(&OrganizationRow::from(&updated)),
            ))
        }
        OrgsAction::Activate { org_id } => toggle(admin, org_id, true).await,
        OrgsAction::Deactivate { org_id } => toggle(admin, org_id, false).await,
    }
}

async fn toggle(
    admin: &PlatformAdmin,
    org_id: String,
    active: bool,
) -> Result<(String, Option<serde_json::Value>), ApplicationError> {
    let updated = admin.set_active(&OrgId(org_id), active).await?;
    let verb = if active { "activated" } else { "deactivated" };
    Ok((format!("organization {} {verb}", updated.id), to_data(&OrganizationRow::from(&updated))))
}
