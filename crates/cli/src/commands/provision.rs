use dealdesk_core::{OwnerSignup, Session, TenantProvisioner};

use crate::commands::{load_config, open_store, runtime, to_data, CommandResult};

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub user_id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub organization_name: String,
    pub referral_code: Option<String>,
}

/// Creates an organization owned by `user_id` with its owner membership and default
/// settings.
pub fn run(request: ProvisionRequest) -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return failure.into_result("provision"),
    };
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return failure.into_result("provision"),
    };

    runtime.block_on(async {
        let store = match open_store(&config).await {
            Ok(store) => store,
            Err(failure) => return failure.into_result("provision"),
        };
        let provisioner = TenantProvisioner::new(store)
            .with_defaults(config.tenancy.default_plan, config.tenancy.serial_prefix.clone());

        let mut session = Session::new(request.user_id, request.email);
        session.full_name = request.full_name;
        let signup = OwnerSignup {
            organization_name: request.organization_name,
            referral_code: request.referral_code,
        };

        match provisioner.provision_owner(&session, signup).await {
            Ok(tenant) => CommandResult::success_with_data(
                "provision",
                format!(
                    "provisioned organization `{}` ({}) on plan {}",
                    tenant.organization.name,
                    tenant.organization.id,
                    tenant.organization.plan.as_str()
                ),
                to_data(&tenant),
            ),
            Err(error) => CommandResult::from_application_error("provision", &error),
        }
    })
}
