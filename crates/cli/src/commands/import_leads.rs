use std::fs::File;
use std::path::PathBuf;

use dealdesk_core::{DealOrchestrator, EntityGateway, Session, TenantResolver};

use crate::commands::{load_config, open_store, runtime, to_data, CommandResult};

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub user_id: String,
    pub email: String,
    pub file: PathBuf,
    pub source: Option<String>,
}

/// Imports a CSV of leads into the organization `user_id` belongs to. Rows that fail are
/// listed in the payload; the command still succeeds when at least the file was read.
pub fn run(request: ImportRequest) -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return failure.into_result("import-leads"),
    };
    let reader = match File::open(&request.file) {
        Ok(file) => file,
        Err(error) => {
            return CommandResult::failure(
                "import-leads",
                "input",
                format!("cannot open `{}`: {error}", request.file.display()),
                6,
            );
        }
    };
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return failure.into_result("import-leads"),
    };

    runtime.block_on(async {
        let store = match open_store(&config).await {
            Ok(store) => store,
            Err(failure) => return failure.into_result("import-leads"),
        };
        let session = Session::new(request.user_id, request.email);
        let outcome = async {
            let ctx = TenantResolver::new(store.clone()).resolve(&session).await?;
            let deals = DealOrchestrator::new(EntityGateway::new(store));
            deals.import_leads(&ctx, reader, request.source.as_deref()).await
        }
        .await;

        match outcome {
            Ok(summary) => CommandResult::success_with_data(
                "import-leads",
                format!(
                    "imported {} of {} row(s), {} failed",
                    summary.imported.len(),
                    summary.total_rows,
                    summary.failures.len()
                ),
                to_data(&summary),
            ),
            Err(error) => CommandResult::from_application_error("import-leads", &error),
        }
    })
}
