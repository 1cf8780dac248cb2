pub mod config;
pub mod doctor;
pub mod import_leads;
pub mod migrate;
pub mod orgs;
pub mod provision;

use std::sync::Arc;

use dealdesk_core::config::{AppConfig, LoadOptions};
use dealdesk_core::store::RecordStore;
use dealdesk_core::ApplicationError;
use dealdesk_db::{connect_with_config, migrations, SqlRecordStore};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Business failures share exit code 7; the class tells them apart.
    pub fn from_application_error(command: &str, error: &ApplicationError) -> Self {
        Self::failure(command, error.class(), error.to_string(), 7)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Failure of the shared setup every data command goes through. Exit codes follow the
/// order of the steps: config 2, runtime 3, database 4, migrations 5.
#[derive(Debug)]
pub(crate) struct SetupFailure {
    error_class: &'static str,
    message: String,
    exit_code: u8,
}

impl SetupFailure {
    pub(crate) fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.error_class, self.message, self.exit_code)
    }
}

pub(crate) fn load_config() -> Result<AppConfig, SetupFailure> {
    AppConfig::load(LoadOptions::default()).map_err(|error| SetupFailure {
        error_class: "config_validation",
        message: format!("configuration issue: {error}"),
        exit_code: 2,
    })
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime, SetupFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        SetupFailure {
            error_class: "runtime_init",
            message: format!("failed to initialize async runtime: {error}"),
            exit_code: 3,
        }
    })
}

/// Connects, applies pending migrations and wraps the pool in a record store.
pub(crate) async fn open_store(config: &AppConfig) -> Result<Arc<dyn RecordStore>, SetupFailure> {
    let pool = connect_with_config(&config.database).await.map_err(|error| SetupFailure {
        error_class: "db_connectivity",
        message: error.to_string(),
        exit_code: 4,
    })?;
    migrations::run_pending(&pool).await.map_err(|error| SetupFailure {
        error_class: "migration",
        message: error.to_string(),
        exit_code: 5,
    })?;
    Ok(Arc::new(SqlRecordStore::new(pool)))
}

pub(crate) fn to_data<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}
