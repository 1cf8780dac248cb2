use std::sync::Arc;

use dealdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use dealdesk_core::store::RecordStore;
use dealdesk_db::{connect_with_config, migrations, DbPool, LocalAttachmentStore, SqlRecordStore};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: Arc<dyn RecordStore>,
    pub attachments: Option<Arc<LocalAttachmentStore>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects and migrates the database for an already loaded configuration.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        applied = migrations::known_migrations(),
        "database migrations applied"
    );

    let attachments = LocalAttachmentStore::from_config(&config.attachments).map(Arc::new);
    if attachments.is_none() {
        warn!(
            event_name = "system.bootstrap.attachments_disabled",
            correlation_id = "bootstrap",
            "no attachment signing secret configured; quote document uploads are disabled"
        );
    }

    Ok(Application {
        store: Arc::new(SqlRecordStore::new(db_pool.clone())),
        config,
        db_pool,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use dealdesk_core::config::{ConfigOverrides, LoadOptions};
    use dealdesk_core::store::Filter;

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/dealdesk".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_exposes_an_empty_store() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with an in-memory database");

        let organizations =
            app.store.find("organizations", &Filter::new(), None).await.expect("query store");
        assert!(organizations.is_empty());
        assert!(app.attachments.is_none(), "uploads stay disabled without a signing secret");

        app.db_pool.close().await;
    }
}
