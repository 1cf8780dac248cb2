use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dealdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: overrides > env > file > default):".to_string()];
    for (key_path, value) in effective_values(&config) {
        let source = field_source(
            key_path,
            env_keys(key_path),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, &value, source));
    }
    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
        ("attachments.root_dir", config.attachments.root_dir.display().to_string()),
        (
            "attachments.signing_secret",
            redact_secret(config.attachments.signing_secret.expose_secret()),
        ),
        ("attachments.url_ttl_secs", config.attachments.url_ttl_secs.to_string()),
        ("attachments.base_url", config.attachments.base_url.clone()),
        ("tenancy.default_plan", config.tenancy.default_plan.as_str().to_string()),
        ("tenancy.serial_prefix", config.tenancy.serial_prefix.clone()),
    ]
}

/// Environment variables that can set `key_path`, in lookup order.
fn env_keys(key_path: &str) -> &'static [&'static str] {
    match key_path {
        "database.url" => &["DEALDESK_DATABASE_URL"],
        "database.max_connections" => &["DEALDESK_DATABASE_MAX_CONNECTIONS"],
        "database.timeout_secs" => &["DEALDESK_DATABASE_TIMEOUT_SECS"],
        "server.bind_address" => &["DEALDESK_SERVER_BIND_ADDRESS"],
        "server.port" => &["DEALDESK_SERVER_PORT"],
        "server.graceful_shutdown_secs" => &["DEALDESK_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        "logging.level" => &["DEALDESK_LOGGING_LEVEL", "DEALDESK_LOG_LEVEL"],
        "logging.format" => &["DEALDESK_LOGGING_FORMAT", "DEALDESK_LOG_FORMAT"],
        "attachments.root_dir" => &["DEALDESK_ATTACHMENTS_ROOT_DIR"],
        "attachments.signing_secret" => &["DEALDESK_ATTACHMENTS_SIGNING_SECRET"],
        "attachments.url_ttl_secs" => &["DEALDESK_ATTACHMENTS_URL_TTL_SECS"],
        "attachments.base_url" => &["DEALDESK_ATTACHMENTS_BASE_URL"],
        "tenancy.default_plan" => &["DEALDESK_TENANCY_DEFAULT_PLAN"],
        "tenancy.serial_prefix" => &["DEALDESK_TENANCY_SERIAL_PREFIX"],
        _ => &[],
    }
}

fn detect_config_path() -> Option<PathBuf> {
    ["dealdesk.toml", "config/dealdesk.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<unset>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, env_keys, redact_secret};

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: toml::Value = "[attachments]\nurl_ttl_secs = 60\n".parse().expect("toml");
        assert!(contains_path(&doc, "attachments.url_ttl_secs"));
        assert!(!contains_path(&doc, "attachments.base_url"));
    }

    #[test]
    fn logging_keys_accept_the_short_aliases() {
        assert_eq!(env_keys("logging.level"), &["DEALDESK_LOGGING_LEVEL", "DEALDESK_LOG_LEVEL"]);
        assert!(env_keys("unknown.key").is_empty());
    }

    #[test]
    fn secrets_never_render_in_clear() {
        assert_eq!(redact_secret(""), "<unset>");
        assert_eq!(redact_secret("a-very-long-signing-secret"), "<redacted>");
    }
}
