use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use dealdesk_cli::commands::import_leads::{self, ImportRequest};
use dealdesk_cli::commands::orgs::{self, OrgsAction};
use dealdesk_cli::commands::provision::{self, ProvisionRequest};
use dealdesk_cli::commands::{doctor, migrate};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("DEALDESK_DATABASE_URL", &database_url(&dir))], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_override() {
    with_env(&[("DEALDESK_SERVER_PORT", "not-a-port")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_reports_pass_after_migrations() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("DEALDESK_DATABASE_URL", &database_url(&dir))], || {
        assert_eq!(migrate::run().exit_code, 0);

        let report = parse_payload(&doctor::run(true));
        assert_eq!(report["overall_status"], "pass");
        let schema = report["checks"]
            .as_array()
            .and_then(|checks| checks.iter().find(|check| check["name"] == "schema_version"))
            .expect("schema check present");
        assert_eq!(schema["status"], "pass");
    });
}

#[test]
fn provision_then_administer_the_organization() {
    let dir = TempDir::new().expect("tempdir");
    with_env(
        &[("DEALDESK_DATABASE_URL", &database_url(&dir)), ("DEALDESK_TENANCY_DEFAULT_PLAN", "basic")],
        || {
            let provisioned = provision::run(owner_request("user-1", "Sun Roofs"));
            assert_eq!(provisioned.exit_code, 0, "{}", provisioned.output);
            let payload = parse_payload(&provisioned.output);
            assert_eq!(payload["data"]["organization"]["plan"], "basic");
            assert_eq!(payload["data"]["owner"]["role"], "owner");
            let org_id = payload["data"]["organization"]["id"].as_str().expect("org id").to_owned();

            let listed = parse_payload(&orgs::run("ops", OrgsAction::List).output);
            assert_eq!(listed["status"], "ok");
            assert_eq!(listed["data"].as_array().map(Vec::len), Some(1));

            let upgraded = orgs::run(
                "ops",
                OrgsAction::SetPlan { org_id: org_id.clone(), plan: "enterprise".to_owned() },
            );
            assert_eq!(upgraded.exit_code, 0, "{}", upgraded.output);
            assert_eq!(parse_payload(&upgraded.output)["data"]["plan"], "enterprise");

            let deactivated = orgs::run("ops", OrgsAction::Deactivate { org_id });
            assert_eq!(parse_payload(&deactivated.output)["data"]["active"], false);
        },
    );
}

#[test]
fn provisioning_the_same_owner_twice_conflicts() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("DEALDESK_DATABASE_URL", &database_url(&dir))], || {
        assert_eq!(provision::run(owner_request("user-1", "First")).exit_code, 0);

        let second = provision::run(owner_request("user-1", "Second"));
        assert_eq!(second.exit_code, 7);
        assert_eq!(parse_payload(&second.output)["error_class"], "conflict");
    });
}

#[test]
fn unknown_plan_is_a_validation_error() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("DEALDESK_DATABASE_URL", &database_url(&dir))], || {
        let result = orgs::run(
            "ops",
            OrgsAction::SetPlan { org_id: "missing".to_owned(), plan: "platinum".to_owned() },
        );
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "validation");
    });
}

#[test]
fn import_leads_reports_row_failures() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("DEALDESK_DATABASE_URL", &database_url(&dir))], || {
        assert_eq!(provision::run(owner_request("user-1", "Sun Roofs")).exit_code, 0);
        let file = dir.path().join("leads.csv");
        fs::write(&file, "name,phone\nMaya,050-0000001\n,\n").expect("write csv");

        let result = import_leads::run(ImportRequest {
            user_id: "user-1".to_owned(),
            email: "owner@example.com".to_owned(),
            file,
            source: Some("expo".to_owned()),
        });
        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["total_rows"], 2);
        assert_eq!(payload["data"]["imported"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["data"]["failures"][0]["line"], 3);
    });
}

#[test]
fn import_leads_rejects_users_without_an_organization() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("DEALDESK_DATABASE_URL", &database_url(&dir))], || {
        let file = dir.path().join("leads.csv");
        fs::write(&file, "name\nMaya\n").expect("write csv");

        let result = import_leads::run(ImportRequest {
            user_id: "stranger".to_owned(),
            email: "stranger@example.com".to_owned(),
            file,
            source: None,
        });
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "unauthorized");
    });
}

fn owner_request(user_id: &str, organization_name: &str) -> ProvisionRequest {
    ProvisionRequest {
        user_id: user_id.to_owned(),
        email: "Owner@Example.com".to_owned(),
        full_name: Some("Owner".to_owned()),
        organization_name: organization_name.to_owned(),
        referral_code: None,
    }
}

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("dealdesk.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "DEALDESK_DATABASE_URL",
        "DEALDESK_DATABASE_MAX_CONNECTIONS",
        "DEALDESK_DATABASE_TIMEOUT_SECS",
        "DEALDESK_SERVER_BIND_ADDRESS",
        "DEALDESK_SERVER_PORT",
        "DEALDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "DEALDESK_LOGGING_LEVEL",
        "DEALDESK_LOGGING_FORMAT",
        "DEALDESK_LOG_LEVEL",
        "DEALDESK_LOG_FORMAT",
        "DEALDESK_ATTACHMENTS_ROOT_DIR",
        "DEALDESK_ATTACHMENTS_SIGNING_SECRET",
        "DEALDESK_ATTACHMENTS_URL_TTL_SECS",
        "DEALDESK_ATTACHMENTS_BASE_URL",
        "DEALDESK_TENANCY_DEFAULT_PLAN",
        "DEALDESK_TENANCY_SERIAL_PREFIX",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
