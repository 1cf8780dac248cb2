use dealdesk_core::config::{AppConfig, LoadOptions};
use dealdesk_db::{connect_with_config, migrations};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_attachments(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["attachment_storage", "database_connectivity", "schema_version"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_attachments(config: &AppConfig) -> DoctorCheck {
    if !config.attachments.is_enabled() {
        return DoctorCheck {
            name: "attachment_storage",
            status: CheckStatus::Warn,
            details: "quote document uploads are disabled (no signing secret configured)".to_string(),
        };
    }
    match std::fs::create_dir_all(&config.attachments.root_dir) {
        Ok(()) => DoctorCheck {
            name: "attachment_storage",
            status: CheckStatus::Pass,
            details: format!("storing documents under `{}`", config.attachments.root_dir.display()),
        },
        Err(error) => DoctorCheck {
            name: "attachment_storage",
            status: CheckStatus::Fail,
            details: format!(
                "cannot create `{}`: {error}",
                config.attachments.root_dir.display()
            ),
        },
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let applied = migrations::applied_migrations(&pool).await;
        pool.close().await;
        Ok::<_, String>(applied)
    });

    match result {
        Ok(applied) => {
            let connectivity = DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            };
            let known = migrations::known_migrations();
            let schema = match applied {
                Ok(applied) if applied >= known => DoctorCheck {
                    name: "schema_version",
                    status: CheckStatus::Pass,
                    details: format!("{applied} of {known} migrations applied"),
                },
                Ok(applied) => DoctorCheck {
                    name: "schema_version",
                    status: CheckStatus::Warn,
                    details: format!(
                        "{applied} of {known} migrations applied; run `dealdesk migrate`"
                    ),
                },
                Err(error) => DoctorCheck {
                    name: "schema_version",
                    status: CheckStatus::Fail,
                    details: format!("could not read migration history: {error}"),
                },
            };
            vec![connectivity, schema]
        }
        Err(error) => vec![
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error },
            DoctorCheck {
                name: "schema_version",
                status: CheckStatus::Skipped,
                details: "skipped because the database is unreachable".to_string(),
            },
        ],
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
