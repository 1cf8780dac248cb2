pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::import_leads::ImportRequest;
use crate::commands::orgs::OrgsAction;
use crate::commands::provision::ProvisionRequest;

#[derive(Debug, Parser)]
#[command(
    name = "dealdesk",
    about = "Dealdesk operator CLI",
    long_about = "Operate Dealdesk: migrations, readiness checks, config inspection, tenant provisioning and platform administration.",
    after_help = "Examples:\n  dealdesk doctor --json\n  dealdesk provision --user-id u-1 --email owner@example.com --org-name \"Sun Roofs\"\n  dealdesk orgs set-plan <org-id> pro"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, attachment storage, DB connectivity and schema version")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Create an organization with its owner membership and default settings")]
    Provision {
        #[arg(long, help = "Auth provider user id of the owner")]
        user_id: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long = "org-name")]
        organization_name: String,
        #[arg(long, help = "Referral code of the organization that referred this one")]
        referral_code: Option<String>,
    },
    #[command(about = "Platform administration of organizations")]
    Orgs {
        #[arg(long, default_value = "cli-operator", help = "Operator recorded in audit events")]
        operator: String,
        #[command(subcommand)]
        action: OrgsCommand,
    },
    #[command(about = "Import leads from a CSV file into the user's organization")]
    ImportLeads {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: String,
        #[arg(long, help = "Source recorded on rows that do not carry one")]
        source: Option<String>,
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum OrgsCommand {
    #[command(about = "List every organization, oldest first")]
    List,
    #[command(about = "Change the plan and reset quotas to the plan defaults")]
    SetPlan { org_id: String, plan: String },
    #[command(about = "Override quotas; 0 means unlimited")]
    SetQuotas {
        org_id: String,
        #[arg(long)]
        monthly_leads: Option<u64>,
        #[arg(long)]
        max_users: Option<u64>,
    },
    Activate { org_id: String },
    Deactivate { org_id: String },
}

impl From<OrgsCommand> for OrgsAction {
    fn from(command: OrgsCommand) -> Self {
        match command {
            OrgsCommand::List => Self::List,
            OrgsCommand::SetPlan { org_id, plan } => Self::SetPlan { org_id, plan },
            OrgsCommand::SetQuotas { org_id, monthly_leads, max_users } => {
                Self::SetQuotas { org_id, monthly_leads, max_users }
            }
            OrgsCommand::Activate { org_id } => Self::Activate { org_id },
            OrgsCommand::Deactivate { org_id } => Self::Deactivate { org_id },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Provision { user_id, email, full_name, organization_name, referral_code } => {
            commands::provision::run(ProvisionRequest {
                user_id,
                email,
                full_name,
                organization_name,
                referral_code,
            })
        }
        Command::Orgs { operator, action } => commands::orgs::run(&operator, action.into()),
        Command::ImportLeads { user_id, email, source, file } => {
            commands::import_leads::run(ImportRequest { user_id, email, file, source })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::Cli;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }
}
