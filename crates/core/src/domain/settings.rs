//! Per-organization configuration document.
//!
//! Older tenants may have stored only a subset of these fields (or nothing at all), so
//! every field carries a default and decoding never fails on a missing sub-object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::member::MemberId;
use crate::domain::organization::OrgId;

pub const SETTINGS_SCHEMA_VERSION: u32 = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub id: String,
    pub org_id: Option<OrgId>,
    pub schema_version: u32,
    pub visible_modules: Vec<String>,
    pub lead_statuses: Vec<StatusLabel>,
    pub rejection_reasons: Vec<String>,
    pub assignment: AssignmentRule,
    pub quote_serial_prefix: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLabel {
    pub key: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentRule {
    /// Pull the oldest waiting lead when an installer becomes available.
    pub auto_assign_installers: bool,
    pub default_member_id: Option<MemberId>,
}

impl Default for AssignmentRule {
    fn default() -> Self {
        Self { auto_assign_installers: true, default_member_id: None }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: String::new(),
            org_id: None,
            schema_version: SETTINGS_SCHEMA_VERSION,
            visible_modules: ["leads", "quotes", "customers", "jobs", "staff", "reports"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            lead_statuses: default_lead_statuses(),
            rejection_reasons: ["price too high", "chose a competitor", "no response", "not relevant"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            assignment: AssignmentRule::default(),
            quote_serial_prefix: "1".to_string(),
            created_at: None,
            updated_at: None,
        }
    }
}

fn default_lead_statuses() -> Vec<StatusLabel> {
    [
        ("new", "New"),
        ("in_progress", "In progress"),
        ("meeting_scheduled", "Meeting scheduled"),
        ("meeting_held", "Meeting held"),
        ("quote_approved", "Quote approved"),
        ("won", "Won"),
        ("lost", "Lost"),
    ]
    .into_iter()
    .map(|(key, label)| StatusLabel { key: key.to_string(), label: label.to_string() })
    .collect()
}

impl Settings {
    pub fn id_for(org_id: &OrgId) -> String {
        format!("settings_{}", org_id.as_str())
    }

    pub fn for_org(org_id: &OrgId) -> Self {
        Self { id: Self::id_for(org_id), org_id: Some(org_id.clone()), ..Self::default() }
    }

    pub fn find_rejection_reason(&self, reason: &str) -> Option<&str> {
        let wanted = reason.trim();
        self.rejection_reasons
            .iter()
            .find(|known| known.trim().eq_ignore_ascii_case(wanted))
            .map(String::as_str)
    }

    pub fn serial_prefix(&self) -> &str {
        let prefix = self.quote_serial_prefix.trim();
        if prefix.is_empty() {
            "1"
        } else {
            prefix
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Settings, SETTINGS_SCHEMA_VERSION};

    #[test]
    fn partial_documents_fall_back_to_defaults() {
        let settings: Settings =
            serde_json::from_value(json!({ "rejection_reasons": ["too far"] })).expect("decode");

        assert_eq!(settings.rejection_reasons, vec!["too far".to_string()]);
        assert_eq!(settings.schema_version, SETTINGS_SCHEMA_VERSION);
        assert!(settings.assignment.auto_assign_installers);
        assert_eq!(settings.serial_prefix(), "1");
    }

    #[test]
    fn nested_objects_fill_missing_fields() {
        let settings: Settings =
            serde_json::from_value(json!({ "assignment": {} })).expect("decode");
        assert!(settings.assignment.auto_assign_installers);
    }

    #[test]
    fn rejection_reason_lookup_is_case_insensitive() {
        let settings = Settings::default();
        assert_eq!(settings.find_rejection_reason(" Price Too High "), Some("price too high"));
        assert_eq!(settings.find_rejection_reason("weather"), None);
    }
}
