//! Capability model.
//!
//! Authorization always reads the flat [`CapabilityMap`] stored on a member. A
//! [`RoleProfile`] is only a bulk-editing preset: applying one writes its category
//! defaults into the flat map, after which the profile plays no further part.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ApplicationError;
use crate::tenant::{Actor, AppRole};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    Leads,
    Finance,
    Inventory,
    Jobs,
    Customers,
    Staff,
    Reports,
    Settings,
}

impl CapabilityCategory {
    pub const ALL: [Self; 8] = [
        Self::Leads,
        Self::Finance,
        Self::Inventory,
        Self::Jobs,
        Self::Customers,
        Self::Staff,
        Self::Reports,
        Self::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leads => "leads",
            Self::Finance => "finance",
            Self::Inventory => "inventory",
            Self::Jobs => "jobs",
            Self::Customers => "customers",
            Self::Staff => "staff",
            Self::Reports => "reports",
            Self::Settings => "settings",
        }
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(move |capability| capability.category() == Some(*self))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    LeadsView,
    LeadsCreate,
    LeadsEdit,
    LeadsDelete,
    LeadsImport,
    LeadsAssign,
    FinanceViewQuotes,
    FinanceEditQuotes,
    FinanceDeleteQuotes,
    FinanceCloseDeals,
    FinanceViewInvoices,
    InventoryView,
    InventoryEdit,
    JobsView,
    JobsEdit,
    JobsDelete,
    CustomersView,
    CustomersEdit,
    CustomersDelete,
    StaffView,
    StaffManage,
    ReportsView,
    SettingsView,
    SettingsEdit,
    /// Promotes a standard membership to the privileged application role.
    SystemFullAccess,
}

impl Capability {
    pub const ALL: [Self; 25] = [
        Self::LeadsView,
        Self::LeadsCreate,
        Self::LeadsEdit,
        Self::LeadsDelete,
        Self::LeadsImport,
        Self::LeadsAssign,
        Self::FinanceViewQuotes,
        Self::FinanceEditQuotes,
        Self::FinanceDeleteQuotes,
        Self::FinanceCloseDeals,
        Self::FinanceViewInvoices,
        Self::InventoryView,
        Self::InventoryEdit,
        Self::JobsView,
        Self::JobsEdit,
        Self::JobsDelete,
        Self::CustomersView,
        Self::CustomersEdit,
        Self::CustomersDelete,
        Self::StaffView,
        Self::StaffManage,
        Self::ReportsView,
        Self::SettingsView,
        Self::SettingsEdit,
        Self::SystemFullAccess,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::LeadsView => "leads.view",
            Self::LeadsCreate => "leads.create",
            Self::LeadsEdit => "leads.edit",
            Self::LeadsDelete => "leads.delete",
            Self::LeadsImport => "leads.import",
            Self::LeadsAssign => "leads.assign",
            Self::FinanceViewQuotes => "finance.view_quotes",
            Self::FinanceEditQuotes => "finance.edit_quotes",
            Self::FinanceDeleteQuotes => "finance.delete_quotes",
            Self::FinanceCloseDeals => "finance.close_deals",
            Self::FinanceViewInvoices => "finance.view_invoices",
            Self::InventoryView => "inventory.view",
            Self::InventoryEdit => "inventory.edit",
            Self::JobsView => "jobs.view",
            Self::JobsEdit => "jobs.edit",
            Self::JobsDelete => "jobs.delete",
            Self::CustomersView => "customers.view",
            Self::CustomersEdit => "customers.edit",
            Self::CustomersDelete => "customers.delete",
            Self::StaffView => "staff.view",
            Self::StaffManage => "staff.manage",
            Self::ReportsView => "reports.view",
            Self::SettingsView => "settings.view",
            Self::SettingsEdit => "settings.edit",
            Self::SystemFullAccess => "system.full_access",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|capability| capability.key() == key.trim())
    }

    /// `None` for capabilities outside the bulk-toggle categories.
    pub fn category(&self) -> Option<CapabilityCategory> {
        let prefix = self.key().split('.').next().unwrap_or_default();
        CapabilityCategory::ALL.into_iter().find(|category| category.as_str() == prefix)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Flat capability-key → bool map as stored on the member record. Unknown keys are
/// preserved so older or newer clients do not lose each other's flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMap(BTreeMap<String, bool>);

impl CapabilityMap {
    pub fn allows(&self, capability: Capability) -> bool {
        self.0.get(capability.key()).copied().unwrap_or(false)
    }

    pub fn set(&mut self, capability: Capability, enabled: bool) {
        self.0.insert(capability.key().to_string(), enabled);
    }

    /// Sets every capability of the category to the same value.
    pub fn set_category(&mut self, category: CapabilityCategory, enabled: bool) {
        for capability in category.capabilities() {
            self.set(capability, enabled);
        }
    }

    /// Writes the profile's category defaults into the map. Categories the profile does
    /// not mention are left as they are.
    pub fn apply_profile(&mut self, profile: RoleProfile) {
        for (category, enabled) in profile.category_defaults().iter() {
            self.set_category(*category, *enabled);
        }
    }

    pub fn from_profile(profile: RoleProfile) -> Self {
        let mut map = Self::default();
        map.apply_profile(profile);
        map
    }

    pub fn granted(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter(|(_, enabled)| **enabled).map(|(key, _)| key.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryDefaults(BTreeMap<CapabilityCategory, bool>);

impl CategoryDefaults {
    fn from_pairs(pairs: &[(CapabilityCategory, bool)]) -> Self {
        Self(pairs.iter().copied().collect())
    }

    pub fn get(&self, category: CapabilityCategory) -> Option<bool> {
        self.0.get(&category).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CapabilityCategory, &bool)> {
        self.0.iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleProfile {
    Manager,
    SalesRep,
    Installer,
    Office,
    ReadOnly,
}

impl RoleProfile {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            "sales_rep" | "sales" => Some(Self::SalesRep),
            "installer" => Some(Self::Installer),
            "office" => Some(Self::Office),
            "read_only" | "readonly" => Some(Self::ReadOnly),
            _ => None,
        }
    }

    pub fn category_defaults(&self) -> CategoryDefaults {
        use CapabilityCategory::*;

        match self {
            Self::Manager => CategoryDefaults::from_pairs(&[
                (Leads, true),
                (Finance, true),
                (Inventory, true),
                (Jobs, true),
                (Customers, true),
                (Staff, true),
                (Reports, true),
                (Settings, false),
            ]),
            Self::SalesRep => CategoryDefaults::from_pairs(&[
                (Leads, true),
                (Finance, true),
                (Inventory, false),
                (Jobs, false),
                (Customers, true),
                (Staff, false),
                (Reports, false),
                (Settings, false),
            ]),
            Self::Installer => CategoryDefaults::from_pairs(&[
                (Leads, false),
                (Finance, false),
                (Inventory, true),
                (Jobs, true),
                (Customers, false),
                (Staff, false),
                (Reports, false),
                (Settings, false),
            ]),
            Self::Office => CategoryDefaults::from_pairs(&[
                (Leads, true),
                (Finance, true),
                (Customers, true),
                (Jobs, true),
                (Reports, true),
            ]),
            Self::ReadOnly => CategoryDefaults::from_pairs(&[
                (Leads, false),
                (Finance, false),
                (Inventory, false),
                (Jobs, false),
                (Customers, false),
                (Staff, false),
                (Reports, true),
                (Settings, false),
            ]),
        }
    }
}

/// Answers authorization questions for gateway and orchestrator calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct CapabilityEngine;

impl CapabilityEngine {
    pub fn has_capability(&self, actor: &Actor, capability: Capability) -> bool {
        if actor.is_platform_admin || actor.role == AppRole::Admin {
            return true;
        }
        actor.capabilities.allows(capability)
    }

    pub fn require(&self, actor: &Actor, capability: Capability) -> Result<(), ApplicationError> {
        if self.has_capability(actor, capability) {
            return Ok(());
        }
        Err(ApplicationError::Unauthorized(format!(
            "missing capability `{}` for this action",
            capability.key()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{Capability, CapabilityCategory, CapabilityEngine, CapabilityMap, RoleProfile};
    use crate::domain::member::UserId;
    use crate::errors::ApplicationError;
    use crate::tenant::{Actor, AppRole};

    fn staff(capabilities: CapabilityMap) -> Actor {
        Actor {
            user_id: UserId("user-1".to_string()),
            email: "staff@example.com".to_string(),
            member_id: None,
            role: AppRole::Staff,
            capabilities,
            is_platform_admin: false,
        }
    }

    #[test]
    fn every_key_round_trips_through_parse() {
        for capability in Capability::ALL {
            assert_eq!(Capability::parse(capability.key()), Some(capability));
        }
    }

    #[test]
    fn only_the_override_sits_outside_categories() {
        let uncategorized: Vec<_> =
            Capability::ALL.into_iter().filter(|cap| cap.category().is_none()).collect();
        assert_eq!(uncategorized, vec![Capability::SystemFullAccess]);
    }

    #[test]
    fn applying_a_profile_flattens_every_key_of_each_category() {
        for profile in [
            RoleProfile::Manager,
            RoleProfile::SalesRep,
            RoleProfile::Installer,
            RoleProfile::Office,
            RoleProfile::ReadOnly,
        ] {
            let map = CapabilityMap::from_profile(profile);
            let defaults = profile.category_defaults();
            for category in CapabilityCategory::ALL {
                let Some(expected) = defaults.get(category) else { continue };
                for capability in category.capabilities() {
                    assert_eq!(map.allows(capability), expected, "{profile:?} {capability}");
                }
            }
        }
    }

    #[test]
    fn partial_edits_after_a_profile_are_what_authorization_sees() {
        let mut map = CapabilityMap::from_profile(RoleProfile::SalesRep);
        map.set(Capability::FinanceCloseDeals, false);
        map.set(Capability::JobsView, true);

        let engine = CapabilityEngine;
        let actor = staff(map);
        assert!(!engine.has_capability(&actor, Capability::FinanceCloseDeals));
        assert!(engine.has_capability(&actor, Capability::FinanceEditQuotes));
        assert!(engine.has_capability(&actor, Capability::JobsView));
        assert!(!engine.has_capability(&actor, Capability::JobsEdit));
    }

    #[test]
    fn category_toggle_overrides_individual_flags() {
        let mut map = CapabilityMap::default();
        map.set(Capability::LeadsDelete, true);
        map.set_category(CapabilityCategory::Leads, false);
        assert!(CapabilityCategory::Leads.capabilities().all(|cap| !map.allows(cap)));
    }

    #[test]
    fn admins_hold_every_capability() {
        let mut actor = staff(CapabilityMap::default());
        actor.role = AppRole::Admin;
        assert!(Capability::ALL.into_iter().all(|cap| CapabilityEngine.has_capability(&actor, cap)));

        let mut actor = staff(CapabilityMap::default());
        actor.is_platform_admin = true;
        assert!(CapabilityEngine.has_capability(&actor, Capability::SettingsEdit));
    }

    #[test]
    fn require_reports_missing_capability() {
        let error = CapabilityEngine
            .require(&staff(CapabilityMap::default()), Capability::LeadsImport)
            .expect_err("denied");
        assert!(matches!(error, ApplicationError::Unauthorized(message) if message.contains("leads.import")));
    }

    #[test]
    fn unknown_keys_survive_serialization() {
        let map: CapabilityMap =
            serde_json::from_str(r#"{"leads.view":true,"beta.feature":true}"#).expect("decode");
        let encoded = serde_json::to_string(&map).expect("encode");
        assert!(encoded.contains("beta.feature"));
        assert!(map.allows(Capability::LeadsView));
    }
}
