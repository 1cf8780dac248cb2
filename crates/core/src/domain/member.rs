use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilityMap};
use crate::domain::organization::OrgId;
use crate::tenant::AppRole;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Manager,
    Sales,
    Installer,
    Staff,
}

impl MemberRole {
    /// Owner and admin memberships are privileged; everyone else is standard unless their
    /// capability map carries the full-access override.
    pub fn normalize(&self, capabilities: &CapabilityMap) -> AppRole {
        match self {
            Self::Owner | Self::Admin => AppRole::Admin,
            _ if capabilities.allows(Capability::SystemFullAccess) => AppRole::Admin,
            _ => AppRole::Staff,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Busy,
    #[default]
    Offline,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub org_id: OrgId,
    pub user_id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub role: MemberRole,
    #[serde(default)]
    pub capabilities: CapabilityMap,
    #[serde(default)]
    pub availability: Availability,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMember {
    pub user_id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub role: MemberRole,
    #[serde(default)]
    pub capabilities: CapabilityMap,
    #[serde(default)]
    pub availability: Availability,
}

#[cfg(test)]
mod tests {
    use super::MemberRole;
    use crate::capability::{Capability, CapabilityMap};
    use crate::tenant::AppRole;

    #[test]
    fn owner_and_admin_normalize_to_admin() {
        let caps = CapabilityMap::default();
        assert_eq!(MemberRole::Owner.normalize(&caps), AppRole::Admin);
        assert_eq!(MemberRole::Admin.normalize(&caps), AppRole::Admin);
        assert_eq!(MemberRole::Sales.normalize(&caps), AppRole::Staff);
    }

    #[test]
    fn full_access_override_promotes_standard_roles() {
        let mut caps = CapabilityMap::default();
        caps.set(Capability::SystemFullAccess, true);
        assert_eq!(MemberRole::Installer.normalize(&caps), AppRole::Admin);
    }
}
