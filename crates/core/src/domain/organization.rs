use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::member::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "basic" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    /// Monthly lead quota granted by the tier; `None` is unlimited.
    pub fn default_lead_quota(&self) -> Option<u64> {
        match self {
            Self::Free => Some(50),
            Self::Basic => Some(300),
            Self::Pro => Some(2_000),
            Self::Enterprise => None,
        }
    }

    pub fn default_max_users(&self) -> Option<u64> {
        match self {
            Self::Free => Some(2),
            Self::Basic => Some(5),
            Self::Pro => Some(20),
            Self::Enterprise => None,
        }
    }

    pub fn upgrade_hint(&self) -> &'static str {
        match self {
            Self::Free => "upgrade to the Basic plan",
            Self::Basic => "upgrade to the Pro plan",
            Self::Pro => "upgrade to the Enterprise plan",
            Self::Enterprise => "contact support to raise the limit",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalInterval {
    Monthly,
    Yearly,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub owner_user_id: UserId,
    #[serde(default)]
    pub plan: PlanTier,
    #[serde(default)]
    pub monthly_lead_quota: Option<u64>,
    #[serde(default)]
    pub max_users: Option<u64>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub subscription_ends_on: Option<NaiveDate>,
    #[serde(default)]
    pub auto_renew: bool,
    #[serde(default)]
    pub renewal_interval: Option<RenewalInterval>,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub referred_by: Option<OrgId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Organization {
    /// Active flag set and the subscription either open-ended, still running, or renewing.
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        if !self.active {
            return false;
        }
        match self.subscription_ends_on {
            None => true,
            Some(ends_on) => ends_on >= today || self.auto_renew,
        }
    }

    /// `0` and `None` both mean unlimited.
    pub fn lead_quota(&self) -> Option<u64> {
        self.monthly_lead_quota.filter(|quota| *quota > 0)
    }

    pub fn user_quota(&self) -> Option<u64> {
        self.max_users.filter(|quota| *quota > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{OrgId, Organization, PlanTier};
    use crate::domain::member::UserId;

    fn organization() -> Organization {
        let now = Utc::now();
        Organization {
            id: OrgId("org-1".to_string()),
            name: "Acme Solar".to_string(),
            owner_user_id: UserId("user-1".to_string()),
            plan: PlanTier::Basic,
            monthly_lead_quota: Some(0),
            max_users: None,
            active: true,
            subscription_ends_on: None,
            auto_renew: false,
            renewal_interval: None,
            referral_code: None,
            referred_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn zero_quota_means_unlimited() {
        assert_eq!(organization().lead_quota(), None);
    }

    #[test]
    fn lapsed_subscription_is_inactive_unless_auto_renewing() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 10).expect("date");
        let mut org = organization();
        org.subscription_ends_on = NaiveDate::from_ymd_opt(2026, 5, 1);
        assert!(!org.is_active_on(today));

        org.auto_renew = true;
        assert!(org.is_active_on(today));
    }

    #[test]
    fn plan_tier_parses_case_insensitively() {
        assert_eq!(PlanTier::parse(" PRO "), Some(PlanTier::Pro));
        assert_eq!(PlanTier::parse("platinum"), None);
    }
}
