use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::organization::OrgId;
use crate::domain::quote::QuoteId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

impl CustomerId {
    /// Customers are unique per (org, phone); deriving the id from that pair makes a
    /// second create for the same phone collide instead of duplicating.
    pub fn for_phone(org_id: &OrgId, phone: &str) -> Self {
        let key = format!("{}:{}", org_id.as_str(), normalize_phone(phone));
        let digest = blake3::hash(key.as_bytes()).to_hex();
        Self(format!("cus_{}", &digest.as_str()[..24]))
    }

    /// Used when the source quote carries no phone number.
    pub fn for_quote(quote_id: &QuoteId) -> Self {
        Self(format!("cus_q_{}", quote_id.as_str()))
    }
}

/// Keeps digits and a leading `+`, so `050-123 4567` and `0501234567` match.
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(char::is_ascii_digit));
    normalized
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub org_id: OrgId,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub source_quote_id: Option<QuoteId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewCustomer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<CustomerId>,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub source_quote_id: Option<QuoteId>,
}

#[cfg(test)]
mod tests {
    use super::{normalize_phone, CustomerId};
    use crate::domain::organization::OrgId;

    #[test]
    fn phone_formatting_does_not_change_identity() {
        let org = OrgId("org-1".to_string());
        assert_eq!(CustomerId::for_phone(&org, "050-123 4567"), CustomerId::for_phone(&org, "0501234567"));
        assert_eq!(normalize_phone(" +972 50-1234567 "), "+972501234567");
    }

    #[test]
    fn identity_is_scoped_by_organization() {
        let a = CustomerId::for_phone(&OrgId("org-a".to_string()), "0501234567");
        let b = CustomerId::for_phone(&OrgId("org-b".to_string()), "0501234567");
        assert_ne!(a, b);
    }
}
