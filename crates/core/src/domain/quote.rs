use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;
use crate::domain::organization::OrgId;
use crate::errors::DomainError;
use crate::pricing::{compute_totals, QuoteTotals};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    #[default]
    Draft,
    Sent,
    Approved,
    Cancelled,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Approved => "approved",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteItem {
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub org_id: OrgId,
    #[serde(default)]
    pub serial_prefix: String,
    #[serde(default)]
    pub serial_number: u64,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub items: Vec<QuoteItem>,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub subtotal: Decimal,
    #[serde(default)]
    pub vat: Decimal,
    #[serde(default)]
    pub total: Decimal,
    #[serde(default)]
    pub status: QuoteStatus,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub payment_link: Option<String>,
    #[serde(default)]
    pub invoice_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn serial(&self) -> String {
        format!("{}{}", self.serial_prefix, self.serial_number)
    }

    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        self.status == next
            || matches!(
                (self.status, next),
                (QuoteStatus::Draft, QuoteStatus::Sent)
                    | (QuoteStatus::Sent, QuoteStatus::Draft)
                    | (QuoteStatus::Draft | QuoteStatus::Sent, QuoteStatus::Approved)
                    | (QuoteStatus::Draft | QuoteStatus::Sent, QuoteStatus::Cancelled)
            )
    }

    pub fn transition_to(&mut self, next: QuoteStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidQuoteTransition { from: self.status, to: next })
    }
}

/// Editable quote fields as submitted by the quote form. Totals are not part of the
/// draft; they are always derived from the items.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub customer_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub items: Vec<QuoteItem>,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<QuoteStatus>,
}

impl QuoteDraft {
    pub fn totals(&self) -> Result<QuoteTotals, DomainError> {
        if self.items.is_empty() {
            return Err(DomainError::InvariantViolation(
                "a quote requires at least one line item".to_string(),
            ));
        }
        compute_totals(&self.items, self.discount)
    }
}

/// Fully priced quote ready to be stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewQuote {
    pub serial_prefix: String,
    pub serial_number: u64,
    pub lead_id: Option<LeadId>,
    pub customer_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub items: Vec<QuoteItem>,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
    pub status: QuoteStatus,
    pub valid_until: Option<NaiveDate>,
}

impl NewQuote {
    pub fn priced(
        draft: QuoteDraft,
        serial_prefix: impl Into<String>,
        serial_number: u64,
        lead_id: Option<LeadId>,
    ) -> Result<Self, DomainError> {
        let status = draft.status.unwrap_or_default();
        if status.is_terminal() {
            return Err(DomainError::InvariantViolation(format!(
                "a quote cannot be created as {}; close it after creating it",
                status.as_str()
            )));
        }
        let totals = draft.totals()?;
        Ok(Self {
            serial_prefix: serial_prefix.into(),
            serial_number,
            lead_id,
            customer_name: draft.customer_name,
            phone: draft.phone,
            email: draft.email,
            address: draft.address,
            items: draft.items,
            discount: totals.discount,
            subtotal: totals.subtotal,
            vat: totals.vat,
            total: totals.total,
            status,
            valid_until: draft.valid_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{NewQuote, Quote, QuoteDraft, QuoteId, QuoteItem, QuoteStatus};
    use crate::domain::organization::OrgId;

    fn quote(status: QuoteStatus) -> Quote {
        let now = Utc::now();
        Quote {
            id: QuoteId("q-1".to_string()),
            org_id: OrgId("org-1".to_string()),
            serial_prefix: "5".to_string(),
            serial_number: 1007,
            lead_id: None,
            customer_name: "Noa Levi".to_string(),
            phone: None,
            email: None,
            address: None,
            items: Vec::new(),
            discount: Decimal::ZERO,
            subtotal: Decimal::ZERO,
            vat: Decimal::ZERO,
            total: Decimal::ZERO,
            status,
            valid_until: None,
            payment_link: None,
            invoice_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn allows_valid_lifecycle_transition() {
        let mut quote = quote(QuoteStatus::Draft);
        quote.transition_to(QuoteStatus::Sent).expect("draft->sent");
        quote.transition_to(QuoteStatus::Approved).expect("sent->approved");
        assert_eq!(quote.status, QuoteStatus::Approved);
    }

    #[test]
    fn terminal_states_cannot_be_left() {
        let mut quote = quote(QuoteStatus::Cancelled);
        let error = quote.transition_to(QuoteStatus::Approved).expect_err("cancelled is final");
        assert!(matches!(error, crate::errors::DomainError::InvalidQuoteTransition { .. }));
    }

    #[test]
    fn serial_joins_prefix_and_number() {
        assert_eq!(quote(QuoteStatus::Draft).serial(), "51007");
    }

    #[test]
    fn draft_without_items_is_rejected() {
        assert!(QuoteDraft::default().totals().is_err());

        let draft = QuoteDraft {
            customer_name: "Noa".to_string(),
            items: vec![QuoteItem {
                name: "Inverter".to_string(),
                quantity: Decimal::ONE,
                unit_price: Decimal::from(1000),
            }],
            ..QuoteDraft::default()
        };
        assert_eq!(draft.totals().expect("totals").total, Decimal::from(1000));
    }

    #[test]
    fn new_quotes_cannot_start_closed() {
        let draft = |status| QuoteDraft {
            customer_name: "Noa".to_string(),
            items: vec![QuoteItem { name: "Panel".to_string(), quantity: Decimal::ONE, unit_price: Decimal::TEN }],
            status: Some(status),
            ..QuoteDraft::default()
        };

        assert!(NewQuote::priced(draft(QuoteStatus::Approved), "5", 1, None).is_err());
        assert!(NewQuote::priced(draft(QuoteStatus::Cancelled), "5", 1, None).is_err());
        let sent = NewQuote::priced(draft(QuoteStatus::Sent), "5", 1, None).expect("sent");
        assert_eq!(sent.total, Decimal::TEN);
    }
}
