use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteItem;
use crate::errors::DomainError;

/// VAT rate included in every quote total (18%).
pub const VAT_RATE: Decimal = Decimal::from_parts(18, 0, 0, false, 2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

pub fn price_items(items: &[QuoteItem]) -> Decimal {
    items.iter().map(|item| item.quantity * item.unit_price).sum()
}

/// VAT contained in a VAT-inclusive total.
pub fn vat_portion(total: Decimal, rate: Decimal) -> Decimal {
    total / (Decimal::ONE + rate) * rate
}

/// Derives subtotal, total and VAT from line items. Client-supplied totals are never
/// trusted; every save goes through here.
pub fn compute_totals(items: &[QuoteItem], discount: Decimal) -> Result<QuoteTotals, DomainError> {
    for item in items {
        if item.quantity.is_sign_negative() || item.unit_price.is_sign_negative() {
            return Err(DomainError::InvariantViolation(format!(
                "line item `{}` has a negative quantity or price",
                item.name
            )));
        }
    }
    if discount.is_sign_negative() {
        return Err(DomainError::InvariantViolation("discount cannot be negative".to_string()));
    }

    let subtotal = price_items(items);
    if discount > subtotal {
        return Err(DomainError::InvariantViolation(format!(
            "discount {discount} exceeds the subtotal {subtotal}"
        )));
    }

    let total = subtotal - discount;
    Ok(QuoteTotals { subtotal, discount, vat: vat_portion(total, VAT_RATE), total })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{compute_totals, vat_portion, VAT_RATE};
    use crate::domain::quote::QuoteItem;

    fn item(quantity: i64, price_cents: i64) -> QuoteItem {
        QuoteItem {
            name: "Solar panel".to_string(),
            quantity: Decimal::from(quantity),
            unit_price: Decimal::new(price_cents, 2),
        }
    }

    #[test]
    fn vat_rate_is_eighteen_percent() {
        assert_eq!(VAT_RATE, Decimal::new(18, 2));
    }

    #[test]
    fn totals_follow_the_derivation_for_a_range_of_inputs() {
        for quantity in [0_i64, 1, 3, 17] {
            for price in [0_i64, 99, 12_500, 1_000_000] {
                for discount_cents in [0_i64, 50, 99] {
                    let items = vec![item(quantity, price), item(2, 4_050)];
                    let subtotal = Decimal::from(quantity) * Decimal::new(price, 2)
                        + Decimal::from(2) * Decimal::new(4_050, 2);
                    let discount = Decimal::new(discount_cents, 2);

                    let totals = compute_totals(&items, discount).expect("valid inputs");
                    assert_eq!(totals.subtotal, subtotal);
                    assert_eq!(totals.total, subtotal - discount);
                    assert_eq!(
                        totals.vat,
                        totals.total / (Decimal::ONE + VAT_RATE) * VAT_RATE
                    );
                }
            }
        }
    }

    #[test]
    fn vat_of_inclusive_total() {
        let vat = vat_portion(Decimal::from(1180), VAT_RATE).round_dp(2);
        assert_eq!(vat, Decimal::from(180));
    }

    #[test]
    fn negative_inputs_are_rejected() {
        assert!(compute_totals(&[item(-1, 100)], Decimal::ZERO).is_err());
        assert!(compute_totals(&[item(1, 100)], Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn discount_larger_than_subtotal_is_rejected() {
        assert!(compute_totals(&[item(1, 100)], Decimal::from(2)).is_err());
    }
}
