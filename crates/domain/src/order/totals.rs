//! Order totals and the pricing policy that produces them.

use common::Money;
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

use super::OrderLine;

/// Rounding tolerance between a stored total and the canonical formula.
pub const TOTAL_TOLERANCE: Money = Money::from_cents(1);

/// Tax and shipping rules applied when an order is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Tax rate in basis points (2000 = 20%).
    pub tax_rate_bps: u32,
    /// Flat shipping fee.
    pub shipping_fee: Money,
    /// Subtotal at or above which shipping is free.
    pub free_shipping_threshold: Option<Money>,
}

impl PricingPolicy {
    pub fn tax_for(&self, subtotal: Money) -> Money {
        subtotal.apply_basis_points(self.tax_rate_bps)
    }

    pub fn shipping_for(&self, subtotal: Money) -> Money {
        match self.free_shipping_threshold {
            Some(threshold) if subtotal >= threshold => Money::zero(),
            _ => self.shipping_fee,
        }
    }
}

/// Monetary totals of an order.
///
/// `total = subtotal + tax + shipping - discount`, and `subtotal` is the sum
/// of the line totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
}

impl OrderTotals {
    /// Computes the totals for `lines` under `policy`.
    pub fn compute(
        lines: &[OrderLine],
        policy: &PricingPolicy,
        discount: Money,
    ) -> Result<Self, OrderError> {
        let subtotal: Money = lines.iter().map(OrderLine::line_total).sum();
        let tax = policy.tax_for(subtotal);
        let shipping = policy.shipping_for(subtotal);
        let gross = subtotal + tax + shipping;

        if discount.is_negative() || (discount.is_positive() && discount >= gross) {
            return Err(OrderError::InvalidDiscount { discount });
        }

        // A zero total could never be captured.
        let total = gross - discount;
        if !total.is_positive() {
            return Err(OrderError::ZeroTotal);
        }

        Ok(Self {
            subtotal,
            tax,
            shipping,
            discount,
            total,
        })
    }

    /// The canonical total for the stored components.
    pub fn expected_total(&self) -> Money {
        self.subtotal + self.tax + self.shipping - self.discount
    }

    /// Checks the line-sum and total-formula invariants.
    pub fn verify(&self, lines: &[OrderLine]) -> Result<(), OrderError> {
        let line_sum: Money = lines.iter().map(OrderLine::line_total).sum();
        if line_sum != self.subtotal {
            return Err(OrderError::LineSumMismatch {
                subtotal: self.subtotal,
                line_sum,
            });
        }

        let expected = self.expected_total();
        if expected.abs_diff(self.total) > TOTAL_TOLERANCE {
            return Err(OrderError::TotalsMismatch {
                expected,
                actual: self.total,
            });
        }

        Ok(())
    }
}
