use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Payment status as tracked on the order.
///
/// ```text
/// Pending ──► Paid ──► PartiallyRefunded ──► Refunded
///               └─────────────────────────────┘
/// ```
///
/// A declined capture leaves the order `Pending` so the customer can retry;
/// the decline itself is recorded on the [`Payment`](crate::Payment) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    PartiallyRefunded,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Paid,
        PaymentStatus::PartiallyRefunded,
        PaymentStatus::Refunded,
    ];

    /// Returns true if a capture may be attempted.
    pub fn can_capture(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }

    /// Returns true if money is left to refund.
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseError::new("payment status", s))
    }
}

/// Status of a single charge attempt against the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Sent to the gateway, outcome not yet known.
    #[default]
    Pending,
    Completed,
    Failed,
    PartiallyRefunded,
    Refunded,
}

impl ChargeStatus {
    pub const ALL: [ChargeStatus; 5] = [
        ChargeStatus::Pending,
        ChargeStatus::Completed,
        ChargeStatus::Failed,
        ChargeStatus::PartiallyRefunded,
        ChargeStatus::Refunded,
    ];

    /// Returns true if the gateway took the money.
    pub fn is_captured(&self) -> bool {
        matches!(
            self,
            ChargeStatus::Completed | ChargeStatus::PartiallyRefunded | ChargeStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::Completed => "completed",
            ChargeStatus::Failed => "failed",
            ChargeStatus::PartiallyRefunded => "partially_refunded",
            ChargeStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChargeStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChargeStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseError::new("charge status", s))
    }
}
