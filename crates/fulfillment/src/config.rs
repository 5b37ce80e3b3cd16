use std::time::Duration;

use domain::{OrderStatus, PricingPolicy};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on any single payment gateway call.
    pub gateway_timeout: Duration,
    /// Upper bound on delivering one notification.
    pub notification_timeout: Duration,
    /// How many order numbers to try before giving up.
    pub order_number_attempts: u32,
    /// How often to reload and retry after losing an optimistic version check.
    pub update_attempts: u32,
    /// ISO currency code for captures.
    pub currency: String,
    pub pricing: PricingPolicy,
    /// Order statuses in which payment may be captured.
    pub capturable_statuses: Vec<OrderStatus>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(10),
            notification_timeout: Duration::from_secs(2),
            order_number_attempts: 5,
            update_attempts: 3,
            currency: "EUR".to_string(),
            pricing: PricingPolicy::default(),
            capturable_statuses: vec![OrderStatus::Pending],
        }
    }
}
