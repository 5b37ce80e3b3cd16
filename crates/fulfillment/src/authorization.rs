//! Role checks applied at the engine boundary.

use common::UserId;
use domain::{Actor, Order};

use crate::error::{FulfillmentError, Result};

/// Operations an actor may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PlaceOrder,
    ViewOrder,
    Cancel,
    OverrideCancel,
    Transition,
    Capture,
    Refund,
    Reconcile,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::PlaceOrder => "place orders for this user",
            Action::ViewOrder => "view this order",
            Action::Cancel => "cancel this order",
            Action::OverrideCancel => "cancel a paid order",
            Action::Transition => "change order status",
            Action::Capture => "pay for this order",
            Action::Refund => "refund payments",
            Action::Reconcile => "reconcile payments",
        }
    }
}

/// Fails with `Forbidden` unless `actor` may perform `action` for `owner`.
pub fn authorize(actor: &Actor, action: Action, owner: UserId) -> Result<()> {
    let allowed = match action {
        Action::PlaceOrder | Action::ViewOrder | Action::Cancel | Action::Capture => {
            actor.can_access(owner)
        }
        Action::OverrideCancel | Action::Transition | Action::Refund | Action::Reconcile => {
            actor.is_privileged()
        }
    };

    if allowed {
        Ok(())
    } else {
        tracing::warn!(%actor, action = action.as_str(), "forbidden");
        Err(FulfillmentError::forbidden(actor, action.as_str()))
    }
}

/// Shorthand for [`authorize`] against an order's owner.
pub fn authorize_order(actor: &Actor, action: Action, order: &Order) -> Result<()> {
    authorize(actor, action, order.user_id())
}
