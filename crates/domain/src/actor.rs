//! Who is calling the engine.

use common::UserId;
use serde::{Deserialize, Serialize};

/// The party on whose behalf an operation runs.
///
/// Customers act on their own orders only; admins and the engine itself act
/// on any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    Customer(UserId),
    Admin,
    /// Internal follow-up work such as the cancellation triggered by a refund.
    System,
}

impl Actor {
    /// Returns true for admins and the engine itself.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Actor::Admin | Actor::System)
    }

    /// Returns true if this actor may read or act on an order owned by `owner`.
    pub fn can_access(&self, owner: UserId) -> bool {
        match self {
            Actor::Customer(user_id) => *user_id == owner,
            Actor::Admin | Actor::System => true,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::Customer(user_id) => Some(*user_id),
            Actor::Admin | Actor::System => None,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Actor::Customer(_) => "customer",
            Actor::Admin => "admin",
            Actor::System => "system",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Customer(user_id) => write!(f, "customer:{user_id}"),
            other => write!(f, "{}", other.role()),
        }
    }
}
