//! Account status lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::UserId;
use domain::AccountStatus;
use tokio::sync::RwLock;

use crate::error::Result;

/// Source of account status.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Returns `None` for unknown users.
    async fn account_status(&self, user_id: UserId) -> Result<Option<AccountStatus>>;
}

/// In-memory account directory.
///
/// Strict directories only know registered users. Permissive ones treat
/// every unknown user as active, for deployments where accounts live
/// elsewhere.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountDirectory {
    accounts: Arc<RwLock<HashMap<UserId, AccountStatus>>>,
    unknown: Option<AccountStatus>,
}

impl InMemoryAccountDirectory {
    /// A directory that only knows registered users.
    pub fn strict() -> Self {
        Self::default()
    }

    /// A directory that reports unknown users as active.
    pub fn permissive() -> Self {
        Self {
            accounts: Arc::default(),
            unknown: Some(AccountStatus::Active),
        }
    }

    pub async fn set_status(&self, user_id: UserId, status: AccountStatus) {
        self.accounts.write().await.insert(user_id, status);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn account_status(&self, user_id: UserId) -> Result<Option<AccountStatus>> {
        Ok(self
            .accounts
            .read()
            .await
            .get(&user_id)
            .copied()
            .or(self.unknown))
    }
}
