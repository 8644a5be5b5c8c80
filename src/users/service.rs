use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{QuotaKind, User};
use crate::errors::{Error, Result};
use crate::events::EventPublisher;

use super::repo::UserStore;

/// Application service over the user replica: quota enforcement and tier
/// changes. Quota checks are synchronous against the local store; only
/// the resulting state change is announced over the event channel.
pub struct UserService {
    store: Arc<dyn UserStore>,
    publisher: Arc<EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        publisher: Arc<EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        self.store.find_by_id(id).await?.ok_or(Error::UserNotFound)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.store
            .find_by_email(email)
            .await?
            .ok_or(Error::UserNotFound)
    }

    /// Enforce-then-increment one quota counter. The increment happens as
    /// a single conditional update in the store, so concurrent calls can
    /// never exceed the limit. The quota-updated event is fire-and-forget.
    pub async fn use_quota(&self, id: Uuid, kind: QuotaKind) -> Result<User> {
        let user = self.store.use_quota(id, kind, self.clock.now()).await?;
        self.publisher
            .user_quota_updated(user.id, user.quota_info())
            .await;
        Ok(user)
    }

    /// Apply pro-tier limits to the local user. Used counters are kept.
    pub async fn upgrade_to_pro(&self, id: Uuid) -> Result<User> {
        let mut user = self.get_user(id).await?;
        user.upgrade_to_pro(self.clock.now());
        self.store.update(&user).await?;
        info!(user_id = %id, "user upgraded to pro");
        Ok(user)
    }

    /// Service-wide monthly reset of all used counters.
    pub async fn reset_monthly_quotas(&self) -> Result<u64> {
        let affected = self.store.reset_all_quotas(self.clock.now()).await?;
        info!(affected, "monthly quotas reset");
        Ok(affected)
    }
}
