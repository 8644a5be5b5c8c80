use std::sync::Arc;

use async_trait::async_trait;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{Tier, User};
use crate::events::{
    Event, EventBus, EventHandler, UserQuotaUpdatedData, UserRegisteredData,
    UserTierUpgradedData, USER_EVENTS_TOPIC, USER_QUOTA_UPDATED, USER_REGISTERED,
    USER_TIER_UPGRADED,
};

use super::repo::UserStore;

/// Applies user events from the auth service to the local replica.
///
/// Delivery may be duplicated or reordered, so every apply is idempotent:
/// registration is an upsert, and the other handlers are plain overwrites
/// of the affected fields. A failed apply is logged by the bus and the
/// event dropped; the consuming loop keeps running either way.
pub struct UserReplicator {
    store: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
}

impl UserReplicator {
    pub fn new(store: Arc<dyn UserStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Register this replicator on the user-events topic.
    pub async fn attach(self: Arc<Self>, bus: &dyn EventBus) -> anyhow::Result<()> {
        bus.subscribe(USER_EVENTS_TOPIC, self).await
    }

    async fn apply_registered(&self, event: &Event) -> anyhow::Result<()> {
        let data: UserRegisteredData = event.decode()?;
        let user_id = Uuid::parse_str(&data.user_id)?;
        let tier = Tier::parse_lenient(&data.tier);
        let created_at = parse_rfc3339(&data.created_at, self.clock.now());

        let (description, video, posting) = tier.quota_limits();
        let replica = User {
            id: user_id,
            email: data.email,
            // The replica never holds credentials.
            password_hash: String::new(),
            full_name: data.full_name,
            tier,
            ai_description_quota_used: 0,
            ai_description_quota_limit: description,
            ai_video_quota_used: 0,
            ai_video_quota_limit: video,
            auto_posting_quota_used: 0,
            auto_posting_quota_limit: posting,
            created_at,
            updated_at: created_at,
        };
        self.store.upsert(&replica).await?;
        info!(user_id = %user_id, tier = tier.as_str(), "user replica created");
        Ok(())
    }

    async fn apply_tier_upgraded(&self, event: &Event) -> anyhow::Result<()> {
        let data: UserTierUpgradedData = event.decode()?;
        let user_id = Uuid::parse_str(&data.user_id)?;
        let mut user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no replica for user {user_id}"))?;

        user.upgrade_to_pro(self.clock.now());
        self.store.update(&user).await?;
        info!(user_id = %user_id, from = %data.old_tier, to = %data.new_tier, "replica tier upgraded");
        Ok(())
    }

    async fn apply_quota_updated(&self, event: &Event) -> anyhow::Result<()> {
        let data: UserQuotaUpdatedData = event.decode()?;
        let user_id = Uuid::parse_str(&data.user_id)?;
        let mut user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no replica for user {user_id}"))?;

        user.ai_description_quota_used = data.quotas.ai_description.used;
        user.ai_description_quota_limit = data.quotas.ai_description.limit;
        user.ai_video_quota_used = data.quotas.ai_video.used;
        user.ai_video_quota_limit = data.quotas.ai_video.limit;
        user.auto_posting_quota_used = data.quotas.auto_posting.used;
        user.auto_posting_quota_limit = data.quotas.auto_posting.limit;
        user.updated_at = self.clock.now();
        self.store.update(&user).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for UserReplicator {
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        match event.event_type.as_str() {
            USER_REGISTERED => self.apply_registered(&event).await,
            USER_TIER_UPGRADED => self.apply_tier_upgraded(&event).await,
            USER_QUOTA_UPDATED => self.apply_quota_updated(&event).await,
            other => {
                warn!(event_type = other, "ignoring unknown event type");
                Ok(())
            }
        }
    }
}

fn parse_rfc3339(s: &str, fallback: OffsetDateTime) -> OffsetDateTime {
    OffsetDateTime::parse(s, &Rfc3339).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::QuotaKind;
    use crate::events::{QuotaData, QuotaInfoData};
    use crate::users::repo::MemoryUserStore;

    fn replicator() -> (Arc<UserReplicator>, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        let clock = Arc::new(ManualClock::start_of_2024());
        (Arc::new(UserReplicator::new(store.clone(), clock)), store)
    }

    fn registered_event(user_id: Uuid, tier: &str) -> Event {
        Event::new(
            USER_REGISTERED,
            "auth-service",
            &UserRegisteredData {
                user_id: user_id.to_string(),
                email: "ivy@example.com".into(),
                full_name: "Ivy".into(),
                tier: tier.into(),
                created_at: "2024-06-01T12:00:00Z".into(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn registered_event_creates_replica_with_free_limits() {
        let (replicator, store) = replicator();
        let user_id = Uuid::new_v4();

        replicator.handle(registered_event(user_id, "free")).await.unwrap();

        let user = store.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.email, "ivy@example.com");
        assert_eq!(user.tier, Tier::Free);
        assert_eq!(user.ai_description_quota_limit, 5);
        assert_eq!(user.ai_video_quota_limit, 0);
        assert_eq!(user.auto_posting_quota_limit, 5);
        assert!(user.password_hash.is_empty());
    }

    #[tokio::test]
    async fn registered_event_with_pro_tier_uses_pro_limits() {
        let (replicator, store) = replicator();
        let user_id = Uuid::new_v4();

        replicator.handle(registered_event(user_id, "pro")).await.unwrap();

        let user = store.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.tier, Tier::Pro);
        assert_eq!(user.ai_description_quota_limit, 100);
    }

    #[tokio::test]
    async fn duplicate_registered_event_is_applied_idempotently() {
        let (replicator, store) = replicator();
        let user_id = Uuid::new_v4();
        let event = registered_event(user_id, "free");

        replicator.handle(event.clone()).await.unwrap();
        // Redelivery must not error the handler or corrupt the replica.
        replicator.handle(event).await.unwrap();

        let user = store.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.ai_description_quota_limit, 5);
    }

    #[tokio::test]
    async fn tier_upgraded_event_applies_pro_limits_keeping_usage() {
        let (replicator, store) = replicator();
        let user_id = Uuid::new_v4();
        replicator.handle(registered_event(user_id, "free")).await.unwrap();
        {
            let mut user = store.find_by_id(user_id).await.unwrap().unwrap();
            for _ in 0..3 {
                user.use_quota(
                    QuotaKind::AiDescription,
                    time::macros::datetime!(2024-06-02 00:00:00 UTC),
                )
                .unwrap();
            }
            store.update(&user).await.unwrap();
        }

        let event = Event::new(
            USER_TIER_UPGRADED,
            "auth-service",
            &UserTierUpgradedData {
                user_id: user_id.to_string(),
                old_tier: "free".into(),
                new_tier: "pro".into(),
                upgraded_at: "2024-06-03T00:00:00Z".into(),
            },
        )
        .unwrap();
        replicator.handle(event).await.unwrap();

        let user = store.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.tier, Tier::Pro);
        assert_eq!(user.ai_description_quota_limit, 100);
        assert_eq!(user.ai_description_quota_used, 3);
    }

    #[tokio::test]
    async fn tier_upgrade_for_missing_replica_fails_the_handler() {
        let (replicator, _) = replicator();
        let event = Event::new(
            USER_TIER_UPGRADED,
            "auth-service",
            &UserTierUpgradedData {
                user_id: Uuid::new_v4().to_string(),
                old_tier: "free".into(),
                new_tier: "pro".into(),
                upgraded_at: "2024-06-03T00:00:00Z".into(),
            },
        )
        .unwrap();
        // The bus logs and drops this; the handler just reports the error.
        assert!(replicator.handle(event).await.is_err());
    }

    #[tokio::test]
    async fn quota_updated_event_overwrites_counters() {
        let (replicator, store) = replicator();
        let user_id = Uuid::new_v4();
        replicator.handle(registered_event(user_id, "free")).await.unwrap();

        let event = Event::new(
            USER_QUOTA_UPDATED,
            "user-service",
            &UserQuotaUpdatedData {
                user_id: user_id.to_string(),
                quotas: QuotaInfoData {
                    ai_description: QuotaData { used: 4, limit: 5 },
                    ai_video: QuotaData { used: 0, limit: 0 },
                    auto_posting: QuotaData { used: 2, limit: 5 },
                },
                updated_at: "2024-06-03T00:00:00Z".into(),
            },
        )
        .unwrap();
        replicator.handle(event).await.unwrap();

        let user = store.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.ai_description_quota_used, 4);
        assert_eq!(user.auto_posting_quota_used, 2);
    }

    #[tokio::test]
    async fn unknown_event_type_is_ignored() {
        let (replicator, _) = replicator();
        let event = Event::new("user.deleted", "auth-service", &()).unwrap();
        assert!(replicator.handle(event).await.is_ok());
    }

    #[tokio::test]
    async fn undecodable_payload_fails_the_handler() {
        let (replicator, _) = replicator();
        let event = Event::new(USER_REGISTERED, "auth-service", &"garbage").unwrap();
        assert!(replicator.handle(event).await.is_err());
    }
}
