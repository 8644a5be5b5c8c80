use std::sync::Arc;

use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::domain::{QuotaInfo, Tier, User};

use super::bus::EventBus;
use super::event::{
    Event, QuotaData, QuotaInfoData, UserQuotaUpdatedData, UserRegisteredData,
    UserTierUpgradedData, USER_EVENTS_TOPIC, USER_QUOTA_UPDATED, USER_REGISTERED,
    USER_TIER_UPGRADED,
};

/// Maps domain occurrences to canonical wire events and fires them at the
/// user-events topic. Every publish is fire-and-forget: a failure is
/// logged and never rolls back the state change that triggered it.
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    source: String,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }

    async fn fire(&self, event_type: &str, data: &impl serde::Serialize) {
        let event = match Event::new(event_type, &self.source, data) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, event_type, "failed to build event, dropping");
                return;
            }
        };
        match self.bus.publish(USER_EVENTS_TOPIC, event).await {
            Ok(()) => info!(event_type, "event published"),
            Err(e) => warn!(error = %e, event_type, "event publish failed, dropping"),
        }
    }

    pub async fn user_registered(&self, user: &User) {
        let data = UserRegisteredData {
            user_id: user.id.to_string(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            tier: user.tier.as_str().to_string(),
            created_at: rfc3339(user.created_at),
        };
        self.fire(USER_REGISTERED, &data).await;
    }

    pub async fn user_tier_upgraded(&self, user_id: uuid::Uuid, old_tier: Tier, new_tier: Tier) {
        let data = UserTierUpgradedData {
            user_id: user_id.to_string(),
            old_tier: old_tier.as_str().to_string(),
            new_tier: new_tier.as_str().to_string(),
            upgraded_at: rfc3339(time::OffsetDateTime::now_utc()),
        };
        self.fire(USER_TIER_UPGRADED, &data).await;
    }

    pub async fn user_quota_updated(&self, user_id: uuid::Uuid, quotas: QuotaInfo) {
        let data = UserQuotaUpdatedData {
            user_id: user_id.to_string(),
            quotas: QuotaInfoData {
                ai_description: QuotaData {
                    used: quotas.ai_description.used,
                    limit: quotas.ai_description.limit,
                },
                ai_video: QuotaData {
                    used: quotas.ai_video.used,
                    limit: quotas.ai_video.limit,
                },
                auto_posting: QuotaData {
                    used: quotas.auto_posting.used,
                    limit: quotas.auto_posting.limit,
                },
            },
            updated_at: rfc3339(time::OffsetDateTime::now_utc()),
        };
        self.fire(USER_QUOTA_UPDATED, &data).await;
    }
}

fn rfc3339(t: time::OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}
