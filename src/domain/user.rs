use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::{Error, Result};

/// Service plan determining quota limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }

    /// Anything unrecognized falls back to free, matching the replicator's
    /// lenient handling of foreign data.
    pub fn parse_lenient(s: &str) -> Tier {
        match s {
            "pro" => Tier::Pro,
            _ => Tier::Free,
        }
    }

    /// Default (description, video, posting) limits for this tier.
    pub fn quota_limits(&self) -> (i32, i32, i32) {
        match self {
            Tier::Free => (5, 0, 5),
            Tier::Pro => (100, 10, 1000),
        }
    }
}

/// Metered capability bounded by a (used, limit) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    AiDescription,
    AiVideo,
    AutoPosting,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quota {
    pub used: i32,
    pub limit: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaInfo {
    pub ai_description: Quota,
    pub ai_video: Quota,
    pub auto_posting: Quota,
}

/// User entity, owned by the auth service and replicated read-mostly into
/// the user service. The quota counters hold `used <= limit` after every
/// mutation; the tier determines the limits, never the used counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub full_name: String,
    pub tier: Tier,
    pub ai_description_quota_used: i32,
    pub ai_description_quota_limit: i32,
    pub ai_video_quota_used: i32,
    pub ai_video_quota_limit: i32,
    pub auto_posting_quota_used: i32,
    pub auto_posting_quota_limit: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    /// Fresh user with tier-derived default quota limits and zero usage.
    pub fn new(email: String, password_hash: String, full_name: String, now: OffsetDateTime) -> Self {
        let (description, video, posting) = Tier::Free.quota_limits();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            full_name,
            tier: Tier::Free,
            ai_description_quota_used: 0,
            ai_description_quota_limit: description,
            ai_video_quota_used: 0,
            ai_video_quota_limit: video,
            auto_posting_quota_used: 0,
            auto_posting_quota_limit: posting,
            created_at: now,
            updated_at: now,
        }
    }

    fn quota_mut(&mut self, kind: QuotaKind) -> (&mut i32, i32) {
        match kind {
            QuotaKind::AiDescription => {
                (&mut self.ai_description_quota_used, self.ai_description_quota_limit)
            }
            QuotaKind::AiVideo => (&mut self.ai_video_quota_used, self.ai_video_quota_limit),
            QuotaKind::AutoPosting => {
                (&mut self.auto_posting_quota_used, self.auto_posting_quota_limit)
            }
        }
    }

    pub fn quota(&self, kind: QuotaKind) -> Quota {
        match kind {
            QuotaKind::AiDescription => Quota {
                used: self.ai_description_quota_used,
                limit: self.ai_description_quota_limit,
            },
            QuotaKind::AiVideo => Quota {
                used: self.ai_video_quota_used,
                limit: self.ai_video_quota_limit,
            },
            QuotaKind::AutoPosting => Quota {
                used: self.auto_posting_quota_used,
                limit: self.auto_posting_quota_limit,
            },
        }
    }

    pub fn can_use(&self, kind: QuotaKind) -> bool {
        let q = self.quota(kind);
        q.used < q.limit
    }

    /// Enforce-then-increment: fails with `QuotaExceeded` leaving the
    /// counters untouched, otherwise bumps `used` and `updated_at`.
    pub fn use_quota(&mut self, kind: QuotaKind, now: OffsetDateTime) -> Result<()> {
        let (used, limit) = self.quota_mut(kind);
        if *used >= limit {
            return Err(Error::QuotaExceeded);
        }
        *used += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Raise all limits to the pro tier. Used counters are deliberately
    /// left alone; whether an upgrade should also reset usage is an open
    /// business question and current behavior is "no".
    pub fn upgrade_to_pro(&mut self, now: OffsetDateTime) {
        let (description, video, posting) = Tier::Pro.quota_limits();
        self.tier = Tier::Pro;
        self.ai_description_quota_limit = description;
        self.ai_video_quota_limit = video;
        self.auto_posting_quota_limit = posting;
        self.updated_at = now;
    }

    /// Zero all used counters, limits untouched.
    pub fn reset_monthly_quotas(&mut self, now: OffsetDateTime) {
        self.ai_description_quota_used = 0;
        self.ai_video_quota_used = 0;
        self.auto_posting_quota_used = 0;
        self.updated_at = now;
    }

    pub fn quota_info(&self) -> QuotaInfo {
        QuotaInfo {
            ai_description: self.quota(QuotaKind::AiDescription),
            ai_video: self.quota(QuotaKind::AiVideo),
            auto_posting: self.quota(QuotaKind::AutoPosting),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        time::macros::datetime!(2024-06-01 12:00:00 UTC)
    }

    fn free_user() -> User {
        User::new(
            "alice@example.com".into(),
            "hash".into(),
            "Alice".into(),
            now(),
        )
    }

    #[test]
    fn new_user_gets_free_tier_limits() {
        let user = free_user();
        assert_eq!(user.tier, Tier::Free);
        assert_eq!(user.quota(QuotaKind::AiDescription), Quota { used: 0, limit: 5 });
        assert_eq!(user.quota(QuotaKind::AiVideo), Quota { used: 0, limit: 0 });
        assert_eq!(user.quota(QuotaKind::AutoPosting), Quota { used: 0, limit: 5 });
    }

    #[test]
    fn use_quota_increments_until_limit() {
        let mut user = free_user();
        for _ in 0..5 {
            user.use_quota(QuotaKind::AiDescription, now()).expect("within limit");
        }
        assert_eq!(user.ai_description_quota_used, 5);

        let err = user.use_quota(QuotaKind::AiDescription, now()).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded));
        // State unchanged after the failed call.
        assert_eq!(user.ai_description_quota_used, 5);
    }

    #[test]
    fn free_tier_cannot_use_video_at_all() {
        let mut user = free_user();
        assert!(!user.can_use(QuotaKind::AiVideo));
        let err = user.use_quota(QuotaKind::AiVideo, now()).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded));
    }

    #[test]
    fn upgrade_to_pro_raises_limits_keeping_usage() {
        let mut user = free_user();
        for _ in 0..3 {
            user.use_quota(QuotaKind::AiDescription, now()).unwrap();
        }

        user.upgrade_to_pro(now());

        assert_eq!(user.tier, Tier::Pro);
        assert_eq!(user.ai_description_quota_limit, 100);
        assert_eq!(user.ai_video_quota_limit, 10);
        assert_eq!(user.auto_posting_quota_limit, 1000);
        assert_eq!(user.ai_description_quota_used, 3);
        assert!(user.can_use(QuotaKind::AiDescription));
        assert!(user.can_use(QuotaKind::AiVideo));
    }

    #[test]
    fn reset_monthly_quotas_zeroes_usage_only() {
        let mut user = free_user();
        user.use_quota(QuotaKind::AiDescription, now()).unwrap();
        user.use_quota(QuotaKind::AutoPosting, now()).unwrap();

        user.reset_monthly_quotas(now());

        assert_eq!(user.ai_description_quota_used, 0);
        assert_eq!(user.auto_posting_quota_used, 0);
        assert_eq!(user.ai_description_quota_limit, 5);
    }

    #[test]
    fn password_hash_never_serialized() {
        let user = free_user();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("hash"));
        assert!(json.contains("alice@example.com"));
        assert!(json.contains("\"tier\":\"free\""));
    }

    #[test]
    fn tier_parse_lenient_defaults_to_free() {
        assert_eq!(Tier::parse_lenient("pro"), Tier::Pro);
        assert_eq!(Tier::parse_lenient("free"), Tier::Free);
        assert_eq!(Tier::parse_lenient("enterprise"), Tier::Free);
    }
}
