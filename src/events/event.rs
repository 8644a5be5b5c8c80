use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Topic carrying all user lifecycle events between services.
pub const USER_EVENTS_TOPIC: &str = "user-events";

pub const USER_REGISTERED: &str = "user.registered";
pub const USER_TIER_UPGRADED: &str = "user.tier.upgraded";
pub const USER_QUOTA_UPDATED: &str = "user.quota.updated";

pub const EVENT_SCHEMA_VERSION: &str = "1.0";

/// Canonical wire envelope. The payload is opaque JSON bytes typed by the
/// `event_type` tag; consumers ignore tags they do not know.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub data: Vec<u8>,
}

impl Event {
    pub fn new<T: Serialize>(
        event_type: &str,
        source: &str,
        data: &T,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            version: EVENT_SCHEMA_VERSION.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            data: serde_json::to_vec(data)?,
        })
    }

    /// Decode the payload according to the caller's expectation of the
    /// type tag. Payloads that do not deserialize are a handler error,
    /// not a bus error.
    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRegisteredData {
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub tier: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserTierUpgradedData {
    pub user_id: String,
    pub old_tier: String,
    pub new_tier: String,
    pub upgraded_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaData {
    pub used: i32,
    pub limit: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaInfoData {
    pub ai_description: QuotaData,
    pub ai_video: QuotaData,
    pub auto_posting: QuotaData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserQuotaUpdatedData {
    pub user_id: String,
    pub quotas: QuotaInfoData,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_typed_payload() {
        let data = UserRegisteredData {
            user_id: Uuid::new_v4().to_string(),
            email: "bob@example.com".into(),
            full_name: "Bob".into(),
            tier: "free".into(),
            created_at: "2024-06-01T12:00:00Z".into(),
        };
        let event = Event::new(USER_REGISTERED, "auth-service", &data).unwrap();

        assert_eq!(event.event_type, USER_REGISTERED);
        assert_eq!(event.source, "auth-service");
        assert_eq!(event.version, EVENT_SCHEMA_VERSION);

        let decoded: UserRegisteredData = event.decode().unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn envelope_json_uses_type_field_name() {
        let event = Event::new(USER_TIER_UPGRADED, "auth-service", &()).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], USER_TIER_UPGRADED);
        assert!(json["id"].is_string());
    }

    #[test]
    fn decode_rejects_mismatched_payload() {
        let event = Event::new(USER_REGISTERED, "auth-service", &"just a string").unwrap();
        assert!(event.decode::<UserRegisteredData>().is_err());
    }
}
