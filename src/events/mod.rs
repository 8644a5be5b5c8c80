pub mod bus;
pub mod durable;
pub mod event;
pub mod memory;
pub mod publisher;

pub use bus::{handler_fn, EventBus, EventHandler};
pub use durable::{BrokerTransport, DurableEventBus, InProcessBroker};
pub use event::{
    Event, QuotaData, QuotaInfoData, UserQuotaUpdatedData, UserRegisteredData,
    UserTierUpgradedData, EVENT_SCHEMA_VERSION, USER_EVENTS_TOPIC, USER_QUOTA_UPDATED,
    USER_REGISTERED, USER_TIER_UPGRADED,
};
pub use memory::MemoryEventBus;
pub use publisher::EventPublisher;
