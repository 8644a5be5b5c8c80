pub mod replicator;
pub mod repo;
pub mod service;

pub use replicator::UserReplicator;
pub use repo::{MemoryUserStore, PgUserStore, UserStore};
pub use service::UserService;
