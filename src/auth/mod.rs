pub mod password;
pub mod repo;
pub mod service;
pub mod session;
pub mod tokens;

pub use repo::{MemorySessionStore, PgSessionStore};
pub use service::AuthService;
pub use session::{Session, SessionManager, SessionStore};
pub use tokens::{Claims, TokenIssuer, TokenKind, TokenPair};
