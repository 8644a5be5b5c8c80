//! Auth/session core for the postline platform.
//!
//! Two independently-owned services share this crate: the auth service
//! owns users, sessions and tokens; the user service holds an eventually
//! consistent replica of each user's tier and quota state, kept in sync
//! by asynchronous events. Session validation and quota checks are always
//! synchronous against the local store; only state-change announcements
//! cross the event channel, fire-and-forget.

pub mod auth;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod users;

pub use errors::{Error, Result};
