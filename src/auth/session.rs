use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::{Error, Result};

use super::tokens::{new_session_id, TokenIssuer, TokenKind, TokenPair};

/// One authenticated client context. Valid iff `now < expires_at`; expiry
/// is checked lazily at validation time, never by a background sweep, so
/// expired rows may linger until revoked.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub refresh_token: String,
    pub user_agent: String,
    pub ip_address: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Durable key-value store of session records, keyed by session id and by
/// owning user. Deletes are idempotent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> anyhow::Result<()>;
    async fn get(&self, session_id: &str) -> anyhow::Result<Option<Session>>;
    async fn delete(&self, session_id: &str) -> anyhow::Result<()>;
    async fn delete_for_user(&self, user_id: Uuid) -> anyhow::Result<()>;
    async fn list_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Session>>;
}

/// Orchestrates the token issuer and the session store through the
/// session lifecycle: Active -> Expired (lazy) or Active -> Revoked.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    tokens: Arc<TokenIssuer>,
    session_ttl: time::Duration,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        tokens: Arc<TokenIssuer>,
        session_ttl: time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            tokens,
            session_ttl,
            clock,
        }
    }

    /// Issue a token pair and persist the matching session record. The
    /// record's id is the session id embedded in both tokens; its expiry
    /// is the session TTL, an outer bound independent of token lifetimes.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        email: &str,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<(Session, TokenPair)> {
        let session_id = new_session_id();
        let pair = self.tokens.issue_pair_for_session(user_id, email, &session_id)?;

        let now = self.clock.now();
        let session = Session {
            id: session_id,
            user_id,
            refresh_token: pair.refresh_token.clone(),
            user_agent: user_agent.to_string(),
            ip_address: ip_address.to_string(),
            expires_at: now + self.session_ttl,
            created_at: now,
        };
        self.store.create(&session).await?;

        info!(user_id = %user_id, session_id = %session.id, "session created");
        Ok((session, pair))
    }

    /// Look up a session and lazily expire it. A concurrent validate may
    /// race with the delete; that is tolerated since the delete is
    /// idempotent and both callers see `SessionExpired`.
    pub async fn validate_session(&self, session_id: &str) -> Result<Session> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(Error::SessionNotFound)?;

        if self.clock.now() >= session.expires_at {
            self.store.delete(session_id).await?;
            debug!(session_id, "session lazily expired");
            return Err(Error::SessionExpired);
        }
        Ok(session)
    }

    /// Trade a valid refresh token for a brand-new pair and session. The
    /// old session record is revoked in the same operation, so a refresh
    /// never leaves an orphaned record behind.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.tokens.validate(refresh_token, TokenKind::Refresh)?;

        // Carry the client metadata over from the session being replaced,
        // if its record still exists.
        let old = self.store.get(&claims.session_id).await?;
        self.store.delete(&claims.session_id).await?;

        let (user_agent, ip_address) = old
            .map(|s| (s.user_agent, s.ip_address))
            .unwrap_or_default();
        let (_, pair) = self
            .create_session(claims.user_id, &claims.email, &user_agent, &ip_address)
            .await?;

        info!(user_id = %claims.user_id, old_session = %claims.session_id, "session refreshed");
        Ok(pair)
    }

    /// Idempotent: revoking a nonexistent session is not an error.
    pub async fn revoke_session(&self, session_id: &str) -> Result<()> {
        self.store.delete(session_id).await?;
        info!(session_id, "session revoked");
        Ok(())
    }

    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<()> {
        self.store.delete_for_user(user_id).await?;
        info!(user_id = %user_id, "all sessions revoked");
        Ok(())
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        Ok(self.store.list_for_user(user_id).await?)
    }
}
