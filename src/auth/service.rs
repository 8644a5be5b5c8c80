use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{Tier, User};
use crate::errors::{Error, Result};
use crate::events::EventPublisher;
use crate::users::UserStore;

use super::password::{check_password_strength, hash_password, verify_password};
use super::session::{Session, SessionManager};
use super::tokens::{TokenIssuer, TokenPair};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Auth-service application layer: registration, login, token refresh and
/// the account mutations that feed the event channel. State changes are
/// committed locally first; the matching event is fire-and-forget, so a
/// lost event leaves the consuming service stale rather than rolling back
/// the operation.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<SessionManager>,
    tokens: Arc<TokenIssuer>,
    publisher: Arc<EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<SessionManager>,
        tokens: Arc<TokenIssuer>,
        publisher: Arc<EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            sessions,
            tokens,
            publisher,
            clock,
        }
    }

    /// Create the user, issue a first token pair (no session on register),
    /// and announce `user.registered`.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(User, TokenPair)> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            warn!(email = %email, "register with invalid email");
            return Err(Error::InvalidCredentials);
        }
        check_password_strength(password)?;

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(Error::EmailTaken);
        }

        let password_hash = hash_password(password)?;
        let user = User::new(email, password_hash, full_name.to_string(), self.clock.now());
        self.users.create(&user).await?;

        let pair = self.tokens.issue_pair(user.id, &user.email)?;
        self.publisher.user_registered(&user).await;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok((user, pair))
    }

    /// Verify credentials and open a session. Unknown email and wrong
    /// password are indistinguishable to the caller.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<(User, Session, TokenPair)> {
        let email = email.trim().to_lowercase();
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(Error::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash)? {
            warn!(user_id = %user.id, "login with wrong password");
            return Err(Error::InvalidCredentials);
        }

        let (session, pair) = self
            .sessions
            .create_session(user.id, &user.email, user_agent, ip_address)
            .await?;

        info!(user_id = %user.id, "user logged in");
        Ok((user, session, pair))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        self.sessions.refresh_session(refresh_token).await
    }

    pub async fn logout(&self, session_id: &str) -> Result<()> {
        self.sessions.revoke_session(session_id).await
    }

    /// Change the password and revoke every session of the user. A failed
    /// revoke does not undo the password change.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(Error::UserNotFound)?;

        if !verify_password(current_password, &user.password_hash)? {
            return Err(Error::InvalidCredentials);
        }
        check_password_strength(new_password)?;

        user.password_hash = hash_password(new_password)?;
        user.updated_at = self.clock.now();
        self.users.update(&user).await?;

        if let Err(e) = self.sessions.revoke_all_sessions(user_id).await {
            warn!(error = %e, user_id = %user_id, "failed to revoke sessions after password change");
        }

        info!(user_id = %user_id, "password changed");
        Ok(())
    }

    /// Upgrade the authoritative record to pro and announce
    /// `user.tier.upgraded`.
    pub async fn upgrade_tier(&self, user_id: Uuid) -> Result<User> {
        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(Error::UserNotFound)?;

        let old_tier = user.tier;
        user.upgrade_to_pro(self.clock.now());
        self.users.update(&user).await?;

        self.publisher
            .user_tier_upgraded(user.id, old_tier, Tier::Pro)
            .await;

        info!(user_id = %user_id, "tier upgraded");
        Ok(user)
    }
}
