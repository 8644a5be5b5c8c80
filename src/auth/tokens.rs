use std::sync::Arc;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::JwtConfig;
use crate::errors::{Error, Result};

/// Token type used to distinguish access and refresh JWTs. Carried as an
/// explicit signed claim; validation never has to guess from lifetimes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signed claim set shared by both tokens of a pair. `session_id` ties the
/// pair to one session record; `sub` duplicates `user_id` to keep the
/// registered-claim shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: String,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub sub: Uuid,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Mints and validates HS256-signed token pairs. Pure function of the
/// configured secret and the injected clock; no I/O.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: time::Duration,
    refresh_ttl: time::Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(cfg: &JwtConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            access_ttl: time::Duration::minutes(cfg.access_ttl_minutes),
            refresh_ttl: time::Duration::days(cfg.refresh_ttl_days),
            clock,
        }
    }

    /// Issue an access/refresh pair sharing a fresh random session id.
    pub fn issue_pair(&self, user_id: Uuid, email: &str) -> Result<TokenPair> {
        self.issue_pair_for_session(user_id, email, &new_session_id())
    }

    /// Issue a pair bound to a caller-supplied session id, so the session
    /// record and the embedded claim stay in lockstep.
    pub fn issue_pair_for_session(
        &self,
        user_id: Uuid,
        email: &str,
        session_id: &str,
    ) -> Result<TokenPair> {
        let access_token = self.sign(user_id, email, session_id, TokenKind::Access)?;
        let refresh_token = self.sign(user_id, email, session_id, TokenKind::Refresh)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".into(),
            expires_in: self.access_ttl.whole_seconds(),
        })
    }

    fn sign(
        &self,
        user_id: Uuid,
        email: &str,
        session_id: &str,
        kind: TokenKind,
    ) -> Result<String> {
        let now = self.clock.now();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            user_id,
            email: email.to_string(),
            session_id: session_id.to_string(),
            exp: (now + ttl).unix_timestamp() as usize,
            iat: now.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            sub: user_id,
            kind,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Store(anyhow::anyhow!("jwt signing failed: {e}")))?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    /// Verify signature, issuer, expiry and token kind.
    ///
    /// The algorithm is pinned to HS256, so a token claiming `none` or an
    /// asymmetric scheme fails as `TokenInvalid`. Expiry is evaluated
    /// against the injected clock and reported as `TokenExpired`,
    /// distinctly from a bad signature.
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| Error::TokenInvalid)?;
        let claims = data.claims;

        if self.clock.now().unix_timestamp() >= claims.exp as i64 {
            return Err(Error::TokenExpired);
        }
        if claims.kind != expected {
            return Err(Error::TokenInvalid);
        }
        debug!(user_id = %claims.user_id, kind = ?claims.kind, "jwt verified");
        Ok(claims)
    }
}

/// Cryptographically random 32-byte session identifier, hex encoded.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AppConfig;

    fn issuer_with_clock(secret: &str, clock: ManualClock) -> TokenIssuer {
        let mut cfg = AppConfig::fake().jwt;
        cfg.secret = secret.into();
        TokenIssuer::new(&cfg, Arc::new(clock))
    }

    #[test]
    fn issued_pair_validates_and_round_trips_identity() {
        let issuer = issuer_with_clock("s3cret", ManualClock::start_of_2024());
        let user_id = Uuid::new_v4();
        let pair = issuer.issue_pair(user_id, "dave@example.com").unwrap();

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 15 * 60);

        let access = issuer.validate(&pair.access_token, TokenKind::Access).unwrap();
        let refresh = issuer.validate(&pair.refresh_token, TokenKind::Refresh).unwrap();
        assert_eq!(access.user_id, user_id);
        assert_eq!(access.sub, user_id);
        assert_eq!(access.email, "dave@example.com");
        assert_eq!(access.iss, "test-issuer");
        // Both tokens of a pair reference the same session.
        assert_eq!(access.session_id, refresh.session_id);
        assert_eq!(access.session_id.len(), 64);
    }

    #[test]
    fn access_token_expires_after_its_ttl() {
        let clock = ManualClock::start_of_2024();
        let issuer = issuer_with_clock("s3cret", clock.clone());
        let pair = issuer.issue_pair(Uuid::new_v4(), "dave@example.com").unwrap();

        clock.advance(time::Duration::minutes(16));

        let err = issuer.validate(&pair.access_token, TokenKind::Access).unwrap_err();
        assert!(matches!(err, Error::TokenExpired));
        // The refresh token has a longer horizon and still validates.
        assert!(issuer.validate(&pair.refresh_token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn refresh_token_expires_after_its_ttl() {
        let clock = ManualClock::start_of_2024();
        let issuer = issuer_with_clock("s3cret", clock.clone());
        let pair = issuer.issue_pair(Uuid::new_v4(), "dave@example.com").unwrap();

        clock.advance(time::Duration::days(8));

        let err = issuer.validate(&pair.refresh_token, TokenKind::Refresh).unwrap_err();
        assert!(matches!(err, Error::TokenExpired));
    }

    #[test]
    fn token_signed_with_other_key_is_invalid() {
        let signer = issuer_with_clock("key-one", ManualClock::start_of_2024());
        let verifier = issuer_with_clock("key-two", ManualClock::start_of_2024());
        let pair = signer.issue_pair(Uuid::new_v4(), "dave@example.com").unwrap();

        let err = verifier.validate(&pair.access_token, TokenKind::Access).unwrap_err();
        assert!(matches!(err, Error::TokenInvalid));
    }

    #[test]
    fn kind_mismatch_is_invalid() {
        let issuer = issuer_with_clock("s3cret", ManualClock::start_of_2024());
        let pair = issuer.issue_pair(Uuid::new_v4(), "dave@example.com").unwrap();

        let err = issuer.validate(&pair.access_token, TokenKind::Refresh).unwrap_err();
        assert!(matches!(err, Error::TokenInvalid));
        let err = issuer.validate(&pair.refresh_token, TokenKind::Access).unwrap_err();
        assert!(matches!(err, Error::TokenInvalid));
    }

    #[test]
    fn garbage_token_is_invalid() {
        let issuer = issuer_with_clock("s3cret", ManualClock::start_of_2024());
        let err = issuer.validate("not.a.jwt", TokenKind::Access).unwrap_err();
        assert!(matches!(err, Error::TokenInvalid));
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
