use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::session::{Session, SessionStore};

/// Postgres-backed session store.
pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &Session) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, refresh_token, user_agent, ip_address, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(&session.refresh_token)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, refresh_token, user_agent, ip_address, expires_at, created_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(session)
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM sessions WHERE id = $1"#)
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM sessions WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, refresh_token, user_agent, ip_address, expires_at, created_at
            FROM sessions
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(sessions)
    }
}

/// In-memory session store for dev runs and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> anyhow::Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> anyhow::Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .retain(|_, s| s.user_id != user_id);
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}
