use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{QuotaKind, Tier, User};
use crate::errors::{Error, Result};

/// Repository contract for user records. Both services hold one: the auth
/// service over its authoritative table, the user service over its
/// replica.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> anyhow::Result<()>;

    /// Insert-or-replace keyed by id. The replicator relies on this being
    /// idempotent so duplicate event delivery cannot fail the apply.
    async fn upsert(&self, user: &User) -> anyhow::Result<()>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn update(&self, user: &User) -> anyhow::Result<()>;

    /// Single conditional increment of one quota counter: succeeds and
    /// returns the updated row only while `used < limit`. This is the
    /// atomic path quota enforcement goes through, so concurrent callers
    /// can never push `used` past `limit`.
    async fn use_quota(&self, id: Uuid, kind: QuotaKind, now: OffsetDateTime) -> Result<User>;

    /// Service-wide monthly reset: zero every `used` counter. Returns the
    /// number of affected users.
    async fn reset_all_quotas(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    full_name: String,
    tier: String,
    ai_description_quota_used: i32,
    ai_description_quota_limit: i32,
    ai_video_quota_used: i32,
    ai_video_quota_limit: i32,
    auto_posting_quota_used: i32,
    auto_posting_quota_limit: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            full_name: row.full_name,
            tier: Tier::parse_lenient(&row.tier),
            ai_description_quota_used: row.ai_description_quota_used,
            ai_description_quota_limit: row.ai_description_quota_limit,
            ai_video_quota_used: row.ai_video_quota_used,
            ai_video_quota_limit: row.ai_video_quota_limit,
            auto_posting_quota_used: row.auto_posting_quota_used,
            auto_posting_quota_limit: row.auto_posting_quota_limit,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, full_name, tier, \
     ai_description_quota_used, ai_description_quota_limit, \
     ai_video_quota_used, ai_video_quota_limit, \
     auto_posting_quota_used, auto_posting_quota_limit, \
     created_at, updated_at";

fn quota_columns(kind: QuotaKind) -> (&'static str, &'static str) {
    match kind {
        QuotaKind::AiDescription => ("ai_description_quota_used", "ai_description_quota_limit"),
        QuotaKind::AiVideo => ("ai_video_quota_used", "ai_video_quota_limit"),
        QuotaKind::AutoPosting => ("auto_posting_quota_used", "auto_posting_quota_limit"),
    }
}

/// Postgres-backed user store.
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert(&self, user: &User, on_conflict: &str) -> anyhow::Result<()> {
        let sql = format!(
            r#"
            INSERT INTO users ({USER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            {on_conflict}
            "#
        );
        sqlx::query(&sql)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.full_name)
            .bind(user.tier.as_str())
            .bind(user.ai_description_quota_used)
            .bind(user.ai_description_quota_limit)
            .bind(user.ai_video_quota_used)
            .bind(user.ai_video_quota_limit)
            .bind(user.auto_posting_quota_used)
            .bind(user.auto_posting_quota_limit)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> anyhow::Result<()> {
        self.insert(user, "").await
    }

    async fn upsert(&self, user: &User) -> anyhow::Result<()> {
        self.insert(
            user,
            r#"
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                full_name = EXCLUDED.full_name,
                tier = EXCLUDED.tier,
                ai_description_quota_limit = EXCLUDED.ai_description_quota_limit,
                ai_video_quota_limit = EXCLUDED.ai_video_quota_limit,
                auto_posting_quota_limit = EXCLUDED.auto_posting_quota_limit,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users WHERE id = $1"#
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"SELECT {USER_COLUMNS} FROM users WHERE email = $1"#
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(User::from))
    }

    async fn update(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                email = $2,
                password_hash = $3,
                full_name = $4,
                tier = $5,
                ai_description_quota_used = $6,
                ai_description_quota_limit = $7,
                ai_video_quota_used = $8,
                ai_video_quota_limit = $9,
                auto_posting_quota_used = $10,
                auto_posting_quota_limit = $11,
                updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.tier.as_str())
        .bind(user.ai_description_quota_used)
        .bind(user.ai_description_quota_limit)
        .bind(user.ai_video_quota_used)
        .bind(user.ai_video_quota_limit)
        .bind(user.auto_posting_quota_used)
        .bind(user.auto_posting_quota_limit)
        .bind(user.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn use_quota(&self, id: Uuid, kind: QuotaKind, now: OffsetDateTime) -> Result<User> {
        let (used, limit) = quota_columns(kind);
        // Conditional increment in one statement; the WHERE clause is what
        // keeps concurrent callers from overshooting the limit.
        let sql = format!(
            r#"
            UPDATE users
            SET {used} = {used} + 1, updated_at = $2
            WHERE id = $1 AND {used} < {limit}
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| Error::Store(e.into()))?;

        match row {
            Some(row) => Ok(User::from(row)),
            None => {
                // Distinguish an exhausted quota from a missing user.
                if self.find_by_id(id).await?.is_some() {
                    Err(Error::QuotaExceeded)
                } else {
                    Err(Error::UserNotFound)
                }
            }
        }
    }

    async fn reset_all_quotas(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                ai_description_quota_used = 0,
                ai_video_quota_used = 0,
                auto_posting_quota_used = 0,
                updated_at = $1
            "#,
        )
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

/// In-memory user store for dev runs and tests. The quota increment runs
/// under the store lock, giving the same exactly-k guarantee as the SQL
/// conditional update.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> anyhow::Result<()> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&user.id) {
            anyhow::bail!("duplicate user id {}", user.id);
        }
        if users.values().any(|u| u.email == user.email) {
            anyhow::bail!("duplicate email {}", user.email);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn upsert(&self, user: &User) -> anyhow::Result<()> {
        self.users.lock().unwrap().insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update(&self, user: &User) -> anyhow::Result<()> {
        let mut users = self.users.lock().unwrap();
        if !users.contains_key(&user.id) {
            anyhow::bail!("user {} not found", user.id);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn use_quota(&self, id: Uuid, kind: QuotaKind, now: OffsetDateTime) -> Result<User> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&id).ok_or(Error::UserNotFound)?;
        user.use_quota(kind, now)?;
        Ok(user.clone())
    }

    async fn reset_all_quotas(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let mut users = self.users.lock().unwrap();
        for user in users.values_mut() {
            user.reset_monthly_quotas(now);
        }
        Ok(users.len() as u64)
    }
}
