use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::users::repo_types::{NewUser, StoreError, UniqueField, User};

/// Backing store for user records.
///
/// Implementations must enforce username and email uniqueness themselves;
/// the directory's lookups before `insert` only provide friendlier errors.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// Records in a stable order (ascending id).
    async fn list_page(&self, offset: i64, limit: i64) -> Result<Vec<User>, StoreError>;

    /// Atomically persist a record; all columns commit together or none do.
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError>;
}

const USERNAME_CONSTRAINT: &str = "users_username_key";
const EMAIL_CONSTRAINT: &str = "users_email_key";
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed store over the `users` table.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn list_page(&self, offset: i64, limit: i64) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            ORDER BY id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(rows)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        // Rolled back on drop if we bail out or the caller gives up.
        let mut tx = self.db.begin().await.context("begin tx")?;

        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        tx.commit().await.context("commit tx")?;
        debug!(user_id = created.id, "user row inserted");
        Ok(created)
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete user")?;
        tx.commit().await.context("commit tx")?;
        Ok(result.rows_affected() > 0)
    }
}

fn map_insert_error(e: sqlx::Error) -> StoreError {
    if let Some(db_err) = e.as_database_error() {
        match db_err.constraint() {
            Some(USERNAME_CONSTRAINT) => return StoreError::UniqueViolation(UniqueField::Username),
            Some(EMAIL_CONSTRAINT) => return StoreError::UniqueViolation(UniqueField::Email),
            _ => {}
        }
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let field = if db_err.message().contains("email") {
                UniqueField::Email
            } else {
                UniqueField::Username
            };
            return StoreError::UniqueViolation(field);
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context("insert user"))
}
