//! User repository
//!
//! Database operations for admin users.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::User;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Look a user up by username or email (case-insensitive email match)
    async fn get_by_login(&self, login: &str) -> Result<Option<User>>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    async fn list(&self) -> Result<Vec<User>>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRecord {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRecord) -> Result<Self> {
        Ok(User {
            id: r.id,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            role: r.role.parse()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let now = Utc::now();
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO users (username, email, password_hash, role, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&user.username)
            .bind(user.email.to_lowercase())
            .bind(&user.password_hash)
            .bind(user.role.to_string())
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create user")?
            .inserted_id()
        });

        Ok(User {
            id,
            email: user.email.to_lowercase(),
            created_at: now,
            updated_at: now,
            ..user.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, UserRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get user")?
        });
        record.map(User::try_from).transpose()
    }

    async fn get_by_login(&self, login: &str) -> Result<Option<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE username = ? OR email = ? LIMIT 1",
            USER_COLUMNS
        );
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, UserRecord>(&sql)
                .bind(login)
                .bind(login.to_lowercase())
                .fetch_optional(conn)
                .await
                .context("Failed to look up user")?
        });
        record.map(User::try_from).transpose()
    }

    async fn count(&self) -> Result<i64> {
        let count = on_pool!(self.pool, |conn| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
                .fetch_one(conn)
                .await
                .context("Failed to count users")?
        });
        Ok(count)
    }

    async fn list(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
        let records = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, UserRecord>(&sql)
                .fetch_all(conn)
                .await
                .context("Failed to list users")?
        });
        records.into_iter().map(User::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::models::UserRole;

    fn test_user(username: &str, email: &str) -> User {
        User::new(
            username.to_string(),
            email.to_string(),
            "argon2-hash".to_string(),
            UserRole::Admin,
        )
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let repo = SqlxUserRepository::new(migrated_pool().await);
        let created = repo
            .create(&test_user("admin", "Admin@Example.com"))
            .await
            .expect("Failed to create user");

        assert!(created.id > 0);
        assert_eq!(created.email, "admin@example.com");

        let found = repo.get_by_id(created.id).await.unwrap().expect("User not found");
        assert_eq!(found.username, "admin");
        assert_eq!(found.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_get_by_login_matches_username_or_email() {
        let repo = SqlxUserRepository::new(migrated_pool().await);
        repo.create(&test_user("editor", "editor@example.com")).await.unwrap();

        assert!(repo.get_by_login("editor").await.unwrap().is_some());
        assert!(repo.get_by_login("EDITOR@example.com").await.unwrap().is_some());
        assert!(repo.get_by_login("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let repo = SqlxUserRepository::new(migrated_pool().await);
        repo.create(&test_user("admin", "a@example.com")).await.unwrap();
        assert!(repo.create(&test_user("admin", "b@example.com")).await.is_err());
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
