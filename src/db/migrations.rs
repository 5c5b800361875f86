//! Database migrations module
//!
//! Code-based migrations for Beacon. Every migration is embedded in the
//! binary as SQL strings, one flavour per supported driver, so a fresh
//! deployment only needs the executable and a database URL.
//!
//! # Usage
//!
//! ```ignore
//! use beacon::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```
//!
//! # Conventions
//!
//! - Timestamps are always bound by the application (`Utc::now()`), never
//!   produced by SQL defaults, so both drivers store comparable values.
//! - JSON payloads (tags, media URLs, rule conditions) live in `TEXT`
//!   columns and are decoded by the repositories.
//! - Unique columns on MySQL are `VARCHAR(255)` so they can be indexed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All Beacon migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(50) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'editor',
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                username VARCHAR(50) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'editor',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                expires_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_settings",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS settings (
                setting_key VARCHAR(100) PRIMARY KEY,
                setting_value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS settings (
                setting_key VARCHAR(100) PRIMARY KEY,
                setting_value TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            );
        "#,
    },
    Migration {
        version: 4,
        name: "create_blog_posts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS blog_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title VARCHAR(255) NOT NULL,
                slug VARCHAR(255) NOT NULL UNIQUE,
                excerpt TEXT,
                content TEXT NOT NULL,
                content_html TEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                author VARCHAR(100),
                category VARCHAR(100),
                tags TEXT NOT NULL DEFAULT '[]',
                cover_image VARCHAR(500),
                published_at TIMESTAMP,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_blog_posts_status ON blog_posts(status, published_at);
            CREATE INDEX IF NOT EXISTS idx_blog_posts_category ON blog_posts(category);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS blog_posts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                title VARCHAR(255) NOT NULL,
                slug VARCHAR(255) NOT NULL UNIQUE,
                excerpt TEXT,
                content LONGTEXT NOT NULL,
                content_html LONGTEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                author VARCHAR(100),
                category VARCHAR(100),
                tags TEXT NOT NULL,
                cover_image VARCHAR(500),
                published_at DATETIME,
                retry_count INT NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            CREATE INDEX idx_blog_posts_status ON blog_posts(status, published_at);
            CREATE INDEX idx_blog_posts_category ON blog_posts(category);
        "#,
    },
    Migration {
        version: 5,
        name: "create_social_posts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS social_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform VARCHAR(20) NOT NULL,
                content TEXT NOT NULL,
                media_urls TEXT NOT NULL DEFAULT '[]',
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                scheduled_at TIMESTAMP,
                published_at TIMESTAMP,
                external_post_id VARCHAR(255),
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                next_attempt_at TIMESTAMP,
                blog_post_id INTEGER,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (blog_post_id) REFERENCES blog_posts(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_social_posts_due ON social_posts(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_social_posts_blog ON social_posts(blog_post_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS social_posts (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                platform VARCHAR(20) NOT NULL,
                content TEXT NOT NULL,
                media_urls TEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                scheduled_at DATETIME,
                published_at DATETIME,
                external_post_id VARCHAR(255),
                retry_count INT NOT NULL DEFAULT 0,
                last_error TEXT,
                next_attempt_at DATETIME,
                blog_post_id BIGINT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (blog_post_id) REFERENCES blog_posts(id) ON DELETE SET NULL
            );
            CREATE INDEX idx_social_posts_due ON social_posts(status, scheduled_at);
        "#,
    },
    Migration {
        version: 6,
        name: "create_newsletter_subscribers",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS newsletter_subscribers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(255),
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                source VARCHAR(100),
                unsubscribe_token VARCHAR(64) UNIQUE,
                subscribed_at TIMESTAMP NOT NULL,
                unsubscribed_at TIMESTAMP,
                esp_contact_id VARCHAR(255),
                esp_synced_at TIMESTAMP,
                esp_sync_error TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_subscribers_status ON newsletter_subscribers(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS newsletter_subscribers (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(255),
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                source VARCHAR(100),
                unsubscribe_token VARCHAR(64) UNIQUE,
                subscribed_at DATETIME NOT NULL,
                unsubscribed_at DATETIME,
                esp_contact_id VARCHAR(255),
                esp_synced_at DATETIME,
                esp_sync_error TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            CREATE INDEX idx_subscribers_status ON newsletter_subscribers(status);
        "#,
    },
    Migration {
        version: 7,
        name: "create_newsletter_campaigns",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS newsletter_campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject VARCHAR(255) NOT NULL,
                preview_text VARCHAR(255),
                content TEXT NOT NULL,
                content_html TEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                scheduled_at TIMESTAMP,
                sent_at TIMESTAMP,
                recipient_count INTEGER NOT NULL DEFAULT 0,
                external_campaign_id VARCHAR(255),
                open_count INTEGER NOT NULL DEFAULT 0,
                click_count INTEGER NOT NULL DEFAULT 0,
                unsubscribe_count INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                next_attempt_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_campaigns_due ON newsletter_campaigns(status, scheduled_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS newsletter_campaigns (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                subject VARCHAR(255) NOT NULL,
                preview_text VARCHAR(255),
                content LONGTEXT NOT NULL,
                content_html LONGTEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                scheduled_at DATETIME,
                sent_at DATETIME,
                recipient_count BIGINT NOT NULL DEFAULT 0,
                external_campaign_id VARCHAR(255),
                open_count BIGINT NOT NULL DEFAULT 0,
                click_count BIGINT NOT NULL DEFAULT 0,
                unsubscribe_count BIGINT NOT NULL DEFAULT 0,
                retry_count INT NOT NULL DEFAULT 0,
                last_error TEXT,
                next_attempt_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            CREATE INDEX idx_campaigns_due ON newsletter_campaigns(status, scheduled_at);
        "#,
    },
    Migration {
        version: 8,
        name: "create_automation_rules",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS automation_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                trigger_type VARCHAR(50) NOT NULL,
                trigger_conditions TEXT NOT NULL DEFAULT '[]',
                actions TEXT NOT NULL DEFAULT '[]',
                priority INTEGER NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                run_count INTEGER NOT NULL DEFAULT 0,
                last_run_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_automation_rules_trigger ON automation_rules(trigger_type, is_active);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS automation_rules (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                trigger_type VARCHAR(50) NOT NULL,
                trigger_conditions TEXT NOT NULL,
                actions TEXT NOT NULL,
                priority INT NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                run_count BIGINT NOT NULL DEFAULT 0,
                last_run_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            CREATE INDEX idx_automation_rules_trigger ON automation_rules(trigger_type, is_active);
        "#,
    },
    Migration {
        version: 9,
        name: "create_automation_logs",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS automation_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                trigger_type VARCHAR(50) NOT NULL,
                status VARCHAR(20) NOT NULL,
                payload TEXT NOT NULL,
                error TEXT,
                executed_actions INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (rule_id) REFERENCES automation_rules(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_automation_logs_rule ON automation_logs(rule_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS automation_logs (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                rule_id BIGINT NOT NULL,
                trigger_type VARCHAR(50) NOT NULL,
                status VARCHAR(20) NOT NULL,
                payload TEXT NOT NULL,
                error TEXT,
                executed_actions INT NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                FOREIGN KEY (rule_id) REFERENCES automation_rules(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 10,
        name: "create_faqs",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS faqs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                category VARCHAR(100),
                sort_order INTEGER NOT NULL DEFAULT 0,
                is_published BOOLEAN NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_faqs_order ON faqs(sort_order, id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS faqs (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                category VARCHAR(100),
                sort_order INT NOT NULL DEFAULT 0,
                is_published BOOLEAN NOT NULL DEFAULT TRUE,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            CREATE INDEX idx_faqs_order ON faqs(sort_order, id);
        "#,
    },
    Migration {
        version: 11,
        name: "create_pages",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                title VARCHAR(255) NOT NULL,
                content TEXT NOT NULL,
                content_html TEXT NOT NULL,
                meta_description VARCHAR(500),
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS pages (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                title VARCHAR(255) NOT NULL,
                content LONGTEXT NOT NULL,
                content_html LONGTEXT NOT NULL,
                meta_description VARCHAR(500),
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
        "#,
    },
    Migration {
        version: 12,
        name: "create_content_sections",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS content_sections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                page_slug VARCHAR(255) NOT NULL,
                title VARCHAR(255),
                body TEXT,
                data TEXT NOT NULL DEFAULT '{}',
                sort_order INTEGER NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_content_sections_page ON content_sections(page_slug, sort_order);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS content_sections (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(255) NOT NULL UNIQUE,
                page_slug VARCHAR(255) NOT NULL,
                title VARCHAR(255),
                body TEXT,
                data TEXT NOT NULL,
                sort_order INT NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            CREATE INDEX idx_content_sections_page ON content_sections(page_slug, sort_order);
        "#,
    },
];

/// Run all pending migrations.
///
/// Returns the number of migrations applied.
///
/// # Errors
///
/// Returns an error if any migration fails to apply.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at DATETIME NOT NULL
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    let records = on_pool!(pool, |conn| {
        sqlx::query_as::<_, MigrationRecord>(
            "SELECT version, name, applied_at FROM _migrations ORDER BY version",
        )
        .fetch_all(conn)
        .await?
    });
    Ok(records)
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => migration.up_sqlite,
        DatabaseDriver::Mysql => migration.up_mysql,
    };

    on_pool!(pool, |conn| {
        for statement in split_sql_statements(sql) {
            sqlx::query(statement)
                .execute(conn)
                .await
                .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
        }

        sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version as i64)
            .bind(migration.name)
            .bind(Utc::now())
            .execute(conn)
            .await?;
    });

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, dropping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Check if migrations are up to date
pub async fn is_up_to_date(pool: &DynDatabasePool) -> Result<bool> {
    Ok(pending_count(pool).await? == 0)
}

/// Number of migrations not yet applied
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}

/// Get the total number of migrations defined
pub fn total_migrations() -> usize {
    MIGRATIONS.len()
}

/// Get migration by version
pub fn get_migration(version: i32) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        // Running again should apply 0 migrations
        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_is_up_to_date_and_pending_count() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        assert!(!is_up_to_date(&pool).await.expect("Failed to check"));
        assert_eq!(pending_count(&pool).await.unwrap(), MIGRATIONS.len());

        run_migrations(&pool).await.expect("Failed to run migrations");

        assert!(is_up_to_date(&pool).await.expect("Failed to check"));
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_applied_migrations_are_recorded_in_order() {
        let pool = migrated_pool().await;
        let applied = get_applied_migrations(&pool).await.unwrap();

        let versions: Vec<i64> = applied.iter().map(|m| m.version).collect();
        let expected: Vec<i64> = MIGRATIONS.iter().map(|m| m.version as i64).collect();
        assert_eq!(versions, expected);
        assert_eq!(applied[0].name, "create_users");
    }

    #[tokio::test]
    async fn test_subscriber_email_is_unique() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();
        let now = Utc::now();

        let insert = "INSERT INTO newsletter_subscribers \
            (email, status, unsubscribe_token, subscribed_at, created_at, updated_at) \
            VALUES (?, 'active', ?, ?, ?, ?)";

        sqlx::query(insert)
            .bind("reader@example.com")
            .bind("token-a")
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(sqlite_pool)
            .await
            .expect("first insert");

        let duplicate = sqlx::query(insert)
            .bind("reader@example.com")
            .bind("token-b")
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(sqlite_pool)
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_consumed_unsubscribe_tokens_may_repeat_as_null() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();
        let now = Utc::now();

        for email in ["a@example.com", "b@example.com"] {
            let result = sqlx::query(
                "INSERT INTO newsletter_subscribers \
                 (email, status, unsubscribe_token, subscribed_at, created_at, updated_at) \
                 VALUES (?, 'unsubscribed', NULL, ?, ?, ?)",
            )
            .bind(email)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(sqlite_pool)
            .await;
            assert!(result.is_ok(), "NULL tokens must not collide");
        }
    }

    #[tokio::test]
    async fn test_deleting_blog_post_detaches_social_posts() {
        let pool = migrated_pool().await;
        let sqlite_pool = pool.as_sqlite().unwrap();
        let now = Utc::now();

        let blog_id = sqlx::query(
            "INSERT INTO blog_posts (title, slug, content, content_html, tags, created_at, updated_at) \
             VALUES ('Launch', 'launch', 'body', '<p>body</p>', '[]', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(sqlite_pool)
        .await
        .unwrap()
        .last_insert_rowid();

        sqlx::query(
            "INSERT INTO social_posts (platform, content, media_urls, blog_post_id, created_at, updated_at) \
             VALUES ('twitter', 'teaser', '[]', ?, ?, ?)",
        )
        .bind(blog_id)
        .bind(now)
        .bind(now)
        .execute(sqlite_pool)
        .await
        .unwrap();

        sqlx::query("DELETE FROM blog_posts WHERE id = ?")
            .bind(blog_id)
            .execute(sqlite_pool)
            .await
            .unwrap();

        let linked: Option<i64> = sqlx::query_scalar("SELECT blog_post_id FROM social_posts")
            .fetch_one(sqlite_pool)
            .await
            .unwrap();
        assert_eq!(linked, None);
    }

    #[test]
    fn test_get_migration() {
        assert_eq!(get_migration(1).map(|m| m.name), Some("create_users"));
        assert!(get_migration(999).is_none());
    }

    #[test]
    fn test_total_migrations() {
        assert_eq!(total_migrations(), 12);
    }

    #[test]
    fn test_versions_are_sequential() {
        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, idx + 1);
        }
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        assert_eq!(split_sql_statements(sql).len(), 2);

        let sql_with_comments = "-- Comment\nCREATE TABLE a (id INT);\n-- trailing";
        assert_eq!(split_sql_statements(sql_with_comments).len(), 1);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("CREATE TABLE test"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }

    #[test]
    fn test_truncate_sql() {
        let long = "x".repeat(150);
        assert_eq!(truncate_sql(&long).len(), 103);
        assert_eq!(truncate_sql("SELECT 1"), "SELECT 1");
    }
}
