//! Database layer
//!
//! This module provides database abstraction for Beacon.
//! It supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for hosted deployments)
//!
//! The database driver is selected based on configuration.
//!
//! # Architecture
//!
//! The database layer uses a trait-based abstraction (`DatabasePool`) that
//! allows repositories to work with either backend without knowing which one
//! is active. All repository SQL is written in the dialect both drivers share
//! (`?` placeholders, no vendor functions), so a single query body is stamped
//! out for each driver with [`on_pool!`].
//!
//! # Usage
//!
//! ```ignore
//! use beacon::config::DatabaseConfig;
//! use beacon::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

/// Run a query body against whichever concrete pool is active.
///
/// The body is expanded once per driver, so inside it `$conn` is a concrete
/// `&SqlitePool` or `&MySqlPool` and every `sqlx` call is monomorphic.
/// Submodules declared below this point see it without an import.
macro_rules! on_pool {
    ($pool:expr, |$conn:ident| $body:expr) => {
        match $pool.driver() {
            $crate::config::DatabaseDriver::Sqlite => {
                let $conn = $pool
                    .as_sqlite()
                    .ok_or_else(|| ::anyhow::anyhow!("SQLite pool is not available"))?;
                $body
            }
            $crate::config::DatabaseDriver::Mysql => {
                let $conn = $pool
                    .as_mysql()
                    .ok_or_else(|| ::anyhow::anyhow!("MySQL pool is not available"))?;
                $body
            }
        }
    };
}

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, InsertId, MysqlDatabase,
    SqliteDatabase,
};
