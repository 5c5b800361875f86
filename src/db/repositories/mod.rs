//! Database repositories
//!
//! One repository trait per entity plus its `Sqlx*` implementation. Rows
//! are fetched into `FromRow` record structs holding only primitive column
//! types, then converted into domain models (status strings parsed, JSON
//! columns decoded) so a single record type serves both drivers.

pub mod automation;
pub mod blog_post;
pub mod campaign;
pub mod content_section;
pub mod faq;
pub mod page;
pub mod session;
pub mod settings;
pub mod social_post;
pub mod subscriber;
pub mod user;

pub use automation::{AutomationRepository, SqlxAutomationRepository};
pub use blog_post::{BlogPostRepository, SqlxBlogPostRepository};
pub use campaign::{CampaignRepository, SqlxCampaignRepository};
pub use content_section::{ContentSectionRepository, SqlxContentSectionRepository};
pub use faq::{FaqRepository, SqlxFaqRepository};
pub use page::{PageRepository, SqlxPageRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use settings::{SettingsRepository, SqlxSettingsRepository};
pub use social_post::{SocialPostFilter, SocialPostRepository, SqlxSocialPostRepository};
pub use subscriber::{SqlxSubscriberRepository, SubscriberRepository};
pub use user::{SqlxUserRepository, UserRepository};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Decode a JSON text column
pub(crate) fn decode_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON stored in {}", column))
}

/// Encode a value for a JSON text column
pub(crate) fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode JSON column")
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::db::{create_test_pool, migrations, DynDatabasePool};

    /// Fresh in-memory database with every migration applied
    pub async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }
}
