//! Services layer - Business logic
//!
//! Services sit between the HTTP handlers and the repositories. They:
//! - Implement validation and status transitions
//! - Coordinate repositories, the cache and the external integrations
//! - Emit automation events

pub mod ai;
pub mod auth;
pub mod automation;
pub mod blog;
pub mod content;
pub mod markdown;
pub mod newsletter;
pub mod password;
pub mod rate_limiter;
pub mod scheduler;
pub mod social;

#[cfg(test)]
pub(crate) mod test_support;

pub use ai::{AiService, AiServiceError};
pub use auth::{AuthService, AuthServiceError, LoginInput};
pub use automation::{AutomationEngine, AutomationError, EventDispatcher, NoopDispatcher};
pub use blog::{BlogService, BlogServiceError};
pub use content::{ContentSectionService, ContentServiceError, FaqService, PageService};
pub use markdown::{slugify, MarkdownRenderer};
pub use newsletter::{NewsletterService, NewsletterServiceError};
pub use password::{hash_password, verify_password};
pub use rate_limiter::{LoginRateLimiter, RequestRateLimiter};
pub use scheduler::{RetryPolicy, Scheduler};
pub use social::{PublisherRouter, SocialService, SocialServiceError};

/// Random token of `bytes` bytes, hex encoded
pub(crate) fn random_hex(bytes: usize) -> anyhow::Result<String> {
    let mut buf = vec![0u8; bytes];
    getrandom::fill(&mut buf)
        .map_err(|e| anyhow::anyhow!("Failed to generate random bytes: {}", e))?;
    Ok(buf.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_length_and_uniqueness() {
        let a = random_hex(32).unwrap();
        let b = random_hex(32).unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
