//! Social media post model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Social network a post targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Twitter,
    Linkedin,
    Facebook,
    Instagram,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 4] = [
        SocialPlatform::Twitter,
        SocialPlatform::Linkedin,
        SocialPlatform::Facebook,
        SocialPlatform::Instagram,
    ];

    /// Maximum post length in characters
    pub fn char_limit(self) -> usize {
        match self {
            SocialPlatform::Twitter => 280,
            SocialPlatform::Linkedin => 3000,
            SocialPlatform::Facebook => 63206,
            SocialPlatform::Instagram => 2200,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Linkedin => "linkedin",
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialPlatform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(Self::Twitter),
            "linkedin" => Ok(Self::Linkedin),
            "facebook" => Ok(Self::Facebook),
            "instagram" => Ok(Self::Instagram),
            _ => Err(anyhow::anyhow!("Invalid social platform: {}", s)),
        }
    }
}

/// Lifecycle of a social post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPostStatus {
    #[default]
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl fmt::Display for SocialPostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Published => write!(f, "published"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SocialPostStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            _ => Err(anyhow::anyhow!("Invalid social post status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialPost {
    pub id: i64,
    pub platform: SocialPlatform,
    pub content: String,
    pub media_urls: Vec<String>,
    pub status: SocialPostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub external_post_id: Option<String>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Earliest time the scheduler may retry after a failure
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub blog_post_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SocialPost {
    pub fn new(platform: SocialPlatform, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            platform,
            content,
            media_urls: Vec::new(),
            status: SocialPostStatus::Draft,
            scheduled_at: None,
            published_at: None,
            external_post_id: None,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            blog_post_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Published posts are immutable
    pub fn is_editable(&self) -> bool {
        self.status != SocialPostStatus::Published
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSocialPostInput {
    pub platform: SocialPlatform,
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    /// When set the post is queued for the scheduler
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub blog_post_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSocialPostInput {
    pub platform: Option<SocialPlatform>,
    pub content: Option<String>,
    pub media_urls: Option<Vec<String>>,
}

/// Outcome of a successful publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Identifier assigned by the network (or the relay)
    pub external_id: String,
    pub url: Option<String>,
}
