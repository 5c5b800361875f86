//! Newsletter subscribers and campaigns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberStatus {
    #[default]
    Active,
    Unsubscribed,
}

impl fmt::Display for SubscriberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

impl FromStr for SubscriberStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "unsubscribed" => Ok(Self::Unsubscribed),
            _ => Err(anyhow::anyhow!("Invalid subscriber status: {}", s)),
        }
    }
}

/// A newsletter subscriber.
///
/// `unsubscribe_token` is present only while the subscriber is active; it
/// is consumed by the first successful unsubscribe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    /// Always stored lowercased
    pub email: String,
    pub name: Option<String>,
    pub status: SubscriberStatus,
    pub source: Option<String>,
    #[serde(skip_serializing)]
    pub unsubscribe_token: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub esp_contact_id: Option<String>,
    pub esp_synced_at: Option<DateTime<Utc>>,
    pub esp_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(email: String, name: Option<String>, source: Option<String>, token: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            email,
            name,
            status: SubscriberStatus::Active,
            source,
            unsubscribe_token: Some(token),
            subscribed_at: now,
            unsubscribed_at: None,
            esp_contact_id: None,
            esp_synced_at: None,
            esp_sync_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriberStatus::Active
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeInput {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Subscriber totals for the admin dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberCounts {
    pub total: i64,
    pub active: i64,
    pub unsubscribed: i64,
    /// Rows never pushed to the ESP
    pub pending_sync: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
}

impl CampaignStatus {
    /// Campaigns that have not gone out yet may still be changed
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled | Self::Failed)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Sending => write!(f, "sending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(anyhow::anyhow!("Invalid campaign status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub subject: String,
    pub preview_text: Option<String>,
    /// Markdown source
    pub content: String,
    /// Rendered HTML including the unsubscribe footer placeholder
    pub content_html: String,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub recipient_count: i64,
    pub external_campaign_id: Option<String>,
    pub open_count: i64,
    pub click_count: i64,
    pub unsubscribe_count: i64,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(subject: String, content: String, content_html: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            subject,
            preview_text: None,
            content,
            content_html,
            status: CampaignStatus::Draft,
            scheduled_at: None,
            sent_at: None,
            recipient_count: 0,
            external_campaign_id: None,
            open_count: 0,
            click_count: 0,
            unsubscribe_count: 0,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaignInput {
    pub subject: String,
    #[serde(default)]
    pub preview_text: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCampaignInput {
    pub subject: Option<String>,
    pub preview_text: Option<String>,
    pub content: Option<String>,
}

/// Aggregate engagement numbers reported by the ESP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub opens: i64,
    pub clicks: i64,
    pub unsubscribes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_editability() {
        assert!(CampaignStatus::Draft.is_editable());
        assert!(CampaignStatus::Scheduled.is_editable());
        assert!(CampaignStatus::Failed.is_editable());
        assert!(!CampaignStatus::Sending.is_editable());
        assert!(!CampaignStatus::Sent.is_editable());
    }

    #[test]
    fn test_unsubscribe_token_is_never_serialized() {
        let subscriber = Subscriber::new("a@example.com".into(), None, None, "deadbeef".into());
        let json = serde_json::to_string(&subscriber).unwrap();
        assert!(!json.contains("deadbeef"));
        assert!(subscriber.is_active());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            SubscriberStatus::from_str("Unsubscribed").unwrap(),
            SubscriberStatus::Unsubscribed
        );
        assert_eq!(CampaignStatus::from_str("sent").unwrap(), CampaignStatus::Sent);
        assert!(CampaignStatus::from_str("bounced").is_err());
    }
}
