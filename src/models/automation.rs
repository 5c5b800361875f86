//! Automation rules, events and execution logs
//!
//! A rule listens for one [`TriggerType`]. When an [`AutomationEvent`] of
//! that type fires, every [`Condition`] must hold against the event payload
//! before the rule's [`Action`]s run in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::SocialPlatform;

/// Events the automation engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    BlogPublished,
    SubscriberCreated,
    SubscriberUnsubscribed,
    CampaignSent,
    SocialPostPublished,
    SocialPostFailed,
    Manual,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlogPublished => "blog_published",
            Self::SubscriberCreated => "subscriber_created",
            Self::SubscriberUnsubscribed => "subscriber_unsubscribed",
            Self::CampaignSent => "campaign_sent",
            Self::SocialPostPublished => "social_post_published",
            Self::SocialPostFailed => "social_post_failed",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blog_published" => Ok(Self::BlogPublished),
            "subscriber_created" => Ok(Self::SubscriberCreated),
            "subscriber_unsubscribed" => Ok(Self::SubscriberUnsubscribed),
            "campaign_sent" => Ok(Self::CampaignSent),
            "social_post_published" => Ok(Self::SocialPostPublished),
            "social_post_failed" => Ok(Self::SocialPostFailed),
            "manual" => Ok(Self::Manual),
            _ => Err(anyhow::anyhow!("Invalid trigger type: {}", s)),
        }
    }
}

/// Comparison applied by a [`Condition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
}

/// A single predicate over the event payload.
///
/// `field` is a dotted path (`post.category`, `tags.0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

/// A step executed when a rule matches.
///
/// Text fields are tera templates rendered against the event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    CreateSocialPost {
        platforms: Vec<SocialPlatform>,
        template: String,
        /// Scheduled this far in the future when positive, draft otherwise
        #[serde(default)]
        delay_minutes: i64,
    },
    SendEmail {
        to: String,
        subject: String,
        body: String,
    },
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Log {
        #[serde(default)]
        message: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateSocialPost { .. } => "create_social_post",
            Action::SendEmail { .. } => "send_email",
            Action::Webhook { .. } => "webhook",
            Action::Log { .. } => "log",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    /// Higher priorities run first
    pub priority: i32,
    pub is_active: bool,
    pub run_count: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRuleInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRuleInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_type: Option<TriggerType>,
    pub trigger_conditions: Option<Vec<Condition>>,
    pub actions: Option<Vec<Action>>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

/// Something that happened, as seen by the automation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationEvent {
    pub trigger: TriggerType,
    #[serde(default)]
    pub payload: Value,
}

impl AutomationEvent {
    pub fn new(trigger: TriggerType, payload: Value) -> Self {
        Self { trigger, payload }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failed,
    /// Matched, but the rule had nothing to do
    Skipped,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for LogStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(anyhow::anyhow!("Invalid automation log status: {}", s)),
        }
    }
}

/// One execution of one rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: i64,
    pub rule_id: i64,
    pub trigger_type: TriggerType,
    pub status: LogStatus,
    pub payload: Value,
    pub error: Option<String>,
    /// Actions that completed before the rule finished or failed
    pub executed_actions: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_deserializes_by_type_tag() {
        let actions: Vec<Action> = serde_json::from_value(json!([
            {"type": "create_social_post", "platforms": ["twitter"], "template": "New: {{ title }}"},
            {"type": "send_email", "to": "team@example.com", "subject": "Hi", "body": "Body"},
            {"type": "webhook", "url": "https://hooks.example.com/x"},
            {"type": "log"}
        ]))
        .unwrap();

        assert_eq!(actions.len(), 4);
        assert_eq!(
            actions[0],
            Action::CreateSocialPost {
                platforms: vec![SocialPlatform::Twitter],
                template: "New: {{ title }}".into(),
                delay_minutes: 0,
            }
        );
        let kinds: Vec<_> = actions.iter().map(Action::kind).collect();
        assert_eq!(kinds, ["create_social_post", "send_email", "webhook", "log"]);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let parsed = serde_json::from_value::<Action>(json!({"type": "launch_rocket"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_condition_value_defaults_to_null() {
        let condition: Condition =
            serde_json::from_value(json!({"field": "post.slug", "operator": "exists"})).unwrap();
        assert_eq!(condition.operator, ConditionOperator::Exists);
        assert!(condition.value.is_null());
    }

    #[test]
    fn test_trigger_type_strings_match_serde() {
        for trigger in [
            TriggerType::BlogPublished,
            TriggerType::SubscriberCreated,
            TriggerType::SubscriberUnsubscribed,
            TriggerType::CampaignSent,
            TriggerType::SocialPostPublished,
            TriggerType::SocialPostFailed,
            TriggerType::Manual,
        ] {
            let via_serde = serde_json::to_value(trigger).unwrap();
            assert_eq!(via_serde, json!(trigger.as_str()));
            assert_eq!(TriggerType::from_str(trigger.as_str()).unwrap(), trigger);
        }
    }
}
