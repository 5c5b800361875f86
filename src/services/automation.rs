//! Automation engine
//!
//! Rules react to domain events (a post going live, a new subscriber, a
//! failed social publish). Each rule carries a trigger type, a list of
//! conditions evaluated against the event payload and an ordered list of
//! actions. Services publish events through [`EventDispatcher`]; the engine
//! runs matching rules in the background and logs every run.
//!
//! The engine talks to repositories directly instead of other services, so
//! services can depend on it without forming a cycle.

use crate::db::repositories::{AutomationRepository, SocialPostRepository};
use crate::integrations::{EmailSender, OutgoingEmail, REQUEST_TIMEOUT};
use crate::models::{
    Action, AutomationEvent, AutomationLog, AutomationRule, Condition, ConditionOperator,
    CreateRuleInput, ListParams, LogStatus, PagedResult, SocialPost, SocialPostStatus,
    TriggerType, UpdateRuleInput,
};
use crate::services::markdown::truncate_words;
use anyhow::{anyhow, Context};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Longest delay a `create_social_post` action may ask for (one year)
pub const MAX_DELAY_MINUTES: i64 = 525_600;

/// Error types for automation operations
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("Automation rule not found: {0}")]
    NotFound(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Fire-and-forget sink for domain events
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: AutomationEvent);
}

/// Dispatcher that drops every event
pub struct NoopDispatcher;

impl EventDispatcher for NoopDispatcher {
    fn dispatch(&self, _event: AutomationEvent) {}
}

/// Summary of one `run`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub matched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct AutomationEngine {
    repo: Arc<dyn AutomationRepository>,
    social_repo: Arc<dyn SocialPostRepository>,
    mailer: Arc<dyn EmailSender>,
    http: reqwest::Client,
}

impl AutomationEngine {
    pub fn new(
        repo: Arc<dyn AutomationRepository>,
        social_repo: Arc<dyn SocialPostRepository>,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            repo,
            social_repo,
            mailer,
            http,
        }
    }

    // ------------------------------------------------------------------
    // Rule management
    // ------------------------------------------------------------------

    pub async fn create_rule(&self, input: CreateRuleInput) -> Result<AutomationRule, AutomationError> {
        validate_rule(&input.name, &input.actions)?;

        let now = Utc::now();
        let rule = AutomationRule {
            id: 0,
            name: input.name.trim().to_string(),
            description: input.description,
            trigger_type: input.trigger_type,
            trigger_conditions: input.trigger_conditions,
            actions: input.actions,
            priority: input.priority,
            is_active: input.is_active,
            run_count: 0,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };
        Ok(self
            .repo
            .create_rule(&rule)
            .await
            .context("Failed to create automation rule")?)
    }

    pub async fn get_rule(&self, id: i64) -> Result<AutomationRule, AutomationError> {
        self.repo
            .get_rule(id)
            .await
            .context("Failed to get automation rule")?
            .ok_or(AutomationError::NotFound(id))
    }

    pub async fn list_rules(&self) -> Result<Vec<AutomationRule>, AutomationError> {
        Ok(self.repo.list_rules().await.context("Failed to list rules")?)
    }

    pub async fn update_rule(
        &self,
        id: i64,
        input: UpdateRuleInput,
    ) -> Result<AutomationRule, AutomationError> {
        let mut rule = self.get_rule(id).await?;

        if let Some(name) = input.name {
            rule.name = name.trim().to_string();
        }
        if let Some(description) = input.description {
            rule.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(trigger) = input.trigger_type {
            rule.trigger_type = trigger;
        }
        if let Some(conditions) = input.trigger_conditions {
            rule.trigger_conditions = conditions;
        }
        if let Some(actions) = input.actions {
            rule.actions = actions;
        }
        if let Some(priority) = input.priority {
            rule.priority = priority;
        }
        if let Some(active) = input.is_active {
            rule.is_active = active;
        }

        validate_rule(&rule.name, &rule.actions)?;
        Ok(self
            .repo
            .update_rule(&rule)
            .await
            .context("Failed to update automation rule")?)
    }

    /// Flip a rule between active and inactive
    pub async fn toggle_rule(&self, id: i64) -> Result<AutomationRule, AutomationError> {
        let mut rule = self.get_rule(id).await?;
        rule.is_active = !rule.is_active;
        Ok(self
            .repo
            .update_rule(&rule)
            .await
            .context("Failed to toggle automation rule")?)
    }

    pub async fn delete_rule(&self, id: i64) -> Result<(), AutomationError> {
        self.get_rule(id).await?;
        self.repo
            .delete_rule(id)
            .await
            .context("Failed to delete automation rule")?;
        Ok(())
    }

    pub async fn list_logs(
        &self,
        params: ListParams,
        rule_id: Option<i64>,
    ) -> Result<PagedResult<AutomationLog>, AutomationError> {
        let (items, total) = self
            .repo
            .list_logs(&params, rule_id)
            .await
            .context("Failed to list automation logs")?;
        Ok(PagedResult::new(items, total, &params))
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run every active rule for the event's trigger.
    ///
    /// Rules run in `priority DESC, id ASC` order. A rule stops at its
    /// first failing action; later rules still run.
    pub async fn run(&self, event: &AutomationEvent) -> Result<RunReport, AutomationError> {
        let rules = self
            .repo
            .list_active_for_trigger(event.trigger)
            .await
            .context("Failed to load automation rules")?;

        let mut report = RunReport::default();
        for rule in rules {
            if !conditions_match(&rule.trigger_conditions, &event.payload) {
                continue;
            }
            report.matched += 1;

            let (status, executed, error) = if rule.actions.is_empty() {
                (LogStatus::Skipped, 0, None)
            } else {
                self.execute_rule(&rule, event).await
            };

            match status {
                LogStatus::Success => report.succeeded += 1,
                LogStatus::Failed => report.failed += 1,
                LogStatus::Skipped => report.skipped += 1,
            }

            if let Some(error) = &error {
                tracing::warn!(rule_id = rule.id, rule = %rule.name, error = %error, "Automation rule failed");
            }

            let now = Utc::now();
            let log = AutomationLog {
                id: 0,
                rule_id: rule.id,
                trigger_type: event.trigger,
                status,
                payload: event.payload.clone(),
                error,
                executed_actions: executed,
                created_at: now,
            };
            self.repo
                .insert_log(&log)
                .await
                .context("Failed to write automation log")?;
            self.repo
                .record_run(rule.id, now)
                .await
                .context("Failed to record rule run")?;
        }

        if report.matched > 0 {
            tracing::info!(
                trigger = %event.trigger,
                matched = report.matched,
                failed = report.failed,
                "Automation rules executed"
            );
        }
        Ok(report)
    }

    async fn execute_rule(
        &self,
        rule: &AutomationRule,
        event: &AutomationEvent,
    ) -> (LogStatus, i32, Option<String>) {
        let mut executed = 0;
        for action in &rule.actions {
            if let Err(e) = self.execute_action(rule, action, event).await {
                let error = format!("{} action failed: {:#}", action.kind(), e);
                return (LogStatus::Failed, executed, Some(error));
            }
            executed += 1;
        }
        (LogStatus::Success, executed, None)
    }

    async fn execute_action(
        &self,
        rule: &AutomationRule,
        action: &Action,
        event: &AutomationEvent,
    ) -> anyhow::Result<()> {
        match action {
            Action::CreateSocialPost {
                platforms,
                template,
                delay_minutes,
            } => {
                let text = render_template(template, event)?;
                let blog_post_id = match event.trigger {
                    TriggerType::BlogPublished => event.payload.get("id").and_then(Value::as_i64),
                    _ => None,
                };

                for platform in platforms {
                    let mut post =
                        SocialPost::new(*platform, truncate_words(&text, platform.char_limit()));
                    post.blog_post_id = blog_post_id;
                    if *delay_minutes > 0 {
                        let at = Duration::try_minutes(*delay_minutes)
                            .and_then(|delay| Utc::now().checked_add_signed(delay))
                            .ok_or_else(|| anyhow!("delay_minutes {} is out of range", delay_minutes))?;
                        post.status = SocialPostStatus::Scheduled;
                        post.scheduled_at = Some(at);
                    }
                    self.social_repo
                        .create(&post)
                        .await
                        .context("Failed to create social post")?;
                }
                Ok(())
            }
            Action::SendEmail { to, subject, body } => {
                let email = OutgoingEmail {
                    to: render_template(to, event)?,
                    subject: render_template(subject, event)?,
                    text: render_template(body, event)?,
                    html: None,
                };
                self.mailer.send(email).await?;
                Ok(())
            }
            Action::Webhook { url, headers } => {
                let body = json!({
                    "rule_id": rule.id,
                    "rule": rule.name,
                    "trigger": event.trigger,
                    "payload": event.payload,
                });
                let mut request = self.http.post(url).json(&body);
                for (name, value) in headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(anyhow!("Webhook returned HTTP {}", response.status()));
                }
                Ok(())
            }
            Action::Log { message } => {
                let message = match message {
                    Some(template) => render_template(template, event)?,
                    None => format!("Rule '{}' fired", rule.name),
                };
                tracing::info!(rule_id = rule.id, trigger = %event.trigger, "{}", message);
                Ok(())
            }
        }
    }
}

impl EventDispatcher for AutomationEngine {
    fn dispatch(&self, event: AutomationEvent) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run(&event).await {
                tracing::error!(trigger = %event.trigger, "Automation run failed: {}", e);
            }
        });
    }
}

fn validate_rule(name: &str, actions: &[Action]) -> Result<(), AutomationError> {
    if name.trim().is_empty() {
        return Err(AutomationError::ValidationError(
            "Rule name cannot be empty".to_string(),
        ));
    }
    for action in actions {
        let problem = match action {
            Action::CreateSocialPost {
                platforms,
                template,
                delay_minutes,
            } => {
                if platforms.is_empty() {
                    Some("create_social_post needs at least one platform")
                } else if template.trim().is_empty() {
                    Some("create_social_post needs a template")
                } else if !(0..=MAX_DELAY_MINUTES).contains(delay_minutes) {
                    Some("delay_minutes must be between 0 and 525600")
                } else {
                    None
                }
            }
            Action::SendEmail { to, subject, .. } if to.trim().is_empty() || subject.trim().is_empty() => {
                Some("send_email needs a recipient and a subject")
            }
            Action::Webhook { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                Some("webhook url must be http(s)")
            }
            _ => None,
        };
        if let Some(problem) = problem {
            return Err(AutomationError::ValidationError(problem.to_string()));
        }
    }
    Ok(())
}

/// Render a `{{ field }}` template against an event payload.
///
/// Object payloads expose their keys at the top level; the whole payload
/// is also available as `payload` and the trigger name as `trigger`.
pub fn render_template(template: &str, event: &AutomationEvent) -> anyhow::Result<String> {
    let mut context = match &event.payload {
        Value::Object(_) => tera::Context::from_value(event.payload.clone())
            .context("Event payload cannot be used as template context")?,
        _ => tera::Context::new(),
    };
    context.insert("payload", &event.payload);
    context.insert("trigger", event.trigger.as_str());

    tera::Tera::one_off(template, &context, false).context("Failed to render template")
}

/// Whether every condition holds for `payload`; no conditions always match
pub fn conditions_match(conditions: &[Condition], payload: &Value) -> bool {
    conditions.iter().all(|c| condition_matches(c, payload))
}

fn condition_matches(condition: &Condition, payload: &Value) -> bool {
    let found = lookup(payload, &condition.field).filter(|v| !v.is_null());
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Exists => {
            let want = expected.as_bool().unwrap_or(true);
            found.is_some() == want
        }
        ConditionOperator::Equals => found.is_some_and(|v| loose_eq(v, expected)),
        ConditionOperator::NotEquals => !found.is_some_and(|v| loose_eq(v, expected)),
        ConditionOperator::Contains => found.is_some_and(|v| match v {
            Value::String(s) => expected
                .as_str()
                .map(|needle| s.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Value::Array(items) => items.iter().any(|item| loose_eq(item, expected)),
            _ => false,
        }),
        ConditionOperator::GreaterThan => {
            found.is_some_and(|v| compare(v, expected) == Some(std::cmp::Ordering::Greater))
        }
        ConditionOperator::LessThan => {
            found.is_some_and(|v| compare(v, expected) == Some(std::cmp::Ordering::Less))
        }
    }
}

/// Resolve a dotted path such as `post.tags.0`
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(payload, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Equality that treats `"5"` and `5` (and `"true"` and `true`) alike
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    match (actual, expected) {
        (Value::String(a), Value::Bool(b)) | (Value::Bool(b), Value::String(a)) => {
            a.eq_ignore_ascii_case(&b.to_string())
        }
        _ => false,
    }
}

/// Numeric comparison when both sides are numbers, string order otherwise
fn compare(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::db::repositories::{
        SocialPostFilter, SqlxAutomationRepository, SqlxSocialPostRepository,
    };
    use crate::models::SocialPlatform;
    use crate::services::test_support::InboxMailer;
    use proptest::prelude::*;

    async fn setup(mailer: Arc<InboxMailer>) -> (AutomationEngine, Arc<dyn SocialPostRepository>) {
        let pool = migrated_pool().await;
        let social_repo = SqlxSocialPostRepository::boxed(pool.clone());
        let engine = AutomationEngine::new(
            SqlxAutomationRepository::boxed(pool),
            social_repo.clone(),
            mailer,
        );
        (engine, social_repo)
    }

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.into(),
            operator,
            value,
        }
    }

    fn rule_input(name: &str, trigger: TriggerType, actions: Vec<Action>) -> CreateRuleInput {
        CreateRuleInput {
            name: name.into(),
            description: None,
            trigger_type: trigger,
            trigger_conditions: Vec::new(),
            actions,
            priority: 0,
            is_active: true,
        }
    }

    #[test]
    fn test_condition_operators() {
        let payload = json!({
            "post": {"title": "Launch Week", "category": "news", "tags": ["rust", "release"], "words": 1200},
            "draft": null
        });

        assert!(conditions_match(&[cond("post.category", ConditionOperator::Equals, json!("news"))], &payload));
        assert!(conditions_match(&[cond("post.category", ConditionOperator::NotEquals, json!("blog"))], &payload));
        assert!(conditions_match(&[cond("post.title", ConditionOperator::Contains, json!("launch"))], &payload));
        assert!(conditions_match(&[cond("post.tags", ConditionOperator::Contains, json!("rust"))], &payload));
        assert!(conditions_match(&[cond("post.words", ConditionOperator::GreaterThan, json!(1000))], &payload));
        assert!(conditions_match(&[cond("post.words", ConditionOperator::LessThan, json!("1500"))], &payload));
        assert!(conditions_match(&[cond("post.tags.1", ConditionOperator::Equals, json!("release"))], &payload));
        assert!(conditions_match(&[cond("post.title", ConditionOperator::Exists, Value::Null)], &payload));
        assert!(!conditions_match(&[cond("draft", ConditionOperator::Exists, Value::Null)], &payload));
        assert!(conditions_match(&[cond("missing", ConditionOperator::Exists, json!(false))], &payload));
        assert!(!conditions_match(&[cond("missing", ConditionOperator::Equals, json!(1))], &payload));
        assert!(conditions_match(&[cond("missing", ConditionOperator::NotEquals, json!(1))], &payload));
        assert!(conditions_match(&[], &payload));
    }

    #[test]
    fn test_render_template_exposes_payload_and_trigger() {
        let event = AutomationEvent::new(
            TriggerType::BlogPublished,
            json!({"title": "Hello", "url": "https://example.com/blog/hello"}),
        );
        let text = render_template("New post: {{ title }} {{ payload.url }} ({{ trigger }})", &event).unwrap();
        assert_eq!(text, "New post: Hello https://example.com/blog/hello (blog_published)");
        assert!(render_template("{{ missing_field }}", &event).is_err());
    }

    #[test]
    fn test_validate_rule() {
        assert!(validate_rule("", &[]).is_err());
        assert!(validate_rule(
            "bad webhook",
            &[Action::Webhook { url: "ftp://x".into(), headers: Default::default() }]
        )
        .is_err());
        assert!(validate_rule(
            "no platforms",
            &[Action::CreateSocialPost { platforms: vec![], template: "x".into(), delay_minutes: 0 }]
        )
        .is_err());
        assert!(validate_rule("ok", &[Action::Log { message: None }]).is_ok());

        let delayed = |delay_minutes| Action::CreateSocialPost {
            platforms: vec![SocialPlatform::Twitter],
            template: "x".into(),
            delay_minutes,
        };
        assert!(validate_rule("negative", &[delayed(-1)]).is_err());
        assert!(validate_rule("too late", &[delayed(MAX_DELAY_MINUTES + 1)]).is_err());
        assert!(validate_rule("huge", &[delayed(i64::MAX)]).is_err());
        assert!(validate_rule("a year", &[delayed(MAX_DELAY_MINUTES)]).is_ok());
    }

    #[tokio::test]
    async fn test_out_of_range_delay_fails_the_run() {
        let (engine, social_repo) = setup(Arc::new(InboxMailer::default())).await;
        let rejected = engine
            .create_rule(rule_input(
                "Far future",
                TriggerType::Manual,
                vec![Action::CreateSocialPost {
                    platforms: vec![SocialPlatform::Twitter],
                    template: "hi".into(),
                    delay_minutes: i64::MAX,
                }],
            ))
            .await;
        assert!(matches!(rejected, Err(AutomationError::ValidationError(_))));

        // Rules stored before the bound existed still reach the engine
        let now = Utc::now();
        let rule = engine
            .repo
            .create_rule(&AutomationRule {
                id: 0,
                name: "Legacy".into(),
                description: None,
                trigger_type: TriggerType::Manual,
                trigger_conditions: Vec::new(),
                actions: vec![Action::CreateSocialPost {
                    platforms: vec![SocialPlatform::Twitter],
                    template: "hi".into(),
                    delay_minutes: i64::MAX,
                }],
                priority: 0,
                is_active: true,
                run_count: 0,
                last_run_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let report = engine
            .run(&AutomationEvent::new(TriggerType::Manual, json!({})))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);

        let logs = engine.list_logs(ListParams::default(), Some(rule.id)).await.unwrap();
        assert_eq!(logs.items[0].status, LogStatus::Failed);
        assert!(logs.items[0].error.as_deref().unwrap_or_default().contains("out of range"));
        let (_, total) = social_repo
            .list(&ListParams::default(), SocialPostFilter::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_run_creates_social_posts_and_logs() {
        let (engine, social_repo) = setup(Arc::new(InboxMailer::default())).await;
        let rule = engine
            .create_rule(rule_input(
                "Cross-post",
                TriggerType::BlogPublished,
                vec![Action::CreateSocialPost {
                    platforms: vec![SocialPlatform::Twitter, SocialPlatform::Linkedin],
                    template: "New on the blog: {{ title }} {{ url }}".into(),
                    delay_minutes: 30,
                }],
            ))
            .await
            .unwrap();

        let event = AutomationEvent::new(
            TriggerType::BlogPublished,
            json!({"id": 42, "title": "Hello", "url": "https://example.com/blog/hello"}),
        );
        let report = engine.run(&event).await.unwrap();
        assert_eq!(report, RunReport { matched: 1, succeeded: 1, failed: 0, skipped: 0 });

        let (posts, total) = social_repo
            .list(&ListParams::default(), SocialPostFilter::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(posts.iter().all(|p| p.status == SocialPostStatus::Scheduled));
        assert!(posts.iter().all(|p| p.content == "New on the blog: Hello https://example.com/blog/hello"));
        assert!(posts.iter().all(|p| p.blog_post_id == Some(42)));

        let stored = engine.get_rule(rule.id).await.unwrap();
        assert_eq!(stored.run_count, 1);
        assert!(stored.last_run_at.is_some());

        let logs = engine.list_logs(ListParams::default(), Some(rule.id)).await.unwrap();
        assert_eq!(logs.total, 1);
        assert_eq!(logs.items[0].status, LogStatus::Success);
        assert_eq!(logs.items[0].executed_actions, 1);
    }

    #[tokio::test]
    async fn test_rule_stops_on_first_failing_action() {
        let mailer = Arc::new(InboxMailer::failing());
        let (engine, _) = setup(mailer).await;
        let rule = engine
            .create_rule(rule_input(
                "Notify",
                TriggerType::SubscriberCreated,
                vec![
                    Action::Log { message: Some("New subscriber {{ email }}".into()) },
                    Action::SendEmail {
                        to: "team@example.com".into(),
                        subject: "New subscriber".into(),
                        body: "{{ email }} joined".into(),
                    },
                    Action::Log { message: None },
                ],
            ))
            .await
            .unwrap();

        let event = AutomationEvent::new(TriggerType::SubscriberCreated, json!({"email": "a@example.com"}));
        let report = engine.run(&event).await.unwrap();
        assert_eq!(report.failed, 1);

        let logs = engine.list_logs(ListParams::default(), Some(rule.id)).await.unwrap();
        assert_eq!(logs.items[0].status, LogStatus::Failed);
        assert_eq!(logs.items[0].executed_actions, 1);
        assert!(logs.items[0].error.as_deref().unwrap_or_default().contains("send_email"));
    }

    #[tokio::test]
    async fn test_conditions_priority_and_skipped_rules() {
        let mailer = Arc::new(InboxMailer::default());
        let (engine, _) = setup(mailer.clone()).await;

        let mut low = rule_input(
            "Low",
            TriggerType::Manual,
            vec![Action::SendEmail { to: "low@example.com".into(), subject: "low".into(), body: "b".into() }],
        );
        low.priority = 1;
        let mut high = rule_input(
            "High",
            TriggerType::Manual,
            vec![Action::SendEmail { to: "high@example.com".into(), subject: "high".into(), body: "b".into() }],
        );
        high.priority = 10;
        let mut filtered = rule_input("Filtered", TriggerType::Manual, vec![Action::Log { message: None }]);
        filtered.trigger_conditions = vec![cond("kind", ConditionOperator::Equals, json!("other"))];
        let empty = rule_input("Empty", TriggerType::Manual, vec![]);
        let mut inactive = rule_input("Inactive", TriggerType::Manual, vec![Action::Log { message: None }]);
        inactive.is_active = false;

        for input in [low, high, filtered, empty, inactive] {
            engine.create_rule(input).await.unwrap();
        }

        let report = engine
            .run(&AutomationEvent::new(TriggerType::Manual, json!({"kind": "test"})))
            .await
            .unwrap();
        assert_eq!(report, RunReport { matched: 3, succeeded: 2, failed: 0, skipped: 1 });

        assert_eq!(mailer.recipients(), vec!["high@example.com", "low@example.com"]);
    }

    #[tokio::test]
    async fn test_toggle_update_and_delete_rule() {
        let (engine, _) = setup(Arc::new(InboxMailer::default())).await;
        let rule = engine
            .create_rule(rule_input("Rule", TriggerType::Manual, vec![Action::Log { message: None }]))
            .await
            .unwrap();

        assert!(!engine.toggle_rule(rule.id).await.unwrap().is_active);
        let updated = engine
            .update_rule(rule.id, UpdateRuleInput { priority: Some(5), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.priority, 5);

        engine.delete_rule(rule.id).await.unwrap();
        assert!(matches!(engine.get_rule(rule.id).await, Err(AutomationError::NotFound(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_equals_and_not_equals_are_complementary(field in "[a-z]{1,8}", value in any::<i64>(), other in any::<i64>()) {
            let payload = json!({ field.clone(): value });
            let eq = conditions_match(&[cond(&field, ConditionOperator::Equals, json!(other))], &payload);
            let ne = conditions_match(&[cond(&field, ConditionOperator::NotEquals, json!(other))], &payload);
            prop_assert_ne!(eq, ne);
            prop_assert_eq!(eq, value as f64 == other as f64);
        }

        #[test]
        fn prop_nested_lookup_finds_value(a in "[a-z]{1,6}", b in "[a-z]{1,6}", text in "[a-zA-Z ]{0,20}") {
            let payload = json!({ a.clone(): { b.clone(): text.clone() } });
            let path = format!("{}.{}", a, b);
            prop_assert_eq!(lookup(&payload, &path), Some(&json!(text)));
        }
    }
}
