//! Newsletter service
//!
//! Subscribers and campaigns. Subscribers are stored locally and mirrored
//! to the ESP (Brevo) on a best-effort basis; campaigns are written here in
//! Markdown and handed to the ESP for delivery.
//!
//! Every subscriber holds a random single-use unsubscribe token. Campaign
//! footers link to Beacon's own unsubscribe page with that token, passed
//! to the ESP as the `UNSUBSCRIBE_TOKEN` contact attribute.

use crate::config::SiteConfig;
use crate::db::repositories::{CampaignRepository, SubscriberRepository};
use crate::integrations::{EmailSender, EspCampaign, EspClient, EspContact, IntegrationError, OutgoingEmail};
use crate::models::{
    AutomationEvent, Campaign, CampaignStatus, CreateCampaignInput, ListParams, PagedResult,
    SubscribeInput, Subscriber, SubscriberCounts, SubscriberStatus, TriggerType,
    UpdateCampaignInput,
};
use crate::services::automation::EventDispatcher;
use crate::services::markdown::{html_escape, MarkdownRenderer};
use crate::services::random_hex;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Bytes of randomness in an unsubscribe token (hex encoded to twice that)
const TOKEN_BYTES: usize = 32;

/// Placeholder in stored campaign HTML, replaced when the campaign is sent
pub const UNSUBSCRIBE_PLACEHOLDER: &str = "{{unsubscribe_url}}";

/// Brevo merge tag for the per-contact unsubscribe token
const ESP_TOKEN_MERGE_TAG: &str = "{{ contact.UNSUBSCRIBE_TOKEN }}";

/// Subscribers pushed per `sync_pending` call
const SYNC_BATCH: i64 = 100;

/// Error types for newsletter operations
#[derive(Debug, thiserror::Error)]
pub enum NewsletterServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Another send already claimed the campaign
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Email provider error: {0}")]
    External(#[from] IntegrationError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// What `subscribe` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeOutcome {
    Created,
    Resubscribed,
    AlreadySubscribed,
}

/// Result of an ESP sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
}

pub struct NewsletterService {
    subscribers: Arc<dyn SubscriberRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    esp: Arc<dyn EspClient>,
    mailer: Arc<dyn EmailSender>,
    events: Arc<dyn EventDispatcher>,
    renderer: MarkdownRenderer,
    site: SiteConfig,
}

impl NewsletterService {
    pub fn new(
        subscribers: Arc<dyn SubscriberRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        esp: Arc<dyn EspClient>,
        mailer: Arc<dyn EmailSender>,
        events: Arc<dyn EventDispatcher>,
        renderer: MarkdownRenderer,
        site: SiteConfig,
    ) -> Self {
        Self {
            subscribers,
            campaigns,
            esp,
            mailer,
            events,
            renderer,
            site,
        }
    }

    fn unsubscribe_url(&self, token: &str) -> String {
        format!(
            "{}/unsubscribe?token={}",
            self.site.base_url.trim_end_matches('/'),
            token
        )
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    /// Subscribe an address.
    ///
    /// Active addresses are left alone. Unsubscribed addresses come back
    /// with a fresh token.
    pub async fn subscribe(
        &self,
        input: SubscribeInput,
    ) -> Result<(Subscriber, SubscribeOutcome), NewsletterServiceError> {
        let email = normalize_email(&input.email)?;
        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let source = input
            .source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let existing = self
            .subscribers
            .get_by_email(&email)
            .await
            .context("Failed to look up subscriber")?;

        let (subscriber, outcome) = match existing {
            Some(subscriber) if subscriber.is_active() => {
                return Ok((subscriber, SubscribeOutcome::AlreadySubscribed));
            }
            Some(mut subscriber) => {
                let now = Utc::now();
                subscriber.status = SubscriberStatus::Active;
                subscriber.unsubscribe_token = Some(random_hex(TOKEN_BYTES)?);
                subscriber.subscribed_at = now;
                subscriber.unsubscribed_at = None;
                subscriber.esp_synced_at = None;
                subscriber.esp_sync_error = None;
                if name.is_some() {
                    subscriber.name = name;
                }
                if source.is_some() {
                    subscriber.source = source;
                }
                let updated = self
                    .subscribers
                    .update(&subscriber)
                    .await
                    .context("Failed to re-activate subscriber")?;
                (updated, SubscribeOutcome::Resubscribed)
            }
            None => {
                let subscriber = Subscriber::new(email, name, source, random_hex(TOKEN_BYTES)?);
                let created = self
                    .subscribers
                    .create(&subscriber)
                    .await
                    .context("Failed to create subscriber")?;
                (created, SubscribeOutcome::Created)
            }
        };

        tracing::info!(id = subscriber.id, outcome = ?outcome, "Subscriber added");
        self.events.dispatch(AutomationEvent::new(
            TriggerType::SubscriberCreated,
            json!({
                "id": subscriber.id,
                "email": subscriber.email,
                "name": subscriber.name,
                "source": subscriber.source,
                "resubscribed": outcome == SubscribeOutcome::Resubscribed,
            }),
        ));

        let subscriber = self.sync_subscriber(subscriber).await?;
        self.send_welcome(&subscriber).await;
        Ok((subscriber, outcome))
    }

    /// Unsubscribe by token. Tokens work once.
    pub async fn unsubscribe(&self, token: &str) -> Result<Subscriber, NewsletterServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(NewsletterServiceError::NotFound("unsubscribe token".to_string()));
        }

        let subscriber = self
            .subscribers
            .consume_unsubscribe_token(token, Utc::now())
            .await
            .context("Failed to consume unsubscribe token")?
            .ok_or_else(|| NewsletterServiceError::NotFound("unsubscribe token".to_string()))?;

        tracing::info!(id = subscriber.id, "Subscriber unsubscribed");
        self.events.dispatch(AutomationEvent::new(
            TriggerType::SubscriberUnsubscribed,
            json!({
                "id": subscriber.id,
                "email": subscriber.email,
                "name": subscriber.name,
            }),
        ));

        match self.esp.unsubscribe_contact(&subscriber.email).await {
            Ok(()) | Err(IntegrationError::NotConfigured(_)) => {}
            Err(e) => tracing::warn!(id = subscriber.id, "Failed to unsubscribe contact at ESP: {}", e),
        }
        Ok(subscriber)
    }

    pub async fn get_subscriber(&self, id: i64) -> Result<Subscriber, NewsletterServiceError> {
        self.subscribers
            .get_by_id(id)
            .await
            .context("Failed to get subscriber")?
            .ok_or_else(|| NewsletterServiceError::NotFound(format!("subscriber {}", id)))
    }

    pub async fn list_subscribers(
        &self,
        params: ListParams,
        status: Option<SubscriberStatus>,
    ) -> Result<PagedResult<Subscriber>, NewsletterServiceError> {
        let (items, total) = self
            .subscribers
            .list(&params, status)
            .await
            .context("Failed to list subscribers")?;
        Ok(PagedResult::new(items, total, &params))
    }

    pub async fn delete_subscriber(&self, id: i64) -> Result<(), NewsletterServiceError> {
        self.get_subscriber(id).await?;
        self.subscribers
            .delete(id)
            .await
            .context("Failed to delete subscriber")?;
        Ok(())
    }

    pub async fn counts(&self) -> Result<SubscriberCounts, NewsletterServiceError> {
        Ok(self
            .subscribers
            .counts()
            .await
            .context("Failed to count subscribers")?)
    }

    /// Push subscribers the ESP has not seen yet
    pub async fn sync_pending(&self) -> Result<SyncReport, NewsletterServiceError> {
        let pending = self
            .subscribers
            .list_unsynced(SYNC_BATCH)
            .await
            .context("Failed to list unsynced subscribers")?;

        let mut report = SyncReport::default();
        for subscriber in pending {
            let synced = self.sync_subscriber(subscriber).await?;
            if synced.esp_synced_at.is_some() {
                report.synced += 1;
            } else {
                report.failed += 1;
            }
        }
        if report.synced + report.failed > 0 {
            tracing::info!(synced = report.synced, failed = report.failed, "ESP sync finished");
        }
        Ok(report)
    }

    /// Mirror one subscriber to the ESP and record the outcome on the row.
    /// ESP failures are recorded, never returned.
    async fn sync_subscriber(&self, mut subscriber: Subscriber) -> Result<Subscriber, NewsletterServiceError> {
        let contact = EspContact {
            email: subscriber.email.clone(),
            name: subscriber.name.clone(),
            unsubscribe_token: subscriber.unsubscribe_token.clone(),
        };

        match self.esp.upsert_contact(&contact).await {
            Ok(contact_id) => {
                let now = Utc::now();
                self.subscribers
                    .record_sync(subscriber.id, Some(&contact_id), Some(now), None)
                    .await
                    .context("Failed to record ESP sync")?;
                subscriber.esp_contact_id = Some(contact_id);
                subscriber.esp_synced_at = Some(now);
                subscriber.esp_sync_error = None;
            }
            Err(IntegrationError::NotConfigured(what)) => {
                tracing::debug!("{} not configured, subscriber {} left unsynced", what, subscriber.id);
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(id = subscriber.id, "ESP contact sync failed: {}", error);
                self.subscribers
                    .record_sync(subscriber.id, subscriber.esp_contact_id.as_deref(), None, Some(&error))
                    .await
                    .context("Failed to record ESP sync error")?;
                subscriber.esp_sync_error = Some(error);
            }
        }
        Ok(subscriber)
    }

    async fn send_welcome(&self, subscriber: &Subscriber) {
        if !self.mailer.is_configured() {
            return;
        }
        let Some(token) = subscriber.unsubscribe_token.as_deref() else {
            return;
        };
        let unsubscribe = self.unsubscribe_url(token);
        let greeting = subscriber
            .name
            .as_deref()
            .map(|n| format!("Hi {},", n))
            .unwrap_or_else(|| "Hi,".to_string());

        let email = OutgoingEmail {
            to: subscriber.email.clone(),
            subject: format!("Welcome to the {} newsletter", self.site.name),
            text: format!(
                "{}\n\nThanks for subscribing to {}. You'll hear from us when there's something worth reading.\n\nUnsubscribe: {}\n",
                greeting, self.site.name, unsubscribe
            ),
            html: Some(format!(
                "<p>{}</p><p>Thanks for subscribing to {}. You'll hear from us when there's something worth reading.</p>\
                 <p style=\"font-size:12px\"><a href=\"{}\">Unsubscribe</a></p>",
                html_escape(&greeting),
                html_escape(&self.site.name),
                html_escape(&unsubscribe)
            )),
        };
        if let Err(e) = self.mailer.send(email).await {
            tracing::warn!(id = subscriber.id, "Failed to send welcome email: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Campaigns
    // ------------------------------------------------------------------

    pub async fn create_campaign(
        &self,
        input: CreateCampaignInput,
    ) -> Result<Campaign, NewsletterServiceError> {
        validate_campaign(&input.subject, &input.content)?;
        let html = self.campaign_html(&input.content);
        let mut campaign = Campaign::new(input.subject.trim().to_string(), input.content, html);
        campaign.preview_text = input
            .preview_text
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(self
            .campaigns
            .create(&campaign)
            .await
            .context("Failed to create campaign")?)
    }

    pub async fn get_campaign(&self, id: i64) -> Result<Campaign, NewsletterServiceError> {
        self.campaigns
            .get_by_id(id)
            .await
            .context("Failed to get campaign")?
            .ok_or_else(|| NewsletterServiceError::NotFound(format!("campaign {}", id)))
    }

    pub async fn list_campaigns(
        &self,
        params: ListParams,
        status: Option<CampaignStatus>,
    ) -> Result<PagedResult<Campaign>, NewsletterServiceError> {
        let (items, total) = self
            .campaigns
            .list(&params, status)
            .await
            .context("Failed to list campaigns")?;
        Ok(PagedResult::new(items, total, &params))
    }

    pub async fn update_campaign(
        &self,
        id: i64,
        input: UpdateCampaignInput,
    ) -> Result<Campaign, NewsletterServiceError> {
        let mut campaign = self.editable_campaign(id).await?;

        if let Some(subject) = input.subject {
            campaign.subject = subject.trim().to_string();
        }
        if let Some(preview) = input.preview_text {
            campaign.preview_text = Some(preview.trim().to_string()).filter(|p| !p.is_empty());
        }
        if let Some(content) = input.content {
            campaign.content_html = self.campaign_html(&content);
            campaign.content = content;
        }
        validate_campaign(&campaign.subject, &campaign.content)?;

        Ok(self
            .campaigns
            .update(&campaign)
            .await
            .context("Failed to update campaign")?)
    }

    pub async fn delete_campaign(&self, id: i64) -> Result<(), NewsletterServiceError> {
        self.editable_campaign(id).await?;
        self.campaigns
            .delete(id)
            .await
            .context("Failed to delete campaign")?;
        Ok(())
    }

    pub async fn schedule_campaign(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<Campaign, NewsletterServiceError> {
        if at <= Utc::now() {
            return Err(NewsletterServiceError::ValidationError(
                "Scheduled time must be in the future".to_string(),
            ));
        }
        let mut campaign = self.editable_campaign(id).await?;
        campaign.status = CampaignStatus::Scheduled;
        campaign.scheduled_at = Some(at);
        campaign.retry_count = 0;
        campaign.last_error = None;
        campaign.next_attempt_at = None;

        Ok(self
            .campaigns
            .update(&campaign)
            .await
            .context("Failed to schedule campaign")?)
    }

    /// Send immediately. A failed send leaves the campaign `failed` and
    /// returns the error.
    pub async fn send_now(&self, id: i64) -> Result<Campaign, NewsletterServiceError> {
        let campaign = self.get_campaign(id).await?;
        if !campaign.status.is_editable() {
            return Err(NewsletterServiceError::Conflict(format!(
                "Campaign is already {}",
                campaign.status
            )));
        }

        match self.deliver(campaign).await {
            Ok(sent) => Ok(sent),
            Err(NewsletterServiceError::External(e)) => {
                self.record_send_failure(id, e.to_string(), None).await?;
                Err(NewsletterServiceError::External(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Send a campaign the scheduler found due
    pub async fn send_scheduled(&self, campaign: Campaign) -> Result<Campaign, NewsletterServiceError> {
        self.deliver(campaign).await
    }

    /// Store a failed send. With `retry_at` the campaign goes back to
    /// `scheduled`; without it the campaign is `failed`.
    pub async fn record_send_failure(
        &self,
        id: i64,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign, NewsletterServiceError> {
        let mut campaign = self.get_campaign(id).await?;
        campaign.retry_count += 1;
        campaign.last_error = Some(error);
        campaign.next_attempt_at = retry_at;
        campaign.status = if retry_at.is_some() {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Failed
        };
        Ok(self
            .campaigns
            .update(&campaign)
            .await
            .context("Failed to record campaign failure")?)
    }

    /// Put campaigns stuck in `sending` since before `cutoff` back in the
    /// queue. A send interrupted mid-flight otherwise stays claimed forever.
    pub async fn requeue_stale_sends(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, NewsletterServiceError> {
        let requeued = self
            .campaigns
            .requeue_stale_sending(cutoff)
            .await
            .context("Failed to requeue stale campaigns")?;
        if requeued > 0 {
            tracing::warn!(requeued, "Requeued campaigns left in sending");
        }
        Ok(requeued)
    }

    pub async fn list_due_campaigns(&self, limit: i64) -> Result<Vec<Campaign>, NewsletterServiceError> {
        Ok(self
            .campaigns
            .list_due(Utc::now(), limit)
            .await
            .context("Failed to list due campaigns")?)
    }

    /// Pull open, click and unsubscribe totals from the ESP
    pub async fn refresh_analytics(&self, id: i64) -> Result<Campaign, NewsletterServiceError> {
        let campaign = self.get_campaign(id).await?;
        let external_id = campaign.external_campaign_id.as_deref().ok_or_else(|| {
            NewsletterServiceError::ValidationError("Campaign has not been sent".to_string())
        })?;

        let stats = self.esp.campaign_stats(external_id).await?;
        self.campaigns
            .update_stats(id, stats)
            .await
            .context("Failed to store campaign stats")?;
        self.get_campaign(id).await
    }

    async fn editable_campaign(&self, id: i64) -> Result<Campaign, NewsletterServiceError> {
        let campaign = self.get_campaign(id).await?;
        if !campaign.status.is_editable() {
            return Err(NewsletterServiceError::ValidationError(format!(
                "A {} campaign cannot be changed",
                campaign.status
            )));
        }
        Ok(campaign)
    }

    /// Claim, create on the ESP and send
    async fn deliver(&self, mut campaign: Campaign) -> Result<Campaign, NewsletterServiceError> {
        let recipients = self
            .subscribers
            .count_active()
            .await
            .context("Failed to count subscribers")?;
        if recipients == 0 {
            return Err(NewsletterServiceError::ValidationError(
                "There are no active subscribers".to_string(),
            ));
        }

        let claimed = self
            .campaigns
            .claim_for_sending(campaign.id, campaign.status)
            .await
            .context("Failed to claim campaign")?;
        if !claimed {
            return Err(NewsletterServiceError::Conflict(format!(
                "Campaign {} is already being sent",
                campaign.id
            )));
        }
        campaign.status = CampaignStatus::Sending;

        // Retries reuse the ESP campaign created by an earlier attempt
        let external_id = match campaign.external_campaign_id.clone() {
            Some(id) => id,
            None => {
                let html = campaign
                    .content_html
                    .replace(UNSUBSCRIBE_PLACEHOLDER, &self.unsubscribe_url(ESP_TOKEN_MERGE_TAG));
                let id = self
                    .esp
                    .create_campaign(&EspCampaign {
                        name: format!("{} #{}", campaign.subject, campaign.id),
                        subject: campaign.subject.clone(),
                        preview_text: campaign.preview_text.clone(),
                        html,
                    })
                    .await?;
                campaign.external_campaign_id = Some(id.clone());
                self.campaigns
                    .update(&campaign)
                    .await
                    .context("Failed to store ESP campaign id")?;
                id
            }
        };

        self.esp.send_campaign(&external_id).await?;

        campaign.status = CampaignStatus::Sent;
        campaign.sent_at = Some(Utc::now());
        campaign.recipient_count = recipients;
        campaign.last_error = None;
        campaign.next_attempt_at = None;
        let sent = self
            .campaigns
            .update(&campaign)
            .await
            .context("Failed to mark campaign sent")?;

        tracing::info!(id = sent.id, recipients, external_id = %external_id, "Campaign sent");
        self.events.dispatch(AutomationEvent::new(
            TriggerType::CampaignSent,
            json!({
                "id": sent.id,
                "subject": sent.subject,
                "recipient_count": sent.recipient_count,
                "external_campaign_id": sent.external_campaign_id,
            }),
        ));
        Ok(sent)
    }

    /// Rendered Markdown plus the unsubscribe footer
    fn campaign_html(&self, content: &str) -> String {
        format!(
            "{}\n<hr>\n<p style=\"font-size:12px;color:#666\">You are receiving this because you subscribed to {}. \
             <a href=\"{}\">Unsubscribe</a></p>\n",
            self.renderer.render(content),
            html_escape(&self.site.name),
            UNSUBSCRIBE_PLACEHOLDER
        )
    }
}

/// Lowercase and sanity-check an email address
pub fn normalize_email(raw: &str) -> Result<String, NewsletterServiceError> {
    let email = raw.trim().to_lowercase();
    let pattern = regex::Regex::new(r"^[^\s@]+@[a-z0-9-]+(\.[a-z0-9-]+)+$")
        .context("Invalid email pattern")?;

    if email.len() > 254 || !pattern.is_match(&email) {
        return Err(NewsletterServiceError::ValidationError(format!(
            "Invalid email address: {}",
            raw.trim()
        )));
    }
    Ok(email)
}

fn validate_campaign(subject: &str, content: &str) -> Result<(), NewsletterServiceError> {
    if subject.trim().is_empty() {
        return Err(NewsletterServiceError::ValidationError(
            "Subject cannot be empty".to_string(),
        ));
    }
    if content.trim().is_empty() {
        return Err(NewsletterServiceError::ValidationError(
            "Content cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::db::repositories::{SqlxCampaignRepository, SqlxSubscriberRepository};
    use crate::services::test_support::{FakeEsp, InboxMailer, RecordingDispatcher};
    use proptest::prelude::*;

    struct Fixture {
        service: NewsletterService,
        esp: Arc<FakeEsp>,
        mailer: Arc<InboxMailer>,
        events: Arc<RecordingDispatcher>,
    }

    async fn setup(esp: FakeEsp) -> Fixture {
        let pool = migrated_pool().await;
        let esp = Arc::new(esp);
        let mailer = Arc::new(InboxMailer::default());
        let events = Arc::new(RecordingDispatcher::default());
        let site = SiteConfig {
            name: "Beacon".into(),
            base_url: "https://example.com".into(),
            description: String::new(),
        };
        let service = NewsletterService::new(
            SqlxSubscriberRepository::boxed(pool.clone()),
            SqlxCampaignRepository::boxed(pool),
            esp.clone(),
            mailer.clone(),
            events.clone(),
            MarkdownRenderer::new(),
            site,
        );
        Fixture {
            service,
            esp,
            mailer,
            events,
        }
    }

    fn subscribe_input(email: &str) -> SubscribeInput {
        SubscribeInput {
            email: email.into(),
            name: Some("Ada".into()),
            source: Some("footer".into()),
        }
    }

    fn campaign_input() -> CreateCampaignInput {
        CreateCampaignInput {
            subject: "October update".into(),
            preview_text: None,
            content: "## News\n\nWe shipped things.".into(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_creates_syncs_and_welcomes() {
        let fx = setup(FakeEsp::default()).await;
        let (subscriber, outcome) = fx
            .service
            .subscribe(subscribe_input("  Ada@Example.COM "))
            .await
            .unwrap();

        assert_eq!(outcome, SubscribeOutcome::Created);
        assert_eq!(subscriber.email, "ada@example.com");
        let token = subscriber.unsubscribe_token.clone().unwrap();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(subscriber.esp_contact_id.as_deref(), Some("contact-1"));
        let contacts = fx.esp.contacts.lock().unwrap().clone();
        assert_eq!(contacts[0].unsubscribe_token, Some(token.clone()));

        let welcome = fx.mailer.sent.lock().unwrap().clone();
        assert_eq!(welcome.len(), 1);
        assert!(welcome[0].text.contains(&format!("https://example.com/unsubscribe?token={}", token)));
        assert_eq!(fx.events.triggers(), vec![TriggerType::SubscriberCreated]);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent_for_active_addresses() {
        let fx = setup(FakeEsp::default()).await;
        let (first, _) = fx.service.subscribe(subscribe_input("a@example.com")).await.unwrap();
        let (second, outcome) = fx.service.subscribe(subscribe_input("A@example.com")).await.unwrap();

        assert_eq!(outcome, SubscribeOutcome::AlreadySubscribed);
        assert_eq!(first.id, second.id);
        assert_eq!(fx.events.triggers().len(), 1);
        assert_eq!(fx.service.counts().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_token_is_single_use() {
        let fx = setup(FakeEsp::default()).await;
        let (subscriber, _) = fx.service.subscribe(subscribe_input("b@example.com")).await.unwrap();
        let token = subscriber.unsubscribe_token.unwrap();

        let gone = fx.service.unsubscribe(&token).await.unwrap();
        assert_eq!(gone.status, SubscriberStatus::Unsubscribed);
        assert!(gone.unsubscribed_at.is_some());
        assert_eq!(fx.esp.unsubscribed.lock().unwrap().clone(), vec!["b@example.com"]);

        assert!(matches!(
            fx.service.unsubscribe(&token).await,
            Err(NewsletterServiceError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.unsubscribe("not-a-token").await,
            Err(NewsletterServiceError::NotFound(_))
        ));
        assert_eq!(
            fx.events.triggers(),
            vec![TriggerType::SubscriberCreated, TriggerType::SubscriberUnsubscribed]
        );
    }

    #[tokio::test]
    async fn test_resubscribe_issues_fresh_token() {
        let fx = setup(FakeEsp::default()).await;
        let (subscriber, _) = fx.service.subscribe(subscribe_input("c@example.com")).await.unwrap();
        let old_token = subscriber.unsubscribe_token.unwrap();
        fx.service.unsubscribe(&old_token).await.unwrap();
        assert!(fx.esp.is_blacklisted("c@example.com"));

        let (back, outcome) = fx.service.subscribe(subscribe_input("c@example.com")).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Resubscribed);
        assert!(back.is_active());
        assert_ne!(back.unsubscribe_token.as_deref(), Some(old_token.as_str()));
        assert!(back.unsubscribed_at.is_none());
        // The ESP must mail the address again
        assert!(!fx.esp.is_blacklisted("c@example.com"));
        assert!(back.esp_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_sending_campaign_is_requeued() {
        let fx = setup(FakeEsp::default()).await;
        fx.service.subscribe(subscribe_input("h@example.com")).await.unwrap();
        let campaign = fx.service.create_campaign(campaign_input()).await.unwrap();
        assert!(fx
            .service
            .campaigns
            .claim_for_sending(campaign.id, CampaignStatus::Draft)
            .await
            .unwrap());

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(fx.service.requeue_stale_sends(hour_ago).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(fx.service.requeue_stale_sends(Utc::now()).await.unwrap(), 1);
        let due = fx.service.list_due_campaigns(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, CampaignStatus::Scheduled);

        let sent = fx.service.send_scheduled(due[0].clone()).await.unwrap();
        assert_eq!(sent.status, CampaignStatus::Sent);
    }

    #[tokio::test]
    async fn test_campaign_send_now() {
        let fx = setup(FakeEsp::default()).await;
        fx.service.subscribe(subscribe_input("d@example.com")).await.unwrap();
        fx.service.subscribe(subscribe_input("e@example.com")).await.unwrap();

        let campaign = fx.service.create_campaign(campaign_input()).await.unwrap();
        assert!(campaign.content_html.contains(UNSUBSCRIBE_PLACEHOLDER));

        let sent = fx.service.send_now(campaign.id).await.unwrap();
        assert_eq!(sent.status, CampaignStatus::Sent);
        assert_eq!(sent.recipient_count, 2);
        assert_eq!(sent.external_campaign_id.as_deref(), Some("101"));
        assert!(sent.sent_at.is_some());

        let created = fx.esp.campaigns.lock().unwrap().clone();
        assert!(created[0]
            .html
            .contains("https://example.com/unsubscribe?token={{ contact.UNSUBSCRIBE_TOKEN }}"));
        assert!(fx.events.triggers().contains(&TriggerType::CampaignSent));

        assert!(matches!(
            fx.service.send_now(campaign.id).await,
            Err(NewsletterServiceError::Conflict(_))
        ));
        assert!(fx
            .service
            .update_campaign(campaign.id, UpdateCampaignInput::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_send_is_recorded() {
        let fx = setup(FakeEsp::failing_sends()).await;
        fx.service.subscribe(subscribe_input("f@example.com")).await.unwrap();
        let campaign = fx.service.create_campaign(campaign_input()).await.unwrap();

        let result = fx.service.send_now(campaign.id).await;
        assert!(matches!(result, Err(NewsletterServiceError::External(_))));

        let stored = fx.service.get_campaign(campaign.id).await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.external_campaign_id.is_some());
        assert!(stored.last_error.unwrap().contains("sender not verified"));
    }

    #[tokio::test]
    async fn test_send_requires_subscribers() {
        let fx = setup(FakeEsp::default()).await;
        let campaign = fx.service.create_campaign(campaign_input()).await.unwrap();
        assert!(matches!(
            fx.service.send_now(campaign.id).await,
            Err(NewsletterServiceError::ValidationError(_))
        ));
        assert_eq!(
            fx.service.get_campaign(campaign.id).await.unwrap().status,
            CampaignStatus::Draft
        );
    }

    #[tokio::test]
    async fn test_schedule_and_refresh_analytics() {
        let fx = setup(FakeEsp::default()).await;
        fx.service.subscribe(subscribe_input("g@example.com")).await.unwrap();
        let campaign = fx.service.create_campaign(campaign_input()).await.unwrap();

        assert!(fx
            .service
            .schedule_campaign(campaign.id, Utc::now() - chrono::Duration::hours(1))
            .await
            .is_err());
        let scheduled = fx
            .service
            .schedule_campaign(campaign.id, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(scheduled.status, CampaignStatus::Scheduled);

        assert!(matches!(
            fx.service.refresh_analytics(campaign.id).await,
            Err(NewsletterServiceError::ValidationError(_))
        ));

        fx.service.send_now(campaign.id).await.unwrap();
        let refreshed = fx.service.refresh_analytics(campaign.id).await.unwrap();
        assert_eq!(refreshed.open_count, 40);
        assert_eq!(refreshed.click_count, 12);
        assert_eq!(refreshed.unsubscribe_count, 1);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" Foo@Bar.io ").unwrap(), "foo@bar.io");
        for bad in ["", "no-at-sign", "@example.com", "a@b", "a@@b.com", "a b@c.com", "a@.com", "a@b..com"] {
            assert!(normalize_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn prop_valid_addresses_normalize_to_lowercase(
            local in "[A-Za-z0-9._+-]{1,20}",
            domain in "[A-Za-z0-9-]{1,15}",
            tld in "[A-Za-z]{2,6}",
        ) {
            let raw = format!("{}@{}.{}", local, domain, tld);
            let normalized = normalize_email(&raw).unwrap();
            prop_assert_eq!(normalized, raw.to_lowercase());
        }
    }
}
