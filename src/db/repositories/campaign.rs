//! Newsletter campaign repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Campaign, CampaignStats, CampaignStatus, ListParams};

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, campaign: &Campaign) -> Result<Campaign>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Campaign>>;

    /// Persist every mutable column of `campaign`
    async fn update(&self, campaign: &Campaign) -> Result<Campaign>;

    async fn delete(&self, id: i64) -> Result<()>;

    async fn list(
        &self,
        params: &ListParams,
        status: Option<CampaignStatus>,
    ) -> Result<(Vec<Campaign>, i64)>;

    /// Scheduled campaigns that are due and not waiting out a retry backoff
    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>>;

    /// Atomically move a campaign from `from` to `sending`.
    ///
    /// Returns false when the campaign was not in `from` (already claimed).
    async fn claim_for_sending(&self, id: i64, from: CampaignStatus) -> Result<bool>;

    /// Move `sending` campaigns last touched before `cutoff` back to
    /// `scheduled`. Returns the number requeued.
    async fn requeue_stale_sending(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn update_stats(&self, id: i64, stats: CampaignStats) -> Result<()>;
}

pub struct SqlxCampaignRepository {
    pool: DynDatabasePool,
}

impl SqlxCampaignRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CampaignRepository> {
        Arc::new(Self::new(pool))
    }
}

const CAMPAIGN_COLUMNS: &str = "id, subject, preview_text, content, content_html, status, \
     scheduled_at, sent_at, recipient_count, external_campaign_id, open_count, click_count, \
     unsubscribe_count, retry_count, last_error, next_attempt_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct CampaignRecord {
    id: i64,
    subject: String,
    preview_text: Option<String>,
    content: String,
    content_html: String,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    recipient_count: i64,
    external_campaign_id: Option<String>,
    open_count: i64,
    click_count: i64,
    unsubscribe_count: i64,
    retry_count: i32,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRecord> for Campaign {
    type Error = anyhow::Error;

    fn try_from(r: CampaignRecord) -> Result<Self> {
        Ok(Campaign {
            id: r.id,
            subject: r.subject,
            preview_text: r.preview_text,
            content: r.content,
            content_html: r.content_html,
            status: r.status.parse()?,
            scheduled_at: r.scheduled_at,
            sent_at: r.sent_at,
            recipient_count: r.recipient_count,
            external_campaign_id: r.external_campaign_id,
            open_count: r.open_count,
            click_count: r.click_count,
            unsubscribe_count: r.unsubscribe_count,
            retry_count: r.retry_count,
            last_error: r.last_error,
            next_attempt_at: r.next_attempt_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn convert(records: Vec<CampaignRecord>) -> Result<Vec<Campaign>> {
    records.into_iter().map(Campaign::try_from).collect()
}

#[async_trait]
impl CampaignRepository for SqlxCampaignRepository {
    async fn create(&self, campaign: &Campaign) -> Result<Campaign> {
        let now = Utc::now();
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO newsletter_campaigns (subject, preview_text, content, content_html, \
                 status, scheduled_at, sent_at, recipient_count, external_campaign_id, \
                 open_count, click_count, unsubscribe_count, retry_count, last_error, \
                 next_attempt_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&campaign.subject)
            .bind(&campaign.preview_text)
            .bind(&campaign.content)
            .bind(&campaign.content_html)
            .bind(campaign.status.to_string())
            .bind(campaign.scheduled_at)
            .bind(campaign.sent_at)
            .bind(campaign.recipient_count)
            .bind(&campaign.external_campaign_id)
            .bind(campaign.open_count)
            .bind(campaign.click_count)
            .bind(campaign.unsubscribe_count)
            .bind(campaign.retry_count)
            .bind(&campaign.last_error)
            .bind(campaign.next_attempt_at)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create campaign")?
            .inserted_id()
        });

        Ok(Campaign {
            id,
            created_at: now,
            updated_at: now,
            ..campaign.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Campaign>> {
        let sql = format!(
            "SELECT {} FROM newsletter_campaigns WHERE id = ?",
            CAMPAIGN_COLUMNS
        );
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, CampaignRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get campaign")?
        });
        record.map(Campaign::try_from).transpose()
    }

    async fn update(&self, campaign: &Campaign) -> Result<Campaign> {
        let now = Utc::now();
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE newsletter_campaigns SET subject = ?, preview_text = ?, content = ?, \
                 content_html = ?, status = ?, scheduled_at = ?, sent_at = ?, \
                 recipient_count = ?, external_campaign_id = ?, open_count = ?, \
                 click_count = ?, unsubscribe_count = ?, retry_count = ?, last_error = ?, \
                 next_attempt_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&campaign.subject)
            .bind(&campaign.preview_text)
            .bind(&campaign.content)
            .bind(&campaign.content_html)
            .bind(campaign.status.to_string())
            .bind(campaign.scheduled_at)
            .bind(campaign.sent_at)
            .bind(campaign.recipient_count)
            .bind(&campaign.external_campaign_id)
            .bind(campaign.open_count)
            .bind(campaign.click_count)
            .bind(campaign.unsubscribe_count)
            .bind(campaign.retry_count)
            .bind(&campaign.last_error)
            .bind(campaign.next_attempt_at)
            .bind(now)
            .bind(campaign.id)
            .execute(conn)
            .await
            .context("Failed to update campaign")?;
        });

        Ok(Campaign {
            updated_at: now,
            ..campaign.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM newsletter_campaigns WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete campaign")?;
        });
        Ok(())
    }

    async fn list(
        &self,
        params: &ListParams,
        status: Option<CampaignStatus>,
    ) -> Result<(Vec<Campaign>, i64)> {
        let filter = if status.is_some() { "WHERE status = ?" } else { "" };
        let count_sql = format!("SELECT COUNT(*) FROM newsletter_campaigns {}", filter);
        let list_sql = format!(
            "SELECT {} FROM newsletter_campaigns {} ORDER BY created_at DESC, id DESC \
             LIMIT ? OFFSET ?",
            CAMPAIGN_COLUMNS, filter
        );
        let status = status.map(|s| s.to_string());

        let (records, total) = on_pool!(self.pool, |conn| {
            let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
            let mut list_query = sqlx::query_as::<_, CampaignRecord>(&list_sql);
            if let Some(status) = &status {
                count_query = count_query.bind(status);
                list_query = list_query.bind(status);
            }
            let total = count_query
                .fetch_one(conn)
                .await
                .context("Failed to count campaigns")?;
            let records = list_query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list campaigns")?;
            (records, total)
        });

        Ok((convert(records)?, total))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Campaign>> {
        let sql = format!(
            "SELECT {} FROM newsletter_campaigns WHERE status = 'scheduled' \
             AND scheduled_at <= ? AND (next_attempt_at IS NULL OR next_attempt_at <= ?) \
             ORDER BY scheduled_at ASC, id ASC LIMIT ?",
            CAMPAIGN_COLUMNS
        );
        let records = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, CampaignRecord>(&sql)
                .bind(now)
                .bind(now)
                .bind(limit)
                .fetch_all(conn)
                .await
                .context("Failed to list due campaigns")?
        });
        convert(records)
    }

    async fn claim_for_sending(&self, id: i64, from: CampaignStatus) -> Result<bool> {
        let now = Utc::now();
        let affected = on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE newsletter_campaigns SET status = 'sending', updated_at = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(now)
            .bind(id)
            .bind(from.to_string())
            .execute(conn)
            .await
            .context("Failed to claim campaign")?
            .rows_affected()
        });
        Ok(affected == 1)
    }

    async fn requeue_stale_sending(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now();
        let affected = on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE newsletter_campaigns SET status = 'scheduled', \
                 scheduled_at = COALESCE(scheduled_at, ?), next_attempt_at = NULL, \
                 updated_at = ? WHERE status = 'sending' AND updated_at < ?",
            )
            .bind(now)
            .bind(now)
            .bind(cutoff)
            .execute(conn)
            .await
            .context("Failed to requeue stale campaigns")?
            .rows_affected()
        });
        Ok(affected)
    }

    async fn update_stats(&self, id: i64, stats: CampaignStats) -> Result<()> {
        let now = Utc::now();
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE newsletter_campaigns SET open_count = ?, click_count = ?, \
                 unsubscribe_count = ?, updated_at = ? WHERE id = ?",
            )
            .bind(stats.opens)
            .bind(stats.clicks)
            .bind(stats.unsubscribes)
            .bind(now)
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to update campaign stats")?;
        });
        Ok(())
    }
}
