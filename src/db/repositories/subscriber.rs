//! Newsletter subscriber repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{ListParams, Subscriber, SubscriberCounts, SubscriberStatus};

#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    async fn create(&self, subscriber: &Subscriber) -> Result<Subscriber>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Subscriber>>;

    /// Lookup by (already lowercased) email
    async fn get_by_email(&self, email: &str) -> Result<Option<Subscriber>>;

    async fn get_by_token(&self, token: &str) -> Result<Option<Subscriber>>;

    /// Persist every mutable column of `subscriber`
    async fn update(&self, subscriber: &Subscriber) -> Result<Subscriber>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Flip the subscriber holding `token` to unsubscribed and clear the
    /// token. Returns `None` when no active subscriber holds it, including
    /// when a concurrent request consumed it first.
    async fn consume_unsubscribe_token(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscriber>>;

    async fn list(
        &self,
        params: &ListParams,
        status: Option<SubscriberStatus>,
    ) -> Result<(Vec<Subscriber>, i64)>;

    async fn counts(&self) -> Result<SubscriberCounts>;

    async fn count_active(&self) -> Result<i64>;

    /// Subscribers never pushed to the ESP, oldest first
    async fn list_unsynced(&self, limit: i64) -> Result<Vec<Subscriber>>;

    /// Store the outcome of an ESP sync attempt
    async fn record_sync(
        &self,
        id: i64,
        contact_id: Option<&str>,
        synced_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<()>;
}

pub struct SqlxSubscriberRepository {
    pool: DynDatabasePool,
}

impl SqlxSubscriberRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SubscriberRepository> {
        Arc::new(Self::new(pool))
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM newsletter_subscribers WHERE {} = ?",
            SUBSCRIBER_COLUMNS, clause
        );
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SubscriberRecord>(&sql)
                .bind(value)
                .fetch_optional(conn)
                .await
                .with_context(|| format!("Failed to get subscriber by {}", clause))?
        });
        record.map(Subscriber::try_from).transpose()
    }
}

const SUBSCRIBER_COLUMNS: &str = "id, email, name, status, source, unsubscribe_token, \
     subscribed_at, unsubscribed_at, esp_contact_id, esp_synced_at, esp_sync_error, \
     created_at, updated_at";

#[derive(sqlx::FromRow)]
struct SubscriberRecord {
    id: i64,
    email: String,
    name: Option<String>,
    status: String,
    source: Option<String>,
    unsubscribe_token: Option<String>,
    subscribed_at: DateTime<Utc>,
    unsubscribed_at: Option<DateTime<Utc>>,
    esp_contact_id: Option<String>,
    esp_synced_at: Option<DateTime<Utc>>,
    esp_sync_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriberRecord> for Subscriber {
    type Error = anyhow::Error;

    fn try_from(r: SubscriberRecord) -> Result<Self> {
        Ok(Subscriber {
            id: r.id,
            email: r.email,
            name: r.name,
            status: r.status.parse()?,
            source: r.source,
            unsubscribe_token: r.unsubscribe_token,
            subscribed_at: r.subscribed_at,
            unsubscribed_at: r.unsubscribed_at,
            esp_contact_id: r.esp_contact_id,
            esp_synced_at: r.esp_synced_at,
            esp_sync_error: r.esp_sync_error,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[async_trait]
impl SubscriberRepository for SqlxSubscriberRepository {
    async fn create(&self, subscriber: &Subscriber) -> Result<Subscriber> {
        let now = Utc::now();
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO newsletter_subscribers (email, name, status, source, \
                 unsubscribe_token, subscribed_at, unsubscribed_at, esp_contact_id, \
                 esp_synced_at, esp_sync_error, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&subscriber.email)
            .bind(&subscriber.name)
            .bind(subscriber.status.to_string())
            .bind(&subscriber.source)
            .bind(&subscriber.unsubscribe_token)
            .bind(subscriber.subscribed_at)
            .bind(subscriber.unsubscribed_at)
            .bind(&subscriber.esp_contact_id)
            .bind(subscriber.esp_synced_at)
            .bind(&subscriber.esp_sync_error)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create subscriber")?
            .inserted_id()
        });

        Ok(Subscriber {
            id,
            created_at: now,
            updated_at: now,
            ..subscriber.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM newsletter_subscribers WHERE id = ?",
            SUBSCRIBER_COLUMNS
        );
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SubscriberRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get subscriber")?
        });
        record.map(Subscriber::try_from).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Subscriber>> {
        self.fetch_one_where("email", email).await
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<Subscriber>> {
        self.fetch_one_where("unsubscribe_token", token).await
    }

    async fn update(&self, subscriber: &Subscriber) -> Result<Subscriber> {
        let now = Utc::now();
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE newsletter_subscribers SET email = ?, name = ?, status = ?, source = ?, \
                 unsubscribe_token = ?, subscribed_at = ?, unsubscribed_at = ?, \
                 esp_contact_id = ?, esp_synced_at = ?, esp_sync_error = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&subscriber.email)
            .bind(&subscriber.name)
            .bind(subscriber.status.to_string())
            .bind(&subscriber.source)
            .bind(&subscriber.unsubscribe_token)
            .bind(subscriber.subscribed_at)
            .bind(subscriber.unsubscribed_at)
            .bind(&subscriber.esp_contact_id)
            .bind(subscriber.esp_synced_at)
            .bind(&subscriber.esp_sync_error)
            .bind(now)
            .bind(subscriber.id)
            .execute(conn)
            .await
            .context("Failed to update subscriber")?;
        });

        Ok(Subscriber {
            updated_at: now,
            ..subscriber.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM newsletter_subscribers WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete subscriber")?;
        });
        Ok(())
    }

    async fn consume_unsubscribe_token(
        &self,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Subscriber>> {
        let Some(subscriber) = self.get_by_token(token).await? else {
            return Ok(None);
        };

        // The token predicate makes the transition single-use even when two
        // requests race past the lookup above.
        let affected = on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE newsletter_subscribers SET status = 'unsubscribed', \
                 unsubscribe_token = NULL, unsubscribed_at = ?, updated_at = ? \
                 WHERE id = ? AND unsubscribe_token = ? AND status = 'active'",
            )
            .bind(at)
            .bind(at)
            .bind(subscriber.id)
            .bind(token)
            .execute(conn)
            .await
            .context("Failed to unsubscribe")?
            .rows_affected()
        });

        if affected == 0 {
            return Ok(None);
        }

        Ok(Some(Subscriber {
            status: SubscriberStatus::Unsubscribed,
            unsubscribe_token: None,
            unsubscribed_at: Some(at),
            updated_at: at,
            ..subscriber
        }))
    }

    async fn list(
        &self,
        params: &ListParams,
        status: Option<SubscriberStatus>,
    ) -> Result<(Vec<Subscriber>, i64)> {
        let filter = if status.is_some() { "WHERE status = ?" } else { "" };
        let count_sql = format!("SELECT COUNT(*) FROM newsletter_subscribers {}", filter);
        let list_sql = format!(
            "SELECT {} FROM newsletter_subscribers {} ORDER BY subscribed_at DESC, id DESC \
             LIMIT ? OFFSET ?",
            SUBSCRIBER_COLUMNS, filter
        );
        let status = status.map(|s| s.to_string());

        let (records, total) = on_pool!(self.pool, |conn| {
            let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
            let mut list_query = sqlx::query_as::<_, SubscriberRecord>(&list_sql);
            if let Some(status) = &status {
                count_query = count_query.bind(status);
                list_query = list_query.bind(status);
            }
            let total = count_query
                .fetch_one(conn)
                .await
                .context("Failed to count subscribers")?;
            let records = list_query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list subscribers")?;
            (records, total)
        });

        let items = records
            .into_iter()
            .map(Subscriber::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((items, total))
    }

    async fn counts(&self) -> Result<SubscriberCounts> {
        let rows = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, (String, i64)>(
                "SELECT status, COUNT(*) FROM newsletter_subscribers GROUP BY status",
            )
            .fetch_all(conn)
            .await
            .context("Failed to count subscribers by status")?
        });
        let pending_sync = on_pool!(self.pool, |conn| {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM newsletter_subscribers WHERE esp_synced_at IS NULL",
            )
            .fetch_one(conn)
            .await
            .context("Failed to count unsynced subscribers")?
        });

        let mut counts = SubscriberCounts {
            pending_sync,
            ..SubscriberCounts::default()
        };
        for (status, count) in rows {
            counts.total += count;
            match status.parse::<SubscriberStatus>()? {
                SubscriberStatus::Active => counts.active = count,
                SubscriberStatus::Unsubscribed => counts.unsubscribed = count,
            }
        }
        Ok(counts)
    }

    async fn count_active(&self) -> Result<i64> {
        let count = on_pool!(self.pool, |conn| {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM newsletter_subscribers WHERE status = 'active'",
            )
            .fetch_one(conn)
            .await
            .context("Failed to count active subscribers")?
        });
        Ok(count)
    }

    async fn list_unsynced(&self, limit: i64) -> Result<Vec<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM newsletter_subscribers WHERE esp_synced_at IS NULL \
             AND status = 'active' ORDER BY id ASC LIMIT ?",
            SUBSCRIBER_COLUMNS
        );
        let records = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SubscriberRecord>(&sql)
                .bind(limit)
                .fetch_all(conn)
                .await
                .context("Failed to list unsynced subscribers")?
        });
        records.into_iter().map(Subscriber::try_from).collect()
    }

    async fn record_sync(
        &self,
        id: i64,
        contact_id: Option<&str>,
        synced_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE newsletter_subscribers SET \
                 esp_contact_id = COALESCE(?, esp_contact_id), esp_synced_at = ?, \
                 esp_sync_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(contact_id)
            .bind(synced_at)
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to record ESP sync")?;
        });
        Ok(())
    }
}
