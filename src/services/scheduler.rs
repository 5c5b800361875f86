//! Background scheduler
//!
//! Periodically publishes due social posts, blog posts and newsletter
//! campaigns. Failed items are retried with exponential backoff until
//! `max_retries` attempts have failed.
//!
//! One process runs one scheduler. Ticks never overlap: a tick requested
//! while another is running returns at once with `skipped = true`.
//!
//! Stopping is cooperative. The interval task finishes the item in hand,
//! skips the rest of the tick and exits. Campaigns left `sending` by a
//! crashed process are requeued once they have been idle for
//! `stale_send_seconds`.

use crate::config::SchedulerConfig;
use crate::models::{BlogPost, Campaign, SocialPost};
use crate::services::blog::BlogService;
use crate::services::newsletter::{NewsletterService, NewsletterServiceError};
use crate::services::social::SocialService;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Exponent cap so long retry chains cannot overflow the backoff
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// What to do with an item after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again at this time
    Retry(DateTime<Utc>),
    /// Out of attempts
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub backoff_seconds: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_seconds: config.retry_backoff_seconds,
        }
    }

    /// Decide after the `attempts`-th failed attempt.
    ///
    /// Retries wait `backoff * 2^(attempts-1)`; a zero backoff retries on
    /// the next tick.
    pub fn decide(&self, attempts: i32, now: DateTime<Utc>) -> RetryDecision {
        if attempts >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        let exponent = (attempts.max(1) - 1).min(MAX_BACKOFF_EXPONENT as i32) as u32;
        let delay = self.backoff_seconds.saturating_mul(1u64 << exponent);
        let delay = ChronoDuration::seconds(i64::try_from(delay).unwrap_or(i64::MAX / 1000));
        RetryDecision::Retry(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

/// Per-queue counts for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
}

impl QueueReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.retried + self.failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Another tick was already running; nothing was done
    pub skipped: bool,
    pub social: QueueReport,
    pub blog: QueueReport,
    pub campaigns: QueueReport,
    pub duration_ms: u64,
}

impl TickReport {
    pub fn processed(&self) -> usize {
        self.social.processed() + self.blog.processed() + self.campaigns.processed()
    }
}

/// Counts since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerTotals {
    pub ticks: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub ticking: bool,
    pub interval_seconds: u64,
    pub max_retries: i32,
    pub retry_backoff_seconds: u64,
    pub batch_size: i64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
    pub totals: SchedulerTotals,
}

#[derive(Default)]
struct History {
    last_tick_at: Option<DateTime<Utc>>,
    last_report: Option<TickReport>,
    totals: SchedulerTotals,
}

/// Releases the tick flag when dropped
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The running interval task and its stop signal
struct Worker {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

struct Inner {
    blog: Arc<BlogService>,
    social: Arc<SocialService>,
    newsletter: Arc<NewsletterService>,
    policy: RetryPolicy,
    interval: Duration,
    batch_size: i64,
    stale_send: ChronoDuration,
    ticking: AtomicBool,
    task: Mutex<Option<Worker>>,
    history: Mutex<History>,
}

/// Cheap to clone; clones share one scheduler
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        blog: Arc<BlogService>,
        social: Arc<SocialService>,
        newsletter: Arc<NewsletterService>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                blog,
                social,
                newsletter,
                policy: RetryPolicy::from_config(config),
                interval: Duration::from_secs(config.interval_seconds.max(1)),
                batch_size: config.batch_size.max(1),
                stale_send: ChronoDuration::seconds(
                    i64::try_from(config.stale_send_seconds).unwrap_or(i64::MAX / 1000),
                ),
                ticking: AtomicBool::new(false),
                task: Mutex::new(None),
                history: Mutex::new(History::default()),
            }),
        }
    }

    /// Spawn the interval task. Returns false when it is already running.
    pub fn start(&self) -> bool {
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|worker| !worker.handle.is_finished()) {
            return false;
        }

        let scheduler = self.clone();
        let period = self.inner.interval;
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stopped.changed() => break,
                }
                scheduler.run_tick(&stopped).await;
                if *stopped.borrow() {
                    break;
                }
            }
            tracing::info!("Scheduler stopped");
        });
        *task = Some(Worker { handle, stop });
        tracing::info!(interval_secs = period.as_secs(), "Scheduler started");
        true
    }

    /// Ask the interval task to stop after the item in hand. Returns false
    /// when it was not running.
    pub fn stop(&self) -> bool {
        self.signal_stop().is_some()
    }

    /// Stop and wait for the interval task to exit
    pub async fn shutdown(&self) {
        if let Some(handle) = self.signal_stop() {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task ended abnormally: {}", e);
            }
        }
    }

    fn signal_stop(&self) -> Option<JoinHandle<()>> {
        let worker = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        if worker.handle.is_finished() {
            return None;
        }
        worker.stop.send_replace(true);
        tracing::info!("Scheduler stopping");
        Some(worker.handle)
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn status(&self) -> SchedulerStatus {
        let history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
        SchedulerStatus {
            running: self.is_running(),
            ticking: self.inner.ticking.load(Ordering::Acquire),
            interval_seconds: self.inner.interval.as_secs(),
            max_retries: self.inner.policy.max_retries,
            retry_backoff_seconds: self.inner.policy.backoff_seconds,
            batch_size: self.inner.batch_size,
            last_tick_at: history.last_tick_at,
            last_report: history.last_report.clone(),
            totals: history.totals,
        }
    }

    /// Run one tick now
    pub async fn process_due(&self) -> TickReport {
        let (_keep, never) = watch::channel(false);
        self.run_tick(&never).await
    }

    /// One tick that checks `stop` between items
    async fn run_tick(&self, stop: &watch::Receiver<bool>) -> TickReport {
        if self
            .inner
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Scheduler tick already in progress, skipping");
            return TickReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = TickGuard(&self.inner.ticking);

        let started = Instant::now();
        let mut report = TickReport {
            social: self.process_social(stop).await,
            blog: self.process_blog(stop).await,
            campaigns: self.process_campaigns(stop).await,
            ..Default::default()
        };
        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.processed() > 0 {
            tracing::info!(
                social = report.social.processed(),
                blog = report.blog.processed(),
                campaigns = report.campaigns.processed(),
                duration_ms = report.duration_ms,
                "Scheduler tick processed due items"
            );
        } else {
            tracing::debug!("Scheduler tick found nothing due");
        }

        let mut history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
        history.last_tick_at = Some(Utc::now());
        history.totals.ticks += 1;
        for queue in [report.social, report.blog, report.campaigns] {
            history.totals.succeeded += queue.succeeded as u64;
            history.totals.retried += queue.retried as u64;
            history.totals.failed += queue.failed as u64;
        }
        history.last_report = Some(report.clone());
        report
    }

    async fn process_social(&self, stop: &watch::Receiver<bool>) -> QueueReport {
        let mut report = QueueReport::default();
        let due = match self.inner.social.list_due(self.inner.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Failed to load due social posts: {}", e);
                return report;
            }
        };

        for post in due {
            if *stop.borrow() {
                break;
            }
            let id = post.id;
            match self.publish_social(post).await {
                Ok(outcome) => outcome.count(&mut report),
                Err(e) => {
                    tracing::error!(id, "Failed to update social post: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn publish_social(&self, mut post: SocialPost) -> anyhow::Result<Outcome> {
        let social = &self.inner.social;
        match social.deliver(&post).await {
            Ok(receipt) => {
                social.mark_published(post, receipt).await?;
                Ok(Outcome::Succeeded)
            }
            Err(e) => {
                let error = e.to_string();
                post.retry_count += 1;
                tracing::warn!(id = post.id, platform = %post.platform, attempt = post.retry_count, "Social publish failed: {}", error);
                match self.inner.policy.decide(post.retry_count, Utc::now()) {
                    RetryDecision::Retry(at) => {
                        social.requeue(post, error, at).await?;
                        Ok(Outcome::Retried)
                    }
                    RetryDecision::GiveUp => {
                        social.mark_failed(post, error).await?;
                        Ok(Outcome::Failed)
                    }
                }
            }
        }
    }

    async fn process_blog(&self, stop: &watch::Receiver<bool>) -> QueueReport {
        let mut report = QueueReport::default();
        let due = match self.inner.blog.list_due(self.inner.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Failed to load due blog posts: {}", e);
                return report;
            }
        };

        for post in due {
            if *stop.borrow() {
                break;
            }
            let id = post.id;
            match self.publish_blog(post).await {
                Ok(outcome) => outcome.count(&mut report),
                Err(e) => {
                    tracing::error!(id, "Failed to update blog post: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn publish_blog(&self, post: BlogPost) -> anyhow::Result<Outcome> {
        let blog = &self.inner.blog;
        let retry_state = post.clone();
        match blog.publish_scheduled(post).await {
            Ok(_) => Ok(Outcome::Succeeded),
            Err(e) => {
                let error = e.to_string();
                let attempts = retry_state.retry_count + 1;
                tracing::warn!(id = retry_state.id, attempt = attempts, "Scheduled blog publish failed: {}", error);
                let give_up = matches!(
                    self.inner.policy.decide(attempts, Utc::now()),
                    RetryDecision::GiveUp
                );
                blog.record_scheduled_failure(retry_state, error, give_up).await?;
                Ok(if give_up { Outcome::Failed } else { Outcome::Retried })
            }
        }
    }

    async fn process_campaigns(&self, stop: &watch::Receiver<bool>) -> QueueReport {
        let mut report = QueueReport::default();
        if *stop.borrow() {
            return report;
        }
        let newsletter = &self.inner.newsletter;
        let cutoff = Utc::now()
            .checked_sub_signed(self.inner.stale_send)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if let Err(e) = newsletter.requeue_stale_sends(cutoff).await {
            tracing::error!("Failed to requeue stale campaigns: {}", e);
        }
        let due = match newsletter.list_due_campaigns(self.inner.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Failed to load due campaigns: {}", e);
                return report;
            }
        };

        for campaign in due {
            if *stop.borrow() {
                break;
            }
            let id = campaign.id;
            match self.send_campaign(campaign).await {
                Ok(Some(outcome)) => outcome.count(&mut report),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(id, "Failed to update campaign: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// `None` when another sender already claimed the campaign
    async fn send_campaign(&self, campaign: Campaign) -> anyhow::Result<Option<Outcome>> {
        let newsletter = &self.inner.newsletter;
        let id = campaign.id;
        let attempts = campaign.retry_count + 1;
        match newsletter.send_scheduled(campaign).await {
            Ok(_) => Ok(Some(Outcome::Succeeded)),
            Err(NewsletterServiceError::Conflict(_)) => Ok(None),
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(id, attempt = attempts, "Campaign send failed: {}", error);
                let (retry_at, outcome) = match self.inner.policy.decide(attempts, Utc::now()) {
                    RetryDecision::Retry(at) => (Some(at), Outcome::Retried),
                    RetryDecision::GiveUp => (None, Outcome::Failed),
                };
                newsletter.record_send_failure(id, error, retry_at).await?;
                Ok(Some(outcome))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Retried,
    Failed,
}

impl Outcome {
    fn count(self, report: &mut QueueReport) {
        match self {
            Outcome::Succeeded => report.succeeded += 1,
            Outcome::Retried => report.retried += 1,
            Outcome::Failed => report.failed += 1,
        }
    }
}
