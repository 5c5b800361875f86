//! Automation rule and log repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{decode_json, encode_json};
use crate::db::{DynDatabasePool, InsertId};
use crate::models::{AutomationLog, AutomationRule, ListParams, LogStatus, TriggerType};

#[async_trait]
pub trait AutomationRepository: Send + Sync {
    async fn create_rule(&self, rule: &AutomationRule) -> Result<AutomationRule>;

    async fn get_rule(&self, id: i64) -> Result<Option<AutomationRule>>;

    async fn update_rule(&self, rule: &AutomationRule) -> Result<AutomationRule>;

    async fn delete_rule(&self, id: i64) -> Result<()>;

    /// All rules, highest priority first
    async fn list_rules(&self) -> Result<Vec<AutomationRule>>;

    /// Active rules for `trigger`, ordered `priority DESC, id ASC`
    async fn list_active_for_trigger(&self, trigger: TriggerType) -> Result<Vec<AutomationRule>>;

    /// Bump `run_count` and stamp `last_run_at`
    async fn record_run(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn insert_log(&self, log: &AutomationLog) -> Result<AutomationLog>;

    /// Newest logs first, optionally for a single rule
    async fn list_logs(
        &self,
        params: &ListParams,
        rule_id: Option<i64>,
    ) -> Result<(Vec<AutomationLog>, i64)>;
}

pub struct SqlxAutomationRepository {
    pool: DynDatabasePool,
}

impl SqlxAutomationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AutomationRepository> {
        Arc::new(Self::new(pool))
    }
}

const RULE_COLUMNS: &str = "id, name, description, trigger_type, trigger_conditions, actions, \
     priority, is_active, run_count, last_run_at, created_at, updated_at";

const LOG_COLUMNS: &str =
    "id, rule_id, trigger_type, status, payload, error, executed_actions, created_at";

#[derive(sqlx::FromRow)]
struct RuleRecord {
    id: i64,
    name: String,
    description: Option<String>,
    trigger_type: String,
    trigger_conditions: String,
    actions: String,
    priority: i32,
    is_active: bool,
    run_count: i64,
    last_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RuleRecord> for AutomationRule {
    type Error = anyhow::Error;

    fn try_from(r: RuleRecord) -> Result<Self> {
        Ok(AutomationRule {
            id: r.id,
            name: r.name,
            description: r.description,
            trigger_type: r.trigger_type.parse()?,
            trigger_conditions: decode_json(
                &r.trigger_conditions,
                "automation_rules.trigger_conditions",
            )?,
            actions: decode_json(&r.actions, "automation_rules.actions")?,
            priority: r.priority,
            is_active: r.is_active,
            run_count: r.run_count,
            last_run_at: r.last_run_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRecord {
    id: i64,
    rule_id: i64,
    trigger_type: String,
    status: String,
    payload: String,
    error: Option<String>,
    executed_actions: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRecord> for AutomationLog {
    type Error = anyhow::Error;

    fn try_from(r: LogRecord) -> Result<Self> {
        Ok(AutomationLog {
            id: r.id,
            rule_id: r.rule_id,
            trigger_type: r.trigger_type.parse()?,
            status: r.status.parse::<LogStatus>()?,
            payload: decode_json(&r.payload, "automation_logs.payload")?,
            error: r.error,
            executed_actions: r.executed_actions,
            created_at: r.created_at,
        })
    }
}

fn convert_rules(records: Vec<RuleRecord>) -> Result<Vec<AutomationRule>> {
    records.into_iter().map(AutomationRule::try_from).collect()
}

#[async_trait]
impl AutomationRepository for SqlxAutomationRepository {
    async fn create_rule(&self, rule: &AutomationRule) -> Result<AutomationRule> {
        let now = Utc::now();
        let conditions = encode_json(&rule.trigger_conditions)?;
        let actions = encode_json(&rule.actions)?;
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO automation_rules (name, description, trigger_type, \
                 trigger_conditions, actions, priority, is_active, run_count, last_run_at, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&rule.name)
            .bind(&rule.description)
            .bind(rule.trigger_type.as_str())
            .bind(&conditions)
            .bind(&actions)
            .bind(rule.priority)
            .bind(rule.is_active)
            .bind(rule.run_count)
            .bind(rule.last_run_at)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create automation rule")?
            .inserted_id()
        });

        Ok(AutomationRule {
            id,
            created_at: now,
            updated_at: now,
            ..rule.clone()
        })
    }

    async fn get_rule(&self, id: i64) -> Result<Option<AutomationRule>> {
        let sql = format!("SELECT {} FROM automation_rules WHERE id = ?", RULE_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, RuleRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get automation rule")?
        });
        record.map(AutomationRule::try_from).transpose()
    }

    async fn update_rule(&self, rule: &AutomationRule) -> Result<AutomationRule> {
        let now = Utc::now();
        let conditions = encode_json(&rule.trigger_conditions)?;
        let actions = encode_json(&rule.actions)?;
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE automation_rules SET name = ?, description = ?, trigger_type = ?, \
                 trigger_conditions = ?, actions = ?, priority = ?, is_active = ?, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(&rule.name)
            .bind(&rule.description)
            .bind(rule.trigger_type.as_str())
            .bind(&conditions)
            .bind(&actions)
            .bind(rule.priority)
            .bind(rule.is_active)
            .bind(now)
            .bind(rule.id)
            .execute(conn)
            .await
            .context("Failed to update automation rule")?;
        });

        Ok(AutomationRule {
            updated_at: now,
            ..rule.clone()
        })
    }

    async fn delete_rule(&self, id: i64) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM automation_rules WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete automation rule")?;
        });
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<AutomationRule>> {
        let sql = format!(
            "SELECT {} FROM automation_rules ORDER BY priority DESC, id ASC",
            RULE_COLUMNS
        );
        let records = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, RuleRecord>(&sql)
                .fetch_all(conn)
                .await
                .context("Failed to list automation rules")?
        });
        convert_rules(records)
    }

    async fn list_active_for_trigger(&self, trigger: TriggerType) -> Result<Vec<AutomationRule>> {
        let sql = format!(
            "SELECT {} FROM automation_rules WHERE trigger_type = ? AND is_active = ? \
             ORDER BY priority DESC, id ASC",
            RULE_COLUMNS
        );
        let records = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, RuleRecord>(&sql)
                .bind(trigger.as_str())
                .bind(true)
                .fetch_all(conn)
                .await
                .context("Failed to load rules for trigger")?
        });
        convert_rules(records)
    }

    async fn record_run(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE automation_rules SET run_count = run_count + 1, last_run_at = ? \
                 WHERE id = ?",
            )
            .bind(at)
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to record rule run")?;
        });
        Ok(())
    }

    async fn insert_log(&self, log: &AutomationLog) -> Result<AutomationLog> {
        let payload = encode_json(&log.payload)?;
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO automation_logs (rule_id, trigger_type, status, payload, error, \
                 executed_actions, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(log.rule_id)
            .bind(log.trigger_type.as_str())
            .bind(log.status.to_string())
            .bind(&payload)
            .bind(&log.error)
            .bind(log.executed_actions)
            .bind(log.created_at)
            .execute(conn)
            .await
            .context("Failed to write automation log")?
            .inserted_id()
        });
        Ok(AutomationLog { id, ..log.clone() })
    }

    async fn list_logs(
        &self,
        params: &ListParams,
        rule_id: Option<i64>,
    ) -> Result<(Vec<AutomationLog>, i64)> {
        let filter = if rule_id.is_some() { "WHERE rule_id = ?" } else { "" };
        let count_sql = format!("SELECT COUNT(*) FROM automation_logs {}", filter);
        let list_sql = format!(
            "SELECT {} FROM automation_logs {} ORDER BY id DESC LIMIT ? OFFSET ?",
            LOG_COLUMNS, filter
        );

        let (records, total) = on_pool!(self.pool, |conn| {
            let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
            let mut list_query = sqlx::query_as::<_, LogRecord>(&list_sql);
            if let Some(rule_id) = rule_id {
                count_query = count_query.bind(rule_id);
                list_query = list_query.bind(rule_id);
            }
            let total = count_query
                .fetch_one(conn)
                .await
                .context("Failed to count automation logs")?;
            let records = list_query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list automation logs")?;
            (records, total)
        });

        let logs = records
            .into_iter()
            .map(AutomationLog::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((logs, total))
    }
}
