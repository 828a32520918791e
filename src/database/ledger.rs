//! Ledger Repository - moderation_logs persistence
//!
//! Enforces the single-active invariant twice: a per-(subject, chat, action)
//! advisory lock serializes writers inside the transaction, and partial
//! unique indexes reject any second active row that slips through.
//! Channel-subject rows reference `channels(external_id)`; the trust state
//! machine registers a channel before any row can name it.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::models::{EnforcementAction, LedgerEntry, NewLedgerEntry, Subject};

const ENTRY_COLUMNS: &str = "id, action, user_id, bot_id, channel_id, chat_id, admin_id, reason, is_active, expires_at, created_at";

/// Rows that are active and not past their expiry
const IN_FORCE: &str = "is_active AND (expires_at IS NULL OR expires_at > NOW())";

const MODERATION_LOGS_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS moderation_logs (
        id BIGSERIAL PRIMARY KEY,
        action VARCHAR(32) NOT NULL,
        user_id BIGINT,
        bot_id BIGINT,
        channel_id BIGINT REFERENCES channels(external_id),
        chat_id BIGINT,
        admin_id BIGINT NOT NULL DEFAULT 0,
        reason TEXT,
        is_active BOOLEAN NOT NULL DEFAULT FALSE,
        expires_at TIMESTAMP WITH TIME ZONE,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
        CHECK (num_nonnulls(user_id, bot_id, channel_id) = 1)
    )
"#;

pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        info!("Initializing moderation_logs table...");

        sqlx::query(MODERATION_LOGS_DDL)
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to create moderation_logs table: {}", e))?;

        // Tables created before timed enforcement was recorded
        sqlx::query(
            "ALTER TABLE moderation_logs ADD COLUMN IF NOT EXISTS expires_at TIMESTAMP WITH TIME ZONE",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to add moderation_logs.expires_at: {}", e))?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_moderation_logs_active_user
            ON moderation_logs(user_id, chat_id, action)
            WHERE is_active AND user_id IS NOT NULL
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create active user index: {}", e))?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_moderation_logs_active_bot
            ON moderation_logs(bot_id, chat_id, action)
            WHERE is_active AND bot_id IS NOT NULL
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create active bot index: {}", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_moderation_logs_chat ON moderation_logs(chat_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to create moderation_logs chat index: {}", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_moderation_logs_user ON moderation_logs(user_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to create moderation_logs user index: {}", e))?;

        Ok(())
    }

    pub async fn append(&self, entry: &NewLedgerEntry) -> Result<LedgerEntry, String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| format!("Failed to begin ledger transaction: {}", e))?;
        let stored = insert_entry(&mut *tx, entry).await?;
        tx.commit()
            .await
            .map_err(|e| format!("Failed to commit ledger entry: {}", e))?;
        Ok(stored)
    }

    pub async fn deactivate_active(
        &self,
        subject: Subject,
        chat_id: i64,
        action: EnforcementAction,
    ) -> Result<Option<LedgerEntry>, String> {
        let (user_id, bot_id, channel_id) = subject_columns(subject);
        let row = sqlx::query(&format!(
            r#"
            UPDATE moderation_logs SET is_active = FALSE
            WHERE id = (
                SELECT id FROM moderation_logs
                WHERE is_active AND action = $1 AND chat_id = $2
                  AND user_id IS NOT DISTINCT FROM $3
                  AND bot_id IS NOT DISTINCT FROM $4
                  AND channel_id IS NOT DISTINCT FROM $5
                ORDER BY id DESC
                LIMIT 1
                FOR UPDATE
            )
            RETURNING {}
        "#,
            ENTRY_COLUMNS
        ))
        .bind(action.as_str())
        .bind(chat_id)
        .bind(user_id)
        .bind(bot_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Failed to deactivate ledger entry: {}", e))?;

        row.map(|r| row_to_entry(&r)).transpose()
    }

    pub async fn active_entry(
        &self,
        subject: Subject,
        chat_id: i64,
        action: EnforcementAction,
    ) -> Result<Option<LedgerEntry>, String> {
        let (user_id, bot_id, channel_id) = subject_columns(subject);
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM moderation_logs
            WHERE {} AND action = $1 AND chat_id = $2
              AND user_id IS NOT DISTINCT FROM $3
              AND bot_id IS NOT DISTINCT FROM $4
              AND channel_id IS NOT DISTINCT FROM $5
            ORDER BY id DESC
            LIMIT 1
        "#,
            ENTRY_COLUMNS, IN_FORCE
        ))
        .bind(action.as_str())
        .bind(chat_id)
        .bind(user_id)
        .bind(bot_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Failed to get active entry: {}", e))?;

        row.map(|r| row_to_entry(&r)).transpose()
    }

    pub async fn list_active(
        &self,
        chat_id: i64,
        action: EnforcementAction,
    ) -> Result<Vec<LedgerEntry>, String> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM moderation_logs WHERE {} AND chat_id = $1 AND action = $2 ORDER BY id DESC",
            ENTRY_COLUMNS, IN_FORCE
        ))
        .bind(chat_id)
        .bind(action.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to list active entries: {}", e))?;

        rows.iter().map(row_to_entry).collect()
    }

    pub async fn close_lapsed(
        &self,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, String> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE moderation_logs SET is_active = FALSE
            WHERE is_active AND chat_id = $1 AND expires_at IS NOT NULL AND expires_at <= $2
            RETURNING {}
        "#,
            ENTRY_COLUMNS
        ))
        .bind(chat_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to close lapsed entries: {}", e))?;

        if !rows.is_empty() {
            debug!(chat_id = chat_id, closed = rows.len(), "Closed lapsed ledger entries");
        }
        rows.iter().map(row_to_entry).collect()
    }

    pub async fn user_history(&self, user_id: i64) -> Result<Vec<LedgerEntry>, String> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM moderation_logs WHERE user_id = $1 ORDER BY id DESC",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to get user history: {}", e))?;

        rows.iter().map(row_to_entry).collect()
    }

    pub async fn subjects_for_chat(&self, chat_id: i64) -> Result<Vec<i64>, String> {
        let rows = sqlx::query(
            "SELECT DISTINCT user_id FROM moderation_logs WHERE chat_id = $1 AND user_id IS NOT NULL ORDER BY user_id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to list ledger subjects: {}", e))?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("user_id")).collect())
    }

    pub async fn chats(&self) -> Result<Vec<i64>, String> {
        let rows = sqlx::query(
            "SELECT DISTINCT chat_id FROM moderation_logs WHERE chat_id IS NOT NULL ORDER BY chat_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to list ledger chats: {}", e))?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("chat_id")).collect())
    }
}

/// Insert inside the caller's transaction. An active stateful entry first
/// closes the live row for the same (subject, chat, action).
pub(crate) async fn insert_entry(
    conn: &mut PgConnection,
    entry: &NewLedgerEntry,
) -> Result<LedgerEntry, String> {
    let (user_id, bot_id, channel_id) = subject_columns(entry.subject);

    if entry.is_active
        && entry.action.is_stateful()
        && let Some(chat_id) = entry.chat_id
    {
        let lock_key = format!("{}:{}:{}", entry.action, entry.subject, chat_id);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&lock_key)
            .execute(&mut *conn)
            .await
            .map_err(|e| format!("Failed to lock ledger key: {}", e))?;

        let closed = sqlx::query(
            r#"
            UPDATE moderation_logs SET is_active = FALSE
            WHERE is_active AND action = $1 AND chat_id = $2
              AND user_id IS NOT DISTINCT FROM $3
              AND bot_id IS NOT DISTINCT FROM $4
              AND channel_id IS NOT DISTINCT FROM $5
        "#,
        )
        .bind(entry.action.as_str())
        .bind(chat_id)
        .bind(user_id)
        .bind(bot_id)
        .bind(channel_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to supersede live entry: {}", e))?;

        if closed.rows_affected() > 0 {
            debug!(key = %lock_key, superseded = closed.rows_affected(), "Superseded live entry");
        }
    }

    let row = sqlx::query(
        r#"
        INSERT INTO moderation_logs (action, user_id, bot_id, channel_id, chat_id, admin_id, reason, is_active, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, created_at
    "#,
    )
    .bind(entry.action.as_str())
    .bind(user_id)
    .bind(bot_id)
    .bind(channel_id)
    .bind(entry.chat_id)
    .bind(entry.admin_id)
    .bind(entry.reason.as_deref())
    .bind(entry.is_active)
    .bind(entry.expires_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| format!("Failed to insert ledger entry: {}", e))?;

    let id: i64 = row.get("id");
    let created_at: DateTime<Utc> = row.get("created_at");
    Ok(LedgerEntry::from_new(id, entry.clone(), created_at))
}

fn subject_columns(subject: Subject) -> (Option<i64>, Option<i64>, Option<i64>) {
    (subject.user_id(), subject.bot_id(), subject.channel_id())
}

fn row_to_entry(row: &PgRow) -> Result<LedgerEntry, String> {
    let id: i64 = row.get("id");
    let action: String = row.get("action");
    let action = action.parse::<EnforcementAction>()?;
    let subject = Subject::from_columns(
        row.get("user_id"),
        row.get("bot_id"),
        row.get("channel_id"),
    )
    .ok_or_else(|| format!("Ledger row {} does not name exactly one subject", id))?;

    Ok(LedgerEntry {
        id,
        action,
        subject,
        chat_id: row.get("chat_id"),
        admin_id: row.get("admin_id"),
        reason: row.get("reason"),
        is_active: row.get("is_active"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}
