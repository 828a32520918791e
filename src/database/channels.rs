//! Channel Repository - channels and bots persistence
//!
//! Trust decisions update the entity and append their ledger entry inside one
//! transaction, with the entity row locked so the superseded status is exact.

use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::info;

use crate::database::ledger::insert_entry;
use crate::models::{Bot, Channel, NewLedgerEntry, TrustStatus, TrustTransition};

const CHANNEL_COLUMNS: &str = "external_id, title, handle, status, is_native, is_public, member_count, created_at, updated_at";
const BOT_COLUMNS: &str = "bot_id, username, status, added_by, created_at, updated_at";

/// Result of a guarded status write
pub enum StatusWrite<T> {
    /// No row with that id
    Missing,
    /// Row exists but its status did not satisfy the guard
    Skipped,
    Applied(TrustTransition<T>),
}

pub struct ChannelRepository {
    pool: PgPool,
}

impl ChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        info!("Initializing channels and bots tables...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id BIGSERIAL PRIMARY KEY,
                external_id BIGINT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                handle VARCHAR(255),
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                is_native BOOLEAN NOT NULL DEFAULT FALSE,
                is_public BOOLEAN NOT NULL DEFAULT FALSE,
                member_count BIGINT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create channels table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bots (
                id BIGSERIAL PRIMARY KEY,
                bot_id BIGINT NOT NULL UNIQUE,
                username VARCHAR(255),
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                added_by BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create bots table: {}", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_channels_status ON channels(status)")
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to create channels status index: {}", e))?;

        Ok(())
    }

    pub async fn get(&self, external_id: i64) -> Result<Option<Channel>, String> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM channels WHERE external_id = $1",
            CHANNEL_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Failed to get channel: {}", e))?;

        row.map(|r| row_to_channel(&r)).transpose()
    }

    pub async fn insert_if_absent(&self, channel: &Channel) -> Result<(Channel, bool), String> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO channels (external_id, title, handle, status, is_native, is_public, member_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING {}
        "#,
            CHANNEL_COLUMNS
        ))
        .bind(channel.external_id)
        .bind(&channel.title)
        .bind(channel.handle.as_deref())
        .bind(channel.status.as_str())
        .bind(channel.is_native)
        .bind(channel.is_public)
        .bind(channel.member_count)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Failed to insert channel: {}", e))?;

        match inserted {
            Some(row) => Ok((row_to_channel(&row)?, true)),
            None => {
                let existing = self
                    .get(channel.external_id)
                    .await?
                    .ok_or_else(|| format!("Channel {} vanished after conflict", channel.external_id))?;
                Ok((existing, false))
            }
        }
    }

    pub async fn list(&self, status: Option<TrustStatus>) -> Result<Vec<Channel>, String> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM channels WHERE ($1::VARCHAR IS NULL OR status = $1) ORDER BY created_at",
            CHANNEL_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to list channels: {}", e))?;

        rows.iter().map(row_to_channel).collect()
    }

    /// Set the status and append `entry` in one transaction. With
    /// `escalation_only`, statuses that do not accept escalation are skipped.
    pub async fn write_status(
        &self,
        external_id: i64,
        status: TrustStatus,
        entry: &NewLedgerEntry,
        escalation_only: bool,
    ) -> Result<StatusWrite<Channel>, String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| format!("Failed to begin channel transaction: {}", e))?;

        let current = sqlx::query("SELECT status FROM channels WHERE external_id = $1 FOR UPDATE")
            .bind(external_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| format!("Failed to lock channel: {}", e))?;

        let previous = match current {
            Some(row) => row.get::<String, _>("status").parse::<TrustStatus>()?,
            None => return Ok(StatusWrite::Missing),
        };
        if escalation_only && !previous.accepts_escalation() {
            return Ok(StatusWrite::Skipped);
        }

        let row = sqlx::query(&format!(
            "UPDATE channels SET status = $2, updated_at = NOW() WHERE external_id = $1 RETURNING {}",
            CHANNEL_COLUMNS
        ))
        .bind(external_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| format!("Failed to update channel status: {}", e))?;
        let current = row_to_channel(&row)?;

        let entry = insert_entry(&mut *tx, entry).await?;
        tx.commit()
            .await
            .map_err(|e| format!("Failed to commit channel decision: {}", e))?;

        Ok(StatusWrite::Applied(TrustTransition {
            previous,
            current,
            entry,
        }))
    }

    pub async fn get_bot(&self, bot_id: i64) -> Result<Option<Bot>, String> {
        let row = sqlx::query(&format!("SELECT {} FROM bots WHERE bot_id = $1", BOT_COLUMNS))
            .bind(bot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| format!("Failed to get bot: {}", e))?;

        row.map(|r| row_to_bot(&r)).transpose()
    }

    pub async fn insert_bot_if_absent(&self, bot: &Bot) -> Result<(Bot, bool), String> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO bots (bot_id, username, status, added_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (bot_id) DO NOTHING
            RETURNING {}
        "#,
            BOT_COLUMNS
        ))
        .bind(bot.bot_id)
        .bind(bot.username.as_deref())
        .bind(bot.status.as_str())
        .bind(bot.added_by)
        .bind(bot.created_at)
        .bind(bot.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Failed to insert bot: {}", e))?;

        match inserted {
            Some(row) => Ok((row_to_bot(&row)?, true)),
            None => {
                let existing = self
                    .get_bot(bot.bot_id)
                    .await?
                    .ok_or_else(|| format!("Bot {} vanished after conflict", bot.bot_id))?;
                Ok((existing, false))
            }
        }
    }

    pub async fn write_bot_status(
        &self,
        bot_id: i64,
        status: TrustStatus,
        entry: &NewLedgerEntry,
    ) -> Result<StatusWrite<Bot>, String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| format!("Failed to begin bot transaction: {}", e))?;

        let current = sqlx::query("SELECT status FROM bots WHERE bot_id = $1 FOR UPDATE")
            .bind(bot_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| format!("Failed to lock bot: {}", e))?;

        let previous = match current {
            Some(row) => row.get::<String, _>("status").parse::<TrustStatus>()?,
            None => return Ok(StatusWrite::Missing),
        };

        let row = sqlx::query(&format!(
            "UPDATE bots SET status = $2, updated_at = NOW() WHERE bot_id = $1 RETURNING {}",
            BOT_COLUMNS
        ))
        .bind(bot_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| format!("Failed to update bot status: {}", e))?;
        let current = row_to_bot(&row)?;

        let entry = insert_entry(&mut *tx, entry).await?;
        tx.commit()
            .await
            .map_err(|e| format!("Failed to commit bot decision: {}", e))?;

        Ok(StatusWrite::Applied(TrustTransition {
            previous,
            current,
            entry,
        }))
    }
}

fn row_to_channel(row: &PgRow) -> Result<Channel, String> {
    let status: String = row.get("status");
    Ok(Channel {
        external_id: row.get("external_id"),
        title: row.get("title"),
        handle: row.get("handle"),
        status: status.parse()?,
        is_native: row.get("is_native"),
        is_public: row.get("is_public"),
        member_count: row.get("member_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_bot(row: &PgRow) -> Result<Bot, String> {
    let status: String = row.get("status");
    Ok(Bot {
        bot_id: row.get("bot_id"),
        username: row.get("username"),
        status: status.parse()?,
        added_by: row.get("added_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
