//! Profile Repository - suspicious_profiles persistence

use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::info;

use crate::models::{ReviewVerdict, SuspiciousProfile};

const PROFILE_COLUMNS: &str = "user_id, linked_chat_id, post_count, has_bait_channel, suspicion_score, patterns, is_reviewed, is_confirmed_suspicious, is_false_positive, reviewed_by, created_at, updated_at";

pub struct ProfileRepository {
    pool: PgPool,
}

impl ProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        info!("Initializing suspicious_profiles table...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS suspicious_profiles (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL UNIQUE,
                linked_chat_id BIGINT,
                post_count BIGINT NOT NULL DEFAULT 0,
                has_bait_channel BOOLEAN NOT NULL DEFAULT FALSE,
                suspicion_score DOUBLE PRECISION NOT NULL DEFAULT 0.0
                    CHECK (suspicion_score >= 0.0 AND suspicion_score <= 1.0),
                patterns TEXT NOT NULL DEFAULT '',
                is_reviewed BOOLEAN NOT NULL DEFAULT FALSE,
                is_confirmed_suspicious BOOLEAN NOT NULL DEFAULT FALSE,
                is_false_positive BOOLEAN NOT NULL DEFAULT FALSE,
                reviewed_by BIGINT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create suspicious_profiles table: {}", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_suspicious_profiles_unreviewed ON suspicious_profiles(suspicion_score DESC) WHERE NOT is_reviewed",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create suspicious_profiles index: {}", e))?;

        Ok(())
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<SuspiciousProfile>, String> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM suspicious_profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Failed to get profile: {}", e))?;

        Ok(row.as_ref().map(row_to_profile))
    }

    /// Insert or refresh the analysis columns. Review columns are only
    /// written on insert; `review` owns them afterwards.
    pub async fn upsert(&self, profile: &SuspiciousProfile) -> Result<SuspiciousProfile, String> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO suspicious_profiles
                (user_id, linked_chat_id, post_count, has_bait_channel, suspicion_score, patterns,
                 is_reviewed, is_confirmed_suspicious, is_false_positive, reviewed_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id) DO UPDATE SET
                linked_chat_id = EXCLUDED.linked_chat_id,
                post_count = EXCLUDED.post_count,
                has_bait_channel = EXCLUDED.has_bait_channel,
                suspicion_score = EXCLUDED.suspicion_score,
                patterns = EXCLUDED.patterns,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
        "#,
            PROFILE_COLUMNS
        ))
        .bind(profile.user_id)
        .bind(profile.linked_chat_id)
        .bind(profile.post_count)
        .bind(profile.has_bait_channel)
        .bind(profile.suspicion_score)
        .bind(&profile.patterns)
        .bind(profile.is_reviewed)
        .bind(profile.is_confirmed_suspicious)
        .bind(profile.is_false_positive)
        .bind(profile.reviewed_by)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| format!("Failed to upsert profile: {}", e))?;

        Ok(row_to_profile(&row))
    }

    pub async fn review(
        &self,
        user_id: i64,
        verdict: ReviewVerdict,
        reviewer_id: i64,
    ) -> Result<Option<SuspiciousProfile>, String> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE suspicious_profiles SET
                is_reviewed = TRUE,
                is_confirmed_suspicious = $2,
                is_false_positive = $3,
                reviewed_by = $4,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {}
        "#,
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .bind(verdict == ReviewVerdict::ConfirmedSuspicious)
        .bind(verdict == ReviewVerdict::FalsePositive)
        .bind(reviewer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Failed to review profile: {}", e))?;

        Ok(row.as_ref().map(row_to_profile))
    }

    pub async fn list_unreviewed(&self, min_score: f64) -> Result<Vec<SuspiciousProfile>, String> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM suspicious_profiles WHERE NOT is_reviewed AND suspicion_score >= $1 ORDER BY suspicion_score DESC",
            PROFILE_COLUMNS
        ))
        .bind(min_score)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to list unreviewed profiles: {}", e))?;

        Ok(rows.iter().map(row_to_profile).collect())
    }
}

fn row_to_profile(row: &PgRow) -> SuspiciousProfile {
    SuspiciousProfile {
        user_id: row.get("user_id"),
        linked_chat_id: row.get("linked_chat_id"),
        post_count: row.get("post_count"),
        has_bait_channel: row.get("has_bait_channel"),
        suspicion_score: row.get("suspicion_score"),
        patterns: row.get("patterns"),
        is_reviewed: row.get("is_reviewed"),
        is_confirmed_suspicious: row.get("is_confirmed_suspicious"),
        is_false_positive: row.get("is_false_positive"),
        reviewed_by: row.get("reviewed_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
