//! Suspicious profile records
//!
//! One row per user id. Created on first analysis, refreshed by later
//! analyses, and closed out by an admin review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousProfile {
    pub user_id: i64,
    pub linked_chat_id: Option<i64>,
    pub post_count: i64,
    pub has_bait_channel: bool,
    /// Score in [0, 1]
    pub suspicion_score: f64,
    /// Human-readable list of detected patterns
    pub patterns: String,
    pub is_reviewed: bool,
    pub is_confirmed_suspicious: bool,
    pub is_false_positive: bool,
    pub reviewed_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SuspiciousProfile {
    pub fn new(user_id: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            linked_chat_id: None,
            post_count: 0,
            has_bait_channel: false,
            suspicion_score: 0.0,
            patterns: String::new(),
            is_reviewed: false,
            is_confirmed_suspicious: false,
            is_false_positive: false,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record an admin verdict
    pub fn apply_review(&mut self, verdict: ReviewVerdict, reviewer_id: i64) {
        self.is_reviewed = true;
        self.is_confirmed_suspicious = verdict == ReviewVerdict::ConfirmedSuspicious;
        self.is_false_positive = verdict == ReviewVerdict::FalsePositive;
        self.reviewed_by = Some(reviewer_id);
        self.updated_at = Utc::now();
    }
}

/// Admin verdict on a flagged profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    /// Confirmed abusive
    ConfirmedSuspicious,
    /// Flag was wrong, never escalate again
    FalsePositive,
}
