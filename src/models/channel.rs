//! Channel and bot trust models
//!
//! A channel (or bot) carries exactly one trust status at a time. Status only
//! changes through an explicit admin decision or a system escalation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::{EnforcementAction, LedgerEntry};

/// Admin-controlled trust classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    /// Seen but not yet reviewed
    Pending,
    /// Traffic passes through
    Allowed,
    /// Traffic is removed
    Blocked,
    /// Advisory flag, traffic still passes
    Suspicious,
}

impl TrustStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustStatus::Pending => "pending",
            TrustStatus::Allowed => "allowed",
            TrustStatus::Blocked => "blocked",
            TrustStatus::Suspicious => "suspicious",
        }
    }

    /// Whether messages from this source are let through
    pub fn permits_traffic(&self) -> bool {
        matches!(self, TrustStatus::Allowed | TrustStatus::Suspicious)
    }

    /// States the system itself may escalate to `Suspicious` from
    pub fn accepts_escalation(&self) -> bool {
        matches!(self, TrustStatus::Pending | TrustStatus::Allowed)
    }
}

impl fmt::Display for TrustStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TrustStatus::Pending),
            "allowed" => Ok(TrustStatus::Allowed),
            "blocked" => Ok(TrustStatus::Blocked),
            "suspicious" => Ok(TrustStatus::Suspicious),
            other => Err(format!("Unknown trust status: {}", other)),
        }
    }
}

/// A channel that posts (or has posted) into a moderated chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// External chat id on the platform (unique, immutable)
    pub external_id: i64,
    pub title: String,
    pub handle: Option<String>,
    pub status: TrustStatus,
    /// The bot holds administrative control of this channel
    pub is_native: bool,
    pub is_public: bool,
    pub member_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// A newly observed channel awaiting review
    pub fn pending(external_id: i64, title: impl Into<String>, handle: Option<String>) -> Self {
        let now = Utc::now();
        let is_public = handle.is_some();
        Self {
            external_id,
            title: title.into(),
            handle,
            status: TrustStatus::Pending,
            is_native: false,
            is_public,
            member_count: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A bot that has been added to a moderated chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub bot_id: i64,
    pub username: Option<String>,
    pub status: TrustStatus,
    /// User who added the bot (0 when unknown)
    pub added_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bot {
    pub fn pending(bot_id: i64, username: Option<String>, added_by: i64) -> Self {
        let now = Utc::now();
        Self {
            bot_id,
            username,
            status: TrustStatus::Pending,
            added_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Admin decision on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDecision {
    Allow,
    Block,
    MarkSuspicious,
}

impl ChannelDecision {
    pub fn status(&self) -> TrustStatus {
        match self {
            ChannelDecision::Allow => TrustStatus::Allowed,
            ChannelDecision::Block => TrustStatus::Blocked,
            ChannelDecision::MarkSuspicious => TrustStatus::Suspicious,
        }
    }

    pub fn action(&self) -> EnforcementAction {
        match self {
            ChannelDecision::Allow => EnforcementAction::AllowChannel,
            ChannelDecision::Block => EnforcementAction::BlockChannel,
            ChannelDecision::MarkSuspicious => EnforcementAction::MarkSuspicious,
        }
    }
}

/// Admin decision on a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotDecision {
    Allow,
    Block,
}

impl BotDecision {
    pub fn status(&self) -> TrustStatus {
        match self {
            BotDecision::Allow => TrustStatus::Allowed,
            BotDecision::Block => TrustStatus::Blocked,
        }
    }

    pub fn action(&self) -> EnforcementAction {
        match self {
            BotDecision::Allow => EnforcementAction::AllowBot,
            BotDecision::Block => EnforcementAction::BlockBot,
        }
    }
}

/// A status change applied together with its ledger entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustTransition<T> {
    /// Status the change superseded (last writer wins)
    pub previous: TrustStatus,
    pub current: T,
    pub entry: LedgerEntry,
}
