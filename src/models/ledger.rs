//! Enforcement ledger entries
//!
//! Each entry records one enforcement action. Entries are immutable once
//! written except for `is_active`, which only the ledger or reconciliation
//! may flip. Timed bans and mutes carry `expires_at`; a row past its expiry
//! no longer counts as in force even before reconciliation closes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Admin id recorded for system-initiated actions
pub const SYSTEM_ADMIN_ID: i64 = 0;

/// Every action the ledger knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    Ban,
    Unban,
    Mute,
    Unmute,
    DeleteMessage,
    AllowChannel,
    BlockChannel,
    AllowBot,
    BlockBot,
    MarkSuspicious,
}

impl EnforcementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementAction::Ban => "ban",
            EnforcementAction::Unban => "unban",
            EnforcementAction::Mute => "mute",
            EnforcementAction::Unmute => "unmute",
            EnforcementAction::DeleteMessage => "delete_message",
            EnforcementAction::AllowChannel => "allow_channel",
            EnforcementAction::BlockChannel => "block_channel",
            EnforcementAction::AllowBot => "allow_bot",
            EnforcementAction::BlockBot => "block_bot",
            EnforcementAction::MarkSuspicious => "mark_suspicious",
        }
    }

    /// Actions whose rows carry live state through `is_active`
    pub fn is_stateful(&self) -> bool {
        matches!(self, EnforcementAction::Ban | EnforcementAction::Mute)
    }

    /// The live action a lifting action deactivates
    pub fn lifts(&self) -> Option<EnforcementAction> {
        match self {
            EnforcementAction::Unban => Some(EnforcementAction::Ban),
            EnforcementAction::Unmute => Some(EnforcementAction::Mute),
            _ => None,
        }
    }

    /// Trust decisions go through the state machine, not the enforcement path
    pub fn is_trust_decision(&self) -> bool {
        matches!(
            self,
            EnforcementAction::AllowChannel
                | EnforcementAction::BlockChannel
                | EnforcementAction::AllowBot
                | EnforcementAction::BlockBot
                | EnforcementAction::MarkSuspicious
        )
    }

    /// Whether `subject` is a valid target for this action
    pub fn accepts(&self, subject: &Subject) -> bool {
        match self {
            EnforcementAction::Ban | EnforcementAction::Unban => {
                matches!(subject, Subject::User(_) | Subject::Bot(_))
            }
            EnforcementAction::Mute | EnforcementAction::Unmute => {
                matches!(subject, Subject::User(_))
            }
            EnforcementAction::DeleteMessage => {
                matches!(subject, Subject::User(_) | Subject::Channel(_))
            }
            EnforcementAction::AllowChannel
            | EnforcementAction::BlockChannel
            | EnforcementAction::MarkSuspicious => matches!(subject, Subject::Channel(_)),
            EnforcementAction::AllowBot | EnforcementAction::BlockBot => {
                matches!(subject, Subject::Bot(_))
            }
        }
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnforcementAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ban" => Ok(EnforcementAction::Ban),
            "unban" => Ok(EnforcementAction::Unban),
            "mute" => Ok(EnforcementAction::Mute),
            "unmute" => Ok(EnforcementAction::Unmute),
            "delete_message" => Ok(EnforcementAction::DeleteMessage),
            "allow_channel" => Ok(EnforcementAction::AllowChannel),
            "block_channel" => Ok(EnforcementAction::BlockChannel),
            "allow_bot" => Ok(EnforcementAction::AllowBot),
            "block_bot" => Ok(EnforcementAction::BlockBot),
            "mark_suspicious" => Ok(EnforcementAction::MarkSuspicious),
            other => Err(format!("Unknown enforcement action: {}", other)),
        }
    }
}

/// Who an action targets. Exactly one identifier per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Subject {
    User(i64),
    Bot(i64),
    Channel(i64),
}

impl Subject {
    pub fn id(&self) -> i64 {
        match self {
            Subject::User(id) | Subject::Bot(id) | Subject::Channel(id) => *id,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Subject::User(id) => Some(*id),
            _ => None,
        }
    }

    pub fn bot_id(&self) -> Option<i64> {
        match self {
            Subject::Bot(id) => Some(*id),
            _ => None,
        }
    }

    pub fn channel_id(&self) -> Option<i64> {
        match self {
            Subject::Channel(id) => Some(*id),
            _ => None,
        }
    }

    /// Rebuild a subject from the three nullable storage columns
    pub fn from_columns(
        user_id: Option<i64>,
        bot_id: Option<i64>,
        channel_id: Option<i64>,
    ) -> Option<Self> {
        match (user_id, bot_id, channel_id) {
            (Some(id), None, None) => Some(Subject::User(id)),
            (None, Some(id), None) => Some(Subject::Bot(id)),
            (None, None, Some(id)) => Some(Subject::Channel(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{}", id),
            Subject::Bot(id) => write!(f, "bot:{}", id),
            Subject::Channel(id) => write!(f, "channel:{}", id),
        }
    }
}

/// An entry before the store assigns its id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub action: EnforcementAction,
    pub subject: Subject,
    pub chat_id: Option<i64>,
    pub admin_id: i64,
    pub reason: Option<String>,
    pub is_active: bool,
    /// When the platform lifts the action on its own; `None` is permanent
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewLedgerEntry {
    /// Build an entry; only stateful actions start active
    pub fn new(
        action: EnforcementAction,
        subject: Subject,
        chat_id: Option<i64>,
        admin_id: i64,
        reason: Option<String>,
    ) -> Self {
        Self {
            action,
            subject,
            chat_id,
            admin_id,
            reason,
            is_active: action.is_stateful(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }
}

/// A persisted ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub action: EnforcementAction,
    pub subject: Subject,
    pub chat_id: Option<i64>,
    pub admin_id: i64,
    pub reason: Option<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_new(id: i64, entry: NewLedgerEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            action: entry.action,
            subject: entry.subject,
            chat_id: entry.chat_id,
            admin_id: entry.admin_id,
            reason: entry.reason,
            is_active: entry.is_active,
            expires_at: entry.expires_at,
            created_at,
        }
    }

    pub fn is_system(&self) -> bool {
        self.admin_id == SYSTEM_ADMIN_ID
    }

    /// Whether this row is the live `action` for `(subject, chat_id)`.
    /// Lapsed rows still count here until they are closed.
    pub fn is_live(&self, subject: Subject, chat_id: i64, action: EnforcementAction) -> bool {
        self.is_active
            && self.action == action
            && self.subject == subject
            && self.chat_id == Some(chat_id)
    }

    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Active and not past its expiry
    pub fn in_force(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.has_lapsed(now)
    }
}
