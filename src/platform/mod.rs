//! Chat platform enforcement seam
//!
//! The engine never talks to the chat platform directly. Every ban, mute,
//! delete and membership lookup goes through an [`EnforcementAdapter`], which
//! may fail independently per call. Failures are returned, never swallowed.

pub mod dry_run;
pub mod scripted;
pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dry_run::DryRunAdapter;
pub use scripted::{AdapterCall, ScriptedAdapter};
pub use telegram::{TelegramAdapter, TelegramConfig};

/// Membership status as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    /// Present but with restricted permissions
    Restricted,
    Left,
    /// Removed and banned from the chat
    Kicked,
    Unknown,
}

impl MemberStatus {
    /// Subject is currently in the chat
    pub fn is_present(&self) -> bool {
        matches!(
            self,
            MemberStatus::Creator
                | MemberStatus::Administrator
                | MemberStatus::Member
                | MemberStatus::Restricted
        )
    }

    /// Subject has been removed by the platform
    pub fn is_banned(&self) -> bool {
        matches!(self, MemberStatus::Kicked)
    }

    pub fn from_platform(status: &str) -> Self {
        match status {
            "creator" => MemberStatus::Creator,
            "administrator" => MemberStatus::Administrator,
            "member" => MemberStatus::Member,
            "restricted" => MemberStatus::Restricted,
            "left" => MemberStatus::Left,
            "kicked" => MemberStatus::Kicked,
            _ => MemberStatus::Unknown,
        }
    }
}

/// Failure of a single platform call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The platform answered and refused the call
    #[error("{method} rejected by platform: {description}")]
    Rejected { method: String, description: String },

    /// The call never got a usable answer
    #[error("{method} transport failure: {reason}")]
    Transport { method: String, reason: String },

    /// No platform is configured; the call was logged and dropped
    #[error("{method} not sent: enforcement disabled")]
    Disabled { method: String },
}

impl AdapterError {
    pub fn rejected(method: &str, description: impl Into<String>) -> Self {
        AdapterError::Rejected {
            method: method.to_string(),
            description: description.into(),
        }
    }

    pub fn transport(method: &str, reason: impl Into<String>) -> Self {
        AdapterError::Transport {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    pub fn disabled(method: &str) -> Self {
        AdapterError::Disabled {
            method: method.to_string(),
        }
    }
}

/// Enforcement calls against the external chat platform
#[async_trait]
pub trait EnforcementAdapter: Send + Sync {
    /// Remove and ban a subject; `until = None` means permanent
    async fn ban(
        &self,
        subject_id: i64,
        chat_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError>;

    async fn unban(&self, subject_id: i64, chat_id: i64) -> Result<(), AdapterError>;

    /// Revoke send permissions; `until = None` means permanent
    async fn mute(
        &self,
        subject_id: i64,
        chat_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError>;

    async fn unmute(&self, subject_id: i64, chat_id: i64) -> Result<(), AdapterError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), AdapterError>;

    async fn get_member_status(
        &self,
        chat_id: i64,
        subject_id: i64,
    ) -> Result<MemberStatus, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_status_mapping() {
        assert_eq!(MemberStatus::from_platform("kicked"), MemberStatus::Kicked);
        assert_eq!(MemberStatus::from_platform("creator"), MemberStatus::Creator);
        assert_eq!(MemberStatus::from_platform("weird"), MemberStatus::Unknown);
    }

    #[test]
    fn test_presence_classification() {
        assert!(MemberStatus::Restricted.is_present());
        assert!(!MemberStatus::Left.is_present());
        assert!(!MemberStatus::Left.is_banned());
        assert!(MemberStatus::Kicked.is_banned());
        assert!(!MemberStatus::Unknown.is_present());
    }
}
