//! Log-only adapter used when no bot token is configured
//!
//! Nothing reaches a platform. Mutating calls are logged and answered with
//! [`AdapterError::Disabled`], so ledger outcomes read `enforced = false`.
//! Membership lookups answer `Unknown`, which reconciliation never repairs
//! against. No call history is kept.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::platform::{AdapterError, EnforcementAdapter, MemberStatus};

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunAdapter;

impl DryRunAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EnforcementAdapter for DryRunAdapter {
    async fn ban(
        &self,
        subject_id: i64,
        chat_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError> {
        info!(subject_id = subject_id, chat_id = chat_id, until = ?until, "Dry run: ban not sent");
        Err(AdapterError::disabled("ban"))
    }

    async fn unban(&self, subject_id: i64, chat_id: i64) -> Result<(), AdapterError> {
        info!(subject_id = subject_id, chat_id = chat_id, "Dry run: unban not sent");
        Err(AdapterError::disabled("unban"))
    }

    async fn mute(
        &self,
        subject_id: i64,
        chat_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError> {
        info!(subject_id = subject_id, chat_id = chat_id, until = ?until, "Dry run: mute not sent");
        Err(AdapterError::disabled("mute"))
    }

    async fn unmute(&self, subject_id: i64, chat_id: i64) -> Result<(), AdapterError> {
        info!(subject_id = subject_id, chat_id = chat_id, "Dry run: unmute not sent");
        Err(AdapterError::disabled("unmute"))
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), AdapterError> {
        info!(chat_id = chat_id, message_id = message_id, "Dry run: delete not sent");
        Err(AdapterError::disabled("delete_message"))
    }

    async fn get_member_status(
        &self,
        _chat_id: i64,
        _subject_id: i64,
    ) -> Result<MemberStatus, AdapterError> {
        Ok(MemberStatus::Unknown)
    }
}
