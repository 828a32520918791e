//! Enforcement ledger
//!
//! Records intent first, then executes through the platform adapter. A failed
//! adapter call never rolls the ledger row back: reconciliation is the repair
//! path for anything the platform did not apply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{WardenError, WardenResult};
use crate::limits::LimitsHandle;
use crate::models::{EnforcementAction, LedgerEntry, NewLedgerEntry, SYSTEM_ADMIN_ID, Subject};
use crate::platform::{AdapterError, EnforcementAdapter};
use crate::store::TrustStore;

/// One enforcement action to record and execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementRequest {
    pub action: EnforcementAction,
    pub subject: Subject,
    pub chat_id: i64,
    pub admin_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
    /// Required for `delete_message`
    #[serde(default)]
    pub message_id: Option<i64>,
}

impl EnforcementRequest {
    fn user_action(
        action: EnforcementAction,
        user_id: i64,
        chat_id: i64,
        admin_id: i64,
        reason: Option<String>,
    ) -> Self {
        Self {
            action,
            subject: Subject::User(user_id),
            chat_id,
            admin_id,
            reason,
            message_id: None,
        }
    }

    pub fn ban(user_id: i64, chat_id: i64, admin_id: i64, reason: Option<String>) -> Self {
        Self::user_action(EnforcementAction::Ban, user_id, chat_id, admin_id, reason)
    }

    pub fn unban(user_id: i64, chat_id: i64, admin_id: i64, reason: Option<String>) -> Self {
        Self::user_action(EnforcementAction::Unban, user_id, chat_id, admin_id, reason)
    }

    pub fn mute(user_id: i64, chat_id: i64, admin_id: i64, reason: Option<String>) -> Self {
        Self::user_action(EnforcementAction::Mute, user_id, chat_id, admin_id, reason)
    }

    pub fn unmute(user_id: i64, chat_id: i64, admin_id: i64, reason: Option<String>) -> Self {
        Self::user_action(EnforcementAction::Unmute, user_id, chat_id, admin_id, reason)
    }

    pub fn ban_bot(bot_id: i64, chat_id: i64, admin_id: i64, reason: Option<String>) -> Self {
        Self {
            subject: Subject::Bot(bot_id),
            ..Self::user_action(EnforcementAction::Ban, bot_id, chat_id, admin_id, reason)
        }
    }

    /// Remove one message posted by `author` (a user or a channel)
    pub fn delete_message(
        author: Subject,
        chat_id: i64,
        message_id: i64,
        admin_id: i64,
        reason: Option<String>,
    ) -> Self {
        Self {
            action: EnforcementAction::DeleteMessage,
            subject: author,
            chat_id,
            admin_id,
            reason,
            message_id: Some(message_id),
        }
    }
}

/// What happened to one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnforcementOutcome {
    /// The row written before the adapter was called
    pub entry: LedgerEntry,
    /// Whether the platform accepted the call
    pub enforced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct EnforcementLedger {
    store: Arc<dyn TrustStore>,
    adapter: Arc<dyn EnforcementAdapter>,
    limits: LimitsHandle,
}

impl EnforcementLedger {
    pub fn new(
        store: Arc<dyn TrustStore>,
        adapter: Arc<dyn EnforcementAdapter>,
        limits: LimitsHandle,
    ) -> Self {
        Self {
            store,
            adapter,
            limits,
        }
    }

    pub fn store(&self) -> &Arc<dyn TrustStore> {
        &self.store
    }

    pub fn adapter(&self) -> &Arc<dyn EnforcementAdapter> {
        &self.adapter
    }

    /// Write the ledger row, then execute it on the platform
    pub async fn record_and_enforce(
        &self,
        request: EnforcementRequest,
    ) -> WardenResult<EnforcementOutcome> {
        validate(&request)?;

        // Lifting actions close the matching live row before recording themselves
        if let Some(lifted) = request.action.lifts() {
            let closed = self
                .store
                .deactivate_active(request.subject, request.chat_id, lifted)
                .await?;
            if let Some(closed) = closed {
                debug!(entry_id = closed.id, action = %lifted, "Deactivated live entry");
            }
        }

        let until = self.expiry_for(&request);
        let entry = self
            .store
            .append_entry(
                NewLedgerEntry::new(
                    request.action,
                    request.subject,
                    Some(request.chat_id),
                    request.admin_id,
                    request.reason.clone(),
                )
                .expiring_at(until),
            )
            .await?;

        info!(
            entry_id = entry.id,
            action = %entry.action,
            subject = %entry.subject,
            chat_id = request.chat_id,
            admin_id = request.admin_id,
            "Ledger entry recorded"
        );

        match self.execute(&request, until).await {
            Ok(()) => Ok(EnforcementOutcome {
                entry,
                enforced: true,
                error: None,
            }),
            Err(e) => {
                warn!(
                    entry_id = entry.id,
                    action = %entry.action,
                    subject = %entry.subject,
                    chat_id = request.chat_id,
                    error = %e,
                    "Enforcement call failed, ledger entry kept for reconciliation"
                );
                Ok(EnforcementOutcome {
                    entry,
                    enforced: false,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Flip the most recent live match to inactive without touching the platform
    pub async fn deactivate_active(
        &self,
        user_id: i64,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Option<LedgerEntry>> {
        if !action.is_stateful() {
            return Err(WardenError::InvalidRequest(format!(
                "{} rows are never active",
                action
            )));
        }
        self.store
            .deactivate_active(Subject::User(user_id), chat_id, action)
            .await
    }

    /// Users currently banned in `chat_id`, newest first. Lapsed timed bans
    /// are left out.
    pub async fn active_bans(&self, chat_id: i64) -> WardenResult<Vec<LedgerEntry>> {
        self.store.list_active(chat_id, EnforcementAction::Ban).await
    }

    pub async fn active_mutes(&self, chat_id: i64) -> WardenResult<Vec<LedgerEntry>> {
        self.store.list_active(chat_id, EnforcementAction::Mute).await
    }

    pub async fn history(&self, user_id: i64) -> WardenResult<Vec<LedgerEntry>> {
        self.store.user_history(user_id).await
    }

    /// Admin bans are permanent; mutes and system bans expire
    fn expiry_for(&self, request: &EnforcementRequest) -> Option<DateTime<Utc>> {
        let timed = match request.action {
            EnforcementAction::Mute => true,
            EnforcementAction::Ban => request.admin_id == SYSTEM_ADMIN_ID,
            _ => false,
        };
        timed.then(|| Utc::now() + self.limits.current().ban_duration())
    }

    async fn execute(
        &self,
        request: &EnforcementRequest,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError> {
        let subject_id = request.subject.id();
        let chat_id = request.chat_id;
        match request.action {
            EnforcementAction::Ban => self.adapter.ban(subject_id, chat_id, until).await,
            EnforcementAction::Unban => self.adapter.unban(subject_id, chat_id).await,
            EnforcementAction::Mute => self.adapter.mute(subject_id, chat_id, until).await,
            EnforcementAction::Unmute => self.adapter.unmute(subject_id, chat_id).await,
            EnforcementAction::DeleteMessage => {
                let message_id = request.message_id.unwrap_or_default();
                self.adapter.delete_message(chat_id, message_id).await
            }
            EnforcementAction::AllowChannel
            | EnforcementAction::BlockChannel
            | EnforcementAction::AllowBot
            | EnforcementAction::BlockBot
            | EnforcementAction::MarkSuspicious => Ok(()),
        }
    }
}

fn validate(request: &EnforcementRequest) -> WardenResult<()> {
    if request.action.is_trust_decision() {
        return Err(WardenError::InvalidRequest(format!(
            "{} is a trust decision and must go through decide",
            request.action
        )));
    }
    if !request.action.accepts(&request.subject) {
        return Err(WardenError::InvalidRequest(format!(
            "{} cannot target {}",
            request.action, request.subject
        )));
    }
    if request.action == EnforcementAction::DeleteMessage && request.message_id.is_none() {
        return Err(WardenError::InvalidRequest(
            "delete_message requires a message id".to_string(),
        ));
    }
    Ok(())
}
