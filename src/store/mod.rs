//! Persistence substrate for trust state, the ledger and profiles
//!
//! Two backends implement [`TrustStore`]:
//! - [`MemoryStore`]: single write lock, used when PostgreSQL is disabled and in tests
//! - [`crate::database::DatabasePool`]: PostgreSQL via sqlx transactions
//!
//! Operations documented as atomic must either fully apply or not at all.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WardenResult;
use crate::models::{
    Bot, Channel, EnforcementAction, LedgerEntry, NewLedgerEntry, ReviewVerdict, Subject,
    SuspiciousProfile, TrustStatus, TrustTransition,
};

pub use memory::MemoryStore;

#[async_trait]
pub trait TrustStore: Send + Sync {
    // Channels

    async fn get_channel(&self, external_id: i64) -> WardenResult<Option<Channel>>;

    /// Insert `channel` unless one with the same external id exists.
    /// Returns the stored row and whether it was created.
    async fn insert_channel_if_absent(&self, channel: &Channel) -> WardenResult<(Channel, bool)>;

    async fn list_channels(&self, status: Option<TrustStatus>) -> WardenResult<Vec<Channel>>;

    /// Atomically set the channel status and append `entry`.
    /// Fails with `NotFound` for an unknown channel.
    async fn apply_channel_decision(
        &self,
        external_id: i64,
        status: TrustStatus,
        entry: NewLedgerEntry,
    ) -> WardenResult<TrustTransition<Channel>>;

    /// Like `apply_channel_decision` to `Suspicious`, but only when the
    /// current status accepts escalation. `None` means nothing was written.
    async fn escalate_channel(
        &self,
        external_id: i64,
        entry: NewLedgerEntry,
    ) -> WardenResult<Option<TrustTransition<Channel>>>;

    // Bots

    async fn get_bot(&self, bot_id: i64) -> WardenResult<Option<Bot>>;

    async fn insert_bot_if_absent(&self, bot: &Bot) -> WardenResult<(Bot, bool)>;

    async fn apply_bot_decision(
        &self,
        bot_id: i64,
        status: TrustStatus,
        entry: NewLedgerEntry,
    ) -> WardenResult<TrustTransition<Bot>>;

    // Ledger

    /// Append an entry. An active stateful entry first deactivates any live
    /// entry for the same `(subject, chat, action)` within the same atomic step.
    async fn append_entry(&self, entry: NewLedgerEntry) -> WardenResult<LedgerEntry>;

    /// Flip the most recent live `(subject, chat, action)` entry to inactive.
    async fn deactivate_active(
        &self,
        subject: Subject,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Option<LedgerEntry>>;

    /// The live `(subject, chat, action)` entry, unless it has lapsed
    async fn active_entry(
        &self,
        subject: Subject,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Option<LedgerEntry>>;

    /// Live, unlapsed entries of `action` within a chat, newest first
    async fn list_active(
        &self,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Vec<LedgerEntry>>;

    /// Close every active entry in a chat whose expiry is at or before `now`.
    /// Returns the closed rows.
    async fn close_lapsed(
        &self,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> WardenResult<Vec<LedgerEntry>>;

    /// Every entry naming `user_id`, newest first
    async fn user_history(&self, user_id: i64) -> WardenResult<Vec<LedgerEntry>>;

    /// Distinct user ids the ledger has ever mentioned for a chat
    async fn ledger_subjects(&self, chat_id: i64) -> WardenResult<Vec<i64>>;

    /// Distinct chat ids present in the ledger
    async fn ledger_chats(&self) -> WardenResult<Vec<i64>>;

    // Suspicious profiles

    async fn get_profile(&self, user_id: i64) -> WardenResult<Option<SuspiciousProfile>>;

    /// Insert or update the single row for `profile.user_id`
    async fn upsert_profile(&self, profile: &SuspiciousProfile) -> WardenResult<SuspiciousProfile>;

    async fn review_profile(
        &self,
        user_id: i64,
        verdict: ReviewVerdict,
        reviewer_id: i64,
    ) -> WardenResult<SuspiciousProfile>;

    async fn list_unreviewed_profiles(&self, min_score: f64)
    -> WardenResult<Vec<SuspiciousProfile>>;
}
