//! `TrustStore` over PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::channels::StatusWrite;
use crate::database::pool::DatabasePool;
use crate::error::{WardenError, WardenResult};
use crate::models::{
    Bot, Channel, EnforcementAction, LedgerEntry, NewLedgerEntry, ReviewVerdict, Subject,
    SuspiciousProfile, TrustStatus, TrustTransition,
};
use crate::store::TrustStore;

fn storage(e: String) -> WardenError {
    WardenError::Storage(e)
}

#[async_trait]
impl TrustStore for DatabasePool {
    async fn get_channel(&self, external_id: i64) -> WardenResult<Option<Channel>> {
        self.channels().get(external_id).await.map_err(storage)
    }

    async fn insert_channel_if_absent(&self, channel: &Channel) -> WardenResult<(Channel, bool)> {
        self.channels().insert_if_absent(channel).await.map_err(storage)
    }

    async fn list_channels(&self, status: Option<TrustStatus>) -> WardenResult<Vec<Channel>> {
        self.channels().list(status).await.map_err(storage)
    }

    async fn apply_channel_decision(
        &self,
        external_id: i64,
        status: TrustStatus,
        entry: NewLedgerEntry,
    ) -> WardenResult<TrustTransition<Channel>> {
        match self
            .channels()
            .write_status(external_id, status, &entry, false)
            .await
            .map_err(storage)?
        {
            StatusWrite::Applied(transition) => Ok(transition),
            StatusWrite::Missing | StatusWrite::Skipped => {
                Err(WardenError::not_found("channel", external_id))
            }
        }
    }

    async fn escalate_channel(
        &self,
        external_id: i64,
        entry: NewLedgerEntry,
    ) -> WardenResult<Option<TrustTransition<Channel>>> {
        match self
            .channels()
            .write_status(external_id, TrustStatus::Suspicious, &entry, true)
            .await
            .map_err(storage)?
        {
            StatusWrite::Applied(transition) => Ok(Some(transition)),
            StatusWrite::Skipped => Ok(None),
            StatusWrite::Missing => Err(WardenError::not_found("channel", external_id)),
        }
    }

    async fn get_bot(&self, bot_id: i64) -> WardenResult<Option<Bot>> {
        self.channels().get_bot(bot_id).await.map_err(storage)
    }

    async fn insert_bot_if_absent(&self, bot: &Bot) -> WardenResult<(Bot, bool)> {
        self.channels().insert_bot_if_absent(bot).await.map_err(storage)
    }

    async fn apply_bot_decision(
        &self,
        bot_id: i64,
        status: TrustStatus,
        entry: NewLedgerEntry,
    ) -> WardenResult<TrustTransition<Bot>> {
        match self
            .channels()
            .write_bot_status(bot_id, status, &entry)
            .await
            .map_err(storage)?
        {
            StatusWrite::Applied(transition) => Ok(transition),
            StatusWrite::Missing | StatusWrite::Skipped => Err(WardenError::not_found("bot", bot_id)),
        }
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> WardenResult<LedgerEntry> {
        self.ledger().append(&entry).await.map_err(storage)
    }

    async fn deactivate_active(
        &self,
        subject: Subject,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Option<LedgerEntry>> {
        self.ledger()
            .deactivate_active(subject, chat_id, action)
            .await
            .map_err(storage)
    }

    async fn active_entry(
        &self,
        subject: Subject,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Option<LedgerEntry>> {
        self.ledger()
            .active_entry(subject, chat_id, action)
            .await
            .map_err(storage)
    }

    async fn list_active(
        &self,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Vec<LedgerEntry>> {
        self.ledger().list_active(chat_id, action).await.map_err(storage)
    }

    async fn close_lapsed(
        &self,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> WardenResult<Vec<LedgerEntry>> {
        self.ledger().close_lapsed(chat_id, now).await.map_err(storage)
    }

    async fn user_history(&self, user_id: i64) -> WardenResult<Vec<LedgerEntry>> {
        self.ledger().user_history(user_id).await.map_err(storage)
    }

    async fn ledger_subjects(&self, chat_id: i64) -> WardenResult<Vec<i64>> {
        self.ledger().subjects_for_chat(chat_id).await.map_err(storage)
    }

    async fn ledger_chats(&self) -> WardenResult<Vec<i64>> {
        self.ledger().chats().await.map_err(storage)
    }

    async fn get_profile(&self, user_id: i64) -> WardenResult<Option<SuspiciousProfile>> {
        self.profiles().get(user_id).await.map_err(storage)
    }

    async fn upsert_profile(&self, profile: &SuspiciousProfile) -> WardenResult<SuspiciousProfile> {
        self.profiles().upsert(profile).await.map_err(storage)
    }

    async fn review_profile(
        &self,
        user_id: i64,
        verdict: ReviewVerdict,
        reviewer_id: i64,
    ) -> WardenResult<SuspiciousProfile> {
        self.profiles()
            .review(user_id, verdict, reviewer_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| WardenError::not_found("profile", user_id))
    }

    async fn list_unreviewed_profiles(
        &self,
        min_score: f64,
    ) -> WardenResult<Vec<SuspiciousProfile>> {
        self.profiles().list_unreviewed(min_score).await.map_err(storage)
    }
}
