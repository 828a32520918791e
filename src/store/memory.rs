//! In-memory trust store
//!
//! All state sits behind one `RwLock`, so every mutating operation is applied
//! under a single write guard and is atomic with respect to readers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{WardenError, WardenResult};
use crate::models::{
    Bot, Channel, EnforcementAction, LedgerEntry, NewLedgerEntry, ReviewVerdict, Subject,
    SuspiciousProfile, TrustStatus, TrustTransition,
};
use crate::store::TrustStore;

#[derive(Default)]
struct MemoryState {
    channels: HashMap<i64, Channel>,
    bots: HashMap<i64, Bot>,
    /// Append-only, ordered by id
    entries: Vec<LedgerEntry>,
    profiles: HashMap<i64, SuspiciousProfile>,
    next_entry_id: i64,
}

impl MemoryState {
    fn push_entry(&mut self, entry: NewLedgerEntry) -> LedgerEntry {
        if entry.is_active
            && entry.action.is_stateful()
            && let Some(chat_id) = entry.chat_id
        {
            for live in self
                .entries
                .iter_mut()
                .filter(|e| e.is_live(entry.subject, chat_id, entry.action))
            {
                live.is_active = false;
                debug!(entry_id = live.id, action = %live.action, "Superseded live entry");
            }
        }

        self.next_entry_id += 1;
        let stored = LedgerEntry::from_new(self.next_entry_id, entry, Utc::now());
        self.entries.push(stored.clone());
        stored
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of ledger rows
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Snapshot of every ledger row, oldest first
    pub async fn all_entries(&self) -> Vec<LedgerEntry> {
        self.state.read().await.entries.clone()
    }
}

#[async_trait]
impl TrustStore for MemoryStore {
    async fn get_channel(&self, external_id: i64) -> WardenResult<Option<Channel>> {
        Ok(self.state.read().await.channels.get(&external_id).cloned())
    }

    async fn insert_channel_if_absent(&self, channel: &Channel) -> WardenResult<(Channel, bool)> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.channels.get(&channel.external_id) {
            return Ok((existing.clone(), false));
        }
        state.channels.insert(channel.external_id, channel.clone());
        Ok((channel.clone(), true))
    }

    async fn list_channels(&self, status: Option<TrustStatus>) -> WardenResult<Vec<Channel>> {
        let state = self.state.read().await;
        let mut channels: Vec<Channel> = state
            .channels
            .values()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.created_at);
        Ok(channels)
    }

    async fn apply_channel_decision(
        &self,
        external_id: i64,
        status: TrustStatus,
        entry: NewLedgerEntry,
    ) -> WardenResult<TrustTransition<Channel>> {
        let mut state = self.state.write().await;
        let channel = state
            .channels
            .get_mut(&external_id)
            .ok_or_else(|| WardenError::not_found("channel", external_id))?;
        let previous = channel.status;
        channel.status = status;
        channel.updated_at = Utc::now();
        let current = channel.clone();
        let entry = state.push_entry(entry);
        Ok(TrustTransition {
            previous,
            current,
            entry,
        })
    }

    async fn escalate_channel(
        &self,
        external_id: i64,
        entry: NewLedgerEntry,
    ) -> WardenResult<Option<TrustTransition<Channel>>> {
        let mut state = self.state.write().await;
        let channel = state
            .channels
            .get_mut(&external_id)
            .ok_or_else(|| WardenError::not_found("channel", external_id))?;
        if !channel.status.accepts_escalation() {
            return Ok(None);
        }
        let previous = channel.status;
        channel.status = TrustStatus::Suspicious;
        channel.updated_at = Utc::now();
        let current = channel.clone();
        let entry = state.push_entry(entry);
        Ok(Some(TrustTransition {
            previous,
            current,
            entry,
        }))
    }

    async fn get_bot(&self, bot_id: i64) -> WardenResult<Option<Bot>> {
        Ok(self.state.read().await.bots.get(&bot_id).cloned())
    }

    async fn insert_bot_if_absent(&self, bot: &Bot) -> WardenResult<(Bot, bool)> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.bots.get(&bot.bot_id) {
            return Ok((existing.clone(), false));
        }
        state.bots.insert(bot.bot_id, bot.clone());
        Ok((bot.clone(), true))
    }

    async fn apply_bot_decision(
        &self,
        bot_id: i64,
        status: TrustStatus,
        entry: NewLedgerEntry,
    ) -> WardenResult<TrustTransition<Bot>> {
        let mut state = self.state.write().await;
        let bot = state
            .bots
            .get_mut(&bot_id)
            .ok_or_else(|| WardenError::not_found("bot", bot_id))?;
        let previous = bot.status;
        bot.status = status;
        bot.updated_at = Utc::now();
        let current = bot.clone();
        let entry = state.push_entry(entry);
        Ok(TrustTransition {
            previous,
            current,
            entry,
        })
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> WardenResult<LedgerEntry> {
        Ok(self.state.write().await.push_entry(entry))
    }

    async fn deactivate_active(
        &self,
        subject: Subject,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Option<LedgerEntry>> {
        let mut state = self.state.write().await;
        let latest = state
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.is_live(subject, chat_id, action));
        Ok(latest.map(|entry| {
            entry.is_active = false;
            entry.clone()
        }))
    }

    async fn active_entry(
        &self,
        subject: Subject,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Option<LedgerEntry>> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .entries
            .iter()
            .rev()
            .find(|e| e.is_live(subject, chat_id, action) && e.in_force(now))
            .cloned())
    }

    async fn list_active(
        &self,
        chat_id: i64,
        action: EnforcementAction,
    ) -> WardenResult<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.in_force(now) && e.action == action && e.chat_id == Some(chat_id))
            .cloned()
            .collect())
    }

    async fn close_lapsed(
        &self,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> WardenResult<Vec<LedgerEntry>> {
        let mut state = self.state.write().await;
        let mut closed = Vec::new();
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.is_active && e.chat_id == Some(chat_id) && e.has_lapsed(now))
        {
            entry.is_active = false;
            closed.push(entry.clone());
        }
        Ok(closed)
    }

    async fn user_history(&self, user_id: i64) -> WardenResult<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.subject == Subject::User(user_id))
            .cloned()
            .collect())
    }

    async fn ledger_subjects(&self, chat_id: i64) -> WardenResult<Vec<i64>> {
        let state = self.state.read().await;
        let subjects: BTreeSet<i64> = state
            .entries
            .iter()
            .filter(|e| e.chat_id == Some(chat_id))
            .filter_map(|e| e.subject.user_id())
            .collect();
        Ok(subjects.into_iter().collect())
    }

    async fn ledger_chats(&self) -> WardenResult<Vec<i64>> {
        let state = self.state.read().await;
        let chats: BTreeSet<i64> = state.entries.iter().filter_map(|e| e.chat_id).collect();
        Ok(chats.into_iter().collect())
    }

    async fn get_profile(&self, user_id: i64) -> WardenResult<Option<SuspiciousProfile>> {
        Ok(self.state.read().await.profiles.get(&user_id).cloned())
    }

    async fn upsert_profile(&self, profile: &SuspiciousProfile) -> WardenResult<SuspiciousProfile> {
        let mut state = self.state.write().await;
        let stored = match state.profiles.get(&profile.user_id) {
            Some(existing) => SuspiciousProfile {
                created_at: existing.created_at,
                ..profile.clone()
            },
            None => profile.clone(),
        };
        state.profiles.insert(profile.user_id, stored.clone());
        Ok(stored)
    }

    async fn review_profile(
        &self,
        user_id: i64,
        verdict: ReviewVerdict,
        reviewer_id: i64,
    ) -> WardenResult<SuspiciousProfile> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| WardenError::not_found("profile", user_id))?;
        profile.apply_review(verdict, reviewer_id);
        Ok(profile.clone())
    }

    async fn list_unreviewed_profiles(
        &self,
        min_score: f64,
    ) -> WardenResult<Vec<SuspiciousProfile>> {
        let state = self.state.read().await;
        let mut profiles: Vec<SuspiciousProfile> = state
            .profiles
            .values()
            .filter(|p| !p.is_reviewed && p.suspicion_score >= min_score)
            .cloned()
            .collect();
        profiles.sort_by(|a, b| b.suspicion_score.total_cmp(&a.suspicion_score));
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SYSTEM_ADMIN_ID;

    fn ban(user_id: i64, chat_id: i64) -> NewLedgerEntry {
        NewLedgerEntry::new(
            EnforcementAction::Ban,
            Subject::User(user_id),
            Some(chat_id),
            1,
            Some("spam".to_string()),
        )
    }

    #[tokio::test]
    async fn test_active_ban_supersedes_previous() {
        let store = MemoryStore::new();
        let first = store.append_entry(ban(5, 9)).await.unwrap();
        let second = store.append_entry(ban(5, 9)).await.unwrap();

        let active = store.list_active(9, EnforcementAction::Ban).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);

        let history = store.user_history(5).await.unwrap();
        let earlier = history.iter().find(|e| e.id == first.id).unwrap();
        assert!(!earlier.is_active);
    }

    #[tokio::test]
    async fn test_lapsed_mute_hidden_then_closed() {
        let store = MemoryStore::new();
        let lapsed = Utc::now() - chrono::Duration::minutes(5);
        let mute = NewLedgerEntry::new(EnforcementAction::Mute, Subject::User(5), Some(9), 1, None)
            .expiring_at(Some(lapsed));
        store.append_entry(mute).await.unwrap();

        assert!(store.list_active(9, EnforcementAction::Mute).await.unwrap().is_empty());
        assert!(store
            .active_entry(Subject::User(5), 9, EnforcementAction::Mute)
            .await
            .unwrap()
            .is_none());

        let closed = store.close_lapsed(9, Utc::now()).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert!(!closed[0].is_active);
        assert!(store.close_lapsed(9, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_ban_supersedes_lapsed_row() {
        let store = MemoryStore::new();
        let lapsed = Utc::now() - chrono::Duration::minutes(5);
        store
            .append_entry(ban(5, 9).expiring_at(Some(lapsed)))
            .await
            .unwrap();
        store.append_entry(ban(5, 9)).await.unwrap();

        let raw_active = store
            .all_entries()
            .await
            .into_iter()
            .filter(|e| e.is_active)
            .count();
        assert_eq!(raw_active, 1);
    }

    #[tokio::test]
    async fn test_bans_in_other_chats_are_independent() {
        let store = MemoryStore::new();
        store.append_entry(ban(5, 9)).await.unwrap();
        store.append_entry(ban(5, 10)).await.unwrap();

        let user = Subject::User(5);
        assert!(store.active_entry(user, 9, EnforcementAction::Ban).await.unwrap().is_some());
        assert!(store.active_entry(user, 10, EnforcementAction::Ban).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deactivate_without_match_is_noop() {
        let store = MemoryStore::new();
        let result = store
            .deactivate_active(Subject::User(5), 9, EnforcementAction::Ban)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_decision_on_unknown_channel_writes_nothing() {
        let store = MemoryStore::new();
        let entry = NewLedgerEntry::new(
            EnforcementAction::BlockChannel,
            Subject::Channel(-100123),
            None,
            42,
            None,
        );
        let err = store
            .apply_channel_decision(-100123, TrustStatus::Blocked, entry)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_escalation_skips_blocked_channel() {
        let store = MemoryStore::new();
        store
            .insert_channel_if_absent(&Channel::pending(-1001, "Promo", None))
            .await
            .unwrap();
        let block = NewLedgerEntry::new(
            EnforcementAction::BlockChannel,
            Subject::Channel(-1001),
            None,
            42,
            None,
        );
        let transition = store
            .apply_channel_decision(-1001, TrustStatus::Blocked, block)
            .await
            .unwrap();
        assert_eq!(transition.previous, TrustStatus::Pending);

        let escalate = NewLedgerEntry::new(
            EnforcementAction::MarkSuspicious,
            Subject::Channel(-1001),
            None,
            SYSTEM_ADMIN_ID,
            None,
        );
        assert!(store.escalate_channel(-1001, escalate).await.unwrap().is_none());
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_bot_bans_do_not_collide_with_user_bans() {
        let store = MemoryStore::new();
        store.append_entry(ban(5, 9)).await.unwrap();
        store
            .append_entry(NewLedgerEntry::new(
                EnforcementAction::Ban,
                Subject::Bot(5),
                Some(9),
                SYSTEM_ADMIN_ID,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(store.list_active(9, EnforcementAction::Ban).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_channel_if_absent_keeps_first_row() {
        let store = MemoryStore::new();
        let (_, created) = store
            .insert_channel_if_absent(&Channel::pending(-1001, "First", None))
            .await
            .unwrap();
        let (existing, created_again) = store
            .insert_channel_if_absent(&Channel::pending(-1001, "Second", None))
            .await
            .unwrap();

        assert!(created);
        assert!(!created_again);
        assert_eq!(existing.title, "First");
    }

    #[tokio::test]
    async fn test_ledger_subjects_only_lists_users_of_that_chat() {
        let store = MemoryStore::new();
        store.append_entry(ban(5, 9)).await.unwrap();
        store.append_entry(ban(6, 9)).await.unwrap();
        store.append_entry(ban(7, 10)).await.unwrap();
        store
            .append_entry(NewLedgerEntry::new(
                EnforcementAction::DeleteMessage,
                Subject::Channel(-1001),
                Some(9),
                SYSTEM_ADMIN_ID,
                None,
            ))
            .await
            .unwrap();

        assert_eq!(store.ledger_subjects(9).await.unwrap(), vec![5, 6]);
        assert_eq!(store.ledger_chats().await.unwrap(), vec![9, 10]);
    }

    #[tokio::test]
    async fn test_profile_upsert_keeps_single_row() {
        let store = MemoryStore::new();
        let mut profile = SuspiciousProfile::new(77);
        profile.suspicion_score = 0.4;
        let first = store.upsert_profile(&profile).await.unwrap();

        profile.suspicion_score = 0.9;
        let second = store.upsert_profile(&profile).await.unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(store.get_profile(77).await.unwrap().unwrap().suspicion_score, 0.9);
        assert_eq!(store.list_unreviewed_profiles(0.0).await.unwrap().len(), 1);
    }
}
