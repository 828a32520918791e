//! Suspicious profile tracking
//!
//! Scores incoming profile snapshots, keeps one `SuspiciousProfile` row per
//! user and escalates the linked channel once the live threshold is reached.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::WardenResult;
use crate::limits::LimitsHandle;
use crate::models::{Channel, ReviewVerdict, SuspiciousProfile, TrustTransition};
use crate::moderation::scoring::{
    ProfileSnapshot, SuspicionReason, SuspicionReport, SuspicionScorer,
};
use crate::moderation::trust::ChannelTrustStateMachine;
use crate::store::TrustStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileAnalysis {
    pub profile: SuspiciousProfile,
    pub report: SuspicionReport,
    /// Set when the linked channel moved to `suspicious` as a result
    pub escalated: Option<TrustTransition<Channel>>,
}

pub struct ProfileService {
    store: Arc<dyn TrustStore>,
    machine: Arc<ChannelTrustStateMachine>,
    scorer: SuspicionScorer,
    limits: LimitsHandle,
}

impl ProfileService {
    pub fn new(
        store: Arc<dyn TrustStore>,
        machine: Arc<ChannelTrustStateMachine>,
        limits: LimitsHandle,
    ) -> Self {
        Self {
            store,
            machine,
            scorer: SuspicionScorer::new(),
            limits,
        }
    }

    pub async fn analyze(&self, snapshot: &ProfileSnapshot) -> WardenResult<ProfileAnalysis> {
        let report = self.scorer.score(snapshot);

        let mut profile = self
            .store
            .get_profile(snapshot.user_id)
            .await?
            .unwrap_or_else(|| SuspiciousProfile::new(snapshot.user_id));
        profile.linked_chat_id = snapshot.linked_channel.as_ref().map(|c| c.chat_id);
        profile.post_count = snapshot
            .linked_channel
            .as_ref()
            .map(|c| c.post_count)
            .unwrap_or_default();
        profile.has_bait_channel = report.has(SuspicionReason::BaitChannel);
        profile.suspicion_score = report.score;
        profile.patterns = report.patterns();
        profile.updated_at = Utc::now();

        let profile = self.store.upsert_profile(&profile).await?;
        debug!(
            user_id = snapshot.user_id,
            score = report.score,
            patterns = %profile.patterns,
            "Profile analyzed"
        );

        let limits = self.limits.current();
        let mut escalated = None;
        if limits.should_escalate(report.score)
            && !profile.is_false_positive
            && let Some(linked) = &snapshot.linked_channel
        {
            let candidate = Channel::pending(linked.chat_id, linked.title.clone(), None);
            self.store.insert_channel_if_absent(&candidate).await?;

            escalated = self
                .machine
                .escalate_suspicious(
                    linked.chat_id,
                    format!("linked from profile {} ({})", snapshot.user_id, profile.patterns),
                )
                .await?;
            if escalated.is_some() {
                info!(
                    user_id = snapshot.user_id,
                    channel_id = linked.chat_id,
                    score = report.score,
                    "Linked channel escalated from suspicious profile"
                );
            }
        }

        Ok(ProfileAnalysis {
            profile,
            report,
            escalated,
        })
    }

    pub async fn review(
        &self,
        user_id: i64,
        verdict: ReviewVerdict,
        reviewer_id: i64,
    ) -> WardenResult<SuspiciousProfile> {
        let profile = self
            .store
            .review_profile(user_id, verdict, reviewer_id)
            .await?;
        info!(user_id = user_id, reviewer_id = reviewer_id, verdict = ?verdict, "Profile reviewed");
        Ok(profile)
    }

    /// Unreviewed profiles at or above the live threshold, highest score first
    pub async fn pending_reviews(&self) -> WardenResult<Vec<SuspiciousProfile>> {
        let threshold = self.limits.current().suspicion_threshold;
        self.store.list_unreviewed_profiles(threshold).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitsConfig;
    use crate::models::{EnforcementAction, NewLedgerEntry, Subject, TrustStatus};
    use crate::moderation::ledger::EnforcementLedger;
    use crate::moderation::scoring::LinkedChannel;
    use crate::platform::ScriptedAdapter;
    use crate::store::MemoryStore;

    fn service() -> (ProfileService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(ScriptedAdapter::new());
        let limits = LimitsHandle::fixed(LimitsConfig::default());
        let ledger = Arc::new(EnforcementLedger::new(
            store.clone(),
            adapter,
            limits.clone(),
        ));
        let machine = Arc::new(ChannelTrustStateMachine::new(
            store.clone(),
            ledger,
            limits.clone(),
        ));
        (ProfileService::new(store.clone(), machine, limits), store)
    }

    fn bait_snapshot(user_id: i64) -> ProfileSnapshot {
        ProfileSnapshot {
            user_id,
            first_name: "Max".to_string(),
            last_name: None,
            username: Some("max_b".to_string()),
            bio: Some("t.me/+invite".to_string()),
            has_photo: false,
            linked_channel: Some(LinkedChannel {
                chat_id: -100777,
                title: "Crypto earnings".to_string(),
                description: None,
                post_count: 1,
            }),
        }
    }

    #[tokio::test]
    async fn test_high_score_escalates_linked_channel() {
        let (service, store) = service();
        let analysis = service.analyze(&bait_snapshot(77)).await.unwrap();

        assert!(analysis.profile.has_bait_channel);
        assert_eq!(analysis.profile.linked_chat_id, Some(-100777));
        assert!(analysis.escalated.is_some());

        let channel = store.get_channel(-100777).await.unwrap().unwrap();
        assert_eq!(channel.status, TrustStatus::Suspicious);
    }

    #[tokio::test]
    async fn test_false_positive_never_reescalates() {
        let (service, store) = service();
        service.analyze(&bait_snapshot(77)).await.unwrap();
        service
            .review(77, ReviewVerdict::FalsePositive, 42)
            .await
            .unwrap();

        // Admin clears the channel, then the same profile is analyzed again
        store
            .apply_channel_decision(
                -100777,
                TrustStatus::Allowed,
                NewLedgerEntry::new(
                    EnforcementAction::AllowChannel,
                    Subject::Channel(-100777),
                    None,
                    42,
                    None,
                ),
            )
            .await
            .unwrap();
        let again = service.analyze(&bait_snapshot(77)).await.unwrap();

        assert!(again.escalated.is_none());
        assert!(again.profile.is_false_positive);
        assert!(service.pending_reviews().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_review_unknown_profile_not_found() {
        let (service, _) = service();
        let err = service
            .review(1, ReviewVerdict::ConfirmedSuspicious, 42)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pending_reviews_respects_threshold() {
        let (service, _) = service();
        service.analyze(&bait_snapshot(77)).await.unwrap();

        let mut mild = bait_snapshot(78);
        mild.linked_channel = None;
        mild.bio = None;
        mild.has_photo = true;
        service.analyze(&mild).await.unwrap();

        let pending = service.pending_reviews().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, 77);
    }
}
