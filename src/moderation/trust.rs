//! Channel and bot trust state machine
//!
//! ```text
//!              admin                   admin
//!   (unknown) ──────► pending ───────────────► allowed / blocked / suspicious
//!                        │  system escalation        ▲
//!                        └──────────► suspicious ◄───┘ (from allowed only)
//! ```
//!
//! Admin decisions may move any channel to any status. The system itself only
//! creates pending channels and escalates pending/allowed ones to suspicious.
//! `suspicious` is advisory: its traffic still passes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{WardenError, WardenResult};
use crate::limits::LimitsHandle;
use crate::models::{
    Bot, BotDecision, Channel, ChannelDecision, NewLedgerEntry, SYSTEM_ADMIN_ID, Subject,
    TrustStatus, TrustTransition,
};
use crate::moderation::ledger::{EnforcementLedger, EnforcementOutcome, EnforcementRequest};
use crate::moderation::rate_limit::SlidingWindowLimiter;
use crate::store::TrustStore;

/// A message posted into a moderated chat on behalf of a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundChannelEvent {
    /// Group chat the message landed in
    pub chat_id: i64,
    /// External id of the posting channel
    pub channel_id: i64,
    pub title: String,
    #[serde(default)]
    pub handle: Option<String>,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ChannelVerdict {
    /// Channel awaits an admin decision. `notify` asks the caller to surface
    /// a review notification; it is false while the channel is over its rate.
    HoldForReview {
        channel: Channel,
        first_seen: bool,
        notify: bool,
    },
    Pass { status: TrustStatus },
    /// Trusted channel over its message rate; the message was removed
    Throttled { outcome: EnforcementOutcome },
    /// Blocked channel; the message was removed
    Deleted { outcome: EnforcementOutcome },
}

/// A bot added to a moderated chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotJoinedEvent {
    pub chat_id: i64,
    pub bot_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    /// User who added the bot
    pub added_by: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum BotVerdict {
    HoldForReview { bot: Bot, first_seen: bool },
    Admit { bot: Bot },
    Removed { outcome: EnforcementOutcome },
}

pub struct ChannelTrustStateMachine {
    store: Arc<dyn TrustStore>,
    ledger: Arc<EnforcementLedger>,
    limiter: SlidingWindowLimiter,
    limits: LimitsHandle,
}

impl ChannelTrustStateMachine {
    pub fn new(
        store: Arc<dyn TrustStore>,
        ledger: Arc<EnforcementLedger>,
        limits: LimitsHandle,
    ) -> Self {
        Self {
            store,
            ledger,
            limiter: SlidingWindowLimiter::default(),
            limits,
        }
    }

    /// Replace the limiter (e.g. with a shorter window)
    pub fn with_limiter(mut self, limiter: SlidingWindowLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// Route one inbound channel message
    pub async fn handle_inbound_channel_event(
        &self,
        event: &InboundChannelEvent,
    ) -> WardenResult<ChannelVerdict> {
        let limited = self.check_rate(event.channel_id);

        let (channel, first_seen) = match self.store.get_channel(event.channel_id).await? {
            Some(channel) => (channel, false),
            None => {
                let candidate =
                    Channel::pending(event.channel_id, event.title.clone(), event.handle.clone());
                self.store.insert_channel_if_absent(&candidate).await?
            }
        };

        if first_seen {
            info!(
                channel_id = channel.external_id,
                chat_id = event.chat_id,
                title = %channel.title,
                "New channel held for review"
            );
            return Ok(ChannelVerdict::HoldForReview {
                channel,
                first_seen: true,
                notify: true,
            });
        }

        match channel.status {
            TrustStatus::Blocked => {
                let outcome = self
                    .delete_channel_message(event, "message from blocked channel")
                    .await?;
                Ok(ChannelVerdict::Deleted { outcome })
            }
            TrustStatus::Allowed | TrustStatus::Suspicious if limited => {
                warn!(
                    channel_id = channel.external_id,
                    chat_id = event.chat_id,
                    "Channel over message rate, removing message"
                );
                let outcome = self
                    .delete_channel_message(event, "channel message rate exceeded")
                    .await?;
                Ok(ChannelVerdict::Throttled { outcome })
            }
            TrustStatus::Allowed | TrustStatus::Suspicious => Ok(ChannelVerdict::Pass {
                status: channel.status,
            }),
            TrustStatus::Pending => {
                debug!(
                    channel_id = channel.external_id,
                    suppressed = limited,
                    "Pending channel posted again"
                );
                Ok(ChannelVerdict::HoldForReview {
                    channel,
                    first_seen: false,
                    notify: !limited,
                })
            }
        }
    }

    /// Count one message for `channel_id`; true once over the per-minute limit
    pub fn check_rate(&self, channel_id: i64) -> bool {
        let limit = self.limits.current().max_messages_per_minute;
        self.limiter.check(channel_id, limit)
    }

    /// Apply an admin decision. Last writer wins; the transition reports the
    /// status it replaced.
    pub async fn decide(
        &self,
        channel_id: i64,
        decision: ChannelDecision,
        admin_id: i64,
        reason: Option<String>,
    ) -> WardenResult<TrustTransition<Channel>> {
        let entry = NewLedgerEntry::new(
            decision.action(),
            Subject::Channel(channel_id),
            None,
            admin_id,
            reason,
        );
        let transition = self
            .store
            .apply_channel_decision(channel_id, decision.status(), entry)
            .await?;

        info!(
            channel_id = channel_id,
            admin_id = admin_id,
            from = %transition.previous,
            to = %transition.current.status,
            "Channel decision applied"
        );
        Ok(transition)
    }

    /// System escalation to `suspicious`. Returns `None` when the channel's
    /// current status does not accept escalation.
    pub async fn escalate_suspicious(
        &self,
        channel_id: i64,
        reason: impl Into<String>,
    ) -> WardenResult<Option<TrustTransition<Channel>>> {
        let entry = NewLedgerEntry::new(
            ChannelDecision::MarkSuspicious.action(),
            Subject::Channel(channel_id),
            None,
            SYSTEM_ADMIN_ID,
            Some(reason.into()),
        );
        let transition = self.store.escalate_channel(channel_id, entry).await?;

        match &transition {
            Some(t) => info!(
                channel_id = channel_id,
                from = %t.previous,
                "Channel escalated to suspicious"
            ),
            None => debug!(channel_id = channel_id, "Escalation skipped for channel status"),
        }
        Ok(transition)
    }

    pub async fn channels_by_status(
        &self,
        status: Option<TrustStatus>,
    ) -> WardenResult<Vec<Channel>> {
        self.store.list_channels(status).await
    }

    pub async fn channel(&self, channel_id: i64) -> WardenResult<Channel> {
        self.store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| WardenError::not_found("channel", channel_id))
    }

    /// Route a bot being added to a chat
    pub async fn handle_bot_joined(&self, event: &BotJoinedEvent) -> WardenResult<BotVerdict> {
        let (bot, first_seen) = match self.store.get_bot(event.bot_id).await? {
            Some(bot) => (bot, false),
            None => {
                let candidate = Bot::pending(event.bot_id, event.username.clone(), event.added_by);
                self.store.insert_bot_if_absent(&candidate).await?
            }
        };

        if first_seen {
            info!(
                bot_id = bot.bot_id,
                chat_id = event.chat_id,
                added_by = event.added_by,
                "New bot held for review"
            );
            return Ok(BotVerdict::HoldForReview {
                bot,
                first_seen: true,
            });
        }

        match bot.status {
            TrustStatus::Blocked => {
                let outcome = self
                    .ledger
                    .record_and_enforce(EnforcementRequest::ban_bot(
                        bot.bot_id,
                        event.chat_id,
                        SYSTEM_ADMIN_ID,
                        Some("blocked bot added to chat".to_string()),
                    ))
                    .await?;
                Ok(BotVerdict::Removed { outcome })
            }
            TrustStatus::Allowed => Ok(BotVerdict::Admit { bot }),
            TrustStatus::Pending | TrustStatus::Suspicious => Ok(BotVerdict::HoldForReview {
                bot,
                first_seen: false,
            }),
        }
    }

    pub async fn decide_bot(
        &self,
        bot_id: i64,
        decision: BotDecision,
        admin_id: i64,
        reason: Option<String>,
    ) -> WardenResult<TrustTransition<Bot>> {
        let entry =
            NewLedgerEntry::new(decision.action(), Subject::Bot(bot_id), None, admin_id, reason);
        let transition = self
            .store
            .apply_bot_decision(bot_id, decision.status(), entry)
            .await?;

        info!(
            bot_id = bot_id,
            admin_id = admin_id,
            from = %transition.previous,
            to = %transition.current.status,
            "Bot decision applied"
        );
        Ok(transition)
    }

    async fn delete_channel_message(
        &self,
        event: &InboundChannelEvent,
        reason: &str,
    ) -> WardenResult<EnforcementOutcome> {
        self.ledger
            .record_and_enforce(EnforcementRequest::delete_message(
                Subject::Channel(event.channel_id),
                event.chat_id,
                event.message_id,
                SYSTEM_ADMIN_ID,
                Some(reason.to_string()),
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitsConfig;
    use crate::models::EnforcementAction;
    use crate::platform::{AdapterCall, ScriptedAdapter};
    use crate::store::MemoryStore;

    struct Fixture {
        machine: ChannelTrustStateMachine,
        store: Arc<MemoryStore>,
        adapter: Arc<ScriptedAdapter>,
    }

    fn fixture(limits: LimitsConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(ScriptedAdapter::new());
        let limits = LimitsHandle::fixed(limits);
        let ledger = Arc::new(EnforcementLedger::new(
            store.clone(),
            adapter.clone(),
            limits.clone(),
        ));
        Fixture {
            machine: ChannelTrustStateMachine::new(store.clone(), ledger, limits),
            store,
            adapter,
        }
    }

    fn event(message_id: i64) -> InboundChannelEvent {
        InboundChannelEvent {
            chat_id: 9,
            channel_id: -100123,
            title: "Deals".to_string(),
            handle: Some("deals".to_string()),
            message_id,
        }
    }

    #[tokio::test]
    async fn test_pending_channel_renotifies_without_ledger_entry() {
        let f = fixture(LimitsConfig::default());
        f.machine.handle_inbound_channel_event(&event(1)).await.unwrap();
        let verdict = f.machine.handle_inbound_channel_event(&event(2)).await.unwrap();

        match verdict {
            ChannelVerdict::HoldForReview {
                first_seen, notify, ..
            } => {
                assert!(!first_seen);
                assert!(notify);
            }
            other => panic!("expected hold, got {:?}", other),
        }
        assert_eq!(f.store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_allowed_channel_passes() {
        let f = fixture(LimitsConfig::default());
        f.machine.handle_inbound_channel_event(&event(1)).await.unwrap();
        f.machine
            .decide(-100123, ChannelDecision::Allow, 42, None)
            .await
            .unwrap();

        let verdict = f.machine.handle_inbound_channel_event(&event(2)).await.unwrap();
        assert_eq!(verdict, ChannelVerdict::Pass { status: TrustStatus::Allowed });
        assert!(f.adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_allowed_channel_throttled_over_limit() {
        let f = fixture(LimitsConfig {
            max_messages_per_minute: 2,
            ..LimitsConfig::default()
        });
        f.machine.handle_inbound_channel_event(&event(1)).await.unwrap();
        f.machine
            .decide(-100123, ChannelDecision::Allow, 42, None)
            .await
            .unwrap();

        assert!(matches!(
            f.machine.handle_inbound_channel_event(&event(2)).await.unwrap(),
            ChannelVerdict::Pass { .. }
        ));
        let verdict = f.machine.handle_inbound_channel_event(&event(3)).await.unwrap();
        assert!(matches!(verdict, ChannelVerdict::Throttled { .. }));
        assert_eq!(
            f.adapter.calls(),
            vec![AdapterCall::DeleteMessage { chat_id: 9, message_id: 3 }]
        );
    }

    #[tokio::test]
    async fn test_pending_notifications_suppressed_over_limit() {
        let f = fixture(LimitsConfig {
            max_messages_per_minute: 1,
            ..LimitsConfig::default()
        });
        f.machine.handle_inbound_channel_event(&event(1)).await.unwrap();
        let verdict = f.machine.handle_inbound_channel_event(&event(2)).await.unwrap();
        assert!(matches!(verdict, ChannelVerdict::HoldForReview { notify: false, .. }));
    }

    #[tokio::test]
    async fn test_decide_reports_superseded_status() {
        let f = fixture(LimitsConfig::default());
        f.machine.handle_inbound_channel_event(&event(1)).await.unwrap();
        f.machine
            .decide(-100123, ChannelDecision::Allow, 42, None)
            .await
            .unwrap();
        let transition = f
            .machine
            .decide(-100123, ChannelDecision::Block, 43, None)
            .await
            .unwrap();

        assert_eq!(transition.previous, TrustStatus::Allowed);
        assert_eq!(transition.current.status, TrustStatus::Blocked);
        assert_eq!(transition.entry.admin_id, 43);
    }

    #[tokio::test]
    async fn test_decide_unknown_channel_not_found() {
        let f = fixture(LimitsConfig::default());
        let err = f
            .machine
            .decide(-1, ChannelDecision::Allow, 42, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_escalation_only_from_pending_or_allowed() {
        let f = fixture(LimitsConfig::default());
        f.machine.handle_inbound_channel_event(&event(1)).await.unwrap();

        let escalated = f.machine.escalate_suspicious(-100123, "bait").await.unwrap();
        let transition = escalated.expect("pending channel escalates");
        assert_eq!(transition.entry.action, EnforcementAction::MarkSuspicious);
        assert!(transition.entry.is_system());

        // Already suspicious: nothing to do
        assert!(f.machine.escalate_suspicious(-100123, "bait").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocked_bot_is_banned_on_join() {
        let f = fixture(LimitsConfig::default());
        let joined = BotJoinedEvent {
            chat_id: 9,
            bot_id: 700,
            username: Some("promo_bot".to_string()),
            added_by: 5,
        };
        assert!(matches!(
            f.machine.handle_bot_joined(&joined).await.unwrap(),
            BotVerdict::HoldForReview { first_seen: true, .. }
        ));
        f.machine
            .decide_bot(700, BotDecision::Block, 42, None)
            .await
            .unwrap();

        match f.machine.handle_bot_joined(&joined).await.unwrap() {
            BotVerdict::Removed { outcome } => {
                assert_eq!(outcome.entry.subject, Subject::Bot(700));
                assert!(outcome.enforced);
            }
            other => panic!("expected removal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_allowed_bot_admitted() {
        let f = fixture(LimitsConfig::default());
        let joined = BotJoinedEvent {
            chat_id: 9,
            bot_id: 701,
            username: None,
            added_by: 5,
        };
        f.machine.handle_bot_joined(&joined).await.unwrap();
        f.machine
            .decide_bot(701, BotDecision::Allow, 42, None)
            .await
            .unwrap();
        assert!(matches!(
            f.machine.handle_bot_joined(&joined).await.unwrap(),
            BotVerdict::Admit { .. }
        ));
    }
}
