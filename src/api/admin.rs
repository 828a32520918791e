//! Admin API Endpoints
//!
//! Review queues, trust decisions, manual enforcement, reconciliation and
//! limits management. The chat-platform webhook relay posts inbound events
//! to the `/events/*` routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::WardenError;
use crate::limits::{ConfigHotReloader, LimitsConfig, ReloadOutcome};
use crate::models::{
    Bot, BotDecision, Channel, ChannelDecision, LedgerEntry, ReviewVerdict, SYSTEM_ADMIN_ID,
    SuspiciousProfile, TrustStatus, TrustTransition,
};
use crate::moderation::{
    BotJoinedEvent, BotVerdict, ChannelTrustStateMachine, ChannelVerdict, EnforcementLedger,
    EnforcementOutcome, EnforcementRequest, InboundChannelEvent, ProfileAnalysis, ProfileService,
    ProfileSnapshot, ReconcileReport, ReconciliationEngine,
};

/// API state for admin endpoints
#[derive(Clone)]
pub struct AdminApiState {
    pub machine: Arc<ChannelTrustStateMachine>,
    pub ledger: Arc<EnforcementLedger>,
    pub reconciler: Arc<ReconciliationEngine>,
    pub reloader: Arc<ConfigHotReloader>,
    pub profiles: Arc<ProfileService>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Map engine errors onto HTTP statuses
pub fn error_response(err: WardenError) -> (StatusCode, String) {
    let status = match &err {
        WardenError::NotFound { .. } => StatusCode::NOT_FOUND,
        WardenError::InvalidRequest(_) | WardenError::Validation(_) => StatusCode::BAD_REQUEST,
        WardenError::AdapterFailure(_) => StatusCode::BAD_GATEWAY,
        WardenError::Storage(_) | WardenError::Io(_) => {
            error!(error = %err, "Admin request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

/// The system id is reserved for engine-initiated actions
fn require_admin_id(admin_id: i64) -> Result<(), (StatusCode, String)> {
    if admin_id == SYSTEM_ADMIN_ID {
        warn!("Rejected admin request carrying the system admin id");
        return Err((
            StatusCode::BAD_REQUEST,
            format!("admin id {} is reserved for system actions", SYSTEM_ADMIN_ID),
        ));
    }
    Ok(())
}

// Request types

#[derive(Debug, Deserialize)]
pub struct ChannelListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelDecisionRequest {
    pub decision: ChannelDecision,
    pub admin_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BotDecisionRequest {
    pub decision: BotDecision,
    pub admin_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body shared by the manual ban/unban/mute/unmute routes
#[derive(Debug, Deserialize)]
pub struct UserActionRequest {
    pub user_id: i64,
    pub chat_id: i64,
    pub admin_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileReviewRequest {
    pub verdict: ReviewVerdict,
    pub reviewer_id: i64,
}

// Response types

#[derive(Debug, Serialize)]
pub struct ChannelListResponse {
    pub total: usize,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Serialize)]
pub struct ActiveEntriesResponse {
    pub chat_id: i64,
    pub bans: Vec<LedgerEntry>,
    pub mutes: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub user_id: i64,
    pub total: usize,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
pub struct PendingProfilesResponse {
    pub threshold: f64,
    pub total: usize,
    pub profiles: Vec<SuspiciousProfile>,
}

// Endpoints

/// GET /channels?status=pending - List channels, optionally by status
pub async fn list_channels(
    State(state): State<AdminApiState>,
    Query(query): Query<ChannelListQuery>,
) -> ApiResult<ChannelListResponse> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TrustStatus>)
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let channels = state
        .machine
        .channels_by_status(status)
        .await
        .map_err(error_response)?;

    Ok(Json(ChannelListResponse {
        total: channels.len(),
        channels,
    }))
}

/// GET /channels/{channel_id}
pub async fn get_channel(
    State(state): State<AdminApiState>,
    Path(channel_id): Path<i64>,
) -> ApiResult<Channel> {
    state
        .machine
        .channel(channel_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /channels/{channel_id}/decision - Allow, block or mark suspicious
pub async fn decide_channel(
    State(state): State<AdminApiState>,
    Path(channel_id): Path<i64>,
    Json(payload): Json<ChannelDecisionRequest>,
) -> ApiResult<TrustTransition<Channel>> {
    require_admin_id(payload.admin_id)?;
    state
        .machine
        .decide(channel_id, payload.decision, payload.admin_id, payload.reason)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /bots/{bot_id}/decision
pub async fn decide_bot(
    State(state): State<AdminApiState>,
    Path(bot_id): Path<i64>,
    Json(payload): Json<BotDecisionRequest>,
) -> ApiResult<TrustTransition<Bot>> {
    require_admin_id(payload.admin_id)?;
    state
        .machine
        .decide_bot(bot_id, payload.decision, payload.admin_id, payload.reason)
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /chats/{chat_id}/active - Active bans and mutes for a chat
pub async fn active_entries(
    State(state): State<AdminApiState>,
    Path(chat_id): Path<i64>,
) -> ApiResult<ActiveEntriesResponse> {
    let bans = state
        .ledger
        .active_bans(chat_id)
        .await
        .map_err(error_response)?;
    let mutes = state
        .ledger
        .active_mutes(chat_id)
        .await
        .map_err(error_response)?;

    Ok(Json(ActiveEntriesResponse {
        chat_id,
        bans,
        mutes,
    }))
}

async fn enforce(state: &AdminApiState, request: EnforcementRequest) -> ApiResult<EnforcementOutcome> {
    require_admin_id(request.admin_id)?;
    let outcome = state
        .ledger
        .record_and_enforce(request)
        .await
        .map_err(error_response)?;
    if !outcome.enforced {
        warn!(
            entry_id = outcome.entry.id,
            action = %outcome.entry.action,
            "Recorded but not enforced, reconciliation will retry"
        );
    }
    Ok(Json(outcome))
}

/// POST /bans
pub async fn ban_user(
    State(state): State<AdminApiState>,
    Json(p): Json<UserActionRequest>,
) -> ApiResult<EnforcementOutcome> {
    enforce(&state, EnforcementRequest::ban(p.user_id, p.chat_id, p.admin_id, p.reason)).await
}

/// POST /unbans
pub async fn unban_user(
    State(state): State<AdminApiState>,
    Json(p): Json<UserActionRequest>,
) -> ApiResult<EnforcementOutcome> {
    enforce(&state, EnforcementRequest::unban(p.user_id, p.chat_id, p.admin_id, p.reason)).await
}

/// POST /mutes
pub async fn mute_user(
    State(state): State<AdminApiState>,
    Json(p): Json<UserActionRequest>,
) -> ApiResult<EnforcementOutcome> {
    enforce(&state, EnforcementRequest::mute(p.user_id, p.chat_id, p.admin_id, p.reason)).await
}

/// POST /unmutes
pub async fn unmute_user(
    State(state): State<AdminApiState>,
    Json(p): Json<UserActionRequest>,
) -> ApiResult<EnforcementOutcome> {
    enforce(&state, EnforcementRequest::unmute(p.user_id, p.chat_id, p.admin_id, p.reason)).await
}

/// GET /users/{user_id}/history - Full ledger history, newest first
pub async fn user_history(
    State(state): State<AdminApiState>,
    Path(user_id): Path<i64>,
) -> ApiResult<HistoryResponse> {
    let entries = state
        .ledger
        .history(user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(HistoryResponse {
        user_id,
        total: entries.len(),
        entries,
    }))
}

/// POST /reconcile/{chat_id} - Run one reconciliation pass now
pub async fn reconcile_chat(
    State(state): State<AdminApiState>,
    Path(chat_id): Path<i64>,
) -> ApiResult<ReconcileReport> {
    state
        .reconciler
        .reconcile(chat_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /limits - Currently active limits
pub async fn get_limits(State(state): State<AdminApiState>) -> Json<LimitsConfig> {
    Json(state.reloader.current().as_ref().clone())
}

/// POST /limits/reload - Re-read the limits file, even if unchanged on disk
pub async fn reload_limits(State(state): State<AdminApiState>) -> ApiResult<ReloadOutcome> {
    state
        .reloader
        .force_reload()
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /profiles/pending - Unreviewed profiles at or above the threshold
pub async fn pending_profiles(
    State(state): State<AdminApiState>,
) -> ApiResult<PendingProfilesResponse> {
    let threshold = state.reloader.current().suspicion_threshold;
    let profiles = state
        .profiles
        .pending_reviews()
        .await
        .map_err(error_response)?;
    Ok(Json(PendingProfilesResponse {
        threshold,
        total: profiles.len(),
        profiles,
    }))
}

/// POST /profiles/analyze - Score a profile snapshot
pub async fn analyze_profile(
    State(state): State<AdminApiState>,
    Json(snapshot): Json<ProfileSnapshot>,
) -> ApiResult<ProfileAnalysis> {
    state
        .profiles
        .analyze(&snapshot)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /profiles/{user_id}/review
pub async fn review_profile(
    State(state): State<AdminApiState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<ProfileReviewRequest>,
) -> ApiResult<SuspiciousProfile> {
    require_admin_id(payload.reviewer_id)?;
    state
        .profiles
        .review(user_id, payload.verdict, payload.reviewer_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /events/channel - Message posted on behalf of a channel
pub async fn channel_event(
    State(state): State<AdminApiState>,
    Json(event): Json<InboundChannelEvent>,
) -> ApiResult<ChannelVerdict> {
    state
        .machine
        .handle_inbound_channel_event(&event)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /events/bot - Bot added to a chat
pub async fn bot_event(
    State(state): State<AdminApiState>,
    Json(event): Json<BotJoinedEvent>,
) -> ApiResult<BotVerdict> {
    state
        .machine
        .handle_bot_joined(&event)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Create the admin API router
pub fn create_admin_router(state: AdminApiState) -> Router {
    Router::new()
        .route("/channels", get(list_channels))
        .route("/channels/{channel_id}", get(get_channel))
        .route("/channels/{channel_id}/decision", post(decide_channel))
        .route("/bots/{bot_id}/decision", post(decide_bot))
        .route("/chats/{chat_id}/active", get(active_entries))
        .route("/bans", post(ban_user))
        .route("/unbans", post(unban_user))
        .route("/mutes", post(mute_user))
        .route("/unmutes", post(unmute_user))
        .route("/users/{user_id}/history", get(user_history))
        .route("/reconcile/{chat_id}", post(reconcile_chat))
        .route("/limits", get(get_limits))
        .route("/limits/reload", post(reload_limits))
        .route("/profiles/pending", get(pending_profiles))
        .route("/profiles/analyze", post(analyze_profile))
        .route("/profiles/{user_id}/review", post(review_profile))
        .route("/events/channel", post(channel_event))
        .route("/events/bot", post(bot_event))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitsHandle;
    use crate::models::{EnforcementAction, Subject};
    use crate::platform::{AdapterError, ScriptedAdapter};
    use crate::store::MemoryStore;
    use tempfile::NamedTempFile;

    struct Fixture {
        state: AdminApiState,
        adapter: Arc<ScriptedAdapter>,
        _limits_file: NamedTempFile,
    }

    fn fixture() -> Fixture {
        let limits_file = NamedTempFile::new().unwrap();
        std::fs::write(
            limits_file.path(),
            r#"{"max_messages_per_minute": 10, "max_links_per_message": 3, "ban_duration_hours": 24, "suspicion_threshold": 0.7}"#,
        )
        .unwrap();

        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(ScriptedAdapter::new());
        let reloader = Arc::new(ConfigHotReloader::new(
            limits_file.path(),
            LimitsConfig::default(),
        ));
        let limits: LimitsHandle = reloader.handle();
        let ledger = Arc::new(EnforcementLedger::new(
            store.clone(),
            adapter.clone(),
            limits.clone(),
        ));
        let machine = Arc::new(ChannelTrustStateMachine::new(
            store.clone(),
            ledger.clone(),
            limits.clone(),
        ));
        let profiles = Arc::new(ProfileService::new(store.clone(), machine.clone(), limits));
        let reconciler = Arc::new(ReconciliationEngine::new(store, adapter.clone()));

        Fixture {
            state: AdminApiState {
                machine,
                ledger,
                reconciler,
                reloader,
                profiles,
            },
            adapter,
            _limits_file: limits_file,
        }
    }

    fn channel_event_body(channel_id: i64, message_id: i64) -> InboundChannelEvent {
        InboundChannelEvent {
            chat_id: -500,
            channel_id,
            title: "Deals".to_string(),
            handle: None,
            message_id,
        }
    }

    #[test]
    fn test_error_response_status_mapping() {
        assert_eq!(
            error_response(WardenError::not_found("channel", 1)).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(WardenError::InvalidRequest("x".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(WardenError::Validation(vec!["bad".into()])).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(WardenError::AdapterFailure(AdapterError::transport("banChatMember", "timeout"))).0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_response(WardenError::Storage("down".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_decision_on_unknown_channel_is_404() {
        let f = fixture();
        let err = decide_channel(
            State(f.state.clone()),
            Path(-100999),
            Json(ChannelDecisionRequest {
                decision: ChannelDecision::Allow,
                admin_id: 42,
                reason: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_channel_review_flow() {
        let f = fixture();

        let Json(verdict) = channel_event(State(f.state.clone()), Json(channel_event_body(-100123, 1)))
            .await
            .unwrap();
        assert!(matches!(verdict, ChannelVerdict::HoldForReview { first_seen: true, .. }));

        let Json(pending) = list_channels(
            State(f.state.clone()),
            Query(ChannelListQuery {
                status: Some("pending".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(pending.total, 1);

        let Json(transition) = decide_channel(
            State(f.state.clone()),
            Path(-100123),
            Json(ChannelDecisionRequest {
                decision: ChannelDecision::Block,
                admin_id: 42,
                reason: Some("spam".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(transition.previous, TrustStatus::Pending);
        assert_eq!(transition.current.status, TrustStatus::Blocked);
        assert_eq!(transition.entry.action, EnforcementAction::BlockChannel);

        let Json(verdict) = channel_event(State(f.state.clone()), Json(channel_event_body(-100123, 2)))
            .await
            .unwrap();
        assert!(matches!(verdict, ChannelVerdict::Deleted { .. }));
    }

    #[tokio::test]
    async fn test_unknown_status_filter_is_400() {
        let f = fixture();
        let err = list_channels(
            State(f.state),
            Query(ChannelListQuery {
                status: Some("quarantined".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ban_then_list_active() {
        let f = fixture();
        let body = || UserActionRequest {
            user_id: 5,
            chat_id: 9,
            admin_id: 1,
            reason: None,
        };

        ban_user(State(f.state.clone()), Json(body())).await.unwrap();
        let Json(second) = ban_user(State(f.state.clone()), Json(body())).await.unwrap();
        assert!(second.enforced);

        let Json(active) = active_entries(State(f.state.clone()), Path(9)).await.unwrap();
        assert_eq!(active.bans.len(), 1);
        assert_eq!(active.bans[0].subject, Subject::User(5));
        assert!(active.mutes.is_empty());

        unban_user(State(f.state.clone()), Json(body())).await.unwrap();
        let Json(active) = active_entries(State(f.state.clone()), Path(9)).await.unwrap();
        assert!(active.bans.is_empty());

        let Json(history) = user_history(State(f.state), Path(5)).await.unwrap();
        assert_eq!(history.total, 3);
    }

    #[tokio::test]
    async fn test_system_admin_id_rejected_at_boundary() {
        let f = fixture();
        let err = ban_user(
            State(f.state.clone()),
            Json(UserActionRequest {
                user_id: 5,
                chat_id: 9,
                admin_id: SYSTEM_ADMIN_ID,
                reason: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(f.adapter.calls().is_empty());

        let Json(active) = active_entries(State(f.state.clone()), Path(9)).await.unwrap();
        assert!(active.bans.is_empty());

        let err = decide_bot(
            State(f.state),
            Path(7),
            Json(BotDecisionRequest {
                decision: BotDecision::Allow,
                admin_id: SYSTEM_ADMIN_ID,
                reason: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reconcile_in_dry_run_keeps_bans() {
        let f = fixture();
        let store: Arc<dyn crate::store::TrustStore> = f.state.ledger.store().clone();
        ban_user(
            State(f.state.clone()),
            Json(UserActionRequest {
                user_id: 5,
                chat_id: 9,
                admin_id: 1,
                reason: None,
            }),
        )
        .await
        .unwrap();

        let dry_run = AdminApiState {
            reconciler: Arc::new(ReconciliationEngine::new(
                store,
                Arc::new(crate::platform::DryRunAdapter::new()),
            )),
            ..f.state.clone()
        };
        let Json(report) = reconcile_chat(State(dry_run), Path(9)).await.unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.created, 0);

        let Json(active) = active_entries(State(f.state), Path(9)).await.unwrap();
        assert_eq!(active.bans.len(), 1);
    }

    #[tokio::test]
    async fn test_adapter_failure_still_records() {
        let f = fixture();
        f.adapter.fail_method("mute");

        let Json(outcome) = mute_user(
            State(f.state.clone()),
            Json(UserActionRequest {
                user_id: 5,
                chat_id: 9,
                admin_id: 1,
                reason: None,
            }),
        )
        .await
        .unwrap();
        assert!(!outcome.enforced);
        assert!(outcome.entry.is_active);
    }

    #[tokio::test]
    async fn test_reload_limits_reports_outcome() {
        let f = fixture();
        let Json(outcome) = reload_limits(State(f.state.clone())).await.unwrap();
        assert!(matches!(outcome, ReloadOutcome::Applied { .. } | ReloadOutcome::Unchanged { .. }));

        std::fs::write(f.state.reloader.path(), r#"{"max_messages_per_minute": 5}"#).unwrap();
        let err = reload_limits(State(f.state.clone())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let Json(limits) = get_limits(State(f.state)).await;
        assert_eq!(limits.max_messages_per_minute, 10);
    }

    #[tokio::test]
    async fn test_review_unknown_profile_is_404() {
        let f = fixture();
        let err = review_profile(
            State(f.state),
            Path(77),
            Json(ProfileReviewRequest {
                verdict: ReviewVerdict::FalsePositive,
                reviewer_id: 1,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }
}
