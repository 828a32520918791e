//! Chat Warden
//!
//! Trust and enforcement engine for group-chat moderation: gates channels and
//! bots behind admin review, keeps an append-only enforcement ledger, scores
//! user profiles for spam-bait patterns and reconciles the ledger against what
//! the chat platform actually reports.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs          - Crate root with re-exports
//! ├── main.rs         - Server entrypoint
//! ├── config.rs       - Environment configuration
//! ├── error.rs        - Engine error taxonomy
//! ├── models/         - Channels, bots, ledger entries, profiles
//! ├── limits/         - Hot-reloadable limits document
//! │   ├── document.rs - Parsing, validation, diffing
//! │   └── reloader.rs - File poller and watch-channel publisher
//! ├── moderation/     - Engine services
//! │   ├── trust.rs      - Channel and bot trust state machine
//! │   ├── ledger.rs     - Record-then-enforce ledger
//! │   ├── rate_limit.rs - Sliding-window limiter
//! │   ├── scoring.rs    - Suspicion scorer
//! │   ├── profiles.rs   - Profile analysis and review
//! │   └── reconcile.rs  - Ledger/platform reconciliation
//! ├── platform/       - Enforcement adapters (Telegram, dry run, scripted)
//! ├── store/          - TrustStore trait and in-memory backend
//! ├── database/       - PostgreSQL backend
//! └── api/            - Admin HTTP API
//! ```

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod limits;
pub mod models;
pub mod moderation;
pub mod platform;
pub mod store;

// Re-export main types for convenience
pub use config::WardenConfig;
pub use database::DatabasePool;
pub use error::{WardenError, WardenResult};
pub use limits::{ConfigHotReloader, LimitsConfig, LimitsHandle, ReloadOutcome};
pub use models::{
    Bot, BotDecision, Channel, ChannelDecision, EnforcementAction, LedgerEntry, NewLedgerEntry,
    ReviewVerdict, SYSTEM_ADMIN_ID, Subject, SuspiciousProfile, TrustStatus, TrustTransition,
};
pub use moderation::{
    BotJoinedEvent, BotVerdict, ChannelTrustStateMachine, ChannelVerdict, EnforcementLedger,
    EnforcementOutcome, EnforcementRequest, InboundChannelEvent, LinkedChannel, ProfileAnalysis,
    ProfileService, ProfileSnapshot, ReconcileReport, ReconcileStatus, ReconciliationEngine,
    SlidingWindowLimiter, SuspicionReason, SuspicionReport, SuspicionScorer,
};
pub use platform::{
    AdapterError, DryRunAdapter, EnforcementAdapter, MemberStatus, ScriptedAdapter,
    TelegramAdapter, TelegramConfig,
};
pub use store::{MemoryStore, TrustStore};

// Re-export API types
pub use api::{AdminApiState, AdminAuthState, create_admin_router};
