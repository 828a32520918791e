//! Moderation engine
//!
//! Decides whether channels, bots and users are trusted and keeps the
//! enforcement ledger consistent with the platform.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌────────────────────┐     ┌────────────────────┐
//! │ InboundChannelEvent  │────►│ ChannelTrustState- │────►│ EnforcementLedger  │
//! │ BotJoinedEvent       │     │ Machine            │     │ (record, then      │
//! └──────────────────────┘     │ + SlidingWindow-   │     │  enforce)          │
//!                              │   Limiter          │     └─────────┬──────────┘
//! ┌──────────────────────┐     └─────────▲──────────┘               │
//! │ ProfileService       │───────────────┘ escalate                 ▼
//! │ + SuspicionScorer    │                                ┌────────────────────┐
//! └──────────────────────┘     ┌────────────────────┐     │ EnforcementAdapter │
//!                              │ Reconciliation-    │────►│ (platform)         │
//!                              │ Engine (timer)     │     └────────────────────┘
//!                              └────────────────────┘
//! ```
//!
//! ## Ledger model
//!
//! - Only `ban` and `mute` rows are ever active
//! - At most one active row per (subject, chat, action)
//! - Adapter failures leave the row in place for reconciliation to repair

pub mod ledger;
pub mod profiles;
pub mod rate_limit;
pub mod reconcile;
pub mod scoring;
pub mod trust;

pub use ledger::{EnforcementLedger, EnforcementOutcome, EnforcementRequest};
pub use profiles::{ProfileAnalysis, ProfileService};
pub use rate_limit::SlidingWindowLimiter;
pub use reconcile::{ReconcileReport, ReconcileStatus, ReconciliationEngine, SubjectError};
pub use scoring::{LinkedChannel, ProfileSnapshot, SuspicionReason, SuspicionReport, SuspicionScorer};
pub use trust::{
    BotJoinedEvent, BotVerdict, ChannelTrustStateMachine, ChannelVerdict, InboundChannelEvent,
};
