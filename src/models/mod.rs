//! Trust engine data models
//!
//! Contains the persisted entities:
//! - Channels and bots with their trust status
//! - Enforcement ledger entries
//! - Suspicious profiles

pub mod channel;
pub mod ledger;
pub mod profile;

pub use channel::{Bot, BotDecision, Channel, ChannelDecision, TrustStatus, TrustTransition};
pub use ledger::{EnforcementAction, LedgerEntry, NewLedgerEntry, SYSTEM_ADMIN_ID, Subject};
pub use profile::{ReviewVerdict, SuspiciousProfile};
