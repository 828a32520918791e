//! PostgreSQL Database Module
//!
//! Provides persistence for channels, bots, the moderation ledger and
//! suspicious profiles. `DatabasePool` implements `TrustStore`.

pub mod channels;
pub mod ledger;
pub mod pool;
pub mod profiles;
mod store;

pub use channels::{ChannelRepository, StatusWrite};
pub use ledger::LedgerRepository;
pub use pool::DatabasePool;
pub use profiles::ProfileRepository;
