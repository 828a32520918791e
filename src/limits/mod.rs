//! Hot-reloadable engine limits
//!
//! `LimitsConfig` parameterizes the rate limiter, ban durations and the
//! suspicion threshold. The `ConfigHotReloader` owns the single writer side;
//! everything else holds a `LimitsHandle`.

mod document;
mod reloader;

pub use document::{
    KEY_BAN_DURATION_HOURS, KEY_MAX_LINKS_PER_MESSAGE, KEY_MAX_MESSAGES_PER_MINUTE,
    KEY_SUSPICION_THRESHOLD, LimitChange, LimitsConfig,
};
pub use reloader::{ConfigHotReloader, LimitsHandle, ReloadOutcome};
