//! Limits document parsing and validation
//!
//! The document is a flat JSON object. All four keys are required, unknown
//! keys are ignored, and every problem is reported together so one reload
//! attempt surfaces the whole list.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{WardenError, WardenResult};

pub const KEY_MAX_MESSAGES_PER_MINUTE: &str = "max_messages_per_minute";
pub const KEY_MAX_LINKS_PER_MESSAGE: &str = "max_links_per_message";
pub const KEY_BAN_DURATION_HOURS: &str = "ban_duration_hours";
pub const KEY_SUSPICION_THRESHOLD: &str = "suspicion_threshold";

/// Process-wide engine limits. Replaced as a whole, never field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Incremented on every applied reload (0 = built-in defaults)
    pub version: u64,
    /// Per-channel message budget inside the 60 s window
    pub max_messages_per_minute: u32,
    pub max_links_per_message: u32,
    /// Duration of mutes and system-initiated bans
    pub ban_duration_hours: u32,
    /// Inclusive escalation threshold in [0, 1]
    pub suspicion_threshold: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            version: 0,
            max_messages_per_minute: 10,
            max_links_per_message: 3,
            ban_duration_hours: 24,
            suspicion_threshold: 0.7,
        }
    }
}

/// One changed key between two limits snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitChange {
    pub key: String,
    pub old: String,
    pub new: String,
}

impl LimitsConfig {
    /// Parse and validate a document. The returned config has `version = 0`;
    /// the reloader assigns the real version when it publishes.
    pub fn parse(text: &str) -> WardenResult<Self> {
        let document: Map<String, Value> = serde_json::from_str(text).map_err(|e| {
            WardenError::Validation(vec![format!("document is not a flat JSON object: {}", e)])
        })?;

        let mut errors = Vec::new();
        let max_messages_per_minute =
            positive_integer(&document, KEY_MAX_MESSAGES_PER_MINUTE, &mut errors);
        let max_links_per_message =
            positive_integer(&document, KEY_MAX_LINKS_PER_MESSAGE, &mut errors);
        let ban_duration_hours = positive_integer(&document, KEY_BAN_DURATION_HOURS, &mut errors);
        let suspicion_threshold = unit_interval(&document, KEY_SUSPICION_THRESHOLD, &mut errors);

        match (
            max_messages_per_minute,
            max_links_per_message,
            ban_duration_hours,
            suspicion_threshold,
        ) {
            (Some(messages), Some(links), Some(hours), Some(threshold)) if errors.is_empty() => {
                Ok(Self {
                    version: 0,
                    max_messages_per_minute: messages,
                    max_links_per_message: links,
                    ban_duration_hours: hours,
                    suspicion_threshold: threshold,
                })
            }
            _ => Err(WardenError::Validation(errors)),
        }
    }

    /// Key-by-key difference from `self` to `other`, ignoring `version`
    pub fn diff(&self, other: &LimitsConfig) -> Vec<LimitChange> {
        let pairs = [
            (
                KEY_MAX_MESSAGES_PER_MINUTE,
                self.max_messages_per_minute.to_string(),
                other.max_messages_per_minute.to_string(),
            ),
            (
                KEY_MAX_LINKS_PER_MESSAGE,
                self.max_links_per_message.to_string(),
                other.max_links_per_message.to_string(),
            ),
            (
                KEY_BAN_DURATION_HOURS,
                self.ban_duration_hours.to_string(),
                other.ban_duration_hours.to_string(),
            ),
            (
                KEY_SUSPICION_THRESHOLD,
                self.suspicion_threshold.to_string(),
                other.suspicion_threshold.to_string(),
            ),
        ];

        pairs
            .into_iter()
            .filter(|(_, old, new)| old != new)
            .map(|(key, old, new)| LimitChange {
                key: key.to_string(),
                old,
                new,
            })
            .collect()
    }

    pub fn ban_duration(&self) -> Duration {
        Duration::hours(i64::from(self.ban_duration_hours))
    }

    /// Inclusive threshold check used by every escalation consumer
    pub fn should_escalate(&self, score: f64) -> bool {
        score >= self.suspicion_threshold
    }
}

fn positive_integer(document: &Map<String, Value>, key: &str, errors: &mut Vec<String>) -> Option<u32> {
    match document.get(key) {
        None => {
            errors.push(format!("missing required key '{}'", key));
            None
        }
        Some(value) => match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(v) if v > 0 => Some(v),
            _ => {
                errors.push(format!("'{}' must be a positive integer, got {}", key, value));
                None
            }
        },
    }
}

fn unit_interval(document: &Map<String, Value>, key: &str, errors: &mut Vec<String>) -> Option<f64> {
    match document.get(key) {
        None => {
            errors.push(format!("missing required key '{}'", key));
            None
        }
        Some(value) => match value.as_f64() {
            Some(v) if (0.0..=1.0).contains(&v) => Some(v),
            _ => {
                errors.push(format!("'{}' must be a number in [0, 1], got {}", key, value));
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "max_messages_per_minute": 12,
        "max_links_per_message": 2,
        "ban_duration_hours": 48,
        "suspicion_threshold": 0.65,
        "comment": "unknown keys are ignored"
    }"#;

    fn validation_errors(text: &str) -> Vec<String> {
        match LimitsConfig::parse(text) {
            Err(WardenError::Validation(errors)) => errors,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_valid_document() {
        let config = LimitsConfig::parse(VALID).unwrap();
        assert_eq!(config.max_messages_per_minute, 12);
        assert_eq!(config.max_links_per_message, 2);
        assert_eq!(config.ban_duration_hours, 48);
        assert_eq!(config.suspicion_threshold, 0.65);
        assert_eq!(config.version, 0);
    }

    #[test]
    fn test_missing_ban_duration_rejected() {
        let errors = validation_errors(
            r#"{"max_messages_per_minute": 10, "max_links_per_message": 3, "suspicion_threshold": 0.7}"#,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ban_duration_hours"));
    }

    #[test]
    fn test_all_problems_reported_together() {
        let errors = validation_errors(
            r#"{"max_messages_per_minute": 0, "max_links_per_message": -1, "ban_duration_hours": 1.5, "suspicion_threshold": 1.2}"#,
        );
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_threshold_bounds_are_inclusive() {
        let lower = LimitsConfig::parse(
            r#"{"max_messages_per_minute": 1, "max_links_per_message": 1, "ban_duration_hours": 1, "suspicion_threshold": 0}"#,
        );
        let upper = LimitsConfig::parse(
            r#"{"max_messages_per_minute": 1, "max_links_per_message": 1, "ban_duration_hours": 1, "suspicion_threshold": 1}"#,
        );
        assert!(lower.is_ok());
        assert!(upper.is_ok());
    }

    #[test]
    fn test_non_object_rejected() {
        assert_eq!(validation_errors("[1, 2, 3]").len(), 1);
        assert_eq!(validation_errors("max_messages_per_minute = 10").len(), 1);
    }

    #[test]
    fn test_string_numbers_rejected() {
        let errors = validation_errors(
            r#"{"max_messages_per_minute": "10", "max_links_per_message": 3, "ban_duration_hours": 24, "suspicion_threshold": 0.7}"#,
        );
        assert!(errors[0].contains("max_messages_per_minute"));
    }

    #[test]
    fn test_diff_lists_changed_keys_only() {
        let old = LimitsConfig::default();
        let new = LimitsConfig {
            version: 5,
            ban_duration_hours: 48,
            ..LimitsConfig::default()
        };
        let changes = old.diff(&new);
        assert_eq!(
            changes,
            vec![LimitChange {
                key: KEY_BAN_DURATION_HOURS.to_string(),
                old: "24".to_string(),
                new: "48".to_string(),
            }]
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let limits = LimitsConfig::default();
        assert!(limits.should_escalate(0.7));
        assert!(!limits.should_escalate(0.699_999));
        assert!(limits.should_escalate(1.0));
    }
}
