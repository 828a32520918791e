//! In-process enforcement adapter for tests
//!
//! Records every call and answers membership lookups from a scripted table.
//! Individual methods (or lookups for individual subjects) can be told to fail.
//! The binary runs [`crate::platform::DryRunAdapter`] instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::platform::{AdapterError, EnforcementAdapter, MemberStatus};

/// A call the adapter received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Ban { subject_id: i64, chat_id: i64, until: Option<DateTime<Utc>> },
    Unban { subject_id: i64, chat_id: i64 },
    Mute { subject_id: i64, chat_id: i64, until: Option<DateTime<Utc>> },
    Unmute { subject_id: i64, chat_id: i64 },
    DeleteMessage { chat_id: i64, message_id: i64 },
    GetMemberStatus { chat_id: i64, subject_id: i64 },
}

#[derive(Default)]
struct Script {
    calls: Vec<AdapterCall>,
    statuses: HashMap<(i64, i64), MemberStatus>,
    failing_methods: HashSet<&'static str>,
    failing_lookups: HashSet<(i64, i64)>,
}

#[derive(Default)]
pub struct ScriptedAdapter {
    script: Mutex<Script>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut script = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut script)
    }

    /// Status reported for `(chat_id, subject_id)`; unscripted pairs are `Member`
    pub fn set_member_status(&self, chat_id: i64, subject_id: i64, status: MemberStatus) {
        self.with_script(|s| {
            s.statuses.insert((chat_id, subject_id), status);
        });
    }

    /// Make every call to `method` fail ("ban", "delete_message", ...)
    pub fn fail_method(&self, method: &'static str) {
        self.with_script(|s| {
            s.failing_methods.insert(method);
        });
    }

    pub fn restore_method(&self, method: &'static str) {
        self.with_script(|s| {
            s.failing_methods.remove(method);
        });
    }

    /// Make membership lookups for one subject fail
    pub fn fail_lookup(&self, chat_id: i64, subject_id: i64) {
        self.with_script(|s| {
            s.failing_lookups.insert((chat_id, subject_id));
        });
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.with_script(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with_script(|s| s.calls.clear());
    }

    fn record(&self, method: &'static str, call: AdapterCall) -> Result<(), AdapterError> {
        self.with_script(|s| {
            s.calls.push(call);
            if s.failing_methods.contains(method) {
                Err(AdapterError::rejected(method, "scripted failure"))
            } else {
                Ok(())
            }
        })
    }
}

#[async_trait]
impl EnforcementAdapter for ScriptedAdapter {
    async fn ban(
        &self,
        subject_id: i64,
        chat_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError> {
        self.record("ban", AdapterCall::Ban { subject_id, chat_id, until })?;
        self.set_member_status(chat_id, subject_id, MemberStatus::Kicked);
        Ok(())
    }

    async fn unban(&self, subject_id: i64, chat_id: i64) -> Result<(), AdapterError> {
        self.record("unban", AdapterCall::Unban { subject_id, chat_id })?;
        self.set_member_status(chat_id, subject_id, MemberStatus::Left);
        Ok(())
    }

    async fn mute(
        &self,
        subject_id: i64,
        chat_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AdapterError> {
        self.record("mute", AdapterCall::Mute { subject_id, chat_id, until })?;
        self.set_member_status(chat_id, subject_id, MemberStatus::Restricted);
        Ok(())
    }

    async fn unmute(&self, subject_id: i64, chat_id: i64) -> Result<(), AdapterError> {
        self.record("unmute", AdapterCall::Unmute { subject_id, chat_id })?;
        self.set_member_status(chat_id, subject_id, MemberStatus::Member);
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), AdapterError> {
        self.record("delete_message", AdapterCall::DeleteMessage { chat_id, message_id })
    }

    async fn get_member_status(
        &self,
        chat_id: i64,
        subject_id: i64,
    ) -> Result<MemberStatus, AdapterError> {
        self.record(
            "get_member_status",
            AdapterCall::GetMemberStatus { chat_id, subject_id },
        )?;
        self.with_script(|s| {
            if s.failing_lookups.contains(&(chat_id, subject_id)) {
                return Err(AdapterError::transport("get_member_status", "scripted lookup failure"));
            }
            Ok(s
                .statuses
                .get(&(chat_id, subject_id))
                .copied()
                .unwrap_or(MemberStatus::Member))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ban_updates_reported_status() {
        let adapter = ScriptedAdapter::new();
        assert_eq!(adapter.get_member_status(9, 5).await, Ok(MemberStatus::Member));

        adapter.ban(5, 9, None).await.unwrap();
        assert_eq!(adapter.get_member_status(9, 5).await, Ok(MemberStatus::Kicked));
    }

    #[tokio::test]
    async fn test_failed_call_is_still_recorded() {
        let adapter = ScriptedAdapter::new();
        adapter.fail_method("delete_message");

        assert!(adapter.delete_message(9, 100).await.is_err());
        assert_eq!(
            adapter.calls(),
            vec![AdapterCall::DeleteMessage { chat_id: 9, message_id: 100 }]
        );
    }
}
