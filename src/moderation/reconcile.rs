//! Ledger reconciliation against platform-reported membership
//!
//! The platform is the source of truth for whether a subject is currently
//! banned or muted. Each pass first closes timed bans and mutes whose expiry
//! has passed, then checks every subject the ledger knows about in the chat:
//!
//! | platform status                               | active row | repair               |
//! |-----------------------------------------------|------------|----------------------|
//! | kicked                                        | no ban     | insert system ban    |
//! | creator / administrator / member / restricted | ban        | deactivate the ban   |
//! | creator / administrator / member              | mute       | deactivate the mute  |
//! | left / unknown                                | any        | nothing              |
//!
//! Running twice with unchanged platform state repairs nothing the second time.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::WardenResult;
use crate::models::{EnforcementAction, NewLedgerEntry, SYSTEM_ADMIN_ID, Subject};
use crate::platform::{EnforcementAdapter, MemberStatus};
use crate::store::TrustStore;

pub const RECONCILED_BAN_REASON: &str = "reconciled: platform reports subject banned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// At least one repair, no failures
    Success,
    /// Nothing to repair
    Info,
    /// At least one subject could not be checked or repaired
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectError {
    pub subject_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub chat_id: i64,
    pub status: ReconcileStatus,
    pub checked: usize,
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<SubjectError>,
    /// Shutdown interrupted the pass before every subject was checked
    pub cancelled: bool,
}

impl ReconcileReport {
    fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            status: ReconcileStatus::Info,
            checked: 0,
            created: 0,
            updated: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    fn finish(mut self) -> Self {
        self.status = if !self.errors.is_empty() {
            ReconcileStatus::Error
        } else if self.created + self.updated > 0 {
            ReconcileStatus::Success
        } else {
            ReconcileStatus::Info
        };
        self
    }
}

enum Repair {
    Created,
    Updated,
    Unchanged,
}

pub struct ReconciliationEngine {
    store: Arc<dyn TrustStore>,
    adapter: Arc<dyn EnforcementAdapter>,
    /// Subjects to check for chats the ledger has never mentioned a user in
    bootstrap: HashMap<i64, Vec<i64>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn TrustStore>, adapter: Arc<dyn EnforcementAdapter>) -> Self {
        Self {
            store,
            adapter,
            bootstrap: HashMap::new(),
            shutdown: None,
        }
    }

    pub fn with_bootstrap(mut self, bootstrap: HashMap<i64, Vec<i64>>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// One reconciliation pass over a chat
    pub async fn reconcile(&self, chat_id: i64) -> WardenResult<ReconcileReport> {
        let mut subjects = self.store.ledger_subjects(chat_id).await?;
        if subjects.is_empty() {
            subjects = self.bootstrap.get(&chat_id).cloned().unwrap_or_default();
            debug!(chat_id = chat_id, count = subjects.len(), "Using bootstrap subjects");
        }

        let mut report = ReconcileReport::new(chat_id);
        let lapsed = self.store.close_lapsed(chat_id, Utc::now()).await?;
        if !lapsed.is_empty() {
            info!(chat_id = chat_id, closed = lapsed.len(), "Closed lapsed bans and mutes");
            report.updated += lapsed.len();
        }

        for subject_id in subjects {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.checked += 1;

            match self.reconcile_subject(chat_id, subject_id).await {
                Ok(repairs) => {
                    for repair in repairs {
                        match repair {
                            Repair::Created => report.created += 1,
                            Repair::Updated => report.updated += 1,
                            Repair::Unchanged => {}
                        }
                    }
                }
                Err(e) => {
                    warn!(chat_id = chat_id, subject_id = subject_id, error = %e, "Reconcile failed for subject");
                    report.errors.push(SubjectError {
                        subject_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let report = report.finish();
        info!(
            chat_id = chat_id,
            status = ?report.status,
            checked = report.checked,
            created = report.created,
            updated = report.updated,
            errors = report.errors.len(),
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    async fn reconcile_subject(&self, chat_id: i64, subject_id: i64) -> WardenResult<[Repair; 2]> {
        let status = self.adapter.get_member_status(chat_id, subject_id).await?;
        let subject = Subject::User(subject_id);
        let ban = self.reconcile_ban(chat_id, subject, status).await?;
        let mute = self.reconcile_mute(chat_id, subject, status).await?;
        Ok([ban, mute])
    }

    async fn reconcile_ban(
        &self,
        chat_id: i64,
        subject: Subject,
        status: MemberStatus,
    ) -> WardenResult<Repair> {
        let active = self
            .store
            .active_entry(subject, chat_id, EnforcementAction::Ban)
            .await?;

        match (status, active) {
            (MemberStatus::Kicked, None) => {
                let entry = self
                    .store
                    .append_entry(NewLedgerEntry::new(
                        EnforcementAction::Ban,
                        subject,
                        Some(chat_id),
                        SYSTEM_ADMIN_ID,
                        Some(RECONCILED_BAN_REASON.to_string()),
                    ))
                    .await?;
                info!(chat_id = chat_id, subject = %subject, entry_id = entry.id, "Recorded platform ban");
                Ok(Repair::Created)
            }
            (status, Some(_)) if status.is_present() => {
                let closed = self
                    .store
                    .deactivate_active(subject, chat_id, EnforcementAction::Ban)
                    .await?;
                info!(
                    chat_id = chat_id,
                    subject = %subject,
                    member_status = ?status,
                    "Deactivated ban lifted on platform"
                );
                Ok(closed.map_or(Repair::Unchanged, |_| Repair::Updated))
            }
            _ => Ok(Repair::Unchanged),
        }
    }

    async fn reconcile_mute(
        &self,
        chat_id: i64,
        subject: Subject,
        status: MemberStatus,
    ) -> WardenResult<Repair> {
        if !status.is_present() || status == MemberStatus::Restricted {
            return Ok(Repair::Unchanged);
        }
        let active = self
            .store
            .active_entry(subject, chat_id, EnforcementAction::Mute)
            .await?;
        if active.is_none() {
            return Ok(Repair::Unchanged);
        }

        let closed = self
            .store
            .deactivate_active(subject, chat_id, EnforcementAction::Mute)
            .await?;
        info!(
            chat_id = chat_id,
            subject = %subject,
            member_status = ?status,
            "Deactivated mute lifted on platform"
        );
        Ok(closed.map_or(Repair::Unchanged, |_| Repair::Updated))
    }

    /// Reconcile `chats` plus every chat in the ledger on each tick until
    /// shutdown. A pass interrupted by shutdown is left partial.
    pub async fn run(&self, interval: Duration, chats: Vec<i64>) {
        let mut ticker = tokio::time::interval(interval);
        let mut shutdown = self.shutdown.clone();
        info!(interval_secs = interval.as_secs(), configured = chats.len(), "Reconciliation loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }

            let mut targets: BTreeSet<i64> = chats.iter().copied().collect();
            match self.store.ledger_chats().await {
                Ok(known) => targets.extend(known),
                Err(e) => error!(error = %e, "Failed to list ledger chats"),
            }

            for chat_id in targets {
                if self.is_cancelled() {
                    break;
                }
                if let Err(e) = self.reconcile(chat_id).await {
                    error!(chat_id = chat_id, error = %e, "Reconciliation pass failed");
                }
            }
        }

        info!("Reconciliation loop stopped");
    }
}

/// Resolves once shutdown is signalled; never resolves without a receiver
async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ScriptedAdapter;
    use crate::store::MemoryStore;

    fn engine() -> (ReconciliationEngine, Arc<MemoryStore>, Arc<ScriptedAdapter>) {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(ScriptedAdapter::new());
        (
            ReconciliationEngine::new(store.clone(), adapter.clone()),
            store,
            adapter,
        )
    }

    fn admin_ban(user_id: i64, chat_id: i64) -> NewLedgerEntry {
        NewLedgerEntry::new(EnforcementAction::Ban, Subject::User(user_id), Some(chat_id), 1, None)
    }

    #[tokio::test]
    async fn test_lifted_ban_is_deactivated() {
        let (engine, store, adapter) = engine();
        store.append_entry(admin_ban(5, 9)).await.unwrap();
        adapter.set_member_status(9, 5, MemberStatus::Member);

        let report = engine.reconcile(9).await.unwrap();
        assert_eq!(report.status, ReconcileStatus::Success);
        assert_eq!(report.updated, 1);
        assert!(store.list_active(9, EnforcementAction::Ban).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_pass_after_deactivation_repairs_nothing() {
        let (engine, store, adapter) = engine();
        store.append_entry(admin_ban(5, 9)).await.unwrap();
        adapter.set_member_status(9, 5, MemberStatus::Member);

        let first = engine.reconcile(9).await.unwrap();
        let second = engine.reconcile(9).await.unwrap();
        assert_eq!(first.updated, 1);
        assert_eq!(second.updated, 0);
        assert_eq!(second.created, 0);
        assert_eq!(second.status, ReconcileStatus::Info);
    }

    #[tokio::test]
    async fn test_mute_lifted_on_platform_is_deactivated() {
        let (engine, store, adapter) = engine();
        store
            .append_entry(NewLedgerEntry::new(
                EnforcementAction::Mute,
                Subject::User(5),
                Some(9),
                1,
                None,
            ))
            .await
            .unwrap();
        adapter.set_member_status(9, 5, MemberStatus::Member);

        let report = engine.reconcile(9).await.unwrap();
        assert_eq!(report.updated, 1);
        assert!(store.list_active(9, EnforcementAction::Mute).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restricted_subject_keeps_mute() {
        let (engine, store, adapter) = engine();
        store
            .append_entry(NewLedgerEntry::new(
                EnforcementAction::Mute,
                Subject::User(5),
                Some(9),
                1,
                None,
            ))
            .await
            .unwrap();
        adapter.set_member_status(9, 5, MemberStatus::Restricted);

        let report = engine.reconcile(9).await.unwrap();
        assert_eq!(report.status, ReconcileStatus::Info);
        assert_eq!(store.list_active(9, EnforcementAction::Mute).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lapsed_system_ban_closed_when_subject_left() {
        let (engine, store, adapter) = engine();
        let lapsed = Utc::now() - chrono::Duration::hours(1);
        store
            .append_entry(
                NewLedgerEntry::new(
                    EnforcementAction::Ban,
                    Subject::User(6),
                    Some(9),
                    SYSTEM_ADMIN_ID,
                    None,
                )
                .expiring_at(Some(lapsed)),
            )
            .await
            .unwrap();
        adapter.set_member_status(9, 6, MemberStatus::Left);

        let report = engine.reconcile(9).await.unwrap();
        assert_eq!(report.updated, 1);
        assert!(store.all_entries().await.iter().all(|e| !e.is_active));
        assert_eq!(engine.reconcile(9).await.unwrap().updated, 0);
    }

    #[tokio::test]
    async fn test_left_subject_keeps_ban() {
        let (engine, store, adapter) = engine();
        store.append_entry(admin_ban(5, 9)).await.unwrap();
        adapter.set_member_status(9, 5, MemberStatus::Left);

        let report = engine.reconcile(9).await.unwrap();
        assert_eq!(report.status, ReconcileStatus::Info);
        assert_eq!(store.list_active(9, EnforcementAction::Ban).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_subjects_used_for_unknown_chat() {
        let (engine, store, adapter) = engine();
        let engine = engine.with_bootstrap(HashMap::from([(9, vec![5, 6])]));
        adapter.set_member_status(9, 5, MemberStatus::Kicked);

        let report = engine.reconcile(9).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.created, 1);

        let active = store.list_active(9, EnforcementAction::Ban).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].is_system());
    }

    #[tokio::test]
    async fn test_cancelled_pass_is_partial() {
        let (engine, store, _) = engine();
        store.append_entry(admin_ban(5, 9)).await.unwrap();
        let (tx, rx) = watch::channel(true);
        let engine = engine.with_shutdown(rx);

        let report = engine.reconcile(9).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.checked, 0);
        drop(tx);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let (engine, _, _) = engine();
        let (tx, rx) = watch::channel(false);
        let engine = Arc::new(engine.with_shutdown(rx));

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(Duration::from_millis(10), vec![9]).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
