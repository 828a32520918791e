//! Limits file watcher
//!
//! Polls one JSON document, detects content changes by SHA-256 digest and
//! republishes the validated snapshot through a `watch` channel. Readers only
//! ever see a complete `LimitsConfig`.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::WardenResult;
use crate::limits::{LimitChange, LimitsConfig};

/// Read side of the published limits
#[derive(Clone)]
pub struct LimitsHandle {
    rx: watch::Receiver<Arc<LimitsConfig>>,
}

impl LimitsHandle {
    /// A handle that always reports `config` (no reloader attached)
    pub fn fixed(config: LimitsConfig) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(config));
        Self { rx }
    }

    /// Current snapshot. Cheap: clones the `Arc`, never the config.
    pub fn current(&self) -> Arc<LimitsConfig> {
        self.rx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }
}

/// Result of one reload attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// Same bytes as last time, or same values
    Unchanged { version: u64 },
    Applied {
        version: u64,
        changes: Vec<LimitChange>,
    },
}

pub struct ConfigHotReloader {
    path: PathBuf,
    tx: watch::Sender<Arc<LimitsConfig>>,
    /// Digest of the last document read. Also serializes reload attempts.
    last_digest: Mutex<Option<[u8; 32]>>,
}

impl ConfigHotReloader {
    /// Start from `initial` (usually the defaults) without touching the file
    pub fn new(path: impl AsRef<Path>, initial: LimitsConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self {
            path: path.as_ref().to_path_buf(),
            tx,
            last_digest: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> LimitsHandle {
        LimitsHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn current(&self) -> Arc<LimitsConfig> {
        self.tx.borrow().clone()
    }

    /// Reload if the file content changed since the last attempt
    pub async fn reload(&self) -> WardenResult<ReloadOutcome> {
        self.reload_inner(false).await
    }

    /// Re-read and re-validate even when the content is unchanged
    pub async fn force_reload(&self) -> WardenResult<ReloadOutcome> {
        self.reload_inner(true).await
    }

    async fn reload_inner(&self, force: bool) -> WardenResult<ReloadOutcome> {
        let mut last_digest = self.last_digest.lock().await;

        let text = tokio::fs::read_to_string(&self.path).await?;
        let digest: [u8; 32] = Sha256::digest(text.as_bytes()).into();

        if !force && *last_digest == Some(digest) {
            debug!(path = %self.path.display(), "Limits file unchanged");
            return Ok(ReloadOutcome::Unchanged {
                version: self.current().version,
            });
        }
        // Remember invalid content too, so a broken file is reported once
        *last_digest = Some(digest);

        let parsed = match LimitsConfig::parse(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    version = self.current().version,
                    "Rejected limits update, keeping previous config"
                );
                return Err(e);
            }
        };

        let current = self.current();
        let changes = current.diff(&parsed);
        if changes.is_empty() {
            debug!(path = %self.path.display(), "Limits values unchanged");
            return Ok(ReloadOutcome::Unchanged {
                version: current.version,
            });
        }

        let version = current.version + 1;
        let next = LimitsConfig { version, ..parsed };
        for change in &changes {
            info!(key = %change.key, old = %change.old, new = %change.new, "Limit changed");
        }
        self.tx.send_replace(Arc::new(next));
        info!(version = version, changed = changes.len(), "Limits config applied");

        Ok(ReloadOutcome::Applied { version, changes })
    }

    /// Poll the file until `shutdown` flips to true
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(poll_interval);
        info!(path = %self.path.display(), interval_secs = poll_interval.as_secs(), "Limits watcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reload().await {
                        debug!(error = %e, "Limits poll did not apply");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Limits watcher stopped");
    }
}
