//! The deployment history ledger.
//!
//! An append-only log of every accepted deployment, totally ordered by
//! `(timestamp, entity_id)` and deduplicated by entity id. The ledger is
//! what peers pull during synchronization, so its ordering must be identical
//! on every node.
//!
//! Persistence is a JSON-lines file under the storage root, replayed on
//! startup. The deploy path is the only appender; the file write runs on
//! the blocking pool so the commit gate never blocks a worker thread, and
//! the in-memory ledger is only updated once the line is on disk.

use std::collections::{BTreeSet, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use depot_types::{DeploymentEvent, EntityId, PartialDeploymentHistory, Timestamp};

use crate::error::{HistorySnafu, Result};

/// File name of the ledger under the storage root.
pub const HISTORY_LOG_FILE: &str = "history.log";

struct Ledger {
    events: BTreeSet<DeploymentEvent>,
    seen: HashSet<EntityId>,
}

/// Owns the ledger and the immutable-time watermark.
pub struct HistoryManager {
    ledger: Mutex<Ledger>,
    log_path: Option<PathBuf>,
    immutable_window_ms: u64,
}

impl HistoryManager {
    /// Creates an empty, memory-only ledger (tests).
    pub fn in_memory(immutable_window_ms: u64) -> Self {
        Self {
            ledger: Mutex::new(Ledger { events: BTreeSet::new(), seen: HashSet::new() }),
            log_path: None,
            immutable_window_ms,
        }
    }

    /// Opens (or creates) the ledger file under `root` and replays it.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::History`](crate::ServiceError::History) if the
    /// file exists but cannot be read. Unparsable lines are skipped with a
    /// warning rather than poisoning the whole ledger.
    pub fn open(root: &Path, immutable_window_ms: u64) -> Result<Self> {
        let log_path = root.join(HISTORY_LOG_FILE);
        let mut events = BTreeSet::new();
        let mut seen = HashSet::new();

        match std::fs::read_to_string(&log_path) {
            Ok(contents) => {
                for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<DeploymentEvent>(line) {
                        Ok(event) => {
                            if seen.insert(event.entity_id.clone()) {
                                events.insert(event);
                            }
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping unparsable history line");
                        },
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => {
                return HistorySnafu {
                    message: format!("failed to read {}: {e}", log_path.display()),
                }
                .fail();
            },
        }

        tracing::info!(events = events.len(), path = %log_path.display(), "history ledger loaded");
        Ok(Self {
            ledger: Mutex::new(Ledger { events, seen }),
            log_path: Some(log_path),
            immutable_window_ms,
        })
    }

    /// Appends an event. Idempotent on entity id: a duplicate is silently
    /// ignored and `false` is returned.
    ///
    /// The file write is offloaded to the blocking pool; the mutex is never
    /// held across it.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::History`](crate::ServiceError::History) if the
    /// ledger file cannot be written; the in-memory ledger is not modified in
    /// that case.
    pub async fn append(&self, event: DeploymentEvent) -> Result<bool> {
        if self.ledger.lock().seen.contains(&event.entity_id) {
            return Ok(false);
        }

        if let Some(path) = self.log_path.clone() {
            let line = serde_json::to_string(&event).map_err(|e| {
                HistorySnafu { message: format!("failed to encode event: {e}") }.build()
            })?;
            let display = path.display().to_string();
            match tokio::task::spawn_blocking(move || append_line(&path, &line)).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    return HistorySnafu { message: format!("failed to append to {display}: {e}") }
                        .fail();
                },
                Err(e) => {
                    return HistorySnafu { message: format!("ledger append task failed: {e}") }
                        .fail();
                },
            }
        }

        let mut ledger = self.ledger.lock();
        if !ledger.seen.insert(event.entity_id.clone()) {
            // Lost a race with another appender; the replay path dedups the
            // extra file line by entity id.
            return Ok(false);
        }
        ledger.events.insert(event);
        Ok(true)
    }

    /// True when the ledger already holds a deployment of this entity.
    pub fn contains(&self, entity_id: &str) -> bool {
        self.ledger.lock().seen.contains(entity_id)
    }

    /// Number of events in the ledger.
    pub fn len(&self) -> usize {
        self.ledger.lock().events.len()
    }

    /// True when the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns events in `(timestamp, entity_id)` order, optionally bounded
    /// by an inclusive timestamp range and filtered by originating server.
    pub fn get_history(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        server_name: Option<&str>,
    ) -> Vec<DeploymentEvent> {
        let ledger = self.ledger.lock();
        ledger
            .events
            .iter()
            .filter(|e| from.is_none_or(|f| e.timestamp >= f))
            .filter(|e| to.is_none_or(|t| e.timestamp <= t))
            .filter(|e| server_name.is_none_or(|s| e.server_name == s))
            .cloned()
            .collect()
    }

    /// Returns a history slice together with the current watermark.
    pub fn partial_history(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        server_name: Option<&str>,
        now: Timestamp,
    ) -> PartialDeploymentHistory {
        PartialDeploymentHistory {
            events: self.get_history(from, to, server_name),
            last_immutable_time: self.immutable_time(now),
        }
    }

    /// The immutable-time watermark: the greatest event timestamp `T` with
    /// `T + window <= now`, or 0 when no event qualifies. Pointer state
    /// derived from events at or below the watermark is final.
    pub fn immutable_time(&self, now: Timestamp) -> Timestamp {
        let cutoff = now.saturating_sub(self.immutable_window_ms);
        let ledger = self.ledger.lock();
        ledger
            .events
            .iter()
            .rev()
            .map(|e| e.timestamp)
            .find(|t| *t <= cutoff)
            .unwrap_or(0)
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}
