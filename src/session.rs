//! Snapshot and restore of a manager's logs.
//!
//! This module only produces and consumes [`SessionEntry`] values; storing
//! them is up to the caller.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::ParseCache;
use crate::error::LoadError;
use crate::manager::LogFileManager;
use crate::parsers::{BackendSelector, LogParser};
use crate::state::LogFile;
use crate::sync::TimeSynchronizer;

/// Persistable state of one loaded log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub time_offset: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub main: bool,
}

fn default_active() -> bool {
    true
}

impl LogFileManager {
    /// State of every log, in insertion order
    pub fn session_entries(&self) -> Vec<SessionEntry> {
        self.iter()
            .map(|log| SessionEntry {
                path: log.source_path().to_path_buf(),
                time_offset: log.time_offset(),
                active: log.is_active(),
                main: log.is_main(),
            })
            .collect()
    }
}

/// Result of [`restore`]: the rebuilt manager and the entries that failed
#[derive(Debug)]
pub struct RestoredSession {
    pub manager: LogFileManager,
    pub failures: Vec<(PathBuf, LoadError)>,
}

/// Load every entry and rebuild a manager from them.
///
/// Entries are loaded in parallel but added in entry order. A failed entry
/// is reported and skipped; the rest are restored. Offsets, the Main role
/// and activation go through the same checked operations as any other
/// caller, so a bad offset is logged and left at zero.
pub fn restore(
    entries: &[SessionEntry],
    cache: &ParseCache,
    backends: &BackendSelector,
    parser: &LogParser,
) -> RestoredSession {
    let tier = backends.best_available();
    let results: Vec<_> = entries
        .par_iter()
        .map(|entry| cache.get_or_parse(&entry.path, parser, backends, tier, &|_| {}))
        .collect();

    let mut manager = LogFileManager::new();
    let mut failures = Vec::new();
    let mut restored = Vec::new();

    for (entry, result) in entries.iter().zip(results) {
        match result {
            Ok(loaded) => restored.push((manager.add(LogFile::from(loaded)), entry)),
            Err(e) => {
                tracing::warn!("Skipping session entry: {}", e);
                failures.push((entry.path.clone(), e));
            }
        }
    }

    let sync = TimeSynchronizer::default();
    for (id, entry) in &restored {
        if let Err(e) = sync.set_time_offset(&mut manager, *id, entry.time_offset) {
            tracing::warn!("Ignoring offset for {}: {}", entry.path.display(), e);
        }
    }

    if let Some((id, _)) = restored.iter().find(|(_, entry)| entry.main) {
        if let Err(e) = manager.set_main(*id) {
            tracing::warn!("Could not restore main log: {}", e);
        }
    }

    if !restored.is_empty() && restored.iter().all(|(_, entry)| !entry.active) {
        manager.deactivate_all();
    } else {
        for (id, entry) in restored.iter().filter(|(_, entry)| !entry.active) {
            if let Err(e) = manager.set_active(*id, false) {
                tracing::warn!("Could not deactivate {}: {}", entry.path.display(), e);
            }
        }
    }

    tracing::info!(
        "Restored {} of {} session logs",
        manager.len(),
        entries.len()
    );

    RestoredSession { manager, failures }
}
