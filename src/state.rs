//! Core state types: loaded logs and their identity.
//!
//! A [`LogFile`] owns a shared reference to its [`TelemetryTable`]. Time
//! offsets are applied to the stored timestamps by swapping in a shifted copy
//! of the table, so a reader holding the previous `Arc` keeps a consistent
//! view.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::Fingerprint;
use crate::parsers::TelemetryTable;

static NEXT_LOG_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle of a loaded log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId(u64);

impl LogId {
    fn next() -> Self {
        LogId(NEXT_LOG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role of a log within a manager
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRole {
    /// Reference log for channel browsing and time alignment
    Main,
    #[default]
    Secondary,
}

/// Result of a successful load, before it is handed to a manager
#[derive(Clone, Debug)]
pub struct LoadedLog {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub table: Arc<TelemetryTable>,
    /// Whether the table came from the parse cache
    pub from_cache: bool,
}

/// A loaded log with its time offset and activation state
#[derive(Clone, Debug)]
pub struct LogFile {
    id: LogId,
    source_path: PathBuf,
    display_name: String,
    /// Fingerprint of the source before any offset was applied
    fingerprint: Option<Fingerprint>,
    time_offset: f64,
    active: bool,
    role: LogRole,
    table: Arc<TelemetryTable>,
}

impl LogFile {
    /// Wrap a table with no offset applied. The log starts active.
    pub fn new(source_path: impl Into<PathBuf>, table: impl Into<Arc<TelemetryTable>>) -> Self {
        let source_path = source_path.into();
        Self {
            id: LogId::next(),
            display_name: display_name_of(&source_path),
            source_path,
            fingerprint: None,
            time_offset: 0.0,
            active: true,
            role: LogRole::Secondary,
            table: table.into(),
        }
    }

    pub fn id(&self) -> LogId {
        self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// File name shown for this log
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    /// Seconds added to every stored timestamp
    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn role(&self) -> LogRole {
        self.role
    }

    pub fn is_main(&self) -> bool {
        self.role == LogRole::Main
    }

    /// The table with the offset already applied
    pub fn table(&self) -> &Arc<TelemetryTable> {
        &self.table
    }

    /// Give this log a fresh id, e.g. when a clone is added next to its
    /// original
    pub(crate) fn reassign_id(&mut self) {
        self.id = LogId::next();
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn set_role(&mut self, role: LogRole) {
        self.role = role;
    }

    /// Add `delta` seconds to the stored timestamps and the offset
    pub(crate) fn shift_time(&mut self, delta: f64) {
        if delta != 0.0 {
            self.table = Arc::new(self.table.with_time_shift(delta));
        }
        self.time_offset += delta;
    }

    /// Move the stored timestamps so the total offset becomes `offset`
    pub(crate) fn apply_time_offset(&mut self, offset: f64) {
        let delta = offset - self.time_offset;
        if delta != 0.0 {
            self.table = Arc::new(self.table.with_time_shift(delta));
        }
        self.time_offset = offset;
    }

    /// Swap in a new, unshifted table and re-apply the current offset to it
    /// before it is stored
    pub(crate) fn swap_table(&mut self, table: Arc<TelemetryTable>) {
        self.table = if self.time_offset != 0.0 {
            Arc::new(table.with_time_shift(self.time_offset))
        } else {
            table
        };
    }

    pub(crate) fn set_source(&mut self, path: PathBuf, fingerprint: Option<Fingerprint>) {
        self.display_name = display_name_of(&path);
        self.source_path = path;
        self.fingerprint = fingerprint;
    }
}

impl From<LoadedLog> for LogFile {
    fn from(loaded: LoadedLog) -> Self {
        let mut log = LogFile::new(loaded.path, loaded.table);
        log.fingerprint = Some(loaded.fingerprint);
        log
    }
}

fn display_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parsers::types::{ChannelId, ChannelInfo, ChannelType};
    use std::collections::BTreeMap;

    /// Table with one `Raw` channel per name and rows at `times`
    pub(crate) fn table(times: &[f64], channels: &[&str]) -> TelemetryTable {
        let infos = channels
            .iter()
            .enumerate()
            .map(|(i, name)| ChannelInfo {
                name: name.to_string(),
                id: ChannelId::Numeric(i as i64),
                channel_type: ChannelType::Raw,
                display_min: None,
                display_max: None,
            })
            .collect();
        let columns = channels
            .iter()
            .map(|_| times.iter().map(|t| t * 10.0).collect())
            .collect();
        TelemetryTable::from_full_precision(BTreeMap::new(), infos, times.to_vec(), columns)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = LogFile::new("a.csv", table(&[0.0], &["RPM"]));
        let b = LogFile::new("a.csv", table(&[0.0], &["RPM"]));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.display_name(), "a.csv");
        assert!(a.is_active());
        assert_eq!(a.role(), LogRole::Secondary);
    }

    #[test]
    fn test_shift_is_copy_on_write() {
        let mut log = LogFile::new("/logs/run.csv", table(&[1.0, 2.0], &["RPM"]));
        let before = Arc::clone(log.table());

        log.shift_time(-1.0);
        assert_eq!(log.time_offset(), -1.0);
        assert_eq!(log.table().times(), &[0.0, 1.0]);
        assert_eq!(before.times(), &[1.0, 2.0]);

        log.apply_time_offset(0.5);
        assert_eq!(log.time_offset(), 0.5);
        assert_eq!(log.table().times(), &[1.5, 2.5]);
        assert_eq!(log.display_name(), "run.csv");
    }

    #[test]
    fn test_swap_reapplies_offset() {
        let mut log = LogFile::new("run.csv", table(&[10.0, 20.0], &["RPM"]));
        log.shift_time(-2.0);
        log.swap_table(Arc::new(table(&[100.0], &["MAP"])));
        assert_eq!(log.time_offset(), -2.0);
        assert_eq!(log.table().times(), &[98.0]);
        assert!(log.table().channel("MAP").is_some());
    }

    #[test]
    fn test_from_loaded_log() {
        let fingerprint = Fingerprint {
            path: PathBuf::from("/logs/run.csv"),
            size: 1,
            mtime_ns: 2,
        };
        let log = LogFile::from(LoadedLog {
            path: PathBuf::from("/logs/run.csv"),
            fingerprint: fingerprint.clone(),
            table: Arc::new(table(&[0.0], &["RPM"])),
            from_cache: true,
        });
        assert_eq!(log.fingerprint(), Some(&fingerprint));
        assert_eq!(log.time_offset(), 0.0);
    }
}
