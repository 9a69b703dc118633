//! Ordered collection of loaded logs.
//!
//! Exactly one log is Main whenever the manager is not empty, and a
//! non-empty manager only loses its last active log through
//! [`LogFileManager::deactivate_all`].

use std::path::Path;
use std::sync::Arc;

use crate::error::ManagerError;
use crate::parsers::{ChannelInfo, TelemetryTable};
use crate::state::{LoadedLog, LogFile, LogId, LogRole};

/// A channel of one loaded log, as handed out by the channel fan-out
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelRef {
    pub log_id: LogId,
    /// Index of the channel within its log's table
    pub channel_index: usize,
    pub channel: ChannelInfo,
}

#[derive(Debug, Default)]
pub struct LogFileManager {
    logs: Vec<LogFile>,
}

impl LogFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a log. The first log becomes Main; every log starts active.
    ///
    /// A log whose id is already present (a clone of a managed log) is given
    /// a fresh id, so always use the returned id.
    pub fn add(&mut self, mut log: LogFile) -> LogId {
        if self.index_of(log.id()).is_ok() {
            log.reassign_id();
        }

        let role = if self.logs.is_empty() {
            LogRole::Main
        } else {
            LogRole::Secondary
        };
        log.set_role(role);
        log.set_active(true);

        let id = log.id();
        tracing::debug!("Added log {} ({}) as {:?}", id, log.display_name(), role);
        self.logs.push(log);
        id
    }

    /// Remove a log, promoting the earliest remaining log if it was Main
    pub fn remove(&mut self, id: LogId) -> Result<LogFile, ManagerError> {
        let index = self.index_of(id)?;
        let removed = self.logs.remove(index);

        if removed.is_main() {
            if let Some(next) = self.logs.first_mut() {
                next.set_role(LogRole::Main);
                tracing::debug!("Promoted log {} to main", next.id());
            }
        }

        // Removal is not an explicit request to hide everything
        if !self.logs.is_empty() && !self.logs.iter().any(LogFile::is_active) {
            if let Some(main) = self.logs.iter_mut().find(|l| l.is_main()) {
                main.set_active(true);
            }
        }

        Ok(removed)
    }

    /// Include or exclude a log from [`get_active_logs`](Self::get_active_logs).
    ///
    /// Deactivating the only active log fails with `LastActiveLog`; use
    /// [`deactivate_all`](Self::deactivate_all) to hide every log on purpose.
    pub fn set_active(&mut self, id: LogId, active: bool) -> Result<(), ManagerError> {
        let index = self.index_of(id)?;

        if !active && self.logs[index].is_active() {
            let others_active = self
                .logs
                .iter()
                .any(|l| l.id() != id && l.is_active());
            if !others_active {
                return Err(ManagerError::LastActiveLog(id));
            }
        }

        self.logs[index].set_active(active);
        Ok(())
    }

    pub fn deactivate_all(&mut self) {
        for log in &mut self.logs {
            log.set_active(false);
        }
    }

    /// Make `id` the Main log, demoting the current one
    pub fn set_main(&mut self, id: LogId) -> Result<(), ManagerError> {
        self.index_of(id)?;
        for log in &mut self.logs {
            let role = if log.id() == id {
                LogRole::Main
            } else {
                LogRole::Secondary
            };
            log.set_role(role);
        }
        Ok(())
    }

    /// Swap in a new table for `id`, keeping its offset, activation and role.
    /// The current offset is applied to `table` before it is stored.
    pub fn replace(
        &mut self,
        id: LogId,
        table: impl Into<Arc<TelemetryTable>>,
    ) -> Result<(), ManagerError> {
        let index = self.index_of(id)?;
        self.logs[index].swap_table(table.into());
        Ok(())
    }

    /// Like [`replace`](Self::replace), also taking over the new source
    /// path and fingerprint
    pub fn replace_loaded(&mut self, id: LogId, loaded: LoadedLog) -> Result<(), ManagerError> {
        let index = self.index_of(id)?;
        let log = &mut self.logs[index];
        log.swap_table(loaded.table);
        log.set_source(loaded.path, Some(loaded.fingerprint));
        Ok(())
    }

    pub fn get(&self, id: LogId) -> Option<&LogFile> {
        self.logs.iter().find(|l| l.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: LogId) -> Result<&mut LogFile, ManagerError> {
        self.logs
            .iter_mut()
            .find(|l| l.id() == id)
            .ok_or(ManagerError::NotFound(id))
    }

    pub fn get_main_log(&self) -> Option<&LogFile> {
        self.logs.iter().find(|l| l.is_main())
    }

    /// Active logs in insertion order
    pub fn get_active_logs(&self) -> Vec<&LogFile> {
        self.logs.iter().filter(|l| l.is_active()).collect()
    }

    /// All logs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &LogFile> {
        self.logs.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut LogFile> {
        self.logs.iter_mut()
    }

    pub fn ids(&self) -> Vec<LogId> {
        self.logs.iter().map(LogFile::id).collect()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Whether a log from `path` is already loaded
    pub fn contains_path(&self, path: &Path) -> bool {
        self.logs.iter().any(|l| l.source_path() == path)
    }

    /// Look up `channel_name` in every active log
    pub fn add_channel_from_all_logs(
        &self,
        channel_name: &str,
    ) -> Result<Vec<ChannelRef>, ManagerError> {
        let refs: Vec<ChannelRef> = self
            .logs
            .iter()
            .filter(|l| l.is_active())
            .filter_map(|log| {
                let table = log.table();
                let channel_index = table.channel_index(channel_name)?;
                Some(ChannelRef {
                    log_id: log.id(),
                    channel_index,
                    channel: table.channels()[channel_index].clone(),
                })
            })
            .collect();

        if refs.is_empty() {
            return Err(ManagerError::UnknownChannelReference(
                channel_name.to_string(),
            ));
        }
        Ok(refs)
    }

    /// Combined (start, end) of every active log, offsets applied
    pub fn time_range(&self) -> Option<(f64, f64)> {
        self.logs
            .iter()
            .filter(|l| l.is_active())
            .filter_map(|l| l.table().time_range())
            .reduce(|(min_a, max_a), (min_b, max_b)| (min_a.min(min_b), max_a.max(max_b)))
    }

    fn index_of(&self, id: LogId) -> Result<usize, ManagerError> {
        self.logs
            .iter()
            .position(|l| l.id() == id)
            .ok_or(ManagerError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::table;

    fn log(name: &str, times: &[f64], channels: &[&str]) -> LogFile {
        LogFile::new(name, table(times, channels))
    }

    fn main_count(manager: &LogFileManager) -> usize {
        manager.iter().filter(|l| l.is_main()).count()
    }

    #[test]
    fn test_add_assigns_main_once() {
        let mut manager = LogFileManager::new();
        let a = manager.add(log("a.csv", &[0.0], &["RPM"]));
        let b = manager.add(log("b.csv", &[0.0], &["RPM"]));

        assert_eq!(manager.get_main_log().map(LogFile::id), Some(a));
        assert_eq!(manager.get(b).unwrap().role(), LogRole::Secondary);
        assert_eq!(manager.get_active_logs().len(), 2);
        assert_eq!(manager.ids(), vec![a, b]);
    }

    #[test]
    fn test_exactly_one_main_through_adds_and_removes() {
        let mut manager = LogFileManager::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(manager.add(log(&format!("{}.csv", i), &[0.0], &["RPM"])));
            assert_eq!(main_count(&manager), 1);
        }

        // Remove the Main each time: the earliest remaining log takes over
        for (i, id) in ids.iter().enumerate().take(4) {
            manager.remove(*id).unwrap();
            assert_eq!(main_count(&manager), 1);
            assert_eq!(manager.get_main_log().map(LogFile::id), Some(ids[i + 1]));
        }

        manager.remove(ids[4]).unwrap();
        assert!(manager.is_empty());
        assert!(manager.get_main_log().is_none());
        assert_eq!(manager.remove(ids[4]).unwrap_err(), ManagerError::NotFound(ids[4]));
    }

    #[test]
    fn test_removing_secondary_keeps_main() {
        let mut manager = LogFileManager::new();
        let a = manager.add(log("a.csv", &[0.0], &["RPM"]));
        let b = manager.add(log("b.csv", &[0.0], &["RPM"]));
        let c = manager.add(log("c.csv", &[0.0], &["RPM"]));

        manager.remove(b).unwrap();
        assert_eq!(manager.get_main_log().map(LogFile::id), Some(a));
        assert_eq!(manager.ids(), vec![a, c]);
    }

    #[test]
    fn test_last_active_log_is_protected() {
        let mut manager = LogFileManager::new();
        let a = manager.add(log("a.csv", &[0.0], &["RPM"]));
        let b = manager.add(log("b.csv", &[0.0], &["RPM"]));

        manager.set_active(a, false).unwrap();
        assert_eq!(
            manager.set_active(b, false),
            Err(ManagerError::LastActiveLog(b))
        );
        assert_eq!(manager.get_active_logs().len(), 1);

        // Deactivation does not touch the role
        assert!(manager.get(a).unwrap().is_main());

        manager.deactivate_all();
        assert!(manager.get_active_logs().is_empty());
        manager.set_active(b, true).unwrap();
        assert_eq!(manager.get_active_logs()[0].id(), b);
    }

    #[test]
    fn test_remove_reactivates_when_only_hidden_logs_remain() {
        let mut manager = LogFileManager::new();
        let a = manager.add(log("a.csv", &[0.0], &["RPM"]));
        let b = manager.add(log("b.csv", &[0.0], &["RPM"]));
        manager.set_active(b, false).unwrap();

        manager.remove(a).unwrap();
        let main = manager.get_main_log().unwrap();
        assert_eq!(main.id(), b);
        assert!(main.is_active());
    }

    #[test]
    fn test_set_main() {
        let mut manager = LogFileManager::new();
        let a = manager.add(log("a.csv", &[0.0], &["RPM"]));
        let b = manager.add(log("b.csv", &[0.0], &["RPM"]));
        manager.set_main(b).unwrap();
        assert_eq!(manager.get(a).unwrap().role(), LogRole::Secondary);
        assert_eq!(manager.get_main_log().map(LogFile::id), Some(b));
        assert_eq!(main_count(&manager), 1);
    }

    #[test]
    fn test_replace_applies_existing_offset() {
        let mut manager = LogFileManager::new();
        let a = manager.add(log("a.csv", &[12.5, 13.0], &["RPM"]));
        let b = manager.add(log("b.csv", &[1.0], &["RPM"]));
        manager.set_active(b, false).unwrap();
        manager.get_mut(a).unwrap().shift_time(-12.5);

        manager.replace(a, table(&[20.0, 30.0], &["RPM", "MAP"])).unwrap();

        let replaced = manager.get(a).unwrap();
        assert_eq!(replaced.time_offset(), -12.5);
        assert_eq!(replaced.table().min_timestamp(), Some(7.5));
        assert!(replaced.is_main());
        assert!(replaced.is_active());
        assert!(replaced.table().channel("MAP").is_some());

        // Inactive stays inactive across a replace
        manager.replace(b, table(&[2.0], &["RPM"])).unwrap();
        assert!(!manager.get(b).unwrap().is_active());
    }

    #[test]
    fn test_channel_fan_out() {
        let mut manager = LogFileManager::new();
        let a = manager.add(log("a.csv", &[0.0], &["RPM", "MAP"]));
        let b = manager.add(log("b.csv", &[0.0], &["MAP"]));
        let c = manager.add(log("c.csv", &[0.0], &["MAP"]));
        manager.set_active(c, false).unwrap();

        let refs = manager.add_channel_from_all_logs("MAP").unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!((refs[0].log_id, refs[0].channel_index), (a, 1));
        assert_eq!((refs[1].log_id, refs[1].channel_index), (b, 0));
        assert_eq!(refs[0].channel.name, "MAP");

        assert_eq!(
            manager.add_channel_from_all_logs("Boost"),
            Err(ManagerError::UnknownChannelReference("Boost".to_string()))
        );
    }

    #[test]
    fn test_time_range_spans_active_logs() {
        let mut manager = LogFileManager::new();
        manager.add(log("a.csv", &[5.0, 10.0], &["RPM"]));
        let b = manager.add(log("b.csv", &[2.0, 8.0], &["RPM"]));
        assert_eq!(manager.time_range(), Some((2.0, 10.0)));
        manager.set_active(b, false).unwrap();
        assert_eq!(manager.time_range(), Some((5.0, 10.0)));
        assert!(manager.contains_path(Path::new("b.csv")));
    }

    #[test]
    fn test_unknown_ids() {
        let mut manager = LogFileManager::new();
        let stray = LogFile::new("x.csv", table(&[0.0], &["RPM"])).id();
        assert_eq!(manager.set_active(stray, true), Err(ManagerError::NotFound(stray)));
        assert_eq!(manager.set_main(stray), Err(ManagerError::NotFound(stray)));
        assert!(manager.replace(stray, table(&[0.0], &["RPM"])).is_err());
    }

    #[test]
    fn test_adding_a_clone_gets_a_new_id() {
        let mut manager = LogFileManager::new();
        let a = manager.add(log("a.csv", &[0.0], &["RPM"]));
        let copy = manager.get(a).unwrap().clone();

        let b = manager.add(copy);
        assert_ne!(a, b);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(b).unwrap().role(), LogRole::Secondary);

        manager.set_active(b, false).unwrap();
        assert!(manager.get(a).unwrap().is_active());
        manager.remove(a).unwrap();
        assert_eq!(manager.ids(), vec![b]);
        assert!(manager.get(b).unwrap().is_main());
    }
}
