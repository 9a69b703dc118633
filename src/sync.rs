//! Time alignment across loaded logs.
//!
//! Every policy rewrites stored timestamps through the log's offset, so
//! readers never need to know alignment happened.

use serde::{Deserialize, Serialize};

use crate::error::ManagerError;
use crate::manager::LogFileManager;
use crate::parsers::TelemetryTable;
use crate::state::LogId;

/// Which timestamp of a log is lined up with the Main log's
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentReference {
    /// The first row's timestamp
    #[default]
    FirstSample,
    /// The earliest timestamp anywhere in the log
    MinTimestamp,
}

impl AlignmentReference {
    fn of(&self, table: &TelemetryTable) -> Option<f64> {
        match self {
            AlignmentReference::FirstSample => table.first_timestamp(),
            AlignmentReference::MinTimestamp => table.min_timestamp(),
        }
    }
}

/// Shift applied to one log by an alignment pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OffsetChange {
    pub log_id: LogId,
    /// Seconds added to the stored timestamps by this pass
    pub delta: f64,
    /// Total offset after the pass
    pub offset: f64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TimeSynchronizer {
    reference: AlignmentReference,
}

impl TimeSynchronizer {
    pub fn new(reference: AlignmentReference) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> AlignmentReference {
        self.reference
    }

    /// Shift every log so its earliest timestamp is exactly zero.
    /// Empty logs are left alone.
    pub fn zero_align(&self, manager: &mut LogFileManager) -> Vec<OffsetChange> {
        let mut changes = Vec::new();
        for log in manager.iter_mut() {
            let Some(min) = log.table().min_timestamp() else {
                continue;
            };
            let delta = -min;
            log.shift_time(delta);
            changes.push(OffsetChange {
                log_id: log.id(),
                delta,
                offset: log.time_offset(),
            });
        }

        tracing::info!("Zero-aligned {} logs", changes.len());
        changes
    }

    /// Shift every non-Main log so its reference timestamp matches the Main
    /// log's. Does nothing without a non-empty Main log.
    pub fn align_to_main(&self, manager: &mut LogFileManager) -> Vec<OffsetChange> {
        let Some(main_ref) = manager
            .get_main_log()
            .and_then(|main| self.reference.of(main.table()))
        else {
            tracing::debug!("No main log reference to align to");
            return Vec::new();
        };

        let mut changes = Vec::new();
        for log in manager.iter_mut().filter(|l| !l.is_main()) {
            let Some(log_ref) = self.reference.of(log.table()) else {
                continue;
            };
            let delta = main_ref - log_ref;
            log.shift_time(delta);
            changes.push(OffsetChange {
                log_id: log.id(),
                delta,
                offset: log.time_offset(),
            });
        }

        tracing::info!("Aligned {} logs to main", changes.len());
        changes
    }

    /// Set the total offset of one log; no other log is touched
    pub fn set_time_offset(
        &self,
        manager: &mut LogFileManager,
        id: LogId,
        offset: f64,
    ) -> Result<OffsetChange, ManagerError> {
        if !offset.is_finite() {
            return Err(ManagerError::InvalidOffset(offset));
        }

        let log = manager.get_mut(id)?;
        let delta = offset - log.time_offset();
        log.apply_time_offset(offset);
        tracing::debug!("Set offset of log {} to {:.3}s", id, offset);

        Ok(OffsetChange {
            log_id: id,
            delta,
            offset,
        })
    }

    /// Return every log to its recorded time
    pub fn reset_all_time_offsets(&self, manager: &mut LogFileManager) {
        for log in manager.iter_mut() {
            log.apply_time_offset(0.0);
        }
    }
}
