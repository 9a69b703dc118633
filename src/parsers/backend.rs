//! Compute backends for the data-block parse.
//!
//! Tiers are probed once into a [`BackendSelector`] and handed to every
//! consumer. A tier only changes how rows are scheduled; field parsing is
//! shared, so every tier produces the same columns for the same input.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

use super::catalog::TimeFormat;
use super::types::ChannelInfo;
use crate::config::BackendConfig;
use crate::error::ParseError;

/// Smallest row chunk handed to a parallel worker
const MIN_CHUNK_ROWS: usize = 1024;

/// Compute tiers in fixed priority order, best first
#[derive(
    AsRefStr, Clone, Copy, Debug, EnumIter, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendTier {
    /// Tier 0: row chunks parsed on a dedicated thread pool
    Parallel,
    /// Tier 1: single-threaded, appends straight into columns
    Columnar,
    /// Tier 2: row records transposed into columns
    RowOriented,
}

impl BackendTier {
    pub fn name(&self) -> &'static str {
        match self {
            BackendTier::Parallel => "parallel columnar",
            BackendTier::Columnar => "columnar",
            BackendTier::RowOriented => "row-oriented",
        }
    }
}

/// Capability table filled in by probing at startup
#[derive(Clone, Debug)]
pub struct BackendSelector {
    available: Vec<BackendTier>,
    parallel_pool: Option<Arc<ThreadPool>>,
}

impl BackendSelector {
    /// Probe every tier in priority order.
    ///
    /// A tier that cannot be set up is recorded as absent; probing itself
    /// never fails. The row-oriented tier is always present.
    pub fn probe(config: &BackendConfig) -> Self {
        let mut available = Vec::new();
        let mut parallel_pool = None;

        for tier in BackendTier::iter() {
            if tier != BackendTier::RowOriented && config.disabled_tiers.contains(&tier) {
                tracing::debug!("Backend tier {} disabled by configuration", tier.name());
                continue;
            }

            let usable = match tier {
                BackendTier::Parallel => match build_parallel_pool(config.parallel_threads) {
                    Ok(pool) => {
                        parallel_pool = Some(Arc::new(pool));
                        true
                    }
                    Err(reason) => {
                        tracing::debug!("Backend tier {} unavailable: {}", tier.name(), reason);
                        false
                    }
                },
                BackendTier::Columnar | BackendTier::RowOriented => true,
            };

            if usable {
                available.push(tier);
            }
        }

        if config.disabled_tiers.contains(&BackendTier::RowOriented) {
            tracing::warn!("The row-oriented tier cannot be disabled; keeping it as the fallback");
        }

        tracing::info!(
            "Parse backends available: {}",
            available.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
        );

        Self {
            available,
            parallel_pool,
        }
    }

    /// Highest-priority tier that probed as usable
    pub fn best_available(&self) -> BackendTier {
        self.available
            .first()
            .copied()
            .unwrap_or(BackendTier::RowOriented)
    }

    pub fn is_available(&self, tier: BackendTier) -> bool {
        self.available.contains(&tier)
    }

    /// Usable tiers in priority order
    pub fn available(&self) -> &[BackendTier] {
        &self.available
    }

    /// Backend for `requested`, or the next usable tier below it
    pub(crate) fn resolve(&self, requested: BackendTier) -> Backend<'_> {
        let tier = BackendTier::iter()
            .filter(|t| *t >= requested)
            .find(|t| self.is_available(*t))
            .unwrap_or(BackendTier::RowOriented);

        if tier != requested {
            tracing::warn!(
                "Backend tier {} unavailable, falling back to {}",
                requested.name(),
                tier.name()
            );
        }

        match (tier, self.parallel_pool.as_deref()) {
            (BackendTier::Parallel, Some(pool)) => Backend::Parallel(pool),
            (BackendTier::Parallel, None) | (BackendTier::Columnar, _) => Backend::Columnar,
            (BackendTier::RowOriented, _) => Backend::RowOriented,
        }
    }
}

fn build_parallel_pool(threads: Option<usize>) -> Result<ThreadPool, String> {
    let threads = match threads {
        Some(n) => n,
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .map_err(|e| e.to_string())?,
    };
    if threads < 2 {
        return Err(format!("needs at least 2 threads, have {}", threads));
    }

    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("parse-{}", i))
        .build()
        .map_err(|e| e.to_string())
}

/// One line of the data block with its 1-based line number
#[derive(Clone, Copy, Debug)]
pub(crate) struct DataLine<'a> {
    pub line: usize,
    pub text: &'a str,
}

impl<'a> DataLine<'a> {
    /// Number of value fields after the timestamp
    pub fn value_count(&self, delimiter: char) -> usize {
        self.text.split(delimiter).count() - 1
    }
}

/// How to read a data row: column order, timestamp format and delimiter
pub(crate) struct RowLayout<'a> {
    pub channels: &'a [ChannelInfo],
    pub time_format: TimeFormat,
    pub delimiter: char,
}

impl RowLayout<'_> {
    /// Parse one row, handing each value to `sink` in channel order.
    /// Returns the row's timestamp.
    fn read_row(
        &self,
        row: &DataLine<'_>,
        mut sink: impl FnMut(usize, f64),
    ) -> Result<f64, ParseError> {
        let mut fields = row.text.split(self.delimiter);
        let time_field = fields.next().unwrap_or_default().trim();

        let found = fields.clone().count();
        if found != self.channels.len() {
            return Err(ParseError::RowShapeMismatch {
                line: row.line,
                expected: self.channels.len(),
                found,
            });
        }

        let time = self
            .time_format
            .parse(time_field)
            .ok_or_else(|| ParseError::InvalidTimestamp {
                line: row.line,
                value: time_field.to_string(),
            })?;

        for (index, field) in fields.enumerate() {
            let value = parse_value(field).ok_or_else(|| ParseError::InvalidValue {
                line: row.line,
                channel: self.channels[index].name.clone(),
                value: field.trim().to_string(),
            })?;
            sink(index, value);
        }

        Ok(time)
    }
}

/// Parse a sample at full precision. Empty and `NaN` fields are missing samples.
fn parse_value(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Full-precision columns produced by a tier
#[derive(Debug, Default)]
pub(crate) struct RawColumns {
    pub times: Vec<f64>,
    pub columns: Vec<Vec<f64>>,
}

impl RawColumns {
    fn with_capacity(channels: usize, rows: usize) -> Self {
        Self {
            times: Vec::with_capacity(rows),
            columns: (0..channels).map(|_| Vec::with_capacity(rows)).collect(),
        }
    }

    fn append(&mut self, mut other: RawColumns) {
        self.times.append(&mut other.times);
        for (column, mut chunk) in self.columns.iter_mut().zip(other.columns) {
            column.append(&mut chunk);
        }
    }
}

/// Closed set of tier implementations
pub(crate) enum Backend<'a> {
    Parallel(&'a ThreadPool),
    Columnar,
    RowOriented,
}

impl Backend<'_> {
    pub fn tier(&self) -> BackendTier {
        match self {
            Backend::Parallel(_) => BackendTier::Parallel,
            Backend::Columnar => BackendTier::Columnar,
            Backend::RowOriented => BackendTier::RowOriented,
        }
    }

    pub fn parse(
        &self,
        lines: &[DataLine<'_>],
        layout: &RowLayout<'_>,
    ) -> Result<RawColumns, ParseError> {
        match self {
            Backend::Parallel(pool) => parse_parallel(pool, lines, layout),
            Backend::Columnar => parse_columnar(lines, layout),
            Backend::RowOriented => parse_rows(lines, layout),
        }
    }
}

fn parse_columnar(lines: &[DataLine<'_>], layout: &RowLayout<'_>) -> Result<RawColumns, ParseError> {
    let mut raw = RawColumns::with_capacity(layout.channels.len(), lines.len());
    for line in lines {
        let columns = &mut raw.columns;
        let time = layout.read_row(line, |index, value| columns[index].push(value))?;
        raw.times.push(time);
    }
    Ok(raw)
}

fn parse_parallel(
    pool: &ThreadPool,
    lines: &[DataLine<'_>],
    layout: &RowLayout<'_>,
) -> Result<RawColumns, ParseError> {
    let chunk_rows = (lines.len() / (pool.current_num_threads() * 4)).max(MIN_CHUNK_ROWS);

    // Chunks come back in input order, so the first error is the earliest row's
    let chunks: Vec<Result<RawColumns, ParseError>> = pool.install(|| {
        lines
            .par_chunks(chunk_rows)
            .map(|chunk| parse_columnar(chunk, layout))
            .collect()
    });

    let mut raw = RawColumns::with_capacity(layout.channels.len(), lines.len());
    for chunk in chunks {
        raw.append(chunk?);
    }
    Ok(raw)
}

fn parse_rows(lines: &[DataLine<'_>], layout: &RowLayout<'_>) -> Result<RawColumns, ParseError> {
    let mut rows: Vec<(f64, Vec<f64>)> = Vec::with_capacity(lines.len());
    for line in lines {
        let mut values = Vec::with_capacity(layout.channels.len());
        let time = layout.read_row(line, |_, value| values.push(value))?;
        rows.push((time, values));
    }

    let mut raw = RawColumns::with_capacity(layout.channels.len(), rows.len());
    for (time, values) in rows {
        raw.times.push(time);
        for (column, value) in raw.columns.iter_mut().zip(values) {
            column.push(value);
        }
    }
    Ok(raw)
}
