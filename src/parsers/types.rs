use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use strum::{AsRefStr, EnumString};

/// Declared channel types - comprehensive list from actual log files.
///
/// A type string the list does not know is kept verbatim in
/// [`ChannelType::Other`]; the type always comes from the channel declaration.
#[derive(AsRefStr, Clone, Debug, EnumString, PartialEq, Eq, Hash)]
pub enum ChannelType {
    AFR,
    AbsPressure,
    Acceleration,
    Angle,
    AngularVelocity,
    BatteryVoltage,
    ByteCount,
    Current,
    #[strum(serialize = "Current_uA_as_mA")]
    CurrentMicroampsAsMilliamps,
    #[strum(serialize = "Current_mA_as_A")]
    CurrentMilliampsAsAmps,
    Decibel,
    Density,
    DrivenDistance,
    EngineSpeed,
    EngineVolume,
    Flow,
    Frequency,
    #[strum(serialize = "FuelEcomony")]
    FuelEconomy,
    FuelVolume,
    Gear,
    GearRatio,
    InjFuelVolume,
    MassOverTime,
    #[strum(serialize = "MassPerCyl")]
    MassPerCylinder,
    Mileage,
    PercentPerEngineCycle,
    PercentPerLambda,
    #[strum(serialize = "PercentPerRpm")]
    PercentPerRPM,
    Percentage,
    Pressure,
    Ratio,
    Raw,
    Resistance,
    Speed,
    Stoichiometry,
    Temperature,
    #[strum(serialize = "Time_us")]
    TimeMicroseconds,
    #[strum(serialize = "Time_ms")]
    TimeMilliseconds,
    #[strum(serialize = "Time_s")]
    TimeSeconds,
    Voltage,
    #[strum(default)]
    Other(String),
}

impl ChannelType {
    /// The type name exactly as it is declared in log headers
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Other(name) => name,
            known => known.as_ref(),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ChannelType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChannelType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        // The `Other` fallback makes this infallible
        Ok(ChannelType::from_str(&name).unwrap_or(ChannelType::Other(name)))
    }
}

/// Channel identifier as declared by the `ID` header key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelId {
    Numeric(i64),
    Text(String),
}

impl ChannelId {
    pub fn parse(value: &str) -> Self {
        match value.parse::<i64>() {
            Ok(n) => ChannelId::Numeric(n),
            Err(_) => ChannelId::Text(value.to_string()),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Numeric(n) => write!(f, "{}", n),
            ChannelId::Text(s) => f.write_str(s),
        }
    }
}

/// Channel definition from the channel-definition block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub id: ChannelId,
    pub channel_type: ChannelType,
    /// Advisory display bounds from `DisplayMaxMin`
    pub display_min: Option<f64>,
    pub display_max: Option<f64>,
}

impl ChannelInfo {
    pub fn display_range(&self) -> Option<(f64, f64)> {
        Some((self.display_min?, self.display_max?))
    }
}

/// Summary statistics of one channel, computed once from full-precision samples
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation (n - 1); zero for a single sample
    pub std_dev: f64,
    pub q1: f64,
    pub q3: f64,
}

impl ChannelStats {
    /// Compute statistics over the non-NaN samples.
    /// Returns `None` when the channel has no samples at all.
    pub fn compute(values: &[f64]) -> Option<Self> {
        let mut clean: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if clean.is_empty() {
            return None;
        }

        let count = clean.len();
        let mean = clean.iter().sum::<f64>() / count as f64;
        let std_dev = if count > 1 {
            let squares: f64 = clean.iter().map(|v| (v - mean) * (v - mean)).sum();
            (squares / (count - 1) as f64).sqrt()
        } else {
            0.0
        };

        clean.sort_by(f64::total_cmp);

        Some(Self {
            count,
            min: clean[0],
            max: clean[count - 1],
            mean,
            std_dev,
            q1: percentile(&clean, 0.25),
            q3: percentile(&clean, 0.75),
        })
    }

    /// Interquartile range (Q3 - Q1)
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

/// Linear-interpolation percentile over sorted, non-empty data
fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    let position = fraction * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Reduction factors of the precomputed detail levels
pub const DOWNSAMPLE_FACTORS: [usize; 3] = [10, 100, 1000];

/// Number of points a view aims to draw when none is given
pub const DEFAULT_TARGET_POINTS: usize = 2000;

/// Tables shorter than this get no detail levels
const MIN_DOWNSAMPLE_ROWS: usize = 1000;

/// Min/max reduction of a table for drawing long logs.
///
/// Each full window of `factor` rows becomes two points at the window's mean
/// time: the window minimum, then the window maximum. NaN samples are
/// skipped; a window with no finite sample yields NaN. A trailing partial
/// window is dropped.
#[derive(Clone, Debug)]
pub struct DetailLevel {
    factor: usize,
    times: Arc<[f64]>,
    columns: Vec<Arc<[f32]>>,
}

impl DetailLevel {
    fn build(factor: usize, times: &[f64], columns: &[Arc<[f32]>]) -> Self {
        let windows = times.len() / factor;
        let used = windows * factor;

        let times: Arc<[f64]> = times[..used]
            .chunks_exact(factor)
            .flat_map(|w| {
                let mean = w.iter().sum::<f64>() / factor as f64;
                [mean, mean]
            })
            .collect();

        let columns: Vec<Arc<[f32]>> = columns
            .par_iter()
            .map(|column| {
                column[..used]
                    .chunks_exact(factor)
                    .flat_map(|w| {
                        let min = w.iter().copied().fold(f32::NAN, f32::min);
                        let max = w.iter().copied().fold(f32::NAN, f32::max);
                        [min, max]
                    })
                    .collect::<Arc<[f32]>>()
            })
            .collect();

        Self {
            factor,
            times,
            columns,
        }
    }

    /// Levels worth keeping for a table of `times.len()` rows
    fn build_all(times: &[f64], columns: &[Arc<[f32]>]) -> Vec<Self> {
        if times.len() < MIN_DOWNSAMPLE_ROWS {
            return Vec::new();
        }
        DOWNSAMPLE_FACTORS
            .iter()
            .filter(|&&factor| times.len() >= factor * 10)
            .map(|&factor| Self::build(factor, times, columns))
            .collect()
    }

    fn with_time_shift(&self, delta: f64) -> Self {
        Self {
            factor: self.factor,
            times: self.times.iter().map(|t| t + delta).collect(),
            columns: self.columns.clone(),
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn column(&self, index: usize) -> Option<&[f32]> {
        self.columns.get(index).map(|c| &c[..])
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    fn bitwise_eq(&self, other: &Self) -> bool {
        self.factor == other.factor
            && f64_bits_eq(&self.times, &other.times)
            && columns_bits_eq(&self.columns, &other.columns)
    }
}

/// Parsed log data in columnar form.
///
/// Every value column has exactly as many samples as the timestamp column;
/// missing samples are NaN. Columns are shared behind `Arc`, so a time shift
/// only allocates a new timestamp column.
#[derive(Clone, Debug)]
pub struct TelemetryTable {
    metadata: BTreeMap<String, String>,
    channels: Vec<ChannelInfo>,
    times: Arc<[f64]>,
    columns: Vec<Arc<[f32]>>,
    stats: Vec<Option<ChannelStats>>,
    non_monotonic_rows: usize,
    levels: Vec<DetailLevel>,
}

impl TelemetryTable {
    /// Build a table from full-precision columns.
    ///
    /// Statistics are computed before the values are narrowed to `f32`.
    pub(crate) fn from_full_precision(
        metadata: BTreeMap<String, String>,
        channels: Vec<ChannelInfo>,
        times: Vec<f64>,
        columns: Vec<Vec<f64>>,
    ) -> Self {
        debug_assert_eq!(channels.len(), columns.len());
        debug_assert!(columns.iter().all(|c| c.len() == times.len()));

        let (stats, columns): (Vec<_>, Vec<_>) = columns
            .par_iter()
            .map(|column| {
                let stats = ChannelStats::compute(column);
                let narrowed: Arc<[f32]> = column.iter().map(|&v| v as f32).collect();
                (stats, narrowed)
            })
            .unzip();

        let non_monotonic_rows = count_non_monotonic(&times);
        let levels = DetailLevel::build_all(&times, &columns);

        Self {
            metadata,
            channels,
            times: times.into(),
            columns,
            stats,
            non_monotonic_rows,
            levels,
        }
    }

    /// Reassemble a table from stored parts, e.g. a cache artifact.
    /// Returns `None` if the parts are not rectangular.
    pub(crate) fn from_parts(
        metadata: BTreeMap<String, String>,
        channels: Vec<ChannelInfo>,
        times: Vec<f64>,
        columns: Vec<Vec<f32>>,
        stats: Vec<Option<ChannelStats>>,
    ) -> Option<Self> {
        if columns.len() != channels.len() || stats.len() != channels.len() {
            return None;
        }
        if columns.iter().any(|c| c.len() != times.len()) {
            return None;
        }

        let non_monotonic_rows = count_non_monotonic(&times);
        let columns: Vec<Arc<[f32]>> = columns.into_iter().map(Arc::from).collect();
        let levels = DetailLevel::build_all(&times, &columns);
        Some(Self {
            metadata,
            channels,
            times: times.into(),
            columns,
            stats,
            non_monotonic_rows,
            levels,
        })
    }

    /// Copy of this table with `delta` seconds added to every timestamp,
    /// detail levels included. Value columns are shared with `self`.
    pub fn with_time_shift(&self, delta: f64) -> Self {
        let times: Arc<[f64]> = self.times.iter().map(|t| t + delta).collect();
        Self {
            metadata: self.metadata.clone(),
            channels: self.channels.clone(),
            times,
            columns: self.columns.clone(),
            stats: self.stats.clone(),
            non_monotonic_rows: self.non_monotonic_rows,
            levels: self
                .levels
                .iter()
                .map(|level| level.with_time_shift(delta))
                .collect(),
        }
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Find channel index by name
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn channel_by_id(&self, id: &ChannelId) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| &c.id == id)
    }

    /// Timestamps in seconds, one per row
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn column(&self, index: usize) -> Option<&[f32]> {
        self.columns.get(index).map(|c| &c[..])
    }

    pub fn column_by_name(&self, name: &str) -> Option<&[f32]> {
        self.column(self.channel_index(name)?)
    }

    pub fn stats(&self, index: usize) -> Option<&ChannelStats> {
        self.stats.get(index)?.as_ref()
    }

    pub fn statistics(&self, name: &str) -> Option<&ChannelStats> {
        self.stats(self.channel_index(name)?)
    }

    pub fn all_stats(&self) -> &[Option<ChannelStats>] {
        &self.stats
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn min_timestamp(&self) -> Option<f64> {
        self.times.iter().copied().reduce(f64::min)
    }

    /// (start, end) of the data in seconds
    pub fn time_range(&self) -> Option<(f64, f64)> {
        let min = self.min_timestamp()?;
        let max = self.times.iter().copied().reduce(f64::max)?;
        Some((min, max))
    }

    /// Rows whose timestamp is earlier than the row before them
    pub fn non_monotonic_rows(&self) -> usize {
        self.non_monotonic_rows
    }

    /// Precomputed detail levels, finest first
    pub fn detail_levels(&self) -> &[DetailLevel] {
        &self.levels
    }

    pub fn detail_level(&self, factor: usize) -> Option<&DetailLevel> {
        self.levels.iter().find(|l| l.factor == factor)
    }

    /// Timestamps and samples of `name`, from the detail level for
    /// `downsample_factor` when one exists, otherwise at full resolution
    pub fn channel_data(
        &self,
        name: &str,
        downsample_factor: Option<usize>,
    ) -> Option<(&[f64], &[f32])> {
        let index = self.channel_index(name)?;
        match downsample_factor.and_then(|factor| self.detail_level(factor)) {
            Some(level) => Some((level.times(), level.column(index)?)),
            None => Some((self.times(), self.column(index)?)),
        }
    }

    /// Coarsest available factor that keeps `visible_points` above roughly
    /// `target_points` once reduced, or `None` for full resolution
    pub fn optimal_downsample_factor(
        &self,
        visible_points: usize,
        target_points: usize,
    ) -> Option<usize> {
        if target_points == 0 || visible_points <= target_points {
            return None;
        }
        let ratio = visible_points as f64 / target_points as f64;
        [(1000, 500.0), (100, 50.0), (10, 5.0)]
            .into_iter()
            .find(|&(factor, threshold)| ratio > threshold && self.detail_level(factor).is_some())
            .map(|(factor, _)| factor)
    }

    /// Exact comparison of every stored bit, NaN sentinels included
    pub fn bitwise_eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata
            && self.channels == other.channels
            && self.stats == other.stats
            && f64_bits_eq(&self.times, &other.times)
            && columns_bits_eq(&self.columns, &other.columns)
            && self.levels.len() == other.levels.len()
            && self
                .levels
                .iter()
                .zip(other.levels.iter())
                .all(|(a, b)| a.bitwise_eq(b))
    }
}

fn f64_bits_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

fn columns_bits_eq(a: &[Arc<[f32]>], b: &[Arc<[f32]>]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(a, b)| {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
        })
}

fn count_non_monotonic(times: &[f64]) -> usize {
    times.windows(2).filter(|w| w[1] < w[0]).count()
}
