use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::backend::{BackendSelector, BackendTier, DataLine, RowLayout};
use super::catalog::ChannelCatalog;
use super::types::TelemetryTable;
use crate::config::ParserConfig;
use crate::error::{LoadError, ParseError};

/// What to do with data rows that carry fewer values than declared channels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortRowPolicy {
    /// Every short row fails the parse
    #[default]
    Reject,
    /// A short final row (an interrupted write) is dropped; any other short row fails
    DropTrailing,
}

/// Stages of a load, reported as progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStage {
    CheckingCache,
    LoadingCache,
    ParsingHeader,
    ParsingData,
    ComputingStatistics,
    SavingCache,
    Complete,
}

impl LoadStage {
    pub fn percent(&self) -> u8 {
        match self {
            LoadStage::CheckingCache => 5,
            LoadStage::LoadingCache => 10,
            LoadStage::ParsingHeader => 10,
            LoadStage::ParsingData => 20,
            LoadStage::ComputingStatistics => 80,
            LoadStage::SavingCache => 95,
            LoadStage::Complete => 100,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            LoadStage::CheckingCache => "Checking cache...",
            LoadStage::LoadingCache => "Loading from cache...",
            LoadStage::ParsingHeader => "Parsing metadata...",
            LoadStage::ParsingData => "Loading data...",
            LoadStage::ComputingStatistics => "Computing channel statistics...",
            LoadStage::SavingCache => "Saving to cache...",
            LoadStage::Complete => "Complete",
        }
    }
}

/// Log file contents, read once into memory.
///
/// The text is a snapshot: a logger still appending to or truncating the
/// file after `open` does not affect it.
pub struct LogSource {
    path: PathBuf,
    contents: String,
}

impl LogSource {
    /// Read `path` as UTF-8 text. Non-text files fail with an `InvalidData`
    /// I/O error.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let contents = fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            contents,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }
}

/// Telemetry log parser
#[derive(Clone, Debug, Default)]
pub struct LogParser {
    config: ParserConfig,
}

impl LogParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse a log file from disk
    pub fn parse_file(
        &self,
        path: &Path,
        backends: &BackendSelector,
        tier: BackendTier,
    ) -> Result<TelemetryTable, LoadError> {
        self.parse_file_with_progress(path, backends, tier, &|_| {})
    }

    pub fn parse_file_with_progress(
        &self,
        path: &Path,
        backends: &BackendSelector,
        tier: BackendTier,
        progress: &dyn Fn(LoadStage),
    ) -> Result<TelemetryTable, LoadError> {
        let source = LogSource::open(path)?;
        self.parse_str_with_progress(source.contents(), backends, tier, progress)
            .map_err(|e| LoadError::parse(path, e))
    }

    /// Parse log text already in memory
    pub fn parse_str(
        &self,
        contents: &str,
        backends: &BackendSelector,
        tier: BackendTier,
    ) -> Result<TelemetryTable, ParseError> {
        self.parse_str_with_progress(contents, backends, tier, &|_| {})
    }

    fn parse_str_with_progress(
        &self,
        contents: &str,
        backends: &BackendSelector,
        tier: BackendTier,
        progress: &dyn Fn(LoadStage),
    ) -> Result<TelemetryTable, ParseError> {
        progress(LoadStage::ParsingHeader);
        let catalog = ChannelCatalog::parse(contents)?;
        self.parse_with_catalog(contents, catalog, backends, tier, progress)
    }

    /// Parse the data block of `contents` using an already parsed catalog
    pub fn parse_with_catalog(
        &self,
        contents: &str,
        catalog: ChannelCatalog,
        backends: &BackendSelector,
        tier: BackendTier,
        progress: &dyn Fn(LoadStage),
    ) -> Result<TelemetryTable, ParseError> {
        progress(LoadStage::ParsingData);

        let lines = self.data_lines(
            catalog.data_block(contents),
            catalog.data_first_line(),
            catalog.channels().len(),
        );
        let layout = RowLayout {
            channels: catalog.channels(),
            time_format: catalog.time_format(),
            delimiter: self.config.delimiter,
        };

        let backend = backends.resolve(tier);
        let raw = backend.parse(&lines, &layout)?;

        progress(LoadStage::ComputingStatistics);
        let (metadata, channels) = catalog.into_parts();
        let table = TelemetryTable::from_full_precision(metadata, channels, raw.times, raw.columns);

        if table.non_monotonic_rows() > 0 {
            tracing::warn!(
                "Log has {} non-monotonic timestamps",
                table.non_monotonic_rows()
            );
        }

        tracing::info!(
            "Parsed log: {} channels, {} data points ({} backend)",
            table.channels().len(),
            table.len(),
            backend.tier().name()
        );

        Ok(table)
    }

    /// Non-empty data lines, with the short-row policy applied to the last one
    fn data_lines<'a>(&self, block: &'a str, first_line: usize, channels: usize) -> Vec<DataLine<'a>> {
        let mut lines: Vec<DataLine<'a>> = block
            .lines()
            .enumerate()
            .filter_map(|(i, text)| {
                let text = text.trim();
                (!text.is_empty()).then_some(DataLine {
                    line: first_line + i,
                    text,
                })
            })
            .collect();

        if self.config.short_row_policy == ShortRowPolicy::DropTrailing {
            if let Some(last) = lines.last() {
                let found = last.value_count(self.config.delimiter);
                if found < channels {
                    tracing::warn!(
                        "Dropping truncated final row at line {} ({} of {} values)",
                        last.line,
                        found,
                        channels
                    );
                    lines.pop();
                }
            }
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::parsers::types::ChannelType;
    use strum::IntoEnumIterator;

    pub(crate) const SAMPLE: &str = r#"%DataLog%
DataLogVersion : 1.1
Software : Haltech NSP
SoftwareVersion : 999.999.999.999
DownloadDateTime : 20250718 04:09:48
Channel : RPM
ID : 384
Type : EngineSpeed
DisplayMaxMin : 20000,0
Channel : Manifold Pressure
ID : 224
Type : Pressure
DisplayMaxMin : 4013,13
Log Source : 20
Log Number : 1118
Log : 20250718 02:15:46
14:15:46.000,5000,1013
14:15:46.020,5100,
14:15:46.040,5200,1030
"#;

    fn backends() -> BackendSelector {
        BackendSelector::probe(&BackendConfig {
            parallel_threads: Some(2),
            ..BackendConfig::default()
        })
    }

    fn parser(policy: ShortRowPolicy) -> LogParser {
        LogParser::new(ParserConfig {
            short_row_policy: policy,
            ..ParserConfig::default()
        })
    }

    #[test]
    fn test_parse_log() {
        let backends = backends();
        let table = LogParser::default()
            .parse_str(SAMPLE, &backends, backends.best_available())
            .unwrap();

        assert_eq!(table.channels().len(), 2);
        assert_eq!(table.channels()[0].name, "RPM");
        assert_eq!(table.channels()[1].channel_type, ChannelType::Pressure);
        assert_eq!(table.len(), 3);

        // Timestamps stay as recorded: seconds since midnight
        assert_eq!(table.times()[0], 51346.0);
        assert!((table.times()[2] - 51346.04).abs() < 1e-9);
        assert_eq!(table.column_by_name("RPM").unwrap(), &[5000.0, 5100.0, 5200.0]);

        // Missing sample keeps the row, as NaN
        let map = table.column_by_name("Manifold Pressure").unwrap();
        assert_eq!(map.len(), 3);
        assert!(map[1].is_nan());

        let stats = table.statistics("Manifold Pressure").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 1013.0);
        assert_eq!(stats.max, 1030.0);
        assert_eq!(table.metadata()["Log Number"], "1118");
    }

    #[test]
    fn test_every_tier_yields_identical_table() {
        let backends = backends();
        let tables: Vec<TelemetryTable> = BackendTier::iter()
            .map(|tier| LogParser::default().parse_str(SAMPLE, &backends, tier).unwrap())
            .collect();
        assert!(tables[0].bitwise_eq(&tables[1]));
        assert!(tables[0].bitwise_eq(&tables[2]));
    }

    #[test]
    fn test_short_row_is_rejected() {
        let contents = format!("{}14:15:46.060,5300\n14:15:46.080,5400,1040\n", SAMPLE);
        let backends = backends();
        let err = parser(ShortRowPolicy::Reject)
            .parse_str(&contents, &backends, BackendTier::Columnar)
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::RowShapeMismatch {
                line: 20,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_truncated_final_row_policy() {
        let contents = format!("{}14:15:46.060,5300", SAMPLE);
        let backends = backends();

        let err = parser(ShortRowPolicy::Reject)
            .parse_str(&contents, &backends, BackendTier::RowOriented)
            .unwrap_err();
        assert!(matches!(err, ParseError::RowShapeMismatch { line: 20, .. }));

        let table = parser(ShortRowPolicy::DropTrailing)
            .parse_str(&contents, &backends, BackendTier::RowOriented)
            .unwrap();
        assert_eq!(table.len(), 3);

        // Only the final row is forgiven
        let contents = format!("{}14:15:46.060,5300\n14:15:46.080,5400,1040\n", SAMPLE);
        assert!(parser(ShortRowPolicy::DropTrailing)
            .parse_str(&contents, &backends, BackendTier::RowOriented)
            .is_err());
    }

    #[test]
    fn test_missing_channel_block_is_malformed() {
        let contents = "%DataLog%\nDataLogVersion : 1.1\n14:15:46.000,5000,1013\n";
        let backends = backends();
        let err = LogParser::default()
            .parse_str(contents, &backends, BackendTier::Columnar)
            .unwrap_err();
        assert!(matches!(err, ParseError::MalformedHeader { .. }));
    }

    #[test]
    fn test_parse_file_reports_path_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(&good, SAMPLE).unwrap();

        let backends = backends();
        let stages = std::sync::Mutex::new(Vec::new());
        let table = LogParser::default()
            .parse_file_with_progress(&good, &backends, BackendTier::Parallel, &|stage| {
                stages.lock().unwrap().push(stage)
            })
            .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            stages.into_inner().unwrap(),
            vec![
                LoadStage::ParsingHeader,
                LoadStage::ParsingData,
                LoadStage::ComputingStatistics
            ]
        );

        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "14:15:46.000,1,2\n").unwrap();
        let err = LogParser::default()
            .parse_file(&bad, &backends, BackendTier::Columnar)
            .unwrap_err();
        assert!(err.to_string().contains("bad.csv"));
        assert!(matches!(err.parse_error(), Some(ParseError::MalformedHeader { .. })));
    }

    #[test]
    fn test_empty_and_binary_files() {
        let dir = tempfile::tempdir().unwrap();
        let backends = backends();

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "").unwrap();
        let err = LogParser::default()
            .parse_file(&empty, &backends, BackendTier::Columnar)
            .unwrap_err();
        assert!(matches!(err.parse_error(), Some(ParseError::MalformedHeader { .. })));

        let binary = dir.path().join("log.mlg");
        std::fs::write(&binary, [b'M', b'L', b'V', b'L', b'G', 0xff, 0xfe]).unwrap();
        let err = LogParser::default()
            .parse_file(&binary, &backends, BackendTier::Columnar)
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));

        let missing = LogParser::default()
            .parse_file(&dir.path().join("nope.csv"), &backends, BackendTier::Columnar)
            .unwrap_err();
        assert!(matches!(missing, LoadError::Io { .. }));
    }

    #[test]
    fn test_source_is_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.csv");
        std::fs::write(&path, SAMPLE).unwrap();

        let source = LogSource::open(&path).unwrap();
        assert_eq!(source.path(), path.as_path());

        // A logger truncating the file after open does not affect the read
        std::fs::File::create(&path).unwrap();
        let table = LogParser::default()
            .parse_str(source.contents(), &backends(), BackendTier::Columnar)
            .unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_stage_percentages_increase() {
        let stages = [
            LoadStage::CheckingCache,
            LoadStage::ParsingHeader,
            LoadStage::ParsingData,
            LoadStage::ComputingStatistics,
            LoadStage::SavingCache,
            LoadStage::Complete,
        ];
        assert!(stages.windows(2).all(|w| w[0].percent() < w[1].percent()));
    }
}
