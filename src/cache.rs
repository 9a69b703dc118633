//! On-disk cache of parsed logs.
//!
//! Each entry is a Parquet file holding the timestamp column and one `f32`
//! column per channel, plus a JSON manifest with everything else the table
//! needs (metadata, channel definitions, statistics). Entries are keyed by a
//! fingerprint of the source file, so an edited log never hits a stale entry.
//!
//! Both files are written to a temporary name and renamed into place. The
//! manifest goes last: an entry without a manifest does not exist.

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::UNIX_EPOCH;
use thiserror::Error;

use crate::config::{CacheConfig, CacheWriteMode};
use crate::error::LoadError;
use crate::parsers::{
    BackendSelector, BackendTier, ChannelInfo, ChannelStats, LoadStage, LogParser, TelemetryTable,
};
use crate::state::LoadedLog;

/// Bumped whenever the artifact layout changes
const FORMAT_VERSION: u32 = 1;

const TIME_COLUMN: &str = "time";
const PARQUET_SUFFIX: &str = ".parquet";
const MANIFEST_SUFFIX: &str = ".manifest.json";
const TMP_SUFFIX: &str = ".tmp";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Identity of a source file at the time it was parsed
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Canonical absolute path
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, nanoseconds since the Unix epoch
    pub mtime_ns: u64,
}

impl Fingerprint {
    pub fn of(path: &Path) -> io::Result<Self> {
        let path = fs::canonicalize(path)?;
        let metadata = fs::metadata(&path)?;
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        Ok(Self {
            path,
            size: metadata.len(),
            mtime_ns,
        })
    }

    /// First 16 hex characters of the BLAKE3 hash of `path:size:mtime`
    pub fn digest(&self) -> String {
        let key = format!("{}:{}:{}", self.path.display(), self.size, self.mtime_ns);
        blake3::hash(key.as_bytes()).to_hex().as_str()[..16].to_string()
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "log".to_string())
    }

    /// File name prefix shared by this entry's artifacts
    fn entry_name(&self) -> String {
        format!("{}_{}", self.stem(), self.digest())
    }
}

/// Everything about a cached table except its columns
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub format_version: u32,
    pub fingerprint: Fingerprint,
    pub metadata: BTreeMap<String, String>,
    pub channels: Vec<ChannelInfo>,
    pub stats: Vec<Option<ChannelStats>>,
    pub row_count: usize,
    pub non_monotonic_rows: usize,
}

impl CacheManifest {
    fn for_table(fingerprint: &Fingerprint, table: &TelemetryTable) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            fingerprint: fingerprint.clone(),
            metadata: table.metadata().clone(),
            channels: table.channels().to_vec(),
            stats: table.all_stats().to_vec(),
            row_count: table.len(),
            non_monotonic_rows: table.non_monotonic_rows(),
        }
    }
}

/// Cache failures. These are logged and recovered from, never returned by
/// [`ParseCache::get_or_parse`].
#[derive(Debug, Error)]
pub(crate) enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Parse cache rooted at one directory
pub struct ParseCache {
    directory: Option<PathBuf>,
    write_mode: CacheWriteMode,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl ParseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let directory = if config.enabled {
            let dir = config.resolved_directory();
            if dir.is_none() {
                tracing::warn!("No cache directory available; parse cache disabled");
            }
            dir
        } else {
            None
        };

        if let Some(dir) = &directory {
            tracing::debug!("Parse cache directory: {}", dir.display());
        }

        Self {
            directory,
            write_mode: config.write_mode,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// A cache that never hits and never writes
    pub fn disabled() -> Self {
        Self {
            directory: None,
            write_mode: CacheWriteMode::Blocking,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.directory.is_some()
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Load `path` from the cache, or parse it and store the result.
    ///
    /// Only source file problems are errors. A missing, stale or corrupt
    /// entry falls back to parsing, and a failed write only loses the entry.
    pub fn get_or_parse(
        &self,
        path: &Path,
        parser: &LogParser,
        backends: &BackendSelector,
        tier: BackendTier,
        progress: &dyn Fn(LoadStage),
    ) -> Result<LoadedLog, LoadError> {
        progress(LoadStage::CheckingCache);
        let fingerprint = Fingerprint::of(path).map_err(|e| LoadError::io(path, e))?;

        if let Some(dir) = &self.directory {
            match self.lookup(dir, &fingerprint, progress) {
                Ok(Some(table)) => {
                    tracing::info!(
                        "Loaded {} from cache: {} channels, {} data points",
                        path.display(),
                        table.channels().len(),
                        table.len()
                    );
                    progress(LoadStage::Complete);
                    return Ok(LoadedLog {
                        path: path.to_path_buf(),
                        fingerprint,
                        table: Arc::new(table),
                        from_cache: true,
                    });
                }
                Ok(None) => {
                    tracing::debug!("Cache miss for {}", path.display());
                }
                Err(e) => {
                    tracing::warn!("Ignoring cache entry for {}: {}", path.display(), e);
                }
            }
        }

        let table = Arc::new(parser.parse_file_with_progress(path, backends, tier, progress)?);

        if let Some(dir) = &self.directory {
            progress(LoadStage::SavingCache);
            self.store(dir, &fingerprint, &table);
        }

        progress(LoadStage::Complete);
        Ok(LoadedLog {
            path: path.to_path_buf(),
            fingerprint,
            table,
            from_cache: false,
        })
    }

    /// Block until every background write has finished
    pub fn wait_for_pending_writes(&self) {
        let handles: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("Cache writer thread panicked");
            }
        }
    }

    /// Remove every cache artifact. Returns the number of files removed.
    pub fn clear(&self) -> io::Result<usize> {
        self.wait_for_pending_writes();

        let Some(dir) = &self.directory else {
            return Ok(0);
        };
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            let is_artifact = name.is_some_and(|n| {
                n.ends_with(PARQUET_SUFFIX) || n.ends_with(MANIFEST_SUFFIX) || n.ends_with(TMP_SUFFIX)
            });
            if is_artifact && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        tracing::info!("Cleared {} cache files from {}", removed, dir.display());
        Ok(removed)
    }

    fn lookup(
        &self,
        dir: &Path,
        fingerprint: &Fingerprint,
        progress: &dyn Fn(LoadStage),
    ) -> Result<Option<TelemetryTable>, CacheError> {
        let name = fingerprint.entry_name();
        let manifest_path = dir.join(format!("{}{}", name, MANIFEST_SUFFIX));
        if !manifest_path.exists() {
            return Ok(None);
        }

        let manifest: CacheManifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;
        if manifest.format_version != FORMAT_VERSION {
            tracing::debug!(
                "Cache entry {} has format version {}, expected {}",
                name,
                manifest.format_version,
                FORMAT_VERSION
            );
            return Ok(None);
        }
        if manifest.fingerprint != *fingerprint {
            return Ok(None);
        }

        progress(LoadStage::LoadingCache);
        let (times, columns) =
            read_columns(&dir.join(format!("{}{}", name, PARQUET_SUFFIX)), &manifest)?;

        TelemetryTable::from_parts(
            manifest.metadata,
            manifest.channels,
            times,
            columns,
            manifest.stats,
        )
        .ok_or_else(|| CacheError::Corrupt(format!("{} does not match its manifest", name)))
        .map(Some)
    }

    fn store(&self, dir: &Path, fingerprint: &Fingerprint, table: &Arc<TelemetryTable>) {
        match self.write_mode {
            CacheWriteMode::Blocking => {
                if let Err(e) = write_entry(dir, fingerprint, table) {
                    tracing::warn!("Failed to write cache entry: {}", e);
                }
            }
            CacheWriteMode::Background => {
                let dir = dir.to_path_buf();
                let fingerprint = fingerprint.clone();
                let table = Arc::clone(table);

                let spawned = std::thread::Builder::new()
                    .name("cache-writer".to_string())
                    .spawn(move || {
                        if let Err(e) = write_entry(&dir, &fingerprint, &table) {
                            tracing::warn!("Failed to write cache entry: {}", e);
                        }
                    });

                match spawned {
                    Ok(handle) => {
                        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                        pending.retain(|h| !h.is_finished());
                        pending.push(handle);
                    }
                    Err(e) => tracing::warn!("Failed to start cache writer: {}", e),
                }
            }
        }
    }
}

impl Drop for ParseCache {
    fn drop(&mut self) {
        self.wait_for_pending_writes();
    }
}

fn table_schema(channels: &[ChannelInfo]) -> SchemaRef {
    let mut fields = Vec::with_capacity(channels.len() + 1);
    fields.push(Field::new(TIME_COLUMN, DataType::Float64, false));
    fields.extend(
        channels
            .iter()
            .map(|c| Field::new(c.name.as_str(), DataType::Float32, false)),
    );
    Arc::new(Schema::new(fields))
}

fn write_entry(
    dir: &Path,
    fingerprint: &Fingerprint,
    table: &TelemetryTable,
) -> Result<(), CacheError> {
    fs::create_dir_all(dir)?;
    let name = fingerprint.entry_name();

    let schema = table_schema(table.channels());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.channels().len() + 1);
    arrays.push(Arc::new(Float64Array::from(table.times().to_vec())));
    for index in 0..table.channels().len() {
        let column = table.column(index).unwrap_or_default();
        arrays.push(Arc::new(Float32Array::from(column.to_vec())));
    }
    let batch = RecordBatch::try_new(Arc::clone(&schema), arrays)?;

    let parquet_path = dir.join(format!("{}{}", name, PARQUET_SUFFIX));
    write_atomic(&parquet_path, |file| {
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.into_inner()?.sync_all()?;
        Ok(())
    })?;

    let manifest = CacheManifest::for_table(fingerprint, table);
    let json = serde_json::to_vec_pretty(&manifest)?;
    let manifest_path = dir.join(format!("{}{}", name, MANIFEST_SUFFIX));
    write_atomic(&manifest_path, |mut file| {
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(())
    })?;

    tracing::debug!("Wrote cache entry {}", manifest_path.display());

    match prune_stale(dir, fingerprint) {
        Ok(0) => {}
        Ok(removed) => tracing::debug!("Pruned {} stale cache files", removed),
        Err(e) => tracing::warn!("Failed to prune stale cache entries: {}", e),
    }
    Ok(())
}

/// Remove entries for the same source file under an older fingerprint.
/// Ownership is read from each manifest, so a same-named log from another
/// directory keeps its entry. Returns the number of files removed.
fn prune_stale(dir: &Path, fingerprint: &Fingerprint) -> Result<usize, CacheError> {
    let current = fingerprint.entry_name();
    let prefix = format!("{}_", fingerprint.stem());
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(entry_name) = name.strip_suffix(MANIFEST_SUFFIX) else {
            continue;
        };
        if entry_name == current || !entry_name.starts_with(&prefix) {
            continue;
        }

        let Ok(manifest) = fs::read(&path)
            .map_err(CacheError::from)
            .and_then(|bytes| serde_json::from_slice::<CacheManifest>(&bytes).map_err(CacheError::from))
        else {
            continue;
        };
        if manifest.fingerprint.path != fingerprint.path {
            continue;
        }

        // Manifest first: without it the entry no longer exists
        fs::remove_file(&path)?;
        removed += 1;
        let parquet = dir.join(format!("{}{}", entry_name, PARQUET_SUFFIX));
        if parquet.exists() {
            fs::remove_file(&parquet)?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// Write through a process-unique temp file, then rename over `path`
fn write_atomic(
    path: &Path,
    write: impl FnOnce(File) -> Result<(), CacheError>,
) -> Result<(), CacheError> {
    let tmp = tmp_path_for(path);
    let result = File::create(&tmp)
        .map_err(CacheError::from)
        .and_then(write)
        .and_then(|()| fs::rename(&tmp, path).map_err(CacheError::from));

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!("{}.{}.{}{}", name, std::process::id(), seq, TMP_SUFFIX))
}

fn read_columns(
    path: &Path,
    manifest: &CacheManifest,
) -> Result<(Vec<f64>, Vec<Vec<f32>>), CacheError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let expected = table_schema(&manifest.channels);
    let found = builder.schema();
    let layout_matches = found.fields().len() == expected.fields().len()
        && found
            .fields()
            .iter()
            .zip(expected.fields().iter())
            .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type());
    if !layout_matches {
        return Err(CacheError::Corrupt(format!(
            "{} has an unexpected schema",
            path.display()
        )));
    }

    let mut times = Vec::with_capacity(manifest.row_count);
    let mut columns: Vec<Vec<f32>> = manifest
        .channels
        .iter()
        .map(|_| Vec::with_capacity(manifest.row_count))
        .collect();

    for batch in builder.build()? {
        let batch = batch?;
        times.extend_from_slice(get_array::<Float64Array>(&batch, 0)?.values());
        for (index, column) in columns.iter_mut().enumerate() {
            column.extend_from_slice(get_array::<Float32Array>(&batch, index + 1)?.values());
        }
    }

    if times.len() != manifest.row_count {
        return Err(CacheError::Corrupt(format!(
            "{} has {} rows, manifest says {}",
            path.display(),
            times.len(),
            manifest.row_count
        )));
    }

    Ok((times, columns))
}

fn get_array<T: Array + 'static>(batch: &RecordBatch, index: usize) -> Result<&T, CacheError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| CacheError::Corrupt(format!("column {} has unexpected type", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ParserConfig};

    const LOG: &str = "%DataLog%
DataLogVersion : 1.1
Software : Test
Channel : RPM
ID : 384
Type : EngineSpeed
DisplayMaxMin : 20000,0
Channel : Coolant Temp
ID : 16
Type : Temperature
Log : 20250718 02:15:46
10:00:00.000,1000,80.5
10:00:00.100,1500.25,
10:00:00.200,2000,81.125
10:00:00.150,2500,82
";

    struct Fixture {
        log: PathBuf,
        cache: ParseCache,
        parser: LogParser,
        backends: BackendSelector,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(write_mode: CacheWriteMode) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("session.csv");
            fs::write(&log, LOG).unwrap();
            let cache = ParseCache::new(&CacheConfig {
                enabled: true,
                directory: Some(dir.path().join("cache")),
                write_mode,
            });
            Self {
                log,
                cache,
                parser: LogParser::new(ParserConfig::default()),
                backends: BackendSelector::probe(&BackendConfig::default()),
                _dir: dir,
            }
        }

        fn load(&self) -> LoadedLog {
            self.cache
                .get_or_parse(
                    &self.log,
                    &self.parser,
                    &self.backends,
                    BackendTier::Columnar,
                    &|_| {},
                )
                .unwrap()
        }

        fn artifact(&self, suffix: &str) -> PathBuf {
            let fingerprint = Fingerprint::of(&self.log).unwrap();
            self.cache
                .directory()
                .unwrap()
                .join(format!("{}{}", fingerprint.entry_name(), suffix))
        }
    }

    #[test]
    fn test_fingerprint_digest() {
        let fingerprint = Fingerprint {
            path: PathBuf::from("/logs/run.csv"),
            size: 10,
            mtime_ns: 20,
        };
        let digest = fingerprint.digest();
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, fingerprint.clone().digest());

        let touched = Fingerprint {
            mtime_ns: 21,
            ..fingerprint.clone()
        };
        assert_ne!(digest, touched.digest());
        assert!(fingerprint.entry_name().starts_with("run_"));
    }

    #[test]
    fn test_cache_hit_is_identical_to_parse() {
        let fixture = Fixture::new(CacheWriteMode::Blocking);
        let parsed = fixture.load();
        assert!(!parsed.from_cache);
        assert!(fixture.artifact(PARQUET_SUFFIX).exists());
        assert!(fixture.artifact(MANIFEST_SUFFIX).exists());

        let cached = fixture.load();
        assert!(cached.from_cache);
        assert_eq!(cached.fingerprint, parsed.fingerprint);
        assert!(cached.table.bitwise_eq(&parsed.table));

        // Statistics survive the manifest bit for bit
        let stats = cached.table.statistics("RPM").unwrap();
        assert_eq!(stats, parsed.table.statistics("RPM").unwrap());
        assert_eq!(stats.mean, 1750.0625);
        assert_eq!(cached.table.non_monotonic_rows(), 1);
        assert!(cached.table.column_by_name("Coolant Temp").unwrap()[1].is_nan());
    }

    #[test]
    fn test_background_write_then_hit() {
        let fixture = Fixture::new(CacheWriteMode::Background);
        assert!(!fixture.load().from_cache);
        fixture.cache.wait_for_pending_writes();
        assert!(fixture.load().from_cache);
    }

    #[test]
    fn test_changed_source_misses() {
        let fixture = Fixture::new(CacheWriteMode::Blocking);
        fixture.load();
        let stale = fixture.artifact(MANIFEST_SUFFIX);

        let longer = format!("{}10:00:00.300,3000,83\n", LOG);
        fs::write(&fixture.log, longer).unwrap();

        let reloaded = fixture.load();
        assert!(!reloaded.from_cache);
        assert_eq!(reloaded.table.len(), 5);
        assert!(fixture.artifact(MANIFEST_SUFFIX).exists());

        // The entry for the old contents was replaced, not kept alongside
        assert!(!stale.exists());
        assert_eq!(fs::read_dir(fixture.cache.directory().unwrap()).unwrap().count(), 2);
        assert!(fixture.load().from_cache);
    }

    #[test]
    fn test_fingerprint_mismatch_in_manifest_misses() {
        let fixture = Fixture::new(CacheWriteMode::Blocking);
        fixture.load();

        let manifest_path = fixture.artifact(MANIFEST_SUFFIX);
        let mut manifest: CacheManifest =
            serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
        manifest.fingerprint.size += 1;
        fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        let reloaded = fixture.load();
        assert!(!reloaded.from_cache);
        assert_eq!(reloaded.table.len(), 4);

        // The reparse committed a fresh manifest under the same name
        let rewritten: CacheManifest =
            serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
        assert_eq!(rewritten.fingerprint, reloaded.fingerprint);
        assert!(fixture.load().from_cache);
    }

    #[test]
    fn test_prune_keeps_same_named_logs_elsewhere() {
        let fixture = Fixture::new(CacheWriteMode::Blocking);
        fixture.load();

        let other_dir = fixture._dir.path().join("other");
        fs::create_dir(&other_dir).unwrap();
        let other = other_dir.join("session.csv");
        fs::write(&other, LOG).unwrap();
        let load_other = || {
            fixture
                .cache
                .get_or_parse(&other, &fixture.parser, &fixture.backends, BackendTier::Columnar, &|_| {})
                .unwrap()
        };
        assert!(!load_other().from_cache);

        fs::write(&fixture.log, format!("{}10:00:00.300,3000,83\n", LOG)).unwrap();
        assert!(!fixture.load().from_cache);

        assert_eq!(fs::read_dir(fixture.cache.directory().unwrap()).unwrap().count(), 4);
        assert!(load_other().from_cache);
    }

    #[test]
    fn test_corrupt_entries_are_reparsed() {
        let fixture = Fixture::new(CacheWriteMode::Blocking);
        fixture.load();

        fs::write(fixture.artifact(MANIFEST_SUFFIX), "{ not json").unwrap();
        let reloaded = fixture.load();
        assert!(!reloaded.from_cache);
        assert_eq!(reloaded.table.len(), 4);

        // The reparse rewrote the entry
        assert!(fixture.load().from_cache);

        fs::write(fixture.artifact(PARQUET_SUFFIX), b"PAR1 truncated").unwrap();
        assert!(!fixture.load().from_cache);
    }

    #[test]
    fn test_disabled_cache_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.csv");
        fs::write(&log, LOG).unwrap();

        let cache = ParseCache::disabled();
        let parser = LogParser::default();
        let backends = BackendSelector::probe(&BackendConfig::default());
        for _ in 0..2 {
            let loaded = cache
                .get_or_parse(&log, &parser, &backends, BackendTier::RowOriented, &|_| {})
                .unwrap();
            assert!(!loaded.from_cache);
        }
        assert!(!cache.is_enabled());
        assert_eq!(cache.clear().unwrap(), 0);
    }

    #[test]
    fn test_parse_errors_are_not_cached() {
        let fixture = Fixture::new(CacheWriteMode::Blocking);
        fs::write(&fixture.log, "Channel : RPM\n").unwrap();
        let err = fixture
            .cache
            .get_or_parse(
                &fixture.log,
                &fixture.parser,
                &fixture.backends,
                BackendTier::Columnar,
                &|_| {},
            )
            .unwrap_err();
        assert!(err.parse_error().is_some());
        assert!(!fixture.artifact(MANIFEST_SUFFIX).exists());
    }

    #[test]
    fn test_clear_removes_artifacts() {
        let fixture = Fixture::new(CacheWriteMode::Blocking);
        fixture.load();
        assert_eq!(fixture.cache.clear().unwrap(), 2);
        assert!(!fixture.artifact(MANIFEST_SUFFIX).exists());
        assert!(!fixture.load().from_cache);
    }

    #[test]
    fn test_tmp_names_are_unique() {
        let path = Path::new("/cache/run_0123.parquet");
        let a = tmp_path_for(path);
        let b = tmp_path_for(path);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with(TMP_SUFFIX));
        assert_eq!(a.parent(), path.parent());
    }
}
