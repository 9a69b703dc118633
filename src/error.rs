//! Error types for log ingestion and log management.
//!
//! Parse errors are structural and always carry the 1-based line they were
//! found on. Load errors add the file being loaded. Cache and backend problems
//! are recovered where they happen and never show up here.

use std::path::PathBuf;

use thiserror::Error;

use crate::state::LogId;

/// Structural problems in a log file's text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The metadata header or channel-definition block is missing or broken
    #[error("malformed header at line {line}: {reason}")]
    MalformedHeader { line: usize, reason: String },

    /// A data row does not carry exactly one value per declared channel
    #[error("row shape mismatch at line {line}: expected {expected} values, found {found}")]
    RowShapeMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("invalid timestamp {value:?} at line {line}")]
    InvalidTimestamp { line: usize, value: String },

    #[error("invalid value {value:?} for channel {channel:?} at line {line}")]
    InvalidValue {
        line: usize,
        channel: String,
        value: String,
    },
}

impl ParseError {
    pub(crate) fn header(line: usize, reason: impl Into<String>) -> Self {
        ParseError::MalformedHeader {
            line,
            reason: reason.into(),
        }
    }

    /// Line the error was detected on
    pub fn line(&self) -> usize {
        match self {
            ParseError::MalformedHeader { line, .. }
            | ParseError::RowShapeMismatch { line, .. }
            | ParseError::InvalidTimestamp { line, .. }
            | ParseError::InvalidValue { line, .. } => *line,
        }
    }
}

/// Failure of a single load attempt.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, source: ParseError) -> Self {
        LoadError::Parse {
            path: path.into(),
            source,
        }
    }

    /// The structural parse error, if that is what failed
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            LoadError::Parse { source, .. } => Some(source),
            LoadError::Io { .. } => None,
        }
    }
}

/// Errors surfaced by [`crate::manager::LogFileManager`] and the synchronizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManagerError {
    #[error("no loaded log with id {0}")]
    NotFound(LogId),

    #[error("deactivating log {0} would leave no active log")]
    LastActiveLog(LogId),

    #[error("time offset must be finite, got {0}")]
    InvalidOffset(f64),

    #[error("channel {0:?} is not present in any active log")]
    UnknownChannelReference(String),
}

/// Problems reading an [`crate::config::EngineConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
