//! tracklog - telemetry log ingestion, caching and multi-log synchronization
//!
//! This library parses delimited telemetry logs into columnar tables, caches
//! parsed tables on disk, and manages several loaded logs for comparison.
//!
//! ## Module Structure
//!
//! - [`parsers`] - Header/channel catalog, compute backends and the log parser
//! - [`cache`] - Fingerprinted Parquet cache of parsed tables
//! - [`state`] - Loaded log types and identifiers
//! - [`manager`] - Ordered collection of loaded logs with a single Main log
//! - [`sync`] - Time alignment across loaded logs
//! - [`loader`] - Cancellable background loading with progress events
//! - [`session`] - Snapshot and restore of a manager's logs
//! - [`config`] - Engine configuration
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod manager;
pub mod parsers;
pub mod session;
pub mod state;
pub mod sync;
