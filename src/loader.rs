//! Background loading.
//!
//! Loads run on a long-lived worker pool and report back through a single
//! channel that the owner drains with [`BackgroundLoader::poll`] or
//! [`BackgroundLoader::wait_next`]. Every submission produces exactly one
//! [`LoadEvent::Completed`], cancelled or not.

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::ParseCache;
use crate::config::EngineConfig;
use crate::error::LoadError;
use crate::parsers::{BackendSelector, LoadStage, LogParser};
use crate::state::LogFile;

/// Identifies one submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadId(u64);

/// Progress of one load
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadProgress {
    pub percent: u8,
    pub stage: LoadStage,
}

impl From<LoadStage> for LoadProgress {
    fn from(stage: LoadStage) -> Self {
        Self {
            percent: stage.percent(),
            stage,
        }
    }
}

/// How a load ended
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(LogFile),
    Failed(LoadError),
    /// The handle was cancelled; the result, if any, was discarded
    Cancelled,
}

#[derive(Debug)]
pub enum LoadEvent {
    Progress {
        id: LoadId,
        progress: LoadProgress,
    },
    Completed {
        id: LoadId,
        path: PathBuf,
        outcome: LoadOutcome,
    },
}

impl LoadEvent {
    pub fn id(&self) -> LoadId {
        match self {
            LoadEvent::Progress { id, .. } | LoadEvent::Completed { id, .. } => *id,
        }
    }
}

/// Handle to a submitted load
#[derive(Clone, Debug)]
pub struct LoadHandle {
    id: LoadId,
    cancelled: Arc<AtomicBool>,
}

impl LoadHandle {
    pub fn id(&self) -> LoadId {
        self.id
    }

    /// Discard this load's result. Its completion event reports `Cancelled`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Runs cache lookups and parses off the caller's thread
pub struct BackgroundLoader {
    pool: ThreadPool,
    cache: Arc<ParseCache>,
    backends: Arc<BackendSelector>,
    parser: Arc<LogParser>,
    sender: Sender<LoadEvent>,
    receiver: Receiver<LoadEvent>,
    in_flight: HashMap<LoadId, LoadHandle>,
    next_id: u64,
}

impl BackgroundLoader {
    pub fn new(
        worker_threads: Option<usize>,
        cache: Arc<ParseCache>,
        backends: Arc<BackendSelector>,
        parser: Arc<LogParser>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads.unwrap_or(0))
            .thread_name(|i| format!("loader-{}", i))
            .build()?;
        let (sender, receiver) = channel();

        Ok(Self {
            pool,
            cache,
            backends,
            parser,
            sender,
            receiver,
            in_flight: HashMap::new(),
            next_id: 0,
        })
    }

    /// Build the cache, backends and parser described by `config`
    pub fn from_config(config: &EngineConfig) -> Result<Self, ThreadPoolBuildError> {
        Self::new(
            config.loader.worker_threads,
            Arc::new(ParseCache::new(&config.cache)),
            Arc::new(BackendSelector::probe(&config.backend)),
            Arc::new(LogParser::new(config.parser.clone())),
        )
    }

    pub fn cache(&self) -> &Arc<ParseCache> {
        &self.cache
    }

    pub fn backends(&self) -> &Arc<BackendSelector> {
        &self.backends
    }

    pub fn parser(&self) -> &Arc<LogParser> {
        &self.parser
    }

    /// Start loading `path` in the background
    pub fn submit(&mut self, path: impl AsRef<Path>) -> LoadHandle {
        let handle = LoadHandle {
            id: LoadId(self.next_id),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        self.next_id += 1;

        let path = path.as_ref().to_path_buf();
        let id = handle.id;
        let cancelled = Arc::clone(&handle.cancelled);
        let cache = Arc::clone(&self.cache);
        let backends = Arc::clone(&self.backends);
        let parser = Arc::clone(&self.parser);
        let sender = self.sender.clone();

        tracing::debug!("Queued load {:?} for {}", id, path.display());

        self.pool.spawn(move || {
            let outcome = if cancelled.load(Ordering::Relaxed) {
                LoadOutcome::Cancelled
            } else {
                let report = |stage: LoadStage| {
                    if !cancelled.load(Ordering::Relaxed) {
                        let _ = sender.send(LoadEvent::Progress {
                            id,
                            progress: stage.into(),
                        });
                    }
                };
                let result =
                    cache.get_or_parse(&path, &parser, &backends, backends.best_available(), &report);

                // A cancel that lands during the parse still wins
                if cancelled.load(Ordering::Relaxed) {
                    LoadOutcome::Cancelled
                } else {
                    match result {
                        Ok(loaded) => LoadOutcome::Loaded(LogFile::from(loaded)),
                        Err(e) => {
                            tracing::warn!("{}", e);
                            LoadOutcome::Failed(e)
                        }
                    }
                }
            };

            if matches!(outcome, LoadOutcome::Cancelled) {
                tracing::info!("Load of {} cancelled", path.display());
            }

            let _ = sender.send(LoadEvent::Completed { id, path, outcome });
        });

        self.in_flight.insert(id, handle.clone());
        handle
    }

    /// Cancel a load by id. Returns false if its completion was already
    /// received; otherwise the completion will report `Cancelled`.
    pub fn cancel(&self, id: LoadId) -> bool {
        match self.in_flight.get(&id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of submissions whose completion has not been received
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Drain every event that has arrived, without blocking
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        let events: Vec<LoadEvent> = self.receiver.try_iter().collect();
        events
            .into_iter()
            .filter_map(|event| self.track(event))
            .collect()
    }

    /// Wait up to `timeout` for the next event
    pub fn wait_next(&mut self, timeout: Duration) -> Option<LoadEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(event) = self.track(event) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    /// Apply cancellation to an event the worker sent before it saw the
    /// cancel. Progress of a cancelled load is dropped and its result is
    /// replaced with `Cancelled`.
    fn track(&mut self, event: LoadEvent) -> Option<LoadEvent> {
        match event {
            LoadEvent::Progress { id, .. } => {
                let cancelled = self.in_flight.get(&id).is_some_and(LoadHandle::is_cancelled);
                (!cancelled).then_some(event)
            }
            LoadEvent::Completed { id, path, outcome } => {
                let cancelled = self
                    .in_flight
                    .remove(&id)
                    .is_some_and(|h| h.is_cancelled());
                let outcome = match outcome {
                    LoadOutcome::Loaded(_) | LoadOutcome::Failed(_) if cancelled => {
                        tracing::info!("Discarding result of cancelled load {}", path.display());
                        LoadOutcome::Cancelled
                    }
                    outcome => outcome,
                };
                Some(LoadEvent::Completed { id, path, outcome })
            }
        }
    }
}
