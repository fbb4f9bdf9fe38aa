// src/repository/sync.rs

//! Synchronizing and loading a set of repositories
//!
//! [`RepoSynchronizer::synchronize`] turns enabled repository
//! configurations into a loaded [`IndexPool`]. Per repository:
//!
//! 1. cache check: usable local metadata goes straight to the loader
//! 2. sync check: expired caches ask upstream whether anything changed
//! 3. download: everything still unresolved is downloaded
//! 4. key retry: repositories that failed signature verification import
//!    their configured keys and run through 1-3 once more
//!
//! Network work of one pass runs as a batch on a bounded worker pool.
//! A single loader thread owns the index pool and builds each repository
//! as soon as it is handed over, so cache hits load while downloads for
//! other repositories are still running.

use crate::config::{RepositoryConfig, SyncStrategy};
use crate::error::{Error, ErrorKind, Result};
use crate::index::IndexPool;
use crate::repository::downloader::SyncContext;
use crate::repository::loader::{self, LoadJob};
use crate::repository::lock::CacheLock;
use crate::repository::repo::Repo;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Lets a caller call off a synchronization before it starts
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress of one repository through a synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NotLoaded,
    Validating,
    CacheHit,
    Downloading,
    Loaded,
    Failed,
}

/// Which run through the passes a repository is on
///
/// `AfterKeyImport` is terminal: a repository failing again is not
/// offered another key import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    AfterKeyImport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    CacheCheck,
    SyncCheck,
    Download,
    KeyImport,
    Load,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CacheCheck => "cache check",
            Self::SyncCheck => "sync check",
            Self::Download => "metadata download",
            Self::KeyImport => "key import",
            Self::Load => "index load",
        })
    }
}

/// Why a repository was dropped from the result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Signature,
    KeyImport,
    Transport,
    CorruptCache,
    InvalidMetadata,
    Configuration,
    Filesystem,
    Load,
}

impl SkipReason {
    pub fn classify(stage: FailureStage, error: &Error) -> Self {
        match (stage, error.kind()) {
            (_, ErrorKind::Signature) => Self::Signature,
            (_, ErrorKind::KeyImport) | (FailureStage::KeyImport, _) => Self::KeyImport,
            (_, ErrorKind::Configuration) => Self::Configuration,
            (FailureStage::Load, _) => Self::Load,
            (_, ErrorKind::Transport) | (_, ErrorKind::Other) => Self::Transport,
            (_, ErrorKind::CacheCorruption) => Self::CorruptCache,
            (_, ErrorKind::Parse) => Self::InvalidMetadata,
            (_, ErrorKind::Filesystem) => Self::Filesystem,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Signature => "signature failure",
            Self::KeyImport => "key import failure",
            Self::Transport => "transport failure",
            Self::CorruptCache => "corrupt cache",
            Self::InvalidMetadata => "invalid metadata",
            Self::Configuration => "configuration error",
            Self::Filesystem => "filesystem error",
            Self::Load => "index load failure",
        })
    }
}

#[derive(Debug)]
pub struct RepoFailure {
    pub repo_id: String,
    pub stage: FailureStage,
    pub reason: SkipReason,
    pub error: Error,
}

impl RepoFailure {
    pub fn new(repo_id: &str, stage: FailureStage, error: Error) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            stage,
            reason: SkipReason::classify(stage, &error),
            error,
        }
    }
}

impl fmt::Display for RepoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repository \"{}\" failed during {} ({}): {}",
            self.repo_id, self.stage, self.reason, self.error
        )
    }
}

/// How a loaded repository's metadata was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    CacheHit,
    InSync,
    Downloaded,
}

#[derive(Debug)]
pub enum RepoOutcome {
    Loaded {
        repo_id: String,
        resolution: Resolution,
        attempt: Attempt,
    },
    /// Failed, but the repository tolerates unavailability
    Skipped(RepoFailure),
    Failed(RepoFailure),
    /// Not processed because another repository aborted the run
    Abandoned { repo_id: String },
}

impl RepoOutcome {
    pub fn repo_id(&self) -> &str {
        match self {
            Self::Loaded { repo_id, .. } | Self::Abandoned { repo_id } => repo_id,
            Self::Skipped(failure) | Self::Failed(failure) => &failure.repo_id,
        }
    }
}

/// Result of a synchronization: per-repository outcomes and the index
#[derive(Debug)]
pub struct SyncReport {
    /// In configuration order
    pub outcomes: Vec<RepoOutcome>,
    pub index: IndexPool,
    fatal_repo: Option<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.fatal_repo.is_none()
    }

    /// The failure that aborted the run
    pub fn fatal(&self) -> Option<&RepoFailure> {
        let id = self.fatal_repo.as_deref()?;
        self.outcomes.iter().find_map(|o| match o {
            RepoOutcome::Failed(failure) if failure.repo_id == id => Some(failure),
            _ => None,
        })
    }

    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|o| match o {
            RepoOutcome::Loaded { repo_id, .. } => Some(repo_id.as_str()),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &RepoFailure> {
        self.outcomes.iter().filter_map(|o| match o {
            RepoOutcome::Skipped(failure) => Some(failure),
            _ => None,
        })
    }

    /// The index, or the aborting repository's error
    pub fn into_result(self) -> Result<IndexPool> {
        let Some(id) = self.fatal_repo else {
            return Ok(self.index);
        };
        let failure = self.outcomes.into_iter().find_map(|o| match o {
            RepoOutcome::Failed(failure) if failure.repo_id == id => Some(failure),
            _ => None,
        });
        Err(match failure {
            Some(failure) => {
                let message = format!("Repository \"{}\" failed during {}", id, failure.stage);
                failure.error.in_repo(&id, message)
            }
            None => Error::Configuration(format!("Repository \"{id}\" failed")),
        })
    }
}

enum LoaderMessage {
    Load(LoadJob),
    Finished,
}

type LoadResult = (String, Result<()>);

/// Start the loader thread
///
/// The thread owns `pool` until it sees `Finished`, then returns it
/// through the join handle. Load errors go back on `results`.
fn spawn_loader(
    mut pool: IndexPool,
    jobs: flume::Receiver<LoaderMessage>,
    results: flume::Sender<LoadResult>,
) -> Result<JoinHandle<IndexPool>> {
    thread::Builder::new()
        .name("reposync-loader".to_string())
        .spawn(move || {
            while let Ok(message) = jobs.recv() {
                let job = match message {
                    LoaderMessage::Load(job) => job,
                    LoaderMessage::Finished => break,
                };
                let outcome = loader::load_repo(&job).map(|index| pool.insert(index));
                if let Err(e) = &outcome {
                    warn!("Cannot load repository {}: {}", job.repo_id, e);
                }
                let _ = results.send((job.repo_id, outcome));
            }
            pool
        })
        .map_err(|e| Error::Init(format!("Cannot start loader thread: {e}")))
}

/// Wait for the loader, forwarding a panic as an error
fn join_loader(loader: JoinHandle<IndexPool>) -> Result<IndexPool> {
    loader.join().map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Index loader thread panicked: {}", message);
        Error::LoaderPanicked(message)
    })
}

/// Expired caches are still valid outside the normal strategy
fn cache_valid(repo: &mut Repo, strategy: SyncStrategy) -> bool {
    match repo.read_metadata_cache() {
        Ok(()) => !repo.is_expired() || strategy != SyncStrategy::Normal,
        Err(e) => {
            debug!("No usable cache for {}: {}", repo.id(), e);
            false
        }
    }
}

struct Pipeline {
    repo: Repo,
    state: SyncState,
    attempt: Attempt,
    resolution: Option<Resolution>,
    /// Signature failure waiting for the key retry pass
    pending_keys: Option<(FailureStage, Error)>,
    outcome: Option<RepoOutcome>,
}

impl Pipeline {
    fn is_active(&self, attempt: Attempt, state: SyncState) -> bool {
        self.attempt == attempt && self.state == state && self.outcome.is_none()
    }
}

/// State of one synchronization run
struct Run<'a> {
    context: &'a SyncContext,
    pipelines: Vec<Pipeline>,
    jobs: flume::Sender<LoaderMessage>,
    results: flume::Receiver<LoadResult>,
    workers: rayon::ThreadPool,
    fatal_repo: Option<String>,
}

impl Run<'_> {
    fn aborted(&self) -> bool {
        self.fatal_repo.is_some()
    }

    fn execute(&mut self) {
        for attempt in [Attempt::First, Attempt::AfterKeyImport] {
            self.cache_check_pass(attempt);
            self.drain_results();
            if self.aborted() {
                return;
            }

            self.sync_check_pass(attempt);
            self.drain_results();
            if self.aborted() {
                return;
            }

            self.download_pass(attempt);
            self.drain_results();
            if self.aborted() {
                return;
            }

            if attempt == Attempt::First {
                self.key_retry_pass();
                if self.aborted() {
                    return;
                }
            }
        }
    }

    fn fail(&mut self, i: usize, stage: FailureStage, error: Error) {
        let import_keys = self.context.main.import_keys;
        let pipeline = &mut self.pipelines[i];
        pipeline.state = SyncState::Failed;

        if matches!(stage, FailureStage::SyncCheck | FailureStage::Download)
            && error.is_signature()
            && pipeline.attempt == Attempt::First
            && import_keys
        {
            info!(
                "Signature check failed for {}, will retry after importing keys",
                pipeline.repo.id()
            );
            pipeline.pending_keys = Some((stage, error));
            return;
        }

        let failure = RepoFailure::new(pipeline.repo.id(), stage, error);
        if pipeline.repo.config().skip_if_unavailable {
            warn!("Skipping unavailable {}", failure);
            pipeline.outcome = Some(RepoOutcome::Skipped(failure));
        } else {
            error!("{}", failure);
            if self.fatal_repo.is_none() {
                self.fatal_repo = Some(failure.repo_id.clone());
            }
            pipeline.outcome = Some(RepoOutcome::Failed(failure));
        }
    }

    fn enqueue(&mut self, i: usize, resolution: Resolution) {
        if self.aborted() {
            // Left without an outcome, settled as abandoned
            debug!("Not loading {} after an aborting failure", self.pipelines[i].repo.id());
            return;
        }
        let job = match self.pipelines[i].repo.load_job() {
            Ok(job) => job,
            Err(e) => return self.fail(i, FailureStage::Load, e),
        };
        if self.jobs.send(LoaderMessage::Load(job)).is_err() {
            return self.fail(
                i,
                FailureStage::Load,
                Error::LoaderPanicked("loader thread stopped accepting jobs".to_string()),
            );
        }

        let pipeline = &mut self.pipelines[i];
        debug!("Queued {} for loading ({:?})", pipeline.repo.id(), resolution);
        pipeline.resolution = Some(resolution);
        pipeline.state = match resolution {
            Resolution::CacheHit => SyncState::CacheHit,
            Resolution::InSync | Resolution::Downloaded => SyncState::Downloading,
        };
    }

    /// Load the local cache, cloning the system cache once if needed
    fn cache_usable(&mut self, i: usize) -> bool {
        let strategy = self.context.main.strategy();
        let repo = &mut self.pipelines[i].repo;

        if cache_valid(repo, strategy) {
            return true;
        }
        match repo.clone_root_metadata() {
            Ok(true) => cache_valid(repo, strategy),
            Ok(false) => false,
            Err(e) => {
                warn!("Cannot use the system cache for {}: {}", repo.id(), e);
                false
            }
        }
    }

    fn cache_check_pass(&mut self, attempt: Attempt) {
        let cache_only = self.context.main.strategy() == SyncStrategy::CacheOnly;

        for i in 0..self.pipelines.len() {
            if self.aborted() {
                return;
            }
            if !self.pipelines[i].is_active(attempt, SyncState::NotLoaded) {
                continue;
            }
            self.pipelines[i].state = SyncState::Validating;

            if self.cache_usable(i) {
                self.enqueue(i, Resolution::CacheHit);
            } else if cache_only {
                let id = self.pipelines[i].repo.id().to_string();
                self.fail(
                    i,
                    FailureStage::CacheCheck,
                    Error::Configuration(format!(
                        "Cache-only enabled but no cache for repository \"{id}\""
                    )),
                );
            }
        }
    }

    fn sync_check_pass(&mut self, attempt: Attempt) {
        let candidates: Vec<usize> = (0..self.pipelines.len())
            .filter(|&i| {
                let p = &self.pipelines[i];
                p.is_active(attempt, SyncState::Validating) && p.repo.local().is_some()
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        let pipelines = &self.pipelines;
        let checks: Vec<(usize, Result<bool>)> = self.workers.install(|| {
            candidates
                .par_iter()
                .map(|&i| (i, pipelines[i].repo.downloader().is_in_sync()))
                .collect()
        });

        for (i, check) in checks {
            match check {
                Ok(true) => {
                    info!("Metadata of {} is up to date", self.pipelines[i].repo.id());
                    match self.pipelines[i].repo.mark_fresh() {
                        Ok(()) => self.enqueue(i, Resolution::InSync),
                        Err(e) => self.fail(i, FailureStage::SyncCheck, e),
                    }
                }
                Ok(false) => debug!("{} changed upstream", self.pipelines[i].repo.id()),
                Err(e) => self.fail(i, FailureStage::SyncCheck, e),
            }
        }
    }

    fn download_pass(&mut self, attempt: Attempt) {
        let candidates: Vec<usize> = (0..self.pipelines.len())
            .filter(|&i| self.pipelines[i].is_active(attempt, SyncState::Validating))
            .collect();
        if candidates.is_empty() {
            return;
        }
        for &i in &candidates {
            self.pipelines[i].state = SyncState::Downloading;
        }

        let pipelines = &self.pipelines;
        let downloads: Vec<(usize, Result<()>)> = self.workers.install(|| {
            candidates
                .par_iter()
                .map(|&i| {
                    let repo = &pipelines[i].repo;
                    (i, repo.downloader().download_metadata(repo.cache().path()))
                })
                .collect()
        });

        for (i, download) in downloads {
            let refreshed = download.and_then(|()| {
                let repo = &mut self.pipelines[i].repo;
                repo.read_metadata_cache()?;
                repo.mark_fresh()
            });
            match refreshed {
                Ok(()) => self.enqueue(i, Resolution::Downloaded),
                Err(e) => self.fail(i, FailureStage::Download, e),
            }
        }
    }

    fn key_retry_pass(&mut self) {
        let retry: Vec<usize> = (0..self.pipelines.len())
            .filter(|&i| self.pipelines[i].pending_keys.is_some())
            .collect();
        if retry.is_empty() {
            return;
        }

        let remote: BTreeSet<String> = retry
            .iter()
            .flat_map(|&i| self.pipelines[i].repo.downloader().key_locations().1)
            .collect();
        let transport = &self.context.transport;
        let downloaded: HashMap<String, Vec<u8>> = self.workers.install(|| {
            remote
                .par_iter()
                .filter_map(|url| match transport.fetch_bytes(url) {
                    Ok(data) => Some((url.clone(), data)),
                    Err(e) => {
                        warn!("Cannot download key {}: {}", url, e);
                        None
                    }
                })
                .collect()
        });

        for i in retry {
            let pipeline = &mut self.pipelines[i];
            let Some((_, signature_error)) = pipeline.pending_keys.take() else {
                continue;
            };
            pipeline.attempt = Attempt::AfterKeyImport;

            match pipeline.repo.downloader().import_repo_keys(&downloaded) {
                Ok(count) => {
                    info!("Imported {} key(s) for {}, retrying", count, pipeline.repo.id());
                    let stats = pipeline.repo.cache().remove_metadata();
                    if stats.errors > 0 {
                        warn!("{} entries of {} metadata could not be removed", stats.errors, pipeline.repo.id());
                    }
                    pipeline.state = SyncState::NotLoaded;
                }
                Err(e) => {
                    warn!("{}: {}", pipeline.repo.id(), signature_error);
                    self.fail(i, FailureStage::KeyImport, e);
                }
            }
        }
    }

    fn apply_load_result(&mut self, (repo_id, outcome): LoadResult) {
        let Some(i) = self.pipelines.iter().position(|p| p.repo.id() == repo_id) else {
            return;
        };
        match outcome {
            Ok(()) => {
                let pipeline = &mut self.pipelines[i];
                pipeline.state = SyncState::Loaded;
                pipeline.outcome = Some(RepoOutcome::Loaded {
                    repo_id,
                    resolution: pipeline.resolution.unwrap_or(Resolution::CacheHit),
                    attempt: pipeline.attempt,
                });
            }
            Err(e) => self.fail(i, FailureStage::Load, e),
        }
    }

    fn drain_results(&mut self) {
        let results: Vec<LoadResult> = self.results.try_iter().collect();
        for result in results {
            self.apply_load_result(result);
        }
    }

    /// Settle every repository without an outcome
    fn finish(&mut self) {
        for i in 0..self.pipelines.len() {
            if let Some((stage, error)) = self.pipelines[i].pending_keys.take() {
                self.pipelines[i].attempt = Attempt::AfterKeyImport;
                self.fail(i, stage, error);
            }
        }
        for pipeline in &mut self.pipelines {
            if pipeline.outcome.is_none() {
                pipeline.outcome = Some(RepoOutcome::Abandoned {
                    repo_id: pipeline.repo.id().to_string(),
                });
            }
        }
    }
}

/// Synchronizes repositories and loads them into an [`IndexPool`]
pub struct RepoSynchronizer {
    context: Arc<SyncContext>,
    cancel: CancelToken,
    refresh: bool,
}

impl RepoSynchronizer {
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self {
            context,
            cancel: CancelToken::new(),
            refresh: false,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Expire every repository before checking caches
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    /// Synchronize the enabled repositories among `configs`
    ///
    /// Per-repository failures are reported in the [`SyncReport`]; an
    /// `Err` means the run itself could not happen.
    pub fn synchronize(&self, configs: &[RepositoryConfig]) -> Result<SyncReport> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let main = &self.context.main;
        let _lock = CacheLock::acquire(&main.cachedir)?;

        let mut pipelines = Vec::new();
        for config in configs.iter().filter(|c| c.enabled) {
            let mut repo = Repo::new(config.clone(), Arc::clone(&self.context));
            if self.refresh && main.strategy() != SyncStrategy::CacheOnly {
                if let Err(e) = repo.expire() {
                    warn!("Cannot expire {}: {}", repo.id(), e);
                }
            }
            pipelines.push(Pipeline {
                repo,
                state: SyncState::NotLoaded,
                attempt: Attempt::First,
                resolution: None,
                pending_keys: None,
                outcome: None,
            });
        }

        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(main.max_parallel_downloads.max(1))
            .thread_name(|i| format!("reposync-download-{i}"))
            .build()
            .map_err(|e| Error::Init(format!("Cannot start download workers: {e}")))?;

        let (jobs, job_queue) = flume::bounded(pipelines.len() + 1);
        let (result_sender, results) = flume::unbounded();
        let loader = spawn_loader(IndexPool::new(), job_queue, result_sender)?;

        let mut run = Run {
            context: &self.context,
            pipelines,
            jobs,
            results,
            workers,
            fatal_repo: None,
        };
        run.execute();

        let _ = run.jobs.send(LoaderMessage::Finished);
        let index = join_loader(loader)?;
        run.drain_results();
        run.finish();

        let outcomes: Vec<RepoOutcome> = run
            .pipelines
            .into_iter()
            .filter_map(|p| p.outcome)
            .collect();
        let report = SyncReport {
            outcomes,
            index,
            fatal_repo: run.fatal_repo,
        };
        info!(
            "Loaded {} repositories, {} skipped",
            report.loaded().count(),
            report.skipped().count()
        );
        Ok(report)
    }

    /// Synchronize and return the index, failing on the first aborting
    /// repository
    pub fn load(&self, configs: &[RepositoryConfig]) -> Result<IndexPool> {
        self.synchronize(configs)?.into_result()
    }
}
