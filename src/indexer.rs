//! Two-phase concurrent indexing pipeline.
//!
//! Phase 1 walks the tree for priority files (controllers before services
//! before data access and so on), indexes them on a bounded worker pool,
//! and joins before anything else runs, so the highest-value files are
//! searchable first. Phase 2 walks again, subtracts the cache, and works
//! through the remainder in fixed-size batches, joining per batch so
//! in-flight network calls and memory stay bounded.
//!
//! Pause and stop are cooperative flags checked at batch boundaries; a
//! single bad file is counted and skipped, never fatal to the batch or
//! the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::FileCache;
use crate::collection::CollectionManager;
use crate::config::IndexingConfig;
use crate::models::file_extension;
use crate::producer::DocumentProducer;
use crate::session::{IndexingSession, IndexingStatus, ObserverSet, RunState};
use crate::store::VectorStore;

/// Delay between Phase 1 completing and Phase 2 starting.
const PHASE_SETTLE: Duration = Duration::from_secs(1);
/// Poll interval while paused.
const PAUSE_POLL: Duration = Duration::from_millis(100);
/// Observer update cadence, in batches.
const UPDATE_EVERY_BATCHES: usize = 5;

pub struct IndexingPipeline {
    store: Arc<dyn VectorStore>,
    producer: Arc<dyn DocumentProducer>,
    collections: CollectionManager,
    cache: Arc<FileCache>,
    config: IndexingConfig,
    session: Arc<IndexingSession>,
    observers: ObserverSet,
    workers: Arc<Semaphore>,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        producer: Arc<dyn DocumentProducer>,
        collections: CollectionManager,
        cache: Arc<FileCache>,
        config: IndexingConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_limit.max(1)));
        Self {
            store,
            producer,
            collections,
            cache,
            config,
            session: Arc::new(IndexingSession::new()),
            observers: ObserverSet::new(),
            workers,
        }
    }

    pub fn session(&self) -> &IndexingSession {
        &self.session
    }

    pub fn status(&self) -> IndexingStatus {
        self.session.snapshot()
    }

    pub fn add_observer(&self, observer: Arc<dyn crate::session::IndexingObserver>) {
        self.observers.add(observer);
    }

    /// Run a full two-phase indexing session over `directory`.
    ///
    /// Only one session may run at a time; a second start while running is
    /// a logged no-op. The directory is an explicit parameter; the
    /// collection it maps to is recomputed here, never ambient state.
    pub async fn start_indexing(self: &Arc<Self>, directory: &Path) -> Result<()> {
        if !self.session.transition(RunState::Idle, RunState::Running) {
            warn!("indexing already in progress; start request ignored");
            return Ok(());
        }

        let dir_str = directory.to_string_lossy().to_string();
        self.session.reset();
        self.session.set_directory(&dir_str);
        let collection = CollectionManager::collection_name(&dir_str);
        info!(directory = %dir_str, collection = %collection, "starting indexing session");

        // Replay the cache; files deleted since the last run come back so
        // their vectors can be removed best-effort.
        let report = self.cache.load();
        if !report.deleted.is_empty() {
            let paths: Vec<String> = report
                .deleted
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect();
            info!(count = paths.len(), "removing vectors for deleted files");
            if let Err(e) = self.store.delete_by_path(&collection, &paths).await {
                warn!(error = %e, "could not remove vectors for deleted files");
            }
            self.cache.prune(&report.deleted);
        }

        self.observers.notify_update(&self.session.snapshot());

        let result = self.run_phases(directory, &collection).await;

        let stopped = self.session.state() == RunState::Stopping;
        self.session.set_state(RunState::Idle);

        match result {
            Ok(()) if !stopped => {
                self.session.set_complete(true);
                let status = self.session.snapshot();
                info!(
                    indexed = status.indexed_files,
                    failed = status.failed_files,
                    skipped = status.skipped_files,
                    "indexing session finished"
                );
                self.observers.notify_complete(&status);
            }
            Ok(()) => {
                info!("indexing session stopped");
                self.observers.notify_update(&self.session.snapshot());
            }
            Err(ref e) => {
                warn!(error = %e, "indexing session failed");
                self.observers.notify_error(e, "indexing");
            }
        }
        result
    }

    async fn run_phases(self: &Arc<Self>, directory: &Path, collection: &str) -> Result<()> {
        // Upfront, best-effort; every file re-checks, and an unreachable
        // store surfaces as per-file failures rather than ending the run.
        if let Err(e) = self.collections.ensure_collection(collection).await {
            warn!(error = %e, "could not prepare collection; continuing");
        }

        self.index_priority_files(directory, collection).await?;

        if self.session.state() == RunState::Stopping {
            return Ok(());
        }
        tokio::time::sleep(PHASE_SETTLE).await;

        self.index_remaining_files(directory, collection).await
    }

    /// Phase 1: priority files only, rank-sorted, fully joined.
    async fn index_priority_files(self: &Arc<Self>, directory: &Path, collection: &str) -> Result<()> {
        let mut files: Vec<(u32, PathBuf)> = self
            .walk_supported(directory)
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().to_string();
                let rank = self.config.priority_rank(&name);
                (rank <= self.config.priority_cutoff).then_some((rank, path))
            })
            .filter(|(_, path)| self.cache.needs_reindexing(path))
            .collect();

        files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        self.session.add_total(files.len());

        if files.is_empty() {
            info!("phase 1: no priority files need indexing");
            return Ok(());
        }
        info!(count = files.len(), "phase 1: indexing priority files");

        let mut handles = Vec::with_capacity(files.len());
        for (_, path) in files {
            handles.push(self.spawn_index_task(path, collection.to_string()).await);
        }
        for handle in handles {
            let _ = handle.await;
        }

        info!("phase 1 complete; priority files are searchable");
        self.observers.notify_update(&self.session.snapshot());
        Ok(())
    }

    /// Phase 2: everything not already cached, in fixed-size batches with
    /// a join per batch. Pause and stop are honored between batches only.
    async fn index_remaining_files(self: &Arc<Self>, directory: &Path, collection: &str) -> Result<()> {
        let files: Vec<PathBuf> = self
            .walk_all(directory)
            .into_iter()
            .filter(|path| self.cache.needs_reindexing(path))
            .collect();

        self.session.add_total(files.len());
        if files.is_empty() {
            info!("phase 2: all files already indexed");
            return Ok(());
        }
        info!(count = files.len(), "phase 2: indexing remaining files");

        let batch_size = self.config.batch_size.max(1);
        for (batch_number, batch) in files.chunks(batch_size).enumerate() {
            // Cooperative pause: let in-flight work settle, then hold here.
            while self.session.state() == RunState::Paused {
                tokio::time::sleep(PAUSE_POLL).await;
            }
            if self.session.state() == RunState::Stopping {
                debug!("stop requested; leaving batch loop");
                break;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for path in batch {
                if !self.cache.needs_reindexing(path) {
                    continue;
                }
                handles.push(
                    self.spawn_index_task(path.clone(), collection.to_string())
                        .await,
                );
            }
            for handle in handles {
                let _ = handle.await;
            }

            if batch_number % UPDATE_EVERY_BATCHES == 0 {
                self.observers.notify_update(&self.session.snapshot());
            }
        }

        Ok(())
    }

    async fn spawn_index_task(
        self: &Arc<Self>,
        path: PathBuf,
        collection: String,
    ) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .expect("worker semaphore closed");
        tokio::spawn(async move {
            let _permit = permit;
            pipeline.index_file(&path, &collection).await;
        })
    }

    /// Index one file. Every failure mode is per-file: counted, logged,
    /// and never propagated to the batch.
    async fn index_file(&self, path: &Path, collection: &str) {
        if self.session.state() == RunState::Stopping {
            return;
        }
        self.session.begin_task();

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = file_extension(&file_name);

        let outcome = self.index_file_inner(path, collection, &extension).await;
        match outcome {
            Ok(true) => self.session.record_indexed(),
            Ok(false) => self.session.record_skipped(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to index file");
                self.session.record_failed();
            }
        }

        self.session.end_task();
    }

    async fn index_file_inner(
        &self,
        path: &Path,
        collection: &str,
        extension: &str,
    ) -> Result<bool> {
        let size = std::fs::metadata(path)
            .with_context(|| format!("could not stat {}", path.display()))?
            .len();
        if size > self.config.max_file_size {
            debug!(path = %path.display(), size, "skipping oversized file");
            return Ok(false);
        }

        self.session.record_indexed_type(extension);

        let chunks = self.producer.produce(path)?;
        if chunks.is_empty() {
            return Ok(false);
        }

        self.collections.ensure_collection(collection).await?;
        self.store.upsert(collection, &chunks).await?;
        self.cache.record_indexed(path);
        Ok(true)
    }

    /// Pause after the current batch; in-flight files finish normally.
    pub fn pause(&self) {
        if self.session.transition(RunState::Running, RunState::Paused) {
            info!("indexing paused");
            self.observers.notify_update(&self.session.snapshot());
        }
    }

    pub fn resume(&self) {
        if self.session.transition(RunState::Paused, RunState::Running) {
            info!("indexing resumed");
            self.observers.notify_update(&self.session.snapshot());
        }
    }

    /// Request a cooperative stop; the batch loop exits at its next check.
    pub fn stop(&self) {
        let stopped = self
            .session
            .transition(RunState::Running, RunState::Stopping)
            || self.session.transition(RunState::Paused, RunState::Stopping);
        if stopped {
            info!("indexing stop requested");
            self.observers.notify_update(&self.session.snapshot());
        }
    }

    /// Destroy the directory's collection, wipe the cache, and start a
    /// fresh session in the background. When this returns, no vectors
    /// from before the restart remain and the cache is empty; re-indexing
    /// proceeds asynchronously.
    ///
    /// A failed collection reset is reported to the caller instead of
    /// starting a half-clean session.
    pub async fn restart_indexing(self: &Arc<Self>, directory: &Path) -> Result<()> {
        info!(directory = %directory.display(), "restarting indexing");
        self.stop();
        self.wait_until_idle().await;

        let collection = CollectionManager::collection_name(&directory.to_string_lossy());
        self.collections
            .delete_and_recreate(&collection)
            .await
            .context("restart failed: could not reset collection")?;

        self.session.reset();
        self.cache.clear();

        let pipeline = Arc::clone(self);
        let dir = directory.to_path_buf();
        tokio::spawn(async move {
            if let Err(e) = pipeline.start_indexing(&dir).await {
                warn!(error = %e, "restarted indexing session failed");
            }
        });
        Ok(())
    }

    /// Same reset sequence as [`restart_indexing`]; kept as a separate
    /// entry point because callers treat "clear cache" as its own action.
    pub async fn clear_cache_and_reindex(self: &Arc<Self>, directory: &Path) -> Result<()> {
        self.restart_indexing(directory).await
    }

    async fn wait_until_idle(&self) {
        while self.session.state() != RunState::Idle {
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }

    /// Supported, non-excluded files under `directory`.
    fn walk_supported(&self, directory: &Path) -> Vec<PathBuf> {
        let exclude_globs = self.config.exclude_globset();
        let mut files: Vec<PathBuf> = WalkDir::new(directory)
            .max_depth(self.config.max_depth)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| !self.config.is_excluded(path) && !exclude_globs.is_match(path))
            .filter(|path| {
                path.file_name()
                    .map(|n| self.config.is_supported(&n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }

    /// Like [`walk_supported`], but also feeds the skipped-extension
    /// histogram for files the indexer will not touch.
    fn walk_all(&self, directory: &Path) -> Vec<PathBuf> {
        let exclude_globs = self.config.exclude_globset();
        let mut files = Vec::new();
        for entry in WalkDir::new(directory)
            .max_depth(self.config.max_depth)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if self.config.is_excluded(&path) || exclude_globs.is_match(&path) {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if self.config.is_supported(&name) {
                files.push(path);
            } else {
                self.session.record_skipped_type(&file_extension(&name));
            }
        }
        files.sort();
        files
    }
}
