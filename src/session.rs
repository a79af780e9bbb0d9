//! Indexing session state, status snapshots, and observers.
//!
//! One [`IndexingSession`] exists per pipeline and is shared by every
//! worker task. All counters are atomics; callers read them through
//! [`IndexingSession::snapshot`], which is an eventually-consistent
//! point-in-time view that never blocks the writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::warn;

/// Run state of the pipeline, checked cooperatively by workers at batch
/// boundaries. There is no forced cancellation: in-flight per-file work
/// always finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopping,
}

impl RunState {
    fn from_u8(value: u8) -> RunState {
        match value {
            1 => RunState::Running,
            2 => RunState::Paused,
            3 => RunState::Stopping,
            _ => RunState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Paused => 2,
            RunState::Stopping => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopping => "stopping",
        }
    }
}

/// Shared mutable state of one indexing run.
#[derive(Default)]
pub struct IndexingSession {
    state: AtomicU8,
    complete: AtomicBool,
    total_files: AtomicUsize,
    indexed_files: AtomicUsize,
    failed_files: AtomicUsize,
    skipped_files: AtomicUsize,
    active_workers: AtomicUsize,
    peak_workers: AtomicUsize,
    tasks_executed: AtomicU64,
    started_at_millis: AtomicI64,
    indexed_types: Mutex<HashMap<String, usize>>,
    skipped_types: Mutex<HashMap<String, usize>>,
    directory: Mutex<String>,
}

impl IndexingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: RunState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Transition only if the current state matches; returns whether the
    /// swap happened. Guards the one-session-at-a-time invariant.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(
                from.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn set_complete(&self, complete: bool) {
        self.complete.store(complete, Ordering::Release);
    }

    /// Reset all counters and histograms for a fresh run.
    pub fn reset(&self) {
        self.complete.store(false, Ordering::Release);
        self.total_files.store(0, Ordering::Release);
        self.indexed_files.store(0, Ordering::Release);
        self.failed_files.store(0, Ordering::Release);
        self.skipped_files.store(0, Ordering::Release);
        self.active_workers.store(0, Ordering::Release);
        self.peak_workers.store(0, Ordering::Release);
        self.tasks_executed.store(0, Ordering::Release);
        self.started_at_millis
            .store(now_millis(), Ordering::Release);
        self.indexed_types.lock().unwrap().clear();
        self.skipped_types.lock().unwrap().clear();
    }

    pub fn set_directory(&self, directory: &str) {
        *self.directory.lock().unwrap() = directory.to_string();
    }

    pub fn add_total(&self, count: usize) {
        self.total_files.fetch_add(count, Ordering::AcqRel);
    }

    pub fn record_indexed(&self) {
        self.indexed_files.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_failed(&self) {
        self.failed_files.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_skipped(&self) {
        self.skipped_files.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_indexed_type(&self, extension: &str) {
        if extension.is_empty() {
            return;
        }
        *self
            .indexed_types
            .lock()
            .unwrap()
            .entry(extension.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_skipped_type(&self, extension: &str) {
        if extension.is_empty() {
            return;
        }
        *self
            .skipped_types
            .lock()
            .unwrap()
            .entry(extension.to_string())
            .or_insert(0) += 1;
    }

    /// Mark a worker task as started; updates active and peak counts.
    pub fn begin_task(&self) {
        self.tasks_executed.fetch_add(1, Ordering::AcqRel);
        let current = self.active_workers.fetch_add(1, Ordering::AcqRel) + 1;
        let mut peak = self.peak_workers.load(Ordering::Acquire);
        while current > peak {
            match self.peak_workers.compare_exchange_weak(
                peak,
                current,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
    }

    pub fn end_task(&self) {
        self.active_workers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Point-in-time view of the session. Counters may move while the
    /// snapshot is being assembled; that is fine for display purposes.
    pub fn snapshot(&self) -> IndexingStatus {
        let total = self.total_files.load(Ordering::Acquire);
        let indexed = self.indexed_files.load(Ordering::Acquire);
        let started = self.started_at_millis.load(Ordering::Acquire);
        let elapsed_millis = if started > 0 {
            (now_millis() - started).max(0)
        } else {
            0
        };
        let speed = if elapsed_millis > 0 {
            indexed as f64 * 1000.0 / elapsed_millis as f64
        } else {
            0.0
        };
        let progress = if total > 0 {
            indexed as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        let estimated_remaining_millis = if speed > 0.0 && total > indexed {
            ((total - indexed) as f64 / speed * 1000.0) as i64
        } else {
            0
        };

        IndexingStatus {
            state: self.state(),
            complete: self.is_complete(),
            directory: self.directory.lock().unwrap().clone(),
            total_files: total,
            indexed_files: indexed,
            failed_files: self.failed_files.load(Ordering::Acquire),
            skipped_files: self.skipped_files.load(Ordering::Acquire),
            active_workers: self.active_workers.load(Ordering::Acquire),
            peak_workers: self.peak_workers.load(Ordering::Acquire),
            tasks_executed: self.tasks_executed.load(Ordering::Acquire),
            elapsed_millis,
            speed,
            progress,
            estimated_remaining_millis,
            indexed_types: self.indexed_types.lock().unwrap().clone(),
            skipped_types: self.skipped_types.lock().unwrap().clone(),
        }
    }
}

/// Read-only snapshot of an [`IndexingSession`] for display.
#[derive(Debug, Clone)]
pub struct IndexingStatus {
    pub state: RunState,
    pub complete: bool,
    pub directory: String,
    pub total_files: usize,
    pub indexed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub active_workers: usize,
    pub peak_workers: usize,
    pub tasks_executed: u64,
    pub elapsed_millis: i64,
    /// Files per second since the session started.
    pub speed: f64,
    /// Percentage of the known total indexed so far.
    pub progress: f64,
    pub estimated_remaining_millis: i64,
    pub indexed_types: HashMap<String, usize>,
    pub skipped_types: HashMap<String, usize>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============ Observers ============

/// Callbacks for indexing progress. Implementations must not assume they
/// are called from any particular thread.
pub trait IndexingObserver: Send + Sync {
    fn on_update(&self, status: &IndexingStatus);
    fn on_complete(&self, status: &IndexingStatus);
    fn on_error(&self, error: &anyhow::Error, context: &str);
}

/// Subscription list with guarded dispatch: a panicking observer is logged
/// and skipped so the rest still get notified.
#[derive(Default)]
pub struct ObserverSet {
    observers: Mutex<Vec<std::sync::Arc<dyn IndexingObserver>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: std::sync::Arc<dyn IndexingObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    pub fn notify_update(&self, status: &IndexingStatus) {
        self.for_each(|observer| observer.on_update(status));
    }

    pub fn notify_complete(&self, status: &IndexingStatus) {
        self.for_each(|observer| observer.on_complete(status));
    }

    pub fn notify_error(&self, error: &anyhow::Error, context: &str) {
        self.for_each(|observer| observer.on_error(error, context));
    }

    fn for_each(&self, call: impl Fn(&dyn IndexingObserver)) {
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                call(observer.as_ref())
            }));
            if result.is_err() {
                warn!("indexing observer panicked; continuing with remaining observers");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn transition_guards_single_session() {
        let session = IndexingSession::new();
        assert_eq!(session.state(), RunState::Idle);
        assert!(session.transition(RunState::Idle, RunState::Running));
        // A second start request must not win the guard.
        assert!(!session.transition(RunState::Idle, RunState::Running));
        assert!(session.transition(RunState::Running, RunState::Paused));
        assert!(session.transition(RunState::Paused, RunState::Running));
    }

    #[test]
    fn peak_workers_tracks_maximum() {
        let session = IndexingSession::new();
        session.begin_task();
        session.begin_task();
        session.begin_task();
        session.end_task();
        session.begin_task();

        let status = session.snapshot();
        assert_eq!(status.active_workers, 3);
        assert_eq!(status.peak_workers, 3);
        assert_eq!(status.tasks_executed, 4);
    }

    #[test]
    fn snapshot_derives_progress() {
        let session = IndexingSession::new();
        session.reset();
        session.add_total(10);
        for _ in 0..4 {
            session.record_indexed();
        }
        session.record_failed();
        session.record_skipped();
        session.record_indexed_type(".java");
        session.record_indexed_type(".java");
        session.record_skipped_type(".bin");

        let status = session.snapshot();
        assert_eq!(status.total_files, 10);
        assert_eq!(status.indexed_files, 4);
        assert_eq!(status.failed_files, 1);
        assert_eq!(status.skipped_files, 1);
        assert!((status.progress - 40.0).abs() < 1e-9);
        assert_eq!(status.indexed_types[".java"], 2);
        assert_eq!(status.skipped_types[".bin"], 1);
    }

    #[test]
    fn reset_clears_everything_but_directory() {
        let session = IndexingSession::new();
        session.set_directory("repo/src");
        session.add_total(5);
        session.record_indexed();
        session.set_complete(true);

        session.reset();
        let status = session.snapshot();
        assert_eq!(status.total_files, 0);
        assert_eq!(status.indexed_files, 0);
        assert!(!status.complete);
        assert_eq!(status.directory, "repo/src");
    }

    struct CountingObserver {
        updates: AtomicUsize,
        completes: AtomicUsize,
    }

    impl IndexingObserver for CountingObserver {
        fn on_update(&self, _status: &IndexingStatus) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        fn on_complete(&self, _status: &IndexingStatus) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_error(&self, _error: &anyhow::Error, _context: &str) {}
    }

    struct PanickingObserver;

    impl IndexingObserver for PanickingObserver {
        fn on_update(&self, _status: &IndexingStatus) {
            panic!("observer bug");
        }
        fn on_complete(&self, _status: &IndexingStatus) {}
        fn on_error(&self, _error: &anyhow::Error, _context: &str) {}
    }

    #[test]
    fn panicking_observer_does_not_block_others() {
        let observers = ObserverSet::new();
        let counting = Arc::new(CountingObserver {
            updates: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
        });
        observers.add(Arc::new(PanickingObserver));
        observers.add(counting.clone());

        let session = IndexingSession::new();
        observers.notify_update(&session.snapshot());
        observers.notify_complete(&session.snapshot());

        assert_eq!(counting.updates.load(Ordering::SeqCst), 1);
        assert_eq!(counting.completes.load(Ordering::SeqCst), 1);
    }
}
