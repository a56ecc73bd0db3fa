//! Watch mode: re-run the organizer whenever files appear in a folder.
//!
//! The filesystem subscription never organizes anything itself. Events are
//! debounced for the settle delay, and each debounced batch only pushes a
//! work item onto a queue. A single worker thread drains the queue and runs
//! the passes, so a burst of events collapses into one pass and two passes
//! from the same trigger can never overlap.

use crate::organizer::{OrganizeReport, Organizer};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default quiet period before a pass starts.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Callback invoked with the report of every watch-triggered pass.
pub type PassListener = Arc<dyn Fn(&OrganizeReport) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("cannot watch {}: not an existing directory", .path.display())]
    InvalidFolder { path: PathBuf },

    #[error("filesystem watcher failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("failed to start watch worker: {0}")]
    Worker(#[source] std::io::Error),
}

enum WorkItem {
    Rescan,
    Shutdown,
}

/// An active subscription plus the worker serving it.
struct ActiveWatch {
    folder: PathBuf,
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    queue: Sender<WorkItem>,
    shutdown: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

enum WatchState {
    Idle,
    Watching(ActiveWatch),
}

/// Keeps at most one folder under watch.
pub struct WatchTrigger {
    organizer: Arc<Organizer>,
    settle_delay: Duration,
    listener: Option<PassListener>,
    state: WatchState,
}

impl WatchTrigger {
    pub fn new(organizer: Arc<Organizer>) -> Self {
        Self {
            organizer,
            settle_delay: DEFAULT_SETTLE_DELAY,
            listener: None,
            state: WatchState::Idle,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&OrganizeReport) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn is_watching(&self) -> bool {
        matches!(self.state, WatchState::Watching(_))
    }

    pub fn watched_folder(&self) -> Option<&Path> {
        match &self.state {
            WatchState::Watching(active) => Some(&active.folder),
            WatchState::Idle => None,
        }
    }

    /// Starts watching `folder`, replacing any previous subscription.
    ///
    /// Only files created or modified directly inside the folder trigger a
    /// pass; subfolders are not watched.
    pub fn start(&mut self, folder: &Path) -> Result<(), WatchError> {
        self.stop();

        if !folder.is_dir() {
            return Err(WatchError::InvalidFolder {
                path: folder.to_path_buf(),
            });
        }

        let (queue, work) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let events = queue.clone();
        let mut debouncer = new_debouncer(
            self.settle_delay,
            None,
            move |result: DebounceEventResult| match result {
                Ok(batch) => {
                    if batch.iter().any(|event| triggers_pass(&event.kind)) {
                        debug!(events = batch.len(), "filesystem events settled");
                        // The worker is gone once stop() has run; nothing to do then.
                        let _ = events.send(WorkItem::Rescan);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!("watch error: {e}");
                    }
                }
            },
        )?;
        debouncer.watch(folder, RecursiveMode::NonRecursive)?;

        let worker = {
            let organizer = Arc::clone(&self.organizer);
            let folder = folder.to_path_buf();
            let shutdown = Arc::clone(&shutdown);
            let listener = self.listener.clone();
            thread::Builder::new()
                .name("fileforge-watch".to_string())
                .spawn(move || run_worker(work, &organizer, &folder, &shutdown, listener))
                .map_err(WatchError::Worker)?
        };

        info!(folder = %folder.display(), "watching folder");
        self.state = WatchState::Watching(ActiveWatch {
            folder: folder.to_path_buf(),
            debouncer,
            queue,
            shutdown,
            worker,
        });
        Ok(())
    }

    /// Stops watching and waits for the worker to exit.
    ///
    /// A pass that is already running is allowed to finish; no new pass
    /// starts once this returns. Does nothing when idle.
    pub fn stop(&mut self) {
        let WatchState::Watching(active) = std::mem::replace(&mut self.state, WatchState::Idle)
        else {
            return;
        };

        let ActiveWatch {
            folder,
            debouncer,
            queue,
            shutdown,
            worker,
        } = active;

        debouncer.stop();
        shutdown.store(true, Ordering::Release);
        let _ = queue.send(WorkItem::Shutdown);
        if worker.join().is_err() {
            error!(folder = %folder.display(), "watch worker panicked");
        }
        info!(folder = %folder.display(), "stopped watching folder");
    }
}

impl Drop for WatchTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

fn triggers_pass(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn run_worker(
    work: Receiver<WorkItem>,
    organizer: &Organizer,
    folder: &Path,
    shutdown: &AtomicBool,
    listener: Option<PassListener>,
) {
    while let Ok(item) = work.recv() {
        if matches!(item, WorkItem::Shutdown) {
            break;
        }

        // Batches that settled while the previous pass ran need only one pass.
        if work.try_iter().any(|queued| matches!(queued, WorkItem::Shutdown))
            || shutdown.load(Ordering::Acquire)
        {
            return;
        }

        match organizer.organize(folder) {
            Ok(report) => {
                if !report.is_empty()
                    && let Some(listener) = &listener
                {
                    listener(&report);
                }
            }
            Err(e) => error!(folder = %folder.display(), "watch pass failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_log::ActionLog;
    use crate::categories::CategoryRules;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;

    const SETTLE: Duration = Duration::from_millis(50);

    fn trigger(logs: &TempDir) -> WatchTrigger {
        let organizer = Organizer::new(
            CategoryRules::default(),
            ActionLog::new(logs.path().join("log.txt")),
        );
        WatchTrigger::new(Arc::new(organizer)).with_settle_delay(SETTLE)
    }

    fn wait_for(path: &Path) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if path.exists() {
                return true;
            }
            thread::sleep(Duration::from_millis(25));
        }
        false
    }

    fn bucket(folder: &Path, category: &str) -> PathBuf {
        folder
            .join(category)
            .join(chrono::Local::now().format("%Y-%m-%d").to_string())
    }

    #[test]
    fn test_idle_by_default() {
        let logs = TempDir::new().unwrap();
        let mut trigger = trigger(&logs);
        assert!(!trigger.is_watching());
        assert!(trigger.watched_folder().is_none());
        trigger.stop();
        assert!(!trigger.is_watching());
    }

    #[test]
    fn test_start_rejects_missing_folder() {
        let logs = TempDir::new().unwrap();
        let mut trigger = trigger(&logs);
        let result = trigger.start(&logs.path().join("missing"));
        assert!(matches!(result, Err(WatchError::InvalidFolder { .. })));
        assert!(!trigger.is_watching());
    }

    #[test]
    fn test_new_file_is_organized() {
        let folder = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let mut trigger = trigger(&logs);

        trigger.start(folder.path()).unwrap();
        assert_eq!(trigger.watched_folder(), Some(folder.path()));
        fs::write(folder.path().join("song.mp3"), "la").unwrap();

        assert!(wait_for(&bucket(folder.path(), "Music").join("song.mp3")));
        trigger.stop();
    }

    #[test]
    fn test_burst_is_fully_organized() {
        let folder = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let mut trigger = trigger(&logs);
        trigger.start(folder.path()).unwrap();

        for i in 0..20 {
            fs::write(folder.path().join(format!("{i}.png")), "px").unwrap();
        }

        let images = bucket(folder.path(), "Images");
        for i in 0..20 {
            assert!(wait_for(&images.join(format!("{i}.png"))), "{i}.png not moved");
        }
        trigger.stop();
    }

    #[test]
    fn test_no_pass_after_stop() {
        let folder = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let mut trigger = trigger(&logs);

        trigger.start(folder.path()).unwrap();
        trigger.stop();
        assert!(!trigger.is_watching());

        fs::write(folder.path().join("late.pdf"), "doc").unwrap();
        thread::sleep(SETTLE * 10);

        assert!(folder.path().join("late.pdf").exists());
        assert!(!folder.path().join("Documents").exists());
    }

    #[test]
    fn test_restart_moves_subscription() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let mut trigger = trigger(&logs);

        trigger.start(first.path()).unwrap();
        trigger.start(second.path()).unwrap();
        assert_eq!(trigger.watched_folder(), Some(second.path()));

        fs::write(first.path().join("old.zip"), "zip").unwrap();
        fs::write(second.path().join("new.zip"), "zip").unwrap();

        assert!(wait_for(&bucket(second.path(), "Archives").join("new.zip")));
        thread::sleep(SETTLE * 4);
        assert!(first.path().join("old.zip").exists());
        trigger.stop();
    }

    #[test]
    fn test_listener_receives_reports() {
        let folder = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let moved = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&moved);
        let mut trigger = trigger(&logs).with_listener(move |report| {
            let mut sink = sink.lock().unwrap();
            sink.extend(report.moved.iter().map(|m| m.operation.category.clone()));
        });
        trigger.start(folder.path()).unwrap();

        fs::write(folder.path().join("clip.mov"), "mov").unwrap();
        assert!(wait_for(&bucket(folder.path(), "Videos").join("clip.mov")));
        trigger.stop();

        assert_eq!(*moved.lock().unwrap(), vec!["Videos".to_string()]);
    }

    #[test]
    fn test_drop_stops_watching() {
        let folder = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        {
            let mut trigger = trigger(&logs);
            trigger.start(folder.path()).unwrap();
        }

        fs::write(folder.path().join("after.txt"), "x").unwrap();
        thread::sleep(SETTLE * 10);
        assert!(folder.path().join("after.txt").exists());
    }
}
