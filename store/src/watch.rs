//! Filesystem watcher: event ingestion, ready-phase buffering, per-file
//! coalescing, and debounced batch delivery (spec §4.8).
//!
//! Structured after the teacher's `start_watcher`/`debounce_loop` split — a
//! `notify::RecommendedWatcher` feeding an mpsc channel, drained by a
//! dedicated thread — generalised with an explicit ready phase and a
//! coalescing table instead of last-write-wins per path.

use notify::{Event, EventKind as NotifyEventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

/// Merges a new event for an id into the pending batch per the §4.8 table.
#[derive(Default)]
struct Coalescer {
    queue: HashMap<String, ChangeKind>,
}

impl Coalescer {
    fn record(&mut self, id: String, kind: ChangeKind) {
        use ChangeKind::*;
        let merged = match self.queue.get(&id).copied() {
            None => Some(kind),
            Some(Add) => match kind {
                Add | Change => Some(Add),
                Unlink => None,
            },
            Some(Change) => match kind {
                Add => Some(Add),
                Change => Some(Change),
                Unlink => Some(Unlink),
            },
            Some(Unlink) => match kind {
                Add => Some(Change),
                Change => Some(Change),
                Unlink => Some(Unlink),
            },
        };
        match merged {
            Some(k) => {
                self.queue.insert(id, k);
            }
            None => {
                self.queue.remove(&id);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn take(&mut self) -> HashMap<String, ChangeKind> {
        std::mem::take(&mut self.queue)
    }
}

pub struct WatchConfig {
    pub root: PathBuf,
    pub debounce_ms: u64,
    pub excluded_dirs: Vec<String>,
    pub extensions: Vec<String>,
}

impl WatchConfig {
    fn accepts(&self, relative: &str) -> bool {
        let lower = relative.to_lowercase();
        if !self.extensions.iter().any(|ext| lower.ends_with(&ext.to_lowercase())) {
            return false;
        }
        let excluded: std::collections::HashSet<String> =
            self.excluded_dirs.iter().map(|s| s.to_lowercase()).collect();
        !lower.split('/').any(|segment| excluded.contains(segment))
    }
}

/// `lowercase(relative(root, path)).replace('\\', '/')`.
fn path_to_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(relative.to_string_lossy().to_lowercase().replace('\\', "/"))
}

enum InternalMsg {
    Fs(Event),
    Flush,
    Stop,
}

/// A running watcher. Dropping the struct without calling `stop()` still
/// tears down the background thread (the notify watcher is dropped, the
/// channel disconnects, the loop exits) but skips the final log line.
pub struct Watcher {
    _inner: RecommendedWatcher,
    tx: mpsc::Sender<InternalMsg>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Start watching `config.root`. The `ready` phase covers watch
    /// registration: any native error during `watch()` aborts start with a
    /// failure; once registration succeeds, buffered events (there should
    /// be none, since registration is synchronous) are released and the
    /// watcher enters the running phase.
    pub fn start<F>(config: WatchConfig, callback: F) -> Result<Self, notify::Error>
    where
        F: Fn(HashMap<String, ChangeKind>) + Send + 'static,
    {
        let (fs_tx, fs_rx) = mpsc::channel::<InternalMsg>();
        let fs_tx_for_watcher = fs_tx.clone();

        let mut inner = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = fs_tx_for_watcher.send(InternalMsg::Fs(event));
                }
                Err(e) => error!(error = %e, "watcher notify error"),
            },
            notify::Config::default(),
        )?;

        inner.watch(&config.root, RecursiveMode::Recursive)?;

        let debounce = Duration::from_millis(config.debounce_ms.max(1));
        let thread = std::thread::spawn(move || run_loop(config, fs_rx, debounce, callback));

        Ok(Self { _inner: inner, tx: fs_tx, thread: Some(thread) })
    }

    /// Force immediate delivery of any pending batch. Used by tests.
    pub fn flush(&self) {
        let _ = self.tx.send(InternalMsg::Flush);
    }

    /// Stop the watcher: cancel the notifier and any pending debounce
    /// timer without flushing. Safe to call from within the callback
    /// (the stop message is queued, not executed inline).
    pub fn stop(mut self) {
        let _ = self.tx.send(InternalMsg::Stop);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<F>(config: WatchConfig, rx: mpsc::Receiver<InternalMsg>, debounce: Duration, callback: F)
where
    F: Fn(HashMap<String, ChangeKind>),
{
    let mut coalescer = Coalescer::default();
    let mut deadline: Option<Instant> = None;
    let poll_interval = debounce.min(Duration::from_millis(50));

    loop {
        match rx.recv_timeout(poll_interval) {
            Ok(InternalMsg::Fs(event)) => {
                let kind = match event.kind {
                    NotifyEventKind::Create(_) => Some(ChangeKind::Add),
                    NotifyEventKind::Modify(_) => Some(ChangeKind::Change),
                    NotifyEventKind::Remove(_) => Some(ChangeKind::Unlink),
                    _ => None,
                };
                let Some(kind) = kind else { continue };
                for path in &event.paths {
                    let Some(id) = path_to_id(&config.root, path) else { continue };
                    if !config.accepts(&id) {
                        continue;
                    }
                    coalescer.record(id, kind);
                }
                if coalescer.is_empty() {
                    deadline = None;
                } else {
                    deadline = Some(Instant::now() + debounce);
                }
            }
            Ok(InternalMsg::Flush) => {
                if !coalescer.is_empty() {
                    let batch = coalescer.take();
                    deadline = None;
                    run_callback(&callback, batch);
                }
            }
            Ok(InternalMsg::Stop) => {
                return;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(d) = deadline {
                    if Instant::now() >= d && !coalescer.is_empty() {
                        let batch = coalescer.take();
                        deadline = None;
                        run_callback(&callback, batch);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return;
            }
        }
    }
}

fn run_callback<F>(callback: &F, batch: HashMap<String, ChangeKind>)
where
    F: Fn(HashMap<String, ChangeKind>),
{
    // Isolate the callback so a panic (the "may throw" case from the spec)
    // is logged rather than taking down the watcher thread.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(batch)));
    if result.is_err() {
        warn!("watcher callback panicked; continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesce_add_then_unlink_clears_entry() {
        let mut c = Coalescer::default();
        c.record("a.md".into(), ChangeKind::Add);
        c.record("a.md".into(), ChangeKind::Unlink);
        assert!(c.is_empty());
    }

    #[test]
    fn coalesce_add_then_change_stays_add() {
        let mut c = Coalescer::default();
        c.record("a.md".into(), ChangeKind::Add);
        c.record("a.md".into(), ChangeKind::Change);
        assert_eq!(c.queue.get("a.md"), Some(&ChangeKind::Add));
    }

    #[test]
    fn coalesce_unlink_then_add_becomes_change() {
        let mut c = Coalescer::default();
        c.record("a.md".into(), ChangeKind::Unlink);
        c.record("a.md".into(), ChangeKind::Add);
        assert_eq!(c.queue.get("a.md"), Some(&ChangeKind::Change));
    }

    #[test]
    fn coalesce_change_then_unlink_becomes_unlink() {
        let mut c = Coalescer::default();
        c.record("a.md".into(), ChangeKind::Change);
        c.record("a.md".into(), ChangeKind::Unlink);
        assert_eq!(c.queue.get("a.md"), Some(&ChangeKind::Unlink));
    }

    #[test]
    fn coalesce_unlink_then_unlink_stays_unlink() {
        let mut c = Coalescer::default();
        c.record("a.md".into(), ChangeKind::Unlink);
        c.record("a.md".into(), ChangeKind::Unlink);
        assert_eq!(c.queue.get("a.md"), Some(&ChangeKind::Unlink));
    }

    #[test]
    fn config_rejects_excluded_dir_segment() {
        let config = WatchConfig {
            root: PathBuf::from("/vault"),
            debounce_ms: 1000,
            excluded_dirs: vec![".git".to_string()],
            extensions: vec![".md".to_string()],
        };
        assert!(!config.accepts(".git/a.md"));
        assert!(config.accepts("notes/a.md"));
    }

    #[test]
    fn config_rejects_non_matching_extension() {
        let config = WatchConfig {
            root: PathBuf::from("/vault"),
            debounce_ms: 1000,
            excluded_dirs: vec![],
            extensions: vec![".md".to_string()],
        };
        assert!(!config.accepts("notes/a.png"));
    }

    #[test]
    fn path_to_id_lowercases_and_forward_slashes() {
        let root = PathBuf::from("/vault");
        let path = PathBuf::from("/vault/Notes/A.MD");
        assert_eq!(path_to_id(&root, &path), Some("notes/a.md".to_string()));
    }
}
