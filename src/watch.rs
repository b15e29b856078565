//! Change notification for block source directories.
//!
//! The repository only needs to hear "the corpus may have changed". The
//! [`ChangeNotifier`] trait is that capability; [`NotifyWatcher`] backs it with
//! the file system and [`ManualNotifier`] lets a host fire it explicitly.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

type Disposer = Box<dyn FnOnce() + Send>;

/// Stops a subscription when disposed or dropped. Disposing twice is a no-op.
#[must_use = "dropping the handle stops watching"]
pub struct WatchHandle {
    disposers: Mutex<Vec<Disposer>>,
    disposed: AtomicBool,
}

impl WatchHandle {
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposers: Mutex::new(vec![Box::new(dispose)]),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn noop() -> Self {
        Self {
            disposers: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Run `dispose` after the existing disposers.
    pub fn and_then(mut self, dispose: impl FnOnce() + Send + 'static) -> Self {
        self.disposers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(dispose));
        self
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let disposers = std::mem::take(
            &mut *self
                .disposers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for dispose in disposers {
            dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

pub trait ChangeNotifier: Send + Sync {
    /// Invoke `on_change` whenever something under `dirs` may have changed.
    fn subscribe(&self, dirs: &[PathBuf], on_change: ChangeCallback) -> crate::Result<WatchHandle>;
}

/// File system backed notifier.
#[derive(Debug, Clone)]
pub struct NotifyWatcher {
    poll_interval: Duration,
}

impl Default for NotifyWatcher {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll interval for platforms without native notifications.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn is_change(kind: &EventKind) -> bool {
        matches!(
            kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        )
    }

    /// Path as the OS reports it in events (symlinked temp dirs resolve).
    fn event_path(dir: &Path) -> PathBuf {
        if let Ok(path) = dir.canonicalize() {
            return path;
        }
        match (dir.parent().and_then(|p| p.canonicalize().ok()), dir.file_name()) {
            (Some(parent), Some(name)) => parent.join(name),
            _ => dir.to_path_buf(),
        }
    }

    /// A missing directory is watched through its parent so its creation is seen.
    fn watch_target(dir: &Path) -> Option<&Path> {
        if dir.exists() {
            return Some(dir);
        }
        dir.parent().filter(|p| p.exists())
    }
}

/// Watcher state shared between the subscription handle and the event thread.
struct WatchState {
    watcher: Option<RecommendedWatcher>,
    targets: Vec<PathBuf>,
    watched: Vec<PathBuf>,
}

impl WatchState {
    fn watch(&mut self, path: &Path) -> bool {
        if self.watched.iter().any(|w| w == path) {
            return true;
        }
        let Some(watcher) = self.watcher.as_mut() else {
            return false;
        };
        match watcher.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                self.watched.push(path.to_path_buf());
                true
            }
            Err(e) => {
                warn!("Failed to watch directory {:?}: {}", path, e);
                false
            }
        }
    }

    fn unwatch(&mut self, path: &Path) {
        self.watched.retain(|w| w != path);
        if let Some(watcher) = self.watcher.as_mut() {
            let _ = watcher.unwatch(path);
        }
    }

    /// Watch targets that appeared; fall back to the parent for targets that
    /// disappeared.
    fn refresh(&mut self) {
        for dir in self.targets.clone() {
            let exists = dir.is_dir();
            let watched = self.watched.contains(&dir);
            if exists && !watched {
                if self.watch(&dir) {
                    debug!("Directory created, now watching: {:?}", dir);
                }
            } else if !exists && watched {
                self.unwatch(&dir);
                if let Some(parent) = dir.parent().filter(|p| p.exists()) {
                    self.watch(parent);
                }
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            for dir in &self.watched {
                let _ = watcher.unwatch(dir);
            }
        }
        self.watched.clear();
    }
}

impl ChangeNotifier for NotifyWatcher {
    fn subscribe(&self, dirs: &[PathBuf], on_change: ChangeCallback) -> crate::Result<WatchHandle> {
        let config = Config::default()
            .with_poll_interval(self.poll_interval)
            .with_compare_contents(false);

        // Events are handled off the notify thread so the handler can add watches.
        let (tx, rx) = mpsc::channel::<Result<Event, notify::Error>>();
        let watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let _ = tx.send(result);
            },
            config,
        )?;

        let state = Arc::new(Mutex::new(WatchState {
            watcher: Some(watcher),
            targets: dirs.to_vec(),
            watched: Vec::new(),
        }));

        {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            for dir in dirs {
                let Some(target) = Self::watch_target(dir) else {
                    debug!("Directory does not exist, skipping: {:?}", dir);
                    continue;
                };
                guard.watch(target);
            }
            info!(
                "Prompt block watcher started for {} directories",
                guard.watched.len()
            );
        }

        let mut targets = dirs.to_vec();
        targets.extend(dirs.iter().map(|d| Self::event_path(d)));
        targets.dedup();
        let events_state = Arc::clone(&state);
        let spawned = std::thread::Builder::new()
            .name("prompt-blocks-watch".into())
            .spawn(move || {
                while let Ok(result) = rx.recv() {
                    match result {
                        Ok(event) if Self::is_change(&event.kind) => {
                            let relevant = event
                                .paths
                                .iter()
                                .any(|p| targets.iter().any(|t| p.starts_with(t)));
                            if !relevant {
                                continue;
                            }
                            events_state
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .refresh();
                            debug!(paths = ?event.paths, "prompt block sources changed");
                            on_change();
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Watch error: {}", e),
                    }
                }
                debug!("Prompt block watch channel closed");
            });

        if let Err(e) = spawned {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stop();
            return Err(crate::Error::Task(format!(
                "failed to start watch thread: {}",
                e
            )));
        }

        Ok(WatchHandle::new(move || {
            state.lock().unwrap_or_else(PoisonError::into_inner).stop();
            info!("Prompt block watcher stopped");
        }))
    }
}

/// Notifier fired explicitly through [`ManualNotifier::notify_change`].
#[derive(Clone, Default)]
pub struct ManualNotifier {
    subscribers: Arc<Mutex<Vec<(u64, ChangeCallback)>>>,
    next_id: Arc<AtomicU64>,
}

impl ManualNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_change(&self) {
        let callbacks: Vec<ChangeCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for ManualNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ChangeNotifier for ManualNotifier {
    fn subscribe(&self, _dirs: &[PathBuf], on_change: ChangeCallback) -> crate::Result<WatchHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, on_change));

        let subscribers = Arc::clone(&self.subscribers);
        Ok(WatchHandle::new(move || {
            subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(sub_id, _)| *sub_id != id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, ChangeCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        let callback: ChangeCallback = Arc::new(move || {
            cb_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_handle_dispose_is_idempotent() {
        let (count, callback) = counter();
        let handle = WatchHandle::new(move || callback());

        handle.dispose();
        handle.dispose();
        assert!(handle.is_disposed());
        drop(handle);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_dispose_on_drop() {
        let (count, callback) = counter();
        {
            let _handle = WatchHandle::new(move || callback());
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_and_then_runs_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&order);
        let second = Arc::clone(&order);

        let handle = WatchHandle::new(move || first.lock().unwrap().push(1))
            .and_then(move || second.lock().unwrap().push(2));
        handle.dispose();

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_manual_notifier() {
        let notifier = ManualNotifier::new();
        let (count, callback) = counter();

        let handle = notifier.subscribe(&[], callback).unwrap();
        assert_eq!(notifier.subscriber_count(), 1);

        notifier.notify_change();
        notifier.notify_change();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        handle.dispose();
        assert_eq!(notifier.subscriber_count(), 0);
        notifier.notify_change();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_notify_watcher_nonexistent_dir() {
        let (_count, callback) = counter();
        let handle = NotifyWatcher::new()
            .subscribe(&[PathBuf::from("/nonexistent/root/prompts")], callback);
        assert!(handle.is_ok());
    }

    async fn wait_for(count: &AtomicUsize, above: usize) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) <= above {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    #[tokio::test]
    async fn test_notify_watcher_follows_created_dir() {
        let temp = tempfile::tempdir().unwrap();
        let prompts = temp.path().join("prompts");
        let (count, callback) = counter();

        let handle = NotifyWatcher::new()
            .subscribe(&[prompts.clone()], callback)
            .unwrap();

        tokio::fs::write(temp.path().join("unrelated.txt"), "x")
            .await
            .unwrap();
        tokio::fs::create_dir(&prompts).await.unwrap();
        assert!(wait_for(&count, 0).await, "directory creation not seen");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let after_mkdir = count.load(Ordering::SeqCst);

        tokio::fs::write(prompts.join("a.yaml"), "name: a")
            .await
            .unwrap();
        assert!(
            wait_for(&count, after_mkdir).await,
            "file written inside the created directory not seen"
        );

        handle.dispose();
    }

    #[tokio::test]
    async fn test_notify_watcher_sees_new_file() {
        let temp = tempfile::tempdir().unwrap();
        let (count, callback) = counter();

        let handle = NotifyWatcher::new()
            .subscribe(&[temp.path().to_path_buf()], callback)
            .unwrap();

        tokio::fs::write(temp.path().join("new.yaml"), "name: new")
            .await
            .unwrap();
        assert!(wait_for(&count, 0).await);

        handle.dispose();
    }
}
