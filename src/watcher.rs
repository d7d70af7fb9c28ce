//! Filesystem watcher that flags the status as stale.
//!
//! The notify callback only filters paths and forwards timestamps. A
//! separate task drops events caused by our own writes and runs two
//! trailing-edge debouncers: one for the stale banner and an optional one
//! for automatic refresh.

use crate::git::ActivityClock;
use error_set::error_set;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

error_set! {
    /// Errors setting up the change watcher
    WatcherError := {
        #[display("Failed to watch {path}: {message}")]
        WatchFailed { path: String, message: String },
    }
}

/// What the watcher asks of the status view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchSignal {
    /// The repository changed; `at` is the last change seen
    Stale { at: Instant },
    AutoRefresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub watch_worktree: bool,
    pub stale_debounce: Duration,
    /// `None` disables automatic refresh
    pub auto_refresh: Option<Duration>,
    /// Events this soon after our own writes are ignored
    pub cooldown: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            watch_worktree: false,
            stale_debounce: Duration::from_millis(200),
            auto_refresh: None,
            cooldown: Duration::from_millis(500),
        }
    }
}

/// Decides which changed paths matter.
struct PathFilter {
    root: PathBuf,
    git_dir: PathBuf,
    watch_worktree: bool,
    ignore: Mutex<Option<Gitignore>>,
}

impl PathFilter {
    fn new(root: &Path, git_dir: &Path, watch_worktree: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            git_dir: git_dir.to_path_buf(),
            watch_worktree,
            ignore: Mutex::new(None),
        }
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if let Ok(inside) = path.strip_prefix(&self.git_dir) {
            return Self::is_relevant_git_path(inside);
        }
        if !self.watch_worktree {
            return false;
        }
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        if relative
            .components()
            .any(|component| component == Component::Normal(".git".as_ref()))
        {
            return false;
        }

        if path.file_name().is_some_and(|name| name == ".gitignore") {
            *self.ignore.lock().unwrap_or_else(PoisonError::into_inner) = None;
            return true;
        }

        let mut cached = self.ignore.lock().unwrap_or_else(PoisonError::into_inner);
        let matcher = cached.get_or_insert_with(|| self.build_ignore());
        !matcher
            .matched_path_or_any_parents(relative, path.is_dir())
            .is_ignore()
    }

    // HEAD, index, refs, packed-refs and operation markers; never locks or objects
    fn is_relevant_git_path(inside: &Path) -> bool {
        if inside
            .extension()
            .is_some_and(|extension| extension == "lock")
        {
            return false;
        }
        !matches!(
            inside.components().next(),
            Some(Component::Normal(first)) if first == "objects" || first == "logs"
        )
    }

    fn build_ignore(&self) -> Gitignore {
        let mut builder = GitignoreBuilder::new(&self.root);
        for file in [
            self.root.join(".gitignore"),
            self.git_dir.join("info").join("exclude"),
        ] {
            if file.exists()
                && let Some(error) = builder.add(&file)
            {
                tracing::warn!(path = %file.display(), %error, "skipping ignore file");
            }
        }
        builder.build().unwrap_or_else(|error| {
            tracing::warn!(%error, "ignore rules unavailable");
            Gitignore::empty()
        })
    }
}

/// Live watch on one repository; stops when dropped.
pub struct ChangeWatcher {
    _watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
    signals: UnboundedReceiver<WatchSignal>,
}

impl ChangeWatcher {
    pub fn start(
        root: &Path,
        git_dir: &Path,
        clock: ActivityClock,
        options: WatchOptions,
    ) -> Result<Self, WatcherError> {
        let filter = Arc::new(PathFilter::new(root, git_dir, options.watch_worktree));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let callback_filter = Arc::clone(&filter);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    if event.paths.iter().any(|path| callback_filter.is_relevant(path)) {
                        let _ = event_tx.send(Instant::now());
                    }
                }
                Err(error) => tracing::warn!(%error, "watch error"),
            },
            Config::default(),
        )
        .map_err(|error| WatcherError::WatchFailed {
            path: root.display().to_string(),
            message: error.to_string(),
        })?;

        let mut targets = vec![(git_dir.to_path_buf(), RecursiveMode::NonRecursive)];
        let refs = git_dir.join("refs");
        if refs.is_dir() {
            targets.push((refs, RecursiveMode::Recursive));
        }
        if options.watch_worktree {
            targets.push((root.to_path_buf(), RecursiveMode::Recursive));
        }
        for (path, mode) in targets {
            watcher
                .watch(&path, mode)
                .map_err(|error| WatcherError::WatchFailed {
                    path: path.display().to_string(),
                    message: error.to_string(),
                })?;
        }

        let (signal_tx, signals) = mpsc::unbounded_channel();
        let task = spawn_debouncer(event_rx, clock, options, signal_tx);
        tracing::debug!(root = %root.display(), "watching for changes");

        Ok(Self {
            _watcher: Some(watcher),
            task: Some(task),
            signals,
        })
    }

    /// A watcher whose signals come from `signals` instead of the filesystem
    #[cfg(test)]
    pub(crate) fn from_signals(signals: UnboundedReceiver<WatchSignal>) -> Self {
        Self {
            _watcher: None,
            task: None,
            signals,
        }
    }

    /// Wait for the next signal.
    pub async fn next(&mut self) -> Option<WatchSignal> {
        self.signals.recv().await
    }

    /// A signal already waiting, if any.
    pub fn try_next(&mut self) -> Option<WatchSignal> {
        self.signals.try_recv().ok()
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Turn raw event timestamps into debounced signals.
pub fn spawn_debouncer(
    mut events: UnboundedReceiver<Instant>,
    clock: ActivityClock,
    options: WatchOptions,
    signals: UnboundedSender<WatchSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stale: Option<(tokio::time::Instant, Instant)> = None;
        let mut refresh: Option<tokio::time::Instant> = None;
        let now = tokio::time::Instant::now;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(at) = event else { break };
                    if clock.suppresses(at, options.cooldown) {
                        tracing::trace!("ignoring change from our own write");
                        continue;
                    }
                    stale = Some((now() + options.stale_debounce, at));
                    if let Some(delay) = options.auto_refresh {
                        refresh = Some(now() + delay);
                    }
                }
                () = tokio::time::sleep_until(stale.map_or_else(now, |(deadline, _)| deadline)),
                    if stale.is_some() =>
                {
                    if let Some((_, at)) = stale.take()
                        && signals.send(WatchSignal::Stale { at }).is_err()
                    {
                        break;
                    }
                }
                () = tokio::time::sleep_until(refresh.unwrap_or_else(now)), if refresh.is_some() => {
                    refresh = None;
                    if signals.send(WatchSignal::AutoRefresh).is_err() {
                        break;
                    }
                }
            }
        }
    })
}
