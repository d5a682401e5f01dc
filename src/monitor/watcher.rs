// Directory Watcher - filesystem change detection for certificate trees
//
// Every non-skipped directory under the configured roots is registered
// non-recursively, so the watch set can be kept in step with directories
// appearing and disappearing at runtime. The configuration file gets its own
// watch handle and a debounced reload.

use super::reload::ReloadCoordinator;
use crate::config::ConfigHandle;
use crate::constants::{CONFIG_DEBOUNCE, is_skipped_subtree};
use crate::error::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

struct WatchState {
    watcher: Option<RecommendedWatcher>,
    /// Directories currently registered with `watcher`
    watched: HashSet<PathBuf>,
}

pub struct DirectoryWatcher {
    config: ConfigHandle,
    reload: ReloadCoordinator,
    state: Mutex<WatchState>,
    events: Mutex<Option<EventReceiver>>,
    config_watcher: Mutex<Option<RecommendedWatcher>>,
    debounce: Duration,
}

impl DirectoryWatcher {
    pub fn new(config: ConfigHandle, reload: ReloadCoordinator) -> Result<Self> {
        let (watcher, events) = channel_watcher()?;
        Ok(Self {
            config,
            reload,
            state: Mutex::new(WatchState {
                watcher: Some(watcher),
                watched: HashSet::new(),
            }),
            events: Mutex::new(Some(events)),
            config_watcher: Mutex::new(None),
            debounce: CONFIG_DEBOUNCE,
        })
    }

    /// Override the configuration debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the event loops. The configured roots are registered on the
    /// blocking pool before the first event is handled.
    ///
    /// Registration failures are logged per directory and never abort startup.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let config = self.config.get();
        let mut handles = Vec::new();

        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match events {
            Some(events) => {
                handles.push(tokio::spawn(
                    Arc::clone(self).event_loop(events, cancel.clone()),
                ));
            }
            None => tracing::warn!("Watcher event loop already started"),
        }

        if let Some(config_file) = config.config_file.clone() {
            match self.watch_config_file(&config_file) {
                Ok(events) => {
                    handles.push(tokio::spawn(Arc::clone(self).config_loop(
                        config_file,
                        events,
                        cancel,
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        file = %config_file.display(),
                        "Unable to watch config file: {}",
                        e
                    );
                }
            }
        }

        handles
    }

    /// Close both watch handles and forget every registered directory
    pub fn stop(&self) {
        let mut state = self.lock_state();
        state.watcher = None;
        state.watched.clear();
        drop(state);

        *self
            .config_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        tracing::info!("File system watcher stopped");
    }

    /// Snapshot of the watch set, sorted
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.lock_state().watched.iter().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Register `root` and every non-skipped directory below it.
    ///
    /// Stale entries are pruned first. Returns the number of newly registered directories.
    pub fn register_tree(&self, root: &Path) -> usize {
        self.prune_stale();

        let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        let mut added = 0;

        let walker = WalkDir::new(&root).into_iter().filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return false;
            }
            let skip =
                entry.depth() > 0 && entry.file_name().to_str().is_some_and(is_skipped_subtree);
            if skip {
                tracing::debug!(dir = %entry.path().display(), "Skipping excluded directory from watcher");
            }
            !skip
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %root.display(), "Error walking directory for watcher: {}", e);
                    continue;
                }
            };
            let path = entry.path();

            let mut state = self.lock_state();
            if state.watched.contains(path) {
                continue;
            }
            let Some(watcher) = state.watcher.as_mut() else {
                return added;
            };

            match watcher.watch(path, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    state.watched.insert(path.to_path_buf());
                    added += 1;
                    tracing::debug!(dir = %path.display(), "Added directory to file system watcher");
                }
                Err(e) => {
                    tracing::warn!(dir = %path.display(), "Failed to add directory to watcher: {}", e);
                }
            }
        }

        added
    }

    /// Register every root tree. A root that cannot be walked or watched is
    /// logged and the remaining roots are still registered.
    pub fn register_roots(&self, roots: &[PathBuf]) -> usize {
        let mut total = 0;
        for dir in roots {
            let added = self.register_tree(dir);
            if added == 0 && !self.is_watched(dir) {
                tracing::warn!(dir = %dir.display(), "Certificate directory could not be watched");
            } else {
                tracing::info!(
                    dir = %dir.display(),
                    added,
                    "Added certificate directory tree to watcher"
                );
            }
            total += added;
        }
        total
    }

    fn is_watched(&self, dir: &Path) -> bool {
        let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
        self.lock_state().watched.contains(&dir)
    }

    /// Drop `path` and every watched directory below it. Returns how many were removed.
    pub fn remove_tree(&self, path: &Path) -> usize {
        let mut state = self.lock_state();
        let doomed: Vec<PathBuf> = state
            .watched
            .iter()
            .filter(|watched| watched.starts_with(path))
            .cloned()
            .collect();

        for dir in &doomed {
            state.watched.remove(dir);
            if let Some(watcher) = state.watcher.as_mut()
                && let Err(e) = watcher.unwatch(dir)
            {
                // The kernel already drops watches of deleted directories.
                tracing::debug!(dir = %dir.display(), "Unwatch failed: {}", e);
            }
            tracing::debug!(dir = %dir.display(), "Removed directory from file system watcher");
        }

        doomed.len()
    }

    /// Remove watched directories that no longer exist on disk
    pub fn prune_stale(&self) -> usize {
        let stale: Vec<PathBuf> = self
            .lock_state()
            .watched
            .iter()
            .filter(|dir| fs::metadata(dir).is_err())
            .cloned()
            .collect();

        let mut removed = 0;
        for dir in &stale {
            removed += self.remove_tree(dir);
        }
        if removed > 0 {
            tracing::info!(removed, "Cleaned up stale directory watchers");
        }
        removed
    }

    /// Apply one filesystem event. Returns true when a rescan was requested.
    pub fn handle_event(&self, event: &Event) -> bool {
        if is_removal(&event.kind) {
            for path in &event.paths {
                let gone_or_dir = match fs::metadata(path) {
                    Err(e) => e.kind() == std::io::ErrorKind::NotFound,
                    Ok(meta) => meta.is_dir(),
                };
                if gone_or_dir {
                    self.remove_tree(path);
                }
            }
        }

        if is_creation(&event.kind) {
            for path in &event.paths {
                let excluded = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(is_skipped_subtree);
                if path.is_dir() && !excluded {
                    self.register_tree(path);
                }
            }
        }

        if triggers_rescan(&event.kind) {
            tracing::info!(
                kind = ?event.kind,
                paths = ?event.paths,
                "Detected filesystem change, requesting rescan"
            );
            self.reload.trigger();
            return true;
        }

        false
    }

    async fn event_loop(self: Arc<Self>, mut events: EventReceiver, cancel: CancellationToken) {
        let watcher = Arc::clone(&self);
        let roots = self.config.get().cert_dirs.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || watcher.register_roots(&roots)).await
        {
            tracing::error!("Watcher root registration failed: {}", e);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Watcher loop shutting down");
                    break;
                }
                next = events.recv() => match next {
                    Some(Ok(event)) => {
                        let watcher = Arc::clone(&self);
                        if let Err(e) =
                            tokio::task::spawn_blocking(move || watcher.handle_event(&event)).await
                        {
                            tracing::error!("Watcher event handling failed: {}", e);
                        }
                    }
                    Some(Err(e)) => tracing::warn!("Watcher internal error: {}", e),
                    None => {
                        tracing::info!("File system watcher events channel closed");
                        break;
                    }
                }
            }
        }
    }

    /// Watch the directory holding the config file, so editors that replace the
    /// file on save keep being noticed.
    fn watch_config_file(&self, config_file: &Path) -> Result<EventReceiver> {
        let (mut watcher, events) = channel_watcher()?;
        let parent = config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher.watch(parent, RecursiveMode::NonRecursive)?;

        *self
            .config_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(events)
    }

    async fn config_loop(
        self: Arc<Self>,
        config_file: PathBuf,
        events: EventReceiver,
        cancel: CancellationToken,
    ) {
        let accept = |next: &notify::Result<Event>| match next {
            Ok(event) => is_config_change(event, &config_file),
            Err(e) => {
                tracing::warn!("Config watcher internal error: {}", e);
                false
            }
        };
        let watcher = Arc::clone(&self);
        let fire = move || {
            let watcher = Arc::clone(&watcher);
            // YAML read and tree walk stay off the async workers.
            let _ = tokio::task::spawn_blocking(move || {
                watcher.reload_config();
            });
        };
        debounce(events, self.debounce, cancel, accept, fire).await;
        tracing::info!("Config watcher shutting down");
    }

    /// Re-read the configuration; on success swap it in, watch new roots and rescan
    pub fn reload_config(&self) -> bool {
        match self.config.reload() {
            Ok(config) => {
                tracing::info!(
                    cert_dirs = config.cert_dirs.len(),
                    port = config.port,
                    "Config reloaded successfully"
                );
                self.register_roots(&config.cert_dirs);
                self.reload.trigger();
                true
            }
            Err(e) => {
                tracing::warn!("Config reload failed, keeping current configuration: {}", e);
                false
            }
        }
    }
}

fn channel_watcher() -> Result<(RecommendedWatcher, EventReceiver)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = recommended_watcher(move |event: notify::Result<Event>| {
        // Receiver gone means the loop is shutting down.
        let _ = tx.send(event);
    })?;
    Ok((watcher, rx))
}

fn is_removal(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From))
    )
}

fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

/// Create, write, remove and rename. Attribute changes and reads are ignored.
fn triggers_rescan(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Write, create or rename touching the config file
fn is_config_change(event: &Event, config_file: &Path) -> bool {
    let relevant = match &event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    relevant
        && event
            .paths
            .iter()
            .any(|path| path.file_name().is_some() && path.file_name() == config_file.file_name())
}

/// Single-timer debounce: every accepted event re-arms the timer, `fire` runs
/// once the window passes without further accepted events.
pub(crate) async fn debounce<T, A, F>(
    mut events: mpsc::UnboundedReceiver<T>,
    window: Duration,
    cancel: CancellationToken,
    mut accept: A,
    mut fire: F,
) where
    A: FnMut(&T) -> bool,
    F: FnMut(),
{
    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        let armed = deadline;
        let timer = async move {
            match armed {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            next = events.recv() => match next {
                Some(event) => {
                    if accept(&event) {
                        tracing::debug!("Config file change detected, debouncing reload");
                        deadline = Some(tokio::time::Instant::now() + window);
                    }
                }
                None => break,
            },
            _ = timer => {
                deadline = None;
                tracing::info!("Debounced config reload triggered");
                fire();
            }
        }
    }
}
