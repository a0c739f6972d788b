//! Source watcher for hot restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::WatchConfig;
use crate::error::WorkerError;

/// A watcher that monitors source trees and reports debounced changes.
///
/// Dropping it stops the underlying OS watch.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    paths: Vec<PathBuf>,
}

impl SourceWatcher {
    /// Start watching `config.paths` recursively.
    ///
    /// Returns the watcher and a receiver yielding one `()` per burst of
    /// changes, sent after `debounce_ms` without further events.
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &WatchConfig) -> Result<(Self, mpsc::Receiver<()>), WorkerError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let (change_tx, change_rx) = mpsc::channel(1);
        let extensions = normalize_extensions(&config.extensions);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let kind = &event.kind;
                    if !(kind.is_modify() || kind.is_create() || kind.is_remove()) {
                        return;
                    }
                    for path in event.paths {
                        if has_watched_extension(&path, &extensions) {
                            let _ = raw_tx.send(path);
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let paths: Vec<PathBuf> = config.paths.iter().map(PathBuf::from).collect();
        for path in &paths {
            watcher.watch(path, RecursiveMode::Recursive)?;
        }

        tokio::spawn(debounce(raw_rx, change_tx, config.debounce()));

        tracing::info!(paths = ?paths, debounce_ms = config.debounce_ms, "Source watcher started");
        Ok((
            Self {
                _watcher: watcher,
                paths,
            },
            change_rx,
        ))
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Collapse a burst of raw events into a single notification.
async fn debounce(
    mut raw: mpsc::UnboundedReceiver<PathBuf>,
    changes: mpsc::Sender<()>,
    quiet: Duration,
) {
    while let Some(first) = raw.recv().await {
        let mut last = first;
        let mut count = 1u64;
        loop {
            match tokio::time::timeout(quiet, raw.recv()).await {
                Ok(Some(path)) => {
                    last = path;
                    count += 1;
                }
                Ok(None) => return,
                Err(_) => break,
            }
        }

        tracing::info!(path = %last.display(), events = count, "Source change detected");
        // A restart already queued covers this burst too.
        if let Err(mpsc::error::TrySendError::Closed(())) = changes.try_send(()) {
            return;
        }
    }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn has_watched_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|want| want.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}
