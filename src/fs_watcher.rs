//! Non-recursive watch over the shared registration directory.
//!
//! Uses the `notify` crate and bridges its synchronous callback into an
//! unbounded tokio channel. Every create/remove event is forwarded
//! individually — no coalescing — because a missed event for the
//! orchestrator's socket or our own socket means an undetected restart.
//! Observation errors become [`WatchEvent::Error`] items rather than
//! terminating the stream; only watch *setup* failures are fatal.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::info;

use crate::{AppError, Result};

/// One filesystem observation on the registration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A directory entry appeared.
    Created(PathBuf),
    /// A directory entry disappeared.
    Removed(PathBuf),
    /// The watch backend reported a transient error.
    Error(String),
}

/// Live watch over a single directory's direct entries.
///
/// The event stream is lazy and effectively infinite; it closes when the
/// watcher is dropped and cannot be reopened — construct a new `DirWatcher`
/// instead.
#[derive(Debug)]
pub struct DirWatcher {
    /// Underlying notify watcher — kept alive by owning it here.
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<WatchEvent>,
}

impl DirWatcher {
    /// Start watching `dir` for create/remove events on its direct entries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::WatchSetup` when `dir` is not an existing
    /// directory or the OS watch cannot be established. Callers treat this
    /// as fatal: without the watch the harness cannot detect restarts.
    pub fn new(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(AppError::WatchSetup(format!(
                "registration directory '{}' does not exist",
                dir.display()
            )));
        }

        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    // One notify event may carry several paths; forward each.
                    match event.kind {
                        EventKind::Create(_) => {
                            for path in event.paths {
                                let _ = tx.send(WatchEvent::Created(path));
                            }
                        }
                        EventKind::Remove(_) => {
                            for path in event.paths {
                                let _ = tx.send(WatchEvent::Removed(path));
                            }
                        }
                        _ => {}
                    }
                }
                Err(err) => {
                    let _ = tx.send(WatchEvent::Error(err.to_string()));
                }
            },
        )
        .map_err(|err| AppError::WatchSetup(format!("failed to create watcher: {err}")))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::WatchSetup(format!(
                    "failed to watch directory '{}': {err}",
                    dir.display()
                ))
            })?;

        info!(dir = %dir.display(), "registration directory watch started");

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Receive the next event, in OS delivery order.
    ///
    /// Returns `None` once the watcher has been dropped.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }
}
