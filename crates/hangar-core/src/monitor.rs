//! Change notification for an installation.
//!
//! Every visible change rewrites `<root>/.changed`; the monitor watches the
//! installation root and reports events touching that file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use anyhow::Context;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

pub struct ChangeMonitor {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    changed_path: PathBuf,
    file_name: OsString,
}

impl std::fmt::Debug for ChangeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeMonitor")
            .field("changed_path", &self.changed_path)
            .finish_non_exhaustive()
    }
}

impl ChangeMonitor {
    pub fn new(changed_path: PathBuf) -> anyhow::Result<Self> {
        let dir = changed_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("No parent for {}", changed_path.display()))?
            .to_path_buf();
        let file_name = changed_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("No file name in {}", changed_path.display()))?
            .to_os_string();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch path: {}", dir.display()))?;

        Ok(Self {
            _watcher: watcher,
            rx,
            changed_path,
            file_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.changed_path
    }

    /// Drain pending events; true if any of them marked a change.
    pub fn poll(&self) -> bool {
        let mut changed = false;
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => changed |= self.is_change(&event),
                Ok(Err(err)) => tracing::debug!("watcher error: {err}"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        changed
    }

    /// Block for at most `timeout` until a change is seen.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(Ok(event)) if self.is_change(&event) => {
                    // Swallow the rest of the burst from the same write.
                    self.poll();
                    return true;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::debug!("watcher error: {err}"),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
    }

    fn is_change(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(self.file_name.as_os_str()))
    }
}
