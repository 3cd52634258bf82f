//! Transfer progress: raw counters from the store, translated for callers.
//!
//! The store runs transfers on a background task and publishes
//! [`TransferProgress`] ticks through a [`ProgressReporter`]. The orchestrator
//! drains them on the calling thread, runs them through a
//! [`ProgressTranslator`] and hands the result to the caller's
//! [`ProgressSink`].

mod format;
mod translator;

pub use format::format_size;
pub use translator::{ProgressTranslator, ProgressUpdate, transfer_rate};

use std::time::{Duration, Instant};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Low-level counters describing an in-flight transfer.
///
/// All counters are snapshots, not deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Free-form status that overrides the derived status line.
    pub status: Option<String>,
    pub outstanding_fetches: u32,
    pub outstanding_metadata_fetches: u32,
    pub outstanding_writes: u32,
    pub scanned_metadata: u32,
    pub fetched_delta_parts: u32,
    pub total_delta_parts: u32,
    pub total_delta_part_size: u64,
    pub bytes_transferred: u64,
    pub fetched: u32,
    pub metadata_fetched: u32,
    pub requested: u32,
    /// Time since the transfer started; filled in by the reporter.
    pub elapsed: Duration,
}

/// Receives translated progress during a long-running call.
///
/// Invoked synchronously on the caller's thread, zero or more times.
pub trait ProgressSink {
    fn on_progress(&mut self, status: &str, percent: u32, estimating: bool);
}

impl<F> ProgressSink for F
where
    F: FnMut(&str, u32, bool),
{
    fn on_progress(&mut self, status: &str, percent: u32, estimating: bool) {
        self(status, percent, estimating)
    }
}

/// Publishing side handed to store transfers.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<UnboundedSender<TransferProgress>>,
    started: Instant,
}

impl ProgressReporter {
    pub fn channel() -> (Self, UnboundedReceiver<TransferProgress>) {
        let (tx, rx) = unbounded_channel();
        let reporter = Self {
            tx: Some(tx),
            started: Instant::now(),
        };
        (reporter, rx)
    }

    /// A reporter that drops every tick.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            started: Instant::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn report(&self, mut tick: TransferProgress) {
        let Some(tx) = &self.tx else {
            return;
        };
        tick.elapsed = self.started.elapsed();
        // The receiver only goes away once the operation is being torn down.
        let _ = tx.send(tick);
    }

    pub fn status(&self, status: impl Into<String>) {
        self.report(TransferProgress {
            status: Some(status.into()),
            ..TransferProgress::default()
        });
    }
}
