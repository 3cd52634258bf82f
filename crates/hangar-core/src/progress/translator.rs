//! Turns raw transfer counters into a monotonic percentage and a status line.

use std::time::Duration;

use super::format::format_size;
use super::TransferProgress;

/// One user-facing progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub status: String,
    /// 0..=100, never lower than any earlier value from the same translator.
    pub percent: u32,
    /// Set while the total amount of data is still unknown.
    pub estimating: bool,
}

/// Stateful translator for a single logical operation.
///
/// The floor starts at zero for every new translator and is never reset
/// afterwards, so a fresh operation (including a caller-level retry) starts
/// from zero while a running one can only move forward.
#[derive(Debug, Default)]
pub struct ProgressTranslator {
    last_progress: u32,
}

impl ProgressTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_progress(&self) -> u32 {
        self.last_progress
    }

    pub fn translate(&mut self, tick: &TransferProgress) -> ProgressUpdate {
        let mut new_progress = 0u32;
        let mut estimating = false;

        let status = if let Some(status) = &tick.status {
            status.clone()
        } else if tick.outstanding_fetches > 0 {
            let transferred = format_size(tick.bytes_transferred);
            let rate = transfer_rate(tick.bytes_transferred, tick.elapsed)
                .map(format_size)
                .unwrap_or_else(|| "-".to_string());

            if tick.total_delta_parts > 0 && tick.total_delta_part_size > 0 {
                new_progress = percent_of(tick.bytes_transferred, tick.total_delta_part_size);
                format!(
                    "Receiving delta parts: {}/{} {}/s {}/{}",
                    tick.fetched_delta_parts,
                    tick.total_delta_parts,
                    rate,
                    transferred,
                    format_size(tick.total_delta_part_size)
                )
            } else if tick.outstanding_metadata_fetches > 0 {
                // Nothing is known about the total yet; hold at 1% until
                // every metadata object has been scanned.
                new_progress = 1;
                estimating = true;
                format!(
                    "Receiving metadata objects: {}/(estimating) {}/s {}",
                    tick.metadata_fetched, rate, transferred
                )
            } else if tick.requested > 0 {
                new_progress = percent_of(u64::from(tick.fetched), u64::from(tick.requested));
                format!(
                    "Receiving objects: {}% ({}/{}) {}/s {}",
                    new_progress, tick.fetched, tick.requested, rate, transferred
                )
            } else {
                format!("Receiving objects: 0/0 {rate}/s {transferred}")
            }
        } else if tick.outstanding_writes > 0 {
            format!("Writing objects: {}", tick.outstanding_writes)
        } else {
            format!("Scanning metadata: {}", tick.scanned_metadata)
        };

        let percent = new_progress.max(self.last_progress);
        self.last_progress = percent;

        ProgressUpdate {
            status,
            percent,
            estimating,
        }
    }
}

/// Bytes per second, or `None` during the first second (and while nothing
/// has arrived) so callers don't show a meaningless spike.
pub fn transfer_rate(bytes_transferred: u64, elapsed: Duration) -> Option<u64> {
    let secs = elapsed.as_secs();
    if secs == 0 {
        return None;
    }
    match bytes_transferred / secs {
        0 => None,
        rate => Some(rate),
    }
}

fn percent_of(part: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    let percent = part.saturating_mul(100) / total;
    percent.min(100) as u32
}
