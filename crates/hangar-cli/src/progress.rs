//! One-line progress rendering for long-running operations.

use console::{Term, style};

use hangar_core::prelude::ProgressSink;

const BAR_WIDTH: usize = 20;

/// Redraws a single terminal line on every progress report.
///
/// Falls back to printing each new status on its own line when stderr is not
/// a terminal.
pub struct ProgressLine {
    term: Term,
    interactive: bool,
    last_status: Option<String>,
    drawn: bool,
}

impl ProgressLine {
    pub fn new() -> Self {
        let term = Term::stderr();
        Self {
            interactive: term.is_term(),
            term,
            last_status: None,
            drawn: false,
        }
    }

    /// Clear the line so regular output starts on a clean row.
    pub fn finish(&mut self) {
        if self.drawn {
            let _ = self.term.clear_line();
            self.drawn = false;
        }
    }
}

impl Drop for ProgressLine {
    fn drop(&mut self) {
        self.finish();
    }
}

impl ProgressSink for ProgressLine {
    fn on_progress(&mut self, status: &str, percent: u32, estimating: bool) {
        if self.interactive {
            let width = usize::from(self.term.size().1);
            let line = render_line(status, percent, estimating, width);
            let _ = self.term.clear_line();
            let _ = self.term.write_str(&line);
            self.drawn = true;
        } else if self.last_status.as_deref() != Some(status) {
            let _ = self.term.write_line(&format!("{percent:>3}% {status}"));
            self.last_status = Some(status.to_string());
        }
    }
}

pub fn render_line(status: &str, percent: u32, estimating: bool, width: usize) -> String {
    let percent = percent.min(100);
    let filled = BAR_WIDTH * percent as usize / 100;
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled));
    let label = if estimating {
        " ?%".to_string()
    } else {
        format!("{percent:>3}%")
    };

    // "[bar] 100% " plus the status, cut to the terminal width.
    let prefix_len = BAR_WIDTH + 2 + 1 + label.len() + 1;
    let room = width.saturating_sub(prefix_len);
    let status: String = status.chars().take(room).collect();
    format!("[{}] {} {}", style(bar).cyan(), style(label).bold(), status)
}
