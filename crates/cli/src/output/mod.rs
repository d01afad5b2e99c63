//! Output formatting utilities
//!
//! Formatters for human-readable and JSON output, plus the progress display
//! that follows the transfer engine's task stream.

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::TaskProgress;

/// Output configuration derived from CLI flags
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Use JSON output format
    pub json: bool,
    /// Disable colored output
    pub no_color: bool,
    /// Disable progress bar
    pub no_progress: bool,
    /// Suppress non-error output
    pub quiet: bool,
}

impl OutputConfig {
    /// Whether progress bars may be drawn
    pub fn show_progress(&self) -> bool {
        !(self.quiet || self.json || self.no_progress)
    }
}
