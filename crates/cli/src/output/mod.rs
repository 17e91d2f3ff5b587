//! Terminal output: formatting, JSON mode and transfer progress

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::BarReporter;

/// Output settings shared by every command
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Strict JSON on stdout, no colors or progress bars
    pub json: bool,
    pub no_color: bool,
    /// Suppress everything except errors
    pub quiet: bool,
}
