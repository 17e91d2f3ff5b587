use indicatif::{ProgressBar, ProgressStyle};
use stow_core::{ProgressReporter, TransferProgress};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} {bytes} ({bytes_per_sec})";

/// Drives an indicatif bar from storage progress callbacks
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new(label: impl Into<String>, total: Option<u64>) -> Self {
        let bar = match total {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        let template = if total.is_some() {
            BAR_TEMPLATE
        } else {
            SPINNER_TEMPLATE
        };
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(label.into());
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for BarReporter {
    fn report(&self, progress: TransferProgress) {
        if let Some(total) = progress.total
            && self.bar.length() != Some(total)
        {
            self.bar.set_length(total);
        }
        self.bar.set_position(progress.transferred);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_tracks_transfer() {
        let reporter = BarReporter::new("upload", None);
        reporter.report(TransferProgress {
            transferred: 10,
            total: Some(40),
        });
        assert_eq!(reporter.bar.length(), Some(40));
        assert_eq!(reporter.bar.position(), 10);
        reporter.finish();
        assert!(reporter.bar.is_finished());
    }
}
