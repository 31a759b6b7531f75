//! Terminal progress bar for `--progress`.

use indicatif::{ProgressBar, ProgressStyle};
use waitbench_core::{ProgressEvent, ProgressSink};

/// Progress sink that draws an indicatif bar, one tick per completed task
pub struct BarProgress {
    label: String,
    bar: Option<ProgressBar>,
}

impl BarProgress {
    /// Bar labelled with the strategy it tracks
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            bar: None,
        }
    }
}

impl ProgressSink for BarProgress {
    fn started(&mut self, total: u64) {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(self.label.clone());
        self.bar = Some(pb);
    }

    fn completed(&mut self, event: ProgressEvent) {
        if let Some(pb) = &self.bar {
            pb.set_position(event.completed);
        }
    }

    fn finished(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}
