//! Live transfer progress for the CLI

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use snapferry_types::{Error, ProgressReporter};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One spinner per running transfer
pub struct TransferProgress {
    bars: MultiProgress,
    active: Mutex<HashMap<String, ProgressBar>>,
}

impl TransferProgress {
    /// Create a tracker drawing to stderr
    pub fn new() -> Self {
        Self {
            bars: MultiProgress::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix:.bold} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn take(&self, task: &str) -> Option<ProgressBar> {
        self.active.lock().ok()?.remove(task)
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for TransferProgress {
    fn step_started(&self, task: &str, filesystem: &str, description: &str) {
        let pb = self.bars.add(ProgressBar::new_spinner());
        pb.set_style(Self::spinner_style());
        pb.set_prefix(task.to_string());
        pb.set_message(format!("{}: {}", filesystem, description));
        pb.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut active) = self.active.lock() {
            active.insert(task.to_string(), pb);
        }
    }

    fn step_finished(&self, task: &str) {
        if let Some(pb) = self.take(task) {
            pb.finish_with_message(format!("{}", style("done").green()));
        }
    }

    fn step_failed(&self, task: &str, error: &Error) {
        if let Some(pb) = self.take(task) {
            pb.abandon_with_message(format!("{}", style(error).red()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spinners_are_released() {
        let progress = TransferProgress::new();
        progress.bars.set_draw_target(indicatif::ProgressDrawTarget::hidden());

        progress.step_started("TASK001", "tank/a", "send initial snapshot a1");
        progress.step_started("TASK002", "tank/b", "send initial snapshot b1");
        assert_eq!(progress.active.lock().unwrap().len(), 2);

        progress.step_finished("TASK001");
        progress.step_failed("TASK002", &Error::other("cannot receive"));
        assert!(progress.active.lock().unwrap().is_empty());

        // Unknown tasks are ignored
        progress.step_finished("TASK009");
    }
}
