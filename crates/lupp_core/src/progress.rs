use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::store::GlobalStats;

/// Best-effort activity line. The bar redraws on its own ticker thread and never
/// blocks the run; a hidden bar is used when output is not wanted.
#[derive(Debug, Clone)]
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn spinner(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message(message.to_string());
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn phase(&self, phase: &str) {
        self.bar.set_prefix(phase.to_string());
        self.bar.set_message(phase.to_string());
    }

    pub fn update(&self, stats: &GlobalStats, in_flight: usize) {
        self.bar.set_message(format!(
            "{} categories, {} pages, {in_flight} batches in flight",
            stats.categories_cnt, stats.pages_cnt
        ));
        self.bar.tick();
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn message(&self) -> String {
        self.bar.message()
    }
}
