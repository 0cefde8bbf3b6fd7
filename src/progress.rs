// src/progress.rs

//! Progress reporting for batch installs
//!
//! The orchestrator reports once per finished request with the running
//! completed count, the batch total and a short description of what just
//! finished. Reports are delivered under the orchestrator's counter lock, so
//! an implementation sees strictly increasing counts even though requests
//! complete on many threads.
//!
//! Implementations:
//! - any `Fn(usize, usize, &str)` closure
//! - `LogProgress`: interval logging through tracing
//! - `BarProgress`: terminal progress bar using indicatif
//! - `SilentProgress`: no-op for scripted/quiet modes

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Receiver of batch progress updates
pub trait ProgressReporter: Send + Sync {
    /// One more request finished (successfully or not)
    fn report(&self, completed: usize, total: usize, description: &str);

    /// The whole batch finished
    fn finish(&self, _succeeded: usize, _failed: usize) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn report(&self, completed: usize, total: usize, description: &str) {
        self(completed, total, description)
    }
}

/// No-op reporter
#[derive(Debug, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn report(&self, _completed: usize, _total: usize, _description: &str) {}
}

/// Logs progress to tracing at info level
///
/// Only every `log_interval`-th completion is logged to avoid spamming large
/// batches; the last one always is.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    log_interval: usize,
    reported: AtomicUsize,
}

impl LogProgress {
    pub fn new(name: impl Into<String>, total: usize) -> Self {
        Self {
            name: name.into(),
            log_interval: std::cmp::max(1, total / 10), // Log ~10 times
            reported: AtomicUsize::new(0),
        }
    }

    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval.max(1);
        self
    }

    /// How many updates were actually logged
    pub fn logged(&self) -> usize {
        self.reported.load(Ordering::Relaxed)
    }
}

impl ProgressReporter for LogProgress {
    fn report(&self, completed: usize, total: usize, description: &str) {
        if completed % self.log_interval == 0 || completed == total {
            self.reported.fetch_add(1, Ordering::Relaxed);
            info!("{}: {}/{} - {}", self.name, completed, total, description);
        }
    }

    fn finish(&self, succeeded: usize, failed: usize) {
        info!("{}: {} succeeded, {} failed", self.name, succeeded, failed);
    }
}

/// Terminal progress bar
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    /// Wrap an existing bar (e.g. one attached to an `indicatif::MultiProgress`)
    pub fn with_bar(bar: ProgressBar) -> Self {
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressReporter for BarProgress {
    fn report(&self, completed: usize, total: usize, description: &str) {
        self.bar.set_length(total as u64);
        self.bar.set_position(completed as u64);
        self.bar.set_message(description.to_string());
    }

    fn finish(&self, succeeded: usize, failed: usize) {
        if failed == 0 {
            self.bar
                .finish_with_message(format!("{succeeded} rulesets installed"));
        } else {
            self.bar.abandon_with_message(format!(
                "{succeeded} rulesets installed, {failed} failed"
            ));
        }
    }
}
