//! Load progress reporting.
//!
//! Observers are a side channel: they see counts after each bulk transfer
//! and never influence which rows are written.

use std::time::Instant;

use log::info;

/// Batches smaller than this never report progress.
pub const PROGRESS_MIN_ROWS: usize = 100;

pub trait ProgressObserver {
    fn start(&mut self, total: usize);
    fn advance(&mut self, loaded: usize);
    fn finish(&mut self, loaded: usize);
}

pub fn progress_enabled(show_progress: bool, total_rows: usize) -> bool {
    show_progress && total_rows >= PROGRESS_MIN_ROWS
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn start(&mut self, _total: usize) {}
    fn advance(&mut self, _loaded: usize) {}
    fn finish(&mut self, _loaded: usize) {}
}

/// Reports progress through the `log` facade.
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    total: usize,
    started: Option<Instant>,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            total: 0,
            started: None,
        }
    }
}

impl ProgressObserver for LogProgress {
    fn start(&mut self, total: usize) {
        self.total = total;
        self.started = Some(Instant::now());
        info!("{}: loading {total} row(s)", self.label);
    }

    fn advance(&mut self, loaded: usize) {
        let percent = if self.total == 0 {
            100
        } else {
            loaded * 100 / self.total
        };
        info!("{}: {loaded}/{} row(s) ({percent}%)", self.label, self.total);
    }

    fn finish(&mut self, loaded: usize) {
        let elapsed = self
            .started
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or_default();
        info!("{}: {loaded} row(s) loaded in {elapsed:.2}s", self.label);
    }
}
