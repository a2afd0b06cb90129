//! Wall-clock budget and cooperative cancellation for the bar loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::error::SimulationAbort;

/// Checked by the simulation engine at every bar boundary.
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Deadline {
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
            cancel: None,
        }
    }

    /// Expires `budget` after construction.
    pub fn after(budget: Duration) -> Self {
        Self {
            budget: Some(budget),
            ..Self::unbounded()
        }
    }

    /// Also abort once `flag` is set by another thread.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn check(&self, bars_processed: usize) -> Result<(), SimulationAbort> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(SimulationAbort::Cancelled { bars_processed });
            }
        }
        if let Some(budget) = self.budget {
            if self.started.elapsed() >= budget {
                return Err(SimulationAbort::DeadlineExceeded {
                    budget,
                    bars_processed,
                });
            }
        }
        Ok(())
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}
