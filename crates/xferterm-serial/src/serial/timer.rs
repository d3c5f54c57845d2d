//! Single-shot countdown timer.
//!
//! One timer per transfer.  Every protocol wait arms it once and aborts
//! it on the way out, so an idle timer is never left running.

use tokio::time::{Duration, Instant};

/// Re-armable millisecond countdown with a waitable "fired" signal.
#[derive(Debug, Default)]
pub struct CountdownTimer {
    deadline: Option<Instant>,
}

impl CountdownTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer to fire `ms` milliseconds from now.
    pub fn set_timeout(&mut self, ms: u64) {
        self.deadline = Some(Instant::now() + Duration::from_millis(ms));
    }

    /// Non-blocking: has the armed deadline passed?
    pub fn fired(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Consume a fired timer.  Returns `true` and disarms when fired.
    pub fn complete(&mut self) -> bool {
        if self.fired() {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Disarm.  Safe when idle.
    pub fn abort(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve when the armed deadline passes; never resolves when idle.
    pub async fn wait(&self) {
        match self.deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending::<()>().await,
        }
    }
}
