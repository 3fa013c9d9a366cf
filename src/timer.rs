// src/timer.rs

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Shortest period a task will run at; zero periods are raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A repeating task on the tokio runtime.
///
/// The first firing happens one full `period` after arming. Dropping the
/// handle cancels the task, so holders replace a timer simply by assigning
/// a new one over the old.
pub struct RepeatingTask {
    period: Duration,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    pub fn spawn<F>(runtime: &Handle, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let handle = runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tick().is_break() {
                    break;
                }
            }
        });
        Self { period, handle }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
