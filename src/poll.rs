use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Cancellable interval task with a single owner. `start` replaces any
/// running schedule instead of stacking a second one, and the body is
/// awaited inside the tick loop, so an invocation never overlaps its
/// predecessor.
pub struct Periodic {
    handle: Option<JoinHandle<()>>,
}

impl Periodic {
    pub fn new() -> Self {
        Self { handle: None }
    }

    pub fn start<F, Fut>(&mut self, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task().await;
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for Periodic {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.stop();
    }
}
