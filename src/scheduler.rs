//! Cancellable interval tasks
//!
//! Each task runs its job once per period, the first run one period after
//! spawning. A missed tick is delayed, never bursted. Cancelling waits for
//! a running job to finish, so shutdown never interrupts a backup midway.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Handle to a spawned interval task
pub struct ScheduledTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Stop the task and wait for it to exit
    pub async fn cancel(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.handle.await {
            tracing::error!(task = self.name, %error, "Scheduled task ended abnormally");
        }
        tracing::info!(task = self.name, "Scheduled task stopped");
    }
}

/// Spawn `job` to run every `period`
pub fn spawn_interval<F, Fut>(name: &'static str, period: Duration, mut job: F) -> ScheduledTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => job().await,
                _ = shutdown_rx.changed() => break,
            }
        }
    });

    tracing::info!(task = name, period_secs = period.as_secs(), "Scheduled task spawned");
    ScheduledTask {
        name,
        shutdown,
        handle,
    }
}
