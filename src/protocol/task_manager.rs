use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// A task ticking every `period` until stopped.
pub struct PeriodicTask {
    name: String,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// First tick fires one `period` after the spawn.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        debug!("{} task shutting down", task_name);
                        break;
                    }
                    _ = timer.tick() => tick().await,
                }
            }
        });
        debug!("Started {} task (every {:?})", name, period);
        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task and waits until it can no longer run a tick.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        self.handle.abort();
        let _ = self.handle.await;
        debug!("Stopped {} task", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = PeriodicTask::spawn("test", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.stop().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
