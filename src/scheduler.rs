use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A callback run on a fixed period by a single background task.
///
/// The first tick fires one period after spawning. Ticks never overlap: a
/// slow tick delays the next one instead of queueing extra ticks. The task
/// ends when the callback returns `Break`, when [`stop`](Self::stop) is
/// called, or when the handle is dropped; a tick already in progress always
/// runs to completion.
pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {}
                }
                if *stop_rx.borrow() {
                    break;
                }
                if tick().await.is_break() {
                    break;
                }
            }

            tracing::debug!("{name} task finished");
        });

        Self { name, stop_tx, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the task to end at its next tick boundary.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to end. Does not stop it.
    pub async fn join(self) {
        let Self { name, stop_tx, handle } = self;
        if let Err(e) = handle.await {
            tracing::warn!("{name} task failed: {e}");
        }
        drop(stop_tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(period: Duration, limit: u32) -> (PeriodicTask, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let ticks = count.clone();
        let task = PeriodicTask::spawn("test", period, move || {
            let ticks = ticks.clone();
            async move {
                if ticks.fetch_add(1, Ordering::SeqCst) + 1 >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        });
        (task, count)
    }

    #[tokio::test]
    async fn test_runs_until_break() {
        let (task, count) = counting(Duration::from_millis(2), 3);
        tokio::time::timeout(Duration::from_secs(5), task.join()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stop_ends_task() {
        let (task, count) = counting(Duration::from_millis(2), u32::MAX);
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.stop();
        tokio::time::timeout(Duration::from_secs(5), task.join()).await.unwrap();

        let after = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), after);
    }

    #[tokio::test]
    async fn test_first_tick_waits_one_period() {
        let (task, count) = counting(Duration::from_secs(60), u32::MAX);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!task.is_finished());
        task.stop();
        task.join().await;
    }
}
