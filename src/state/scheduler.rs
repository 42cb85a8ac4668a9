use std::future::Future;

use tokio::{
    sync::oneshot,
    time::{Instant, sleep_until},
};

/// One-shot round timer owned by a single room session.
///
/// Each arm bumps an epoch that is handed to the callback; arming again or cancelling bumps it
/// once more, so a callback that already fired can be recognised as stale by comparing epochs.
#[derive(Debug, Default)]
pub struct RoundScheduler {
    epoch: u64,
    pending: Option<oneshot::Sender<()>>,
}

impl RoundScheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch of the most recent arm or cancel.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Run `on_elapsed` once at or after `deadline`, replacing any outstanding callback.
    pub fn arm<F, Fut>(&mut self, deadline: Instant, on_elapsed: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.epoch += 1;
        let epoch = self.epoch;
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        // Dropping the previous sender wakes its task, which then exits without firing.
        self.pending = Some(cancel_tx);

        tokio::spawn(async move {
            tokio::select! {
                _ = sleep_until(deadline) => on_elapsed(epoch).await,
                _ = cancel_rx => {}
            }
        });

        epoch
    }

    /// Drop the outstanding callback, if any.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RoundScheduler::new();
        let epoch = scheduler.arm(Instant::now() + Duration::from_secs(5), move |epoch| async move {
            let _ = tx.send(epoch);
        });

        assert_eq!(rx.recv().await, Some(epoch));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_callback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RoundScheduler::new();

        let first_tx = tx.clone();
        scheduler.arm(Instant::now() + Duration::from_secs(5), move |epoch| async move {
            let _ = first_tx.send(epoch);
        });
        let second = scheduler.arm(Instant::now() + Duration::from_secs(10), move |epoch| async move {
            let _ = tx.send(epoch);
        });

        assert_eq!(rx.recv().await, Some(second));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut scheduler = RoundScheduler::new();
        let armed = scheduler.arm(Instant::now() + Duration::from_secs(1), move |epoch| async move {
            let _ = tx.send(epoch);
        });
        scheduler.cancel();

        assert!(scheduler.epoch() > armed);
        assert_eq!(rx.recv().await, None);
    }
}
