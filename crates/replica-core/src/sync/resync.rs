//! Debounced catch-up scheduling.
//!
//! Staleness signals wake a dedicated waiter task. The waiter sleeps for the
//! debounce period and then emits a single [`CatchUp`]. Signals raised while
//! a catch-up is already pending are absorbed into it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Instruction to fetch the global difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUp;

/// Raising half of the waiter.
#[derive(Clone, Default)]
pub struct ResyncSignal {
    notify: Arc<Notify>,
    pending: Arc<AtomicBool>,
}

impl ResyncSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a catch-up. Returns false if one is already pending.
    pub fn raise(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_one();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the waiter. It stops once the receiving side of `tx` is dropped.
pub fn spawn_resync_waiter(
    signal: ResyncSignal,
    debounce: Duration,
    tx: mpsc::UnboundedSender<CatchUp>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = signal.notify.notified() => {}
                _ = tx.closed() => break,
            }
            tokio::time::sleep(debounce).await;
            signal.pending.store(false, Ordering::Release);

            info!("requesting catch-up");
            if tx.send(CatchUp).is_err() {
                break;
            }
        }
        debug!("resync waiter stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(1500);

    #[tokio::test(start_paused = true)]
    async fn catch_up_waits_for_debounce() {
        let signal = ResyncSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _waiter = spawn_resync_waiter(signal.clone(), DEBOUNCE, tx);

        assert!(signal.raise());
        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rx.try_recv(), Ok(CatchUp));
        assert!(!signal.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_catch_up() {
        let signal = ResyncSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _waiter = spawn_resync_waiter(signal.clone(), DEBOUNCE, tx);

        assert!(signal.raise());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!signal.raise());
        assert!(!signal.raise());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv(), Ok(CatchUp));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn signal_after_catch_up_schedules_another() {
        let signal = ResyncSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _waiter = spawn_resync_waiter(signal.clone(), DEBOUNCE, tx);

        signal.raise();
        assert_eq!(rx.recv().await, Some(CatchUp));
        assert!(signal.raise());
        assert_eq!(rx.recv().await, Some(CatchUp));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_stops_when_receiver_dropped() {
        let signal = ResyncSignal::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let waiter = spawn_resync_waiter(signal, DEBOUNCE, tx);
        drop(rx);
        waiter.await.unwrap();
    }
}
