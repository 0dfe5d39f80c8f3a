//! Popup lifecycle: opening the authenticator window, detecting the
//! user closing it, and tearing the window down when a flow settles.
//!
//! Platforms report a blocked popup as `Ok(None)`, not as an error.
//! Blocked is an expected outcome the orchestrator answers with a
//! manual-trigger prompt, so it must stay distinguishable from real
//! platform failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum PopupError {
    #[error("platform error: {0}")]
    Platform(String),
}

/// Window geometry for the authenticator popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupDimensions {
    pub width: u32,
    pub height: u32,
}

impl Default for PopupDimensions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// A live secondary browsing context.
pub trait PopupHandle: Send + Sync {
    /// True once the window is gone, whether the user closed it or
    /// `close` did.
    fn is_closed(&self) -> bool;

    /// Close the window. Closing an already-closed handle is a no-op.
    fn close(&self);
}

/// Platform capability that opens secondary browsing contexts.
#[async_trait]
pub trait PopupSurface: Send + Sync {
    /// Open a popup at `url`. `Ok(None)` means the platform blocked it.
    async fn open(
        &self,
        url: &str,
        window_name: &str,
        dimensions: PopupDimensions,
    ) -> Result<Option<Arc<dyn PopupHandle>>, PopupError>;
}

/// Simple in-process handle whose closed flag flips once.
#[derive(Debug, Default)]
pub struct FlagHandle {
    closed: AtomicBool,
}

impl FlagHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark the window closed as if the user dismissed it.
    pub fn close_by_user(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl PopupHandle for FlagHandle {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Polls `is_closed` on a fixed interval and fires at most one closed
/// event. Platforms only expose closure as a readable flag, hence the
/// poll.
pub struct ClosedWatcher {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ClosedWatcher {
    /// Spawn the watcher. `on_closed` receives one event at most.
    pub fn spawn(
        handle: Arc<dyn PopupHandle>,
        interval: Duration,
        on_closed: mpsc::Sender<()>,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so a window
            // still opening is not misread as closed.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if handle.is_closed() {
                            let _ = on_closed.send(()).await;
                            return;
                        }
                    }
                    _ = stopped.changed() => return,
                }
            }
        });
        Self { stop, task }
    }

    /// Tear the watcher down. No further closed events fire after this.
    pub fn stop(self) {
        let _ = self.stop.send(true);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watcher_fires_once_on_user_close() {
        let handle = FlagHandle::new();
        let (tx, mut rx) = mpsc::channel(4);
        let watcher = ClosedWatcher::spawn(
            handle.clone() as Arc<dyn PopupHandle>,
            Duration::from_millis(10),
            tx,
        );

        handle.close_by_user();
        rx.recv().await.expect("closed event");

        // The watcher task returned after firing; nothing else arrives.
        assert!(rx.recv().await.is_none());
        watcher.stop();
    }

    #[tokio::test]
    async fn test_watcher_stop_silences_events() {
        let handle = FlagHandle::new();
        let (tx, mut rx) = mpsc::channel(4);
        let watcher = ClosedWatcher::spawn(
            handle.clone() as Arc<dyn PopupHandle>,
            Duration::from_millis(10),
            tx,
        );

        watcher.stop();
        handle.close_by_user();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_window_is_not_reported_closed() {
        let handle = FlagHandle::new();
        let (tx, mut rx) = mpsc::channel(4);
        let watcher = ClosedWatcher::spawn(
            handle.clone() as Arc<dyn PopupHandle>,
            Duration::from_millis(10),
            tx,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        watcher.stop();
    }

    #[test]
    fn test_close_is_idempotent() {
        let handle = FlagHandle::new();
        assert!(!handle.is_closed());
        handle.close();
        handle.close();
        assert!(handle.is_closed());
    }
}
