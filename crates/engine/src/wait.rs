//! Pending handles for blocked requests
//!
//! A request that returns `Blocked` has left a continuation on its key. The
//! continuation built by [`wait_pair`] fires a [`WakeSignal`], resolving the
//! matching [`WaitHandle`]; the client then re-submits the request.

use tokio::sync::oneshot;

/// Sender half: fired once by the woken continuation
#[derive(Debug)]
pub struct WakeSignal {
    tx: oneshot::Sender<()>,
}

impl WakeSignal {
    /// Resolve the paired handle
    pub fn wake(self) {
        // The waiter may have given up
        let _ = self.tx.send(());
    }

    /// The signal as a continuation for a bucket request
    pub fn into_continuation(self) -> impl FnOnce() + Send + 'static {
        move || self.wake()
    }
}

/// Receiver half: resolves once the blocking holder commits or cleans
#[derive(Debug)]
pub struct WaitHandle {
    rx: oneshot::Receiver<()>,
}

impl WaitHandle {
    /// Wait for the wake-up
    ///
    /// Returns false if the continuation was dropped without firing.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }

    /// Block the calling thread until the wake-up
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_wait(self) -> bool {
        self.rx.blocking_recv().is_ok()
    }

    /// Whether the wake-up already happened
    pub fn is_woken(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// A connected signal and handle
pub fn wait_pair() -> (WakeSignal, WaitHandle) {
    let (tx, rx) = oneshot::channel();
    (WakeSignal { tx }, WaitHandle { rx })
}
