//! Early validation handles
//!
//! A client that wants to learn as soon as possible whether its transaction
//! was aborted registers for early validation. The handle resolves when the
//! transaction aborts or commits.

use tokio::sync::oneshot;
use txkv_core::TxIdentifier;

/// Pending outcome of a transaction
#[derive(Debug)]
pub struct EarlyValidation {
    rx: oneshot::Receiver<TxIdentifier>,
}

impl EarlyValidation {
    pub(crate) fn new(rx: oneshot::Receiver<TxIdentifier>) -> Self {
        Self { rx }
    }

    /// Wait for the outcome
    ///
    /// Returns `None` if the registration was replaced or the table dropped.
    pub async fn wait(self) -> Option<TxIdentifier> {
        self.rx.await.ok()
    }

    /// Block the calling thread until the outcome is known
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_wait(self) -> Option<TxIdentifier> {
        self.rx.blocking_recv().ok()
    }

    /// The outcome if it is already known
    pub fn try_result(&mut self) -> Option<TxIdentifier> {
        self.rx.try_recv().ok()
    }
}
