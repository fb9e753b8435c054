//! Transaction table garbage collection background task
//!
//! Runs [`TxTable::gc_tx`] on a named thread every `gc_period`. The first
//! pass happens one period after start. Shutdown wakes the thread
//! immediately and joins it; dropping the handle does the same.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::table::TxTable;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Background garbage collector for a [`TxTable`]
pub struct TableGc {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl TableGc {
    /// Start collecting `table` every `period`
    pub fn start(table: Arc<TxTable>, period: Duration) -> Self {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name("txkv-table-gc".to_string())
            .spawn(move || gc_loop(&table, &thread_signal, period))
            .expect("failed to spawn table gc thread");

        Self {
            signal,
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for the thread to exit
    pub fn shutdown(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        *self.signal.stopped.lock()
    }
}

impl Drop for TableGc {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn gc_loop(table: &TxTable, signal: &StopSignal, period: Duration) {
    loop {
        let deadline = Instant::now() + period;
        {
            let mut stopped = signal.stopped.lock();
            while !*stopped {
                if signal.cond.wait_until(&mut stopped, deadline).timed_out() {
                    break;
                }
            }
            if *stopped {
                return;
            }
        }
        let removed = table.gc_tx();
        if !removed.is_empty() {
            debug!(removed = removed.len(), remaining = table.len(), "gc pass");
        }
    }
}
