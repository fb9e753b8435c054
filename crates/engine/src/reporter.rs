//! Asynchronous dependency reporter
//!
//! Bucket operations discover anti-dependency edges under their latch. The
//! region hands them to a [`DepReporter`], whose single consumer thread
//! delivers them to the coordinator in arrival order. Callers never wait on
//! the coordinator.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use txkv_core::{Coordinator, Dep};

#[derive(Default)]
struct QueueState {
    queue: Vec<Dep>,
    in_flight: bool,
    stopped: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    work: Condvar,
    idle: Condvar,
}

/// Ordered single-consumer queue of edges bound for the coordinator
pub struct DepReporter {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl DepReporter {
    /// Start the consumer thread
    pub fn start(coordinator: Arc<dyn Coordinator>) -> Self {
        let shared = Arc::new(Shared::default());
        let thread_shared = Arc::clone(&shared);

        let handle = thread::Builder::new()
            .name("txkv-dep-reporter".to_string())
            .spawn(move || report_loop(coordinator.as_ref(), &thread_shared))
            .expect("failed to spawn dependency reporter thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Queue edges for delivery
    pub fn push(&self, deps: Vec<Dep>) {
        if deps.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock();
        if state.stopped {
            warn!(dropped = deps.len(), "dependency reporter stopped, edges dropped");
            return;
        }
        state.queue.extend(deps);
        self.shared.work.notify_one();
    }

    /// Edges queued and not yet handed to the coordinator
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Block until every edge queued so far has been delivered
    pub fn flush(&self) {
        let mut state = self.shared.state.lock();
        while !state.queue.is_empty() || state.in_flight {
            if state.stopped && self.handle.is_none() {
                return;
            }
            self.shared.idle.wait(&mut state);
        }
    }

    /// Deliver what is queued, then stop the consumer thread
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            self.shared.work.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DepReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report_loop(coordinator: &dyn Coordinator, shared: &Shared) {
    loop {
        let batch = {
            let mut state = shared.state.lock();
            while state.queue.is_empty() && !state.stopped {
                shared.work.wait(&mut state);
            }
            if state.queue.is_empty() {
                shared.idle.notify_all();
                return;
            }
            state.in_flight = true;
            std::mem::take(&mut state.queue)
        };

        deliver(coordinator, batch);

        let mut state = shared.state.lock();
        state.in_flight = false;
        if state.queue.is_empty() {
            shared.idle.notify_all();
        }
    }
}

fn deliver(coordinator: &dyn Coordinator, mut batch: Vec<Dep>) {
    batch.retain(|dep| !dep.is_self_edge());
    if batch.is_empty() {
        return;
    }
    let n = batch.len();
    match coordinator.report_read_write_dependencies(batch) {
        Ok(()) => debug!(edges = n, "dependencies reported"),
        Err(e) => warn!(edges = n, error = %e, "dependency report failed"),
    }
}
