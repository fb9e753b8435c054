//! Worker pool for woken continuations.
//!
//! A blocked lock, intent or read request leaves a continuation on its key.
//! When the key's holder commits or cleans, the bucket hands the
//! continuations here after releasing its latch, so a wake-up never
//! re-enters a bucket while that bucket is latched.
//!
//! Woken reads run before woken writes; within each class continuations run
//! in the order they were woken.
//!
//! [`StopSignal`] is the sleep-or-stop primitive of the region's periodic
//! threads.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{error, warn};

/// Class of a woken continuation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePriority {
    /// Lock and intent requests
    Write,
    /// Reads; they never take the key, so they go first
    Read,
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Continuations waiting for a worker
    pub queued: usize,
    /// Continuations currently running on a worker
    pub running: usize,
    /// Continuations finished by workers
    pub completed: u64,
    /// Continuations run on the waking thread because the queue was full or stopped
    pub inline: u64,
    /// Worker threads
    pub workers: usize,
}

type Work = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct WakeQueue {
    reads: VecDeque<Work>,
    writes: VecDeque<Work>,
    running: usize,
    completed: u64,
    inline: u64,
    stopped: bool,
}

impl WakeQueue {
    fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    fn pop(&mut self) -> Option<Work> {
        self.reads.pop_front().or_else(|| self.writes.pop_front())
    }
}

struct Shared {
    state: Mutex<WakeQueue>,
    ready: Condvar,
    idle: Condvar,
    capacity: usize,
}

/// Fixed pool of worker threads running woken continuations
pub struct BackgroundScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl BackgroundScheduler {
    /// Start `workers` threads named `txkv-wake-0`, `txkv-wake-1`, ...
    /// queueing at most `capacity` continuations
    pub fn new(workers: usize, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(WakeQueue::default()),
            ready: Condvar::new(),
            idle: Condvar::new(),
            capacity,
        });

        let handles = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("txkv-wake-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn wake-up worker thread")
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(handles),
            worker_count: workers,
        }
    }

    /// Hand a continuation to the pool
    ///
    /// If the queue is full or the pool stopped, the continuation runs on the
    /// calling thread instead; a client blocked on it would otherwise wait
    /// forever. Callers must not hold a bucket latch.
    pub fn wake(&self, priority: WakePriority, work: Work) {
        let rejected = {
            let mut state = self.shared.state.lock();
            if state.stopped || state.len() >= self.shared.capacity {
                state.inline += 1;
                Some(work)
            } else {
                match priority {
                    WakePriority::Read => state.reads.push_back(work),
                    WakePriority::Write => state.writes.push_back(work),
                }
                None
            }
        };

        match rejected {
            None => {
                self.shared.ready.notify_one();
            }
            Some(work) => {
                warn!(?priority, "wake-up queue unavailable, running continuation inline");
                run_guarded(work);
            }
        }
    }

    /// Block until nothing is queued or running
    pub fn drain(&self) {
        let mut state = self.shared.state.lock();
        while state.len() > 0 || state.running > 0 {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Stop accepting work, let the workers finish the queue, and join them
    pub fn shutdown(&self) {
        self.shared.state.lock().stopped = true;
        self.shared.ready.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }

    /// Current counters
    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        SchedulerStats {
            queued: state.len(),
            running: state.running,
            completed: state.completed,
            inline: state.inline,
            workers: self.worker_count,
        }
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stop flag a periodic thread sleeps on
#[derive(Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    /// Wake the sleeper and make every later `sleep` return at once
    pub(crate) fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    /// Sleep for `period`; false if stopped before or during the sleep
    pub(crate) fn sleep(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        !*stopped
    }
}

fn run_guarded(work: Work) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
        error!(
            "continuation panicked: {:?}",
            e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
        );
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if let Some(work) = state.pop() {
            state.running += 1;
            MutexGuard::unlocked(&mut state, || run_guarded(work));
            state.running -= 1;
            state.completed += 1;
            if state.running == 0 && state.len() == 0 {
                shared.idle.notify_all();
            }
            continue;
        }
        if state.stopped {
            return;
        }
        shared.ready.wait(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn counting(counter: &Arc<AtomicUsize>) -> Work {
        let c = Arc::clone(counter);
        Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Occupy the single worker of `scheduler` until the returned barrier is passed
    fn park_worker(scheduler: &BackgroundScheduler) -> Arc<Barrier> {
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        scheduler.wake(
            WakePriority::Write,
            Box::new(move || {
                b.wait();
            }),
        );
        std::thread::sleep(Duration::from_millis(50));
        barrier
    }

    #[test]
    fn test_wake_and_drain() {
        let scheduler = BackgroundScheduler::new(2, 64);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            scheduler.wake(WakePriority::Write, counting(&counter));
        }
        scheduler.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 10);

        let stats = scheduler.stats();
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.inline, 0);
        assert_eq!(stats.workers, 2);
        scheduler.shutdown();
    }

    #[test]
    fn test_reads_resume_before_writes() {
        let scheduler = BackgroundScheduler::new(1, 64);
        let barrier = park_worker(&scheduler);

        let order = Arc::new(Mutex::new(Vec::new()));
        for (priority, name) in [
            (WakePriority::Write, "write-1"),
            (WakePriority::Read, "read-1"),
            (WakePriority::Write, "write-2"),
            (WakePriority::Read, "read-2"),
        ] {
            let o = Arc::clone(&order);
            scheduler.wake(priority, Box::new(move || o.lock().push(name)));
        }
        assert_eq!(scheduler.stats().queued, 4);

        barrier.wait();
        scheduler.drain();
        assert_eq!(
            order.lock().clone(),
            vec!["read-1", "read-2", "write-1", "write-2"]
        );
        scheduler.shutdown();
    }

    #[test]
    fn test_full_queue_runs_inline() {
        let scheduler = BackgroundScheduler::new(1, 1);
        let barrier = park_worker(&scheduler);

        let ran_on = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let r = Arc::clone(&ran_on);
            scheduler.wake(
                WakePriority::Write,
                Box::new(move || {
                    r.lock().push(std::thread::current().name().map(str::to_string));
                }),
            );
        }
        // The second continuation could not be queued and already ran here
        assert_eq!(ran_on.lock().len(), 1);
        assert_eq!(scheduler.stats().inline, 1);

        barrier.wait();
        scheduler.drain();
        let ran_on = ran_on.lock().clone();
        assert_eq!(ran_on.len(), 2);
        assert_eq!(ran_on[1].as_deref(), Some("txkv-wake-0"));
        scheduler.shutdown();
    }

    #[test]
    fn test_wake_after_shutdown_runs_inline() {
        let scheduler = BackgroundScheduler::new(2, 64);
        scheduler.shutdown();

        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.wake(WakePriority::Read, counting(&counter));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(scheduler.stats().inline, 1);
    }

    #[test]
    fn test_shutdown_finishes_queued_continuations() {
        let scheduler = BackgroundScheduler::new(1, 64);
        let barrier = park_worker(&scheduler);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            scheduler.wake(WakePriority::Write, counting(&counter));
        }
        barrier.wait();
        scheduler.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 5);
        scheduler.shutdown();
    }

    #[test]
    fn test_panicking_continuation_does_not_hang_drain() {
        let scheduler = BackgroundScheduler::new(2, 64);
        scheduler.wake(
            WakePriority::Write,
            Box::new(|| {
                panic!("intentional test panic");
            }),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            scheduler.wake(WakePriority::Read, counting(&counter));
        }
        scheduler.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 3);
        assert_eq!(scheduler.stats().completed, 4);
        scheduler.shutdown();
    }

    #[test]
    fn test_stop_signal_cuts_sleep_short() {
        let signal = Arc::new(StopSignal::default());
        assert!(signal.sleep(Duration::from_millis(1)));

        let s = Arc::clone(&signal);
        let sleeper = std::thread::spawn(move || {
            let started = Instant::now();
            let kept_running = s.sleep(Duration::from_secs(30));
            (kept_running, started.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        signal.stop();

        let (kept_running, slept) = sleeper.join().unwrap();
        assert!(!kept_running);
        assert!(slept < Duration::from_secs(10));
        assert!(!signal.sleep(Duration::from_secs(30)));
    }

    #[test]
    fn test_concurrent_wakes() {
        let scheduler = Arc::new(BackgroundScheduler::new(2, 4096));
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&scheduler);
                let c = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        s.wake(WakePriority::Write, counting(&c));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        scheduler.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 400);
        assert_eq!(scheduler.stats().queued, 0);
        scheduler.shutdown();
    }
}
