//! Bounded, elastic priority thread pool used for heavy route handlers and
//! periodic background tasks. Deliberately a plain OS-thread pool, kept
//! disjoint from the async I/O runtime: heavy work must leave the reactor
//! task promptly and run here instead.

mod task;

pub use task::{Metrics, TaskOptions};
use task::Task;

use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct Shared {
    queue: Mutex<BinaryHeap<Task>>,
    condvar: Condvar,
    idle_condvar: Condvar,
    seq: AtomicU64,
    stop: AtomicBool,
    active: AtomicUsize,
    timed_out: AtomicUsize,
    default_priority: AtomicI32,
    max_threads: usize,
    worker_count: Mutex<usize>,
    max_periodic: usize,
    active_periodic: AtomicUsize,
}

/// Priority + FIFO thread pool with elastic growth and a periodic scheduler.
pub struct Executor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    periodic: Mutex<Vec<JoinHandle<()>>>,
}

/// Active-task RAII counter, incremented on construction and decremented on
/// drop — mirrors the reference implementation's guard.
struct TaskGuard<'a>(&'a AtomicUsize);

impl<'a> TaskGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
        TaskGuard(counter)
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

impl Executor {
    /// `thread_count` initial workers (clamped to `[1, max_threads]`),
    /// `max_threads` the elastic ceiling, `default_priority` used when a
    /// task is posted without an explicit priority, `max_periodic` the
    /// concurrent-periodic-task cap.
    pub fn new(thread_count: usize, max_threads: usize, default_priority: i32, max_periodic: usize) -> Arc<Self> {
        let max_threads = max_threads.max(1);
        let thread_count = thread_count.clamp(1, max_threads);
        let max_periodic = if max_periodic == 0 { 1 } else { max_periodic };

        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            idle_condvar: Condvar::new(),
            seq: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            timed_out: AtomicUsize::new(0),
            default_priority: AtomicI32::new(default_priority),
            max_threads,
            worker_count: Mutex::new(0),
            max_periodic,
            active_periodic: AtomicUsize::new(0),
        });

        let executor = Arc::new(Executor {
            shared: shared.clone(),
            workers: Mutex::new(Vec::new()),
            periodic: Mutex::new(Vec::new()),
        });

        {
            let mut workers = executor.workers.lock();
            for id in 0..thread_count {
                workers.push(spawn_worker(shared.clone(), id));
            }
            *shared.worker_count.lock() = thread_count;
        }

        debug!(
            threads = thread_count,
            max_threads, default_priority, max_periodic, "executor started"
        );

        executor
    }

    /// Post a task, returning `true` if accepted. Rejected only once the
    /// pool is stopping.
    pub fn post(&self, opts: TaskOptions, f: impl FnOnce() + Send + 'static) -> bool {
        if self.shared.stop.load(AtomicOrdering::Relaxed) {
            return false;
        }

        let timeout = opts.timeout;
        let shared_for_timeout = self.shared.clone();
        let wrapped = move || {
            let start = Instant::now();
            f();
            if !timeout.is_zero() {
                let elapsed = start.elapsed();
                if elapsed > timeout {
                    warn!(?elapsed, ?timeout, "task exceeded its timeout");
                    shared_for_timeout
                        .timed_out
                        .fetch_add(1, AtomicOrdering::Relaxed);
                }
            }
        };

        let seq = self.shared.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let task = Task {
            func: Box::new(wrapped),
            priority: opts.priority,
            seq,
        };

        let mut queue = self.shared.queue.lock();
        queue.push(task);

        let worker_count = *self.shared.worker_count.lock();
        let active = self.shared.active.load(AtomicOrdering::Relaxed);
        let saturated = active >= worker_count;
        let backlog = queue.len() > worker_count;
        drop(queue);

        if worker_count < self.shared.max_threads && saturated && backlog {
            let mut workers = self.workers.lock();
            let mut wc = self.shared.worker_count.lock();
            if *wc < self.shared.max_threads {
                let id = *wc;
                workers.push(spawn_worker(self.shared.clone(), id));
                *wc += 1;
            }
        }

        self.shared.condvar.notify_one();
        true
    }

    /// Post `f` with the pool's default priority and no timeout.
    pub fn post_default(&self, f: impl FnOnce() + Send + 'static) -> bool {
        let priority = self.shared.default_priority.load(AtomicOrdering::Relaxed);
        self.post(TaskOptions::with_priority(priority), f)
    }

    /// Submit a plain closure, returning a receiver resolved with its result
    /// (or a rejection if the pool refuses the task).
    pub fn submit<T, F>(&self, opts: TaskOptions, f: F) -> oneshot::Receiver<crate::errors::Result<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let accepted = self.post(opts, move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
            let mapped = result.map_err(|_| crate::errors::Error::TaskPanic);
            let _ = tx.send(mapped);
        });
        if !accepted {
            let (tx2, rx2) = oneshot::channel();
            let _ = tx2.send(Err(crate::errors::Error::SubmitRejected));
            return rx2;
        }
        rx
    }

    /// Submit an async future to run on an executor worker via
    /// `Handle::block_on`, keeping the work off the I/O reactor.
    pub fn submit_async<T, Fut>(
        &self,
        opts: TaskOptions,
        fut: Fut,
    ) -> oneshot::Receiver<crate::errors::Result<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::runtime::Handle::current();
        self.submit(opts, move || handle.block_on(fut))
    }

    pub fn metrics(&self) -> Metrics {
        let queue = self.shared.queue.lock();
        Metrics {
            pending: queue.len(),
            active: self.shared.active.load(AtomicOrdering::Relaxed),
            timed_out: self.shared.timed_out.load(AtomicOrdering::Relaxed),
        }
    }

    pub fn is_idle(&self) -> bool {
        let queue = self.shared.queue.lock();
        queue.is_empty() && self.shared.active.load(AtomicOrdering::Relaxed) == 0
    }

    /// Block until the queue is empty and no task is active.
    pub fn wait_idle(&self) {
        let mut queue = self.shared.queue.lock();
        while !(queue.is_empty() && self.shared.active.load(AtomicOrdering::Relaxed) == 0) {
            self.shared.idle_condvar.wait(&mut queue);
        }
    }

    /// Register a periodic task posted to this pool every `period`. Blocks
    /// while `max_periodic` concurrent periodic tasks are already running.
    pub fn periodic<F>(self: &Arc<Self>, priority: i32, period: Duration, mut f: F)
    where
        F: FnMut() + Send + 'static,
    {
        {
            let mut guard = self.shared.queue.lock();
            while !self.shared.stop.load(AtomicOrdering::Relaxed)
                && self.shared.active_periodic.load(AtomicOrdering::Relaxed) >= self.shared.max_periodic
            {
                self.shared.condvar.wait(&mut guard);
            }
            if self.shared.stop.load(AtomicOrdering::Relaxed) {
                return;
            }
            self.shared.active_periodic.fetch_add(1, AtomicOrdering::Relaxed);
        }

        let executor = self.clone();
        let handle = std::thread::spawn(move || {
            let mut next = Instant::now() + period;
            loop {
                if executor.shared.stop.load(AtomicOrdering::Relaxed) {
                    break;
                }

                let prior_done = Arc::new(AtomicBool::new(false));
                let prior_done2 = prior_done.clone();
                let accepted = executor.post(TaskOptions::with_priority(priority), move || {
                    f();
                    prior_done2.store(true, AtomicOrdering::Relaxed);
                });
                if !accepted {
                    warn!("periodic task failed to enqueue, stopping schedule");
                    break;
                }

                let now = Instant::now();
                if now < next {
                    std::thread::sleep(next - now);
                }
                if !prior_done.load(AtomicOrdering::Relaxed) {
                    warn!("periodic task exceeded its interval of {:?}", period);
                }
                next += period;

                if executor.shared.stop.load(AtomicOrdering::Relaxed) {
                    break;
                }
            }
            executor.shared.active_periodic.fetch_sub(1, AtomicOrdering::Relaxed);
            executor.shared.condvar.notify_all();
        });

        self.periodic.lock().push(handle);
    }
}

#[cfg(feature = "affinity")]
fn pin_to_core(id: usize) {
    if let Some(cores) = core_affinity::get_core_ids() {
        if cores.is_empty() {
            return;
        }
        let core = cores[id % cores.len()];
        if !core_affinity::set_for_current(core) {
            warn!(worker = id, "failed to set CPU affinity (best-effort)");
        }
    }
}

#[cfg(not(feature = "affinity"))]
fn pin_to_core(_id: usize) {}

fn spawn_worker(shared: Arc<Shared>, id: usize) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("vix-executor-{id}"))
        .spawn(move || {
            if shared.max_threads > 1 {
                pin_to_core(id);
            }
            loop {
                let task = {
                    let mut queue = shared.queue.lock();
                    loop {
                        if let Some(task) = queue.pop() {
                            break Some(task);
                        }
                        if shared.stop.load(AtomicOrdering::Relaxed) {
                            break None;
                        }
                        shared.condvar.wait(&mut queue);
                    }
                };

                let Some(task) = task else { break };

                let _guard = TaskGuard::new(&shared.active);
                run_task(id, task.func);
                drop(_guard);

                let queue = shared.queue.lock();
                if queue.is_empty() && shared.active.load(AtomicOrdering::Relaxed) == 0 {
                    shared.idle_condvar.notify_all();
                }
            }
        })
        .expect("failed to spawn executor worker thread")
}

#[cfg(feature = "catch-panic")]
fn run_task(worker_id: usize, f: Box<dyn FnOnce() + Send>) {
    if let Err(_e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        warn!(worker_id, "task panicked; swallowed at worker frame");
    }
}

#[cfg(not(feature = "catch-panic"))]
fn run_task(_worker_id: usize, f: Box<dyn FnOnce() + Send>) {
    f();
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shared.stop.store(true, AtomicOrdering::Relaxed);
        self.shared.condvar.notify_all();
        self.shared.idle_condvar.notify_all();

        for handle in self.periodic.get_mut().drain(..) {
            let _ = handle.join();
        }
        for handle in self.workers.get_mut().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn priority_and_fifo_ordering_single_worker() {
        let exec = Executor::new(1, 1, 0, 4);
        let order = Arc::new(StdMutex::new(Vec::new()));

        let barrier_done = Arc::new(std::sync::Barrier::new(1));
        let _ = barrier_done;

        // Block the single worker briefly so all three tasks queue up
        // before any of them runs.
        let gate = Arc::new(StdMutex::new(()));
        let gate_guard = gate.lock().unwrap();
        let gate_for_task = gate.clone();
        exec.post(TaskOptions::with_priority(-100), move || {
            let _ = gate_for_task.lock().unwrap();
        });

        let o1 = order.clone();
        exec.post(TaskOptions::with_priority(0), move || o1.lock().unwrap().push("T1"));
        let o2 = order.clone();
        exec.post(TaskOptions::with_priority(10), move || o2.lock().unwrap().push("T2"));
        let o3 = order.clone();
        exec.post(TaskOptions::with_priority(10), move || o3.lock().unwrap().push("T3"));

        drop(gate_guard);
        exec.wait_idle();

        assert_eq!(*order.lock().unwrap(), vec!["T2", "T3", "T1"]);
    }

    #[test]
    fn wait_idle_blocks_until_drained() {
        let exec = Executor::new(2, 4, 0, 4);
        let counter = Arc::new(StdAtomicUsize::new(0));
        for _ in 0..8 {
            let c = counter.clone();
            exec.post_default(move || {
                std::thread::sleep(Duration::from_millis(5));
                c.fetch_add(1, AtomicOrdering::SeqCst);
            });
        }
        exec.wait_idle();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 8);
        assert!(exec.is_idle());
    }

    #[test]
    fn submit_rejected_after_drop_equivalent_stop() {
        let exec = Executor::new(1, 1, 0, 4);
        exec.shared.stop.store(true, AtomicOrdering::Relaxed);
        exec.shared.condvar.notify_all();
        let rx = exec.submit(TaskOptions::default(), || 1);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(rx).unwrap();
        assert!(matches!(result, Err(crate::errors::Error::SubmitRejected)));
    }
}
