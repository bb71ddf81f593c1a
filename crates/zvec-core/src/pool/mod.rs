//! Worker pool: bounded worker threads draining a FIFO task queue, with
//! per-task group completion and optional CPU pinning.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// A unit of work executed by the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Join-style completion signal shared by a batch of tasks.
///
/// Every task submitted against a group marks it pending; workers notify the
/// group after running the task, and `wait` blocks until all notifications
/// arrived.
#[derive(Default)]
pub struct TaskGroup {
    pending: Mutex<u64>,
    cond: Condvar,
}

impl TaskGroup {
    /// Creates an idle group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_pending(&self) {
        *self.pending.lock() += 1;
    }

    /// Signals one task finished.
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        debug_assert!(*pending > 0, "group notified more often than submitted");
        *pending -= 1;
        if *pending == 0 {
            self.cond.notify_all();
        }
    }

    /// Blocks until every submitted task has notified.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.cond.wait(&mut pending);
        }
    }

    /// Tasks still outstanding.
    #[must_use]
    pub fn pending_count(&self) -> u64 {
        *self.pending.lock()
    }
}

/// Single-task completion signal.
#[derive(Default)]
pub struct TaskControl {
    done: Mutex<bool>,
    cond: Condvar,
}

impl TaskControl {
    /// Creates an unsignaled control.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals completion.
    pub fn notify(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    /// Blocks until the task has run.
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    /// Whether the task has run.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.done.lock()
    }
}

struct QueuedTask {
    task: Task,
    control: Option<Arc<TaskControl>>,
    group: Option<Arc<TaskGroup>>,
}

#[derive(Default)]
struct Counters {
    pending: usize,
    active: usize,
    workers: usize,
}

struct Shared {
    queue: Mutex<VecDeque<QueuedTask>>,
    work_cond: Condvar,
    counters: Mutex<Counters>,
    finished_cond: Condvar,
    stopped_cond: Condvar,
    stopping: AtomicBool,
}

/// Fixed-size worker pool.
///
/// Workers block on a condition variable while the queue is empty and drain
/// tasks FIFO. Dropping the pool stops and joins every worker.
pub struct ThreadPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawns `size` workers; with `binding` each worker `i` is pinned to
    /// CPU `i % hardware_concurrency` (Linux only, no-op elsewhere).
    #[must_use]
    pub fn new(size: usize, binding: bool) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            work_cond: Condvar::new(),
            counters: Mutex::new(Counters::default()),
            finished_cond: Condvar::new(),
            stopped_cond: Condvar::new(),
            stopping: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(size);
        for _ in 0..size {
            let worker_shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || worker_loop(&worker_shared)));
        }
        {
            let mut counters = shared.counters.lock();
            counters.workers = size;
        }

        let pool = Self {
            shared,
            handles: Mutex::new(handles),
        };
        if binding {
            pool.bind();
        }
        pool
    }

    /// Pins worker `i` to CPU `i % hardware_concurrency`.
    pub fn bind(&self) {
        affinity::bind_threads(&self.handles.lock());
    }

    /// Resets every worker's affinity mask to all CPUs.
    pub fn unbind(&self) {
        affinity::unbind_threads(&self.handles.lock());
    }

    /// Enqueues a task.
    pub fn execute(&self, task: Task) {
        self.submit(task, None, None);
    }

    /// Enqueues a task with a single-task completion control.
    pub fn execute_with_control(&self, control: &Arc<TaskControl>, task: Task) {
        self.submit(task, Some(Arc::clone(control)), None);
    }

    /// Enqueues a task attached to a completion group.
    pub fn execute_in_group(&self, group: &Arc<TaskGroup>, task: Task) {
        group.mark_pending();
        self.submit(task, None, Some(Arc::clone(group)));
    }

    fn submit(&self, task: Task, control: Option<Arc<TaskControl>>, group: Option<Arc<TaskGroup>>) {
        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(QueuedTask {
                task,
                control,
                group,
            });
        }
        {
            let mut counters = self.shared.counters.lock();
            counters.pending += 1;
        }
        self.shared.work_cond.notify_one();
    }

    /// Blocks until the queue is drained and no task is running.
    pub fn wait_finished(&self) {
        let mut counters = self.shared.counters.lock();
        while counters.pending > 0 || counters.active > 0 {
            self.shared.finished_cond.wait(&mut counters);
        }
    }

    /// Tasks queued but not yet picked.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.counters.lock().pending
    }

    /// Tasks currently running.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.counters.lock().active
    }

    /// Live worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.counters.lock().workers
    }

    /// Stops the pool: releases all waiters and joins every worker. Queued
    /// tasks that were never picked are dropped.
    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.work_cond.notify_all();

        {
            let mut counters = self.shared.counters.lock();
            while counters.workers > 0 {
                self.shared.stopped_cond.wait(&mut counters);
            }
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    while let Some(picked) = pick(shared) {
        (picked.task)();

        if let Some(control) = picked.control {
            control.notify();
        }

        if let Some(group) = picked.group {
            group.notify();
        }

        let mut counters = shared.counters.lock();
        counters.active -= 1;
        if counters.active == 0 && counters.pending == 0 {
            shared.finished_cond.notify_all();
        }
    }

    let mut counters = shared.counters.lock();
    counters.workers -= 1;
    if counters.workers == 0 {
        shared.stopped_cond.notify_all();
    }
}

fn pick(shared: &Shared) -> Option<QueuedTask> {
    let mut queue = shared.queue.lock();
    loop {
        if shared.stopping.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(task) = queue.pop_front() {
            let mut counters = shared.counters.lock();
            counters.active += 1;
            counters.pending -= 1;
            return Some(task);
        }
        shared.work_cond.wait(&mut queue);
    }
}

#[cfg(all(target_os = "linux", not(target_env = "ohos")))]
mod affinity {
    use std::os::unix::thread::JoinHandleExt;
    use std::thread::JoinHandle;

    pub(super) fn bind_threads(handles: &[JoinHandle<()>]) {
        let hc = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        if hc <= 1 {
            return;
        }
        for (i, handle) in handles.iter().enumerate() {
            // SAFETY: cpu_set_t is a plain bitmask struct, zeroed is a valid
            // empty set; the pthread handle is live while we hold the
            // JoinHandle.
            unsafe {
                let mut mask: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_ZERO(&mut mask);
                libc::CPU_SET(i % hc, &mut mask);
                libc::pthread_setaffinity_np(
                    handle.as_pthread_t(),
                    std::mem::size_of::<libc::cpu_set_t>(),
                    &mask,
                );
            }
        }
    }

    pub(super) fn unbind_threads(handles: &[JoinHandle<()>]) {
        for handle in handles {
            // SAFETY: as in bind_threads; the full mask re-enables every CPU.
            unsafe {
                let mut mask: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_ZERO(&mut mask);
                for cpu in 0..libc::CPU_SETSIZE as usize {
                    libc::CPU_SET(cpu, &mut mask);
                }
                libc::pthread_setaffinity_np(
                    handle.as_pthread_t(),
                    std::mem::size_of::<libc::cpu_set_t>(),
                    &mask,
                );
            }
        }
    }
}

#[cfg(not(all(target_os = "linux", not(target_env = "ohos"))))]
mod affinity {
    use std::thread::JoinHandle;

    pub(super) fn bind_threads(_handles: &[JoinHandle<()>]) {}

    pub(super) fn unbind_threads(_handles: &[JoinHandle<()>]) {}
}
