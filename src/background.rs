//! Background work queue: one-shot delayed jobs and recurring jobs executed by a
//! small pool of worker threads.
//!
//! Jobs sit in a min-heap keyed by (due time, submission order). A recurring job
//! is only re-queued once its previous run finished, so it never overlaps itself.
//! Job failures (errors and panics) are logged and never take a worker down.

use log::{debug, error, warn};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type JobResult = Result<(), String>;

/// A named unit of work that runs once.
pub struct Job {
    name: &'static str,
    work: Box<dyn FnOnce() -> JobResult + Send + 'static>,
}

impl Job {
    pub fn new<F>(name: &'static str, work: F) -> Self
    where
        F: FnOnce() -> JobResult + Send + 'static,
    {
        Job {
            name,
            work: Box::new(work),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn run(self) -> JobResult {
        (self.work)()
    }
}

impl core::fmt::Debug for Job {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish()
    }
}

/// A named unit of work that runs on every tick of a cadence.
#[derive(Clone)]
pub struct RecurringJob {
    name: &'static str,
    work: Arc<dyn Fn() -> JobResult + Send + Sync + 'static>,
}

impl RecurringJob {
    pub fn new<F>(name: &'static str, work: F) -> Self
    where
        F: Fn() -> JobResult + Send + Sync + 'static,
    {
        RecurringJob {
            name,
            work: Arc::new(work),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn run(&self) -> JobResult {
        (self.work)()
    }
}

impl core::fmt::Debug for RecurringJob {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecurringJob").field("name", &self.name).finish()
    }
}

pub trait TaskRunner: Send + Sync {
    fn run_after(&self, job: Job, delay: Duration);
    /// First run happens one `period` from now.
    fn run_every(&self, job: RecurringJob, period: Duration);
    /// Drop everything still queued and stop scheduling. Jobs already running finish.
    fn stop(&self);

    fn run_now(&self, job: Job) {
        self.run_after(job, Duration::ZERO);
    }
}

enum Task {
    Once(Job),
    Every { job: RecurringJob, period: Duration },
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Task::Once(job) => job.name(),
            Task::Every { job, .. } => job.name(),
        }
    }
}

struct Entry {
    due: Instant,
    seq: u64,
    task: Task,
}

// BinaryHeap is a max-heap; invert so the earliest (due, seq) pops first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    stopped: bool,
}

impl Queue {
    fn push(&mut self, due: Instant, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { due, seq, task });
    }
}

struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule(&self, due: Instant, task: Task) {
        let mut q = self.lock();
        if q.stopped {
            debug!("Background: dropping job {} submitted after stop", task.name());
            return;
        }
        q.push(due, task);
        drop(q);
        self.ready.notify_one();
    }

    /// Block until a job is due, or return `None` once stopped.
    fn next_due(&self) -> Option<Entry> {
        let mut q = self.lock();
        loop {
            if q.stopped {
                return None;
            }
            let now = Instant::now();
            match q.heap.peek().map(|e| e.due) {
                None => {
                    q = self.ready.wait(q).unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Some(due) if due > now => {
                    q = self
                        .ready
                        .wait_timeout(q, due - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                }
                Some(_) => return q.heap.pop(),
            }
        }
    }
}

pub struct Background {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Background {
    /// Start `workers` worker threads (at least one). One worker runs jobs strictly one at a time.
    pub fn new(workers: usize) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
        });
        let mut handles = Vec::new();
        for i in 0..workers.max(1) {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("arlo-bg-{i}"))
                .spawn(move || worker_loop(shared))?;
            handles.push(handle);
        }
        debug!("Background: started {} worker(s)", handles.len());
        Ok(Background {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// Jobs waiting in the queue (running jobs excluded).
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.shared.lock().heap.len()
    }

    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while let Some(Entry { due, task, .. }) = shared.next_due() {
        match task {
            Task::Once(job) => {
                let name = job.name();
                execute(name, move || job.run());
            }
            Task::Every { job, period } => {
                execute(job.name(), || job.run());
                // Keep a fixed rate, but don't burst to catch up after a host suspend.
                let now = Instant::now();
                let mut next = due + period;
                if next < now {
                    next = now + period;
                }
                shared.schedule(next, Task::Every { job, period });
            }
        }
    }
}

fn execute<F>(name: &'static str, work: F)
where
    F: FnOnce() -> JobResult,
{
    debug!("Background: running {}", name);
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Background: job {} failed: {}", name, e),
        Err(_) => error!("Background: job {} panicked", name),
    }
}

impl TaskRunner for Background {
    fn run_after(&self, job: Job, delay: Duration) {
        self.shared.schedule(Instant::now() + delay, Task::Once(job));
    }

    fn run_every(&self, job: RecurringJob, period: Duration) {
        self.shared
            .schedule(Instant::now() + period, Task::Every { job, period });
    }

    fn stop(&self) {
        {
            let mut q = self.shared.lock();
            if q.stopped {
                return;
            }
            q.stopped = true;
            q.heap.clear();
        }
        self.shared.ready.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        let current = thread::current().id();
        for handle in handles {
            // stop() may be called from a job; a worker cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Background: worker exited with a panic");
            }
        }
        debug!("Background: stopped");
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        self.stop();
    }
}
