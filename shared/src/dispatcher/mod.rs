use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering as MemOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::time::performance_time;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("job dispatcher is stopped")]
pub struct DispatcherStopped;

/// Payload handed to a job function. Typically an `Arc` of the value the
/// job operates on (an island worker schedules itself this way).
pub type JobData = Arc<dyn Any + Send + Sync>;

pub type JobFn = fn(JobData);

/// A small schedulable unit: a function pointer plus its payload. Cheap to
/// clone and to move through queues.
#[derive(Clone)]
pub struct Job {
    pub func: JobFn,
    pub data: JobData,
}

impl Job {
    pub fn new(func: JobFn, data: JobData) -> Self {
        Self { func, data }
    }

    pub fn run(self) {
        (self.func)(self.data);
    }
}

struct TimedJob {
    due: f64,
    seq: u64,
    job: Job,
}

impl PartialEq for TimedJob {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimedJob {}

impl Ord for TimedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: the heap is a max-heap, we want the earliest deadline on
        // top.
        other
            .due
            .total_cmp(&self.due)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    jobs: VecDeque<Job>,
    running: bool,
}

struct TimedState {
    heap: BinaryHeap<TimedJob>,
    next_seq: u64,
    running: bool,
}

struct Inner {
    queue: Mutex<QueueState>,
    queue_cv: Condvar,
    timed: Mutex<TimedState>,
    timed_cv: Condvar,
    num_workers: AtomicUsize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Fixed-size worker pool executing `Job` values. Supports immediate and
/// delayed scheduling plus a blocking fork-join `parallel_for`. Workers are
/// re-entrant safe: a running job may schedule further jobs, including
/// itself.
#[derive(Clone)]
pub struct JobDispatcher {
    inner: Arc<Inner>,
}

impl JobDispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    running: false,
                }),
                queue_cv: Condvar::new(),
                timed: Mutex::new(TimedState {
                    heap: BinaryHeap::new(),
                    next_seq: 0,
                    running: false,
                }),
                timed_cv: Condvar::new(),
                num_workers: AtomicUsize::new(0),
                threads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts `num_workers` worker threads plus the timer thread driving
    /// delayed jobs.
    pub fn start(&self, num_workers: usize) {
        assert!(num_workers > 0, "dispatcher needs at least one worker");
        {
            let mut queue = self.inner.queue.lock().expect("dispatcher lock poisoned");
            if queue.running {
                panic!("Dispatcher already started");
            }
            queue.running = true;
        }
        self.inner
            .timed
            .lock()
            .expect("dispatcher lock poisoned")
            .running = true;
        self.inner
            .num_workers
            .store(num_workers, MemOrdering::Relaxed);

        let mut threads = self.inner.threads.lock().expect("dispatcher lock poisoned");
        for index in 0..num_workers {
            let inner = self.inner.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("atoll-worker-{}", index))
                    .spawn(move || worker_loop(inner))
                    .expect("failed to spawn dispatcher worker"),
            );
        }
        let inner = self.inner.clone();
        threads.push(
            std::thread::Builder::new()
                .name("atoll-timer".to_string())
                .spawn(move || timer_loop(inner))
                .expect("failed to spawn dispatcher timer"),
        );
    }

    /// Stops the pool. New dispatches fail fast; already queued jobs are
    /// drained by the workers before they exit, so forked work always
    /// joins. Delayed jobs that have not come due are dropped.
    pub fn stop(&self) {
        {
            let mut queue = self.inner.queue.lock().expect("dispatcher lock poisoned");
            queue.running = false;
        }
        {
            let mut timed = self.inner.timed.lock().expect("dispatcher lock poisoned");
            timed.running = false;
            timed.heap.clear();
        }
        self.inner.queue_cv.notify_all();
        self.inner.timed_cv.notify_all();

        let threads: Vec<JoinHandle<()>> = self
            .inner
            .threads
            .lock()
            .expect("dispatcher lock poisoned")
            .drain(..)
            .collect();
        for handle in threads {
            let _ = handle.join();
        }
        self.inner.num_workers.store(0, MemOrdering::Relaxed);
    }

    pub fn num_workers(&self) -> usize {
        self.inner.num_workers.load(MemOrdering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .queue
            .lock()
            .expect("dispatcher lock poisoned")
            .running
    }

    /// Run a job as soon as a worker is free.
    pub fn dispatch(&self, job: Job) -> Result<(), DispatcherStopped> {
        let mut queue = self.inner.queue.lock().expect("dispatcher lock poisoned");
        if !queue.running {
            return Err(DispatcherStopped);
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.inner.queue_cv.notify_one();
        Ok(())
    }

    /// Run a job after at least `delay` seconds.
    pub fn dispatch_after(&self, delay: f64, job: Job) -> Result<(), DispatcherStopped> {
        let mut timed = self.inner.timed.lock().expect("dispatcher lock poisoned");
        if !timed.running {
            return Err(DispatcherStopped);
        }
        let seq = timed.next_seq;
        timed.next_seq += 1;
        timed.heap.push(TimedJob {
            due: performance_time() + delay.max(0.0),
            seq,
            job,
        });
        drop(timed);
        self.inner.timed_cv.notify_one();
        Ok(())
    }

    /// Blocking fork-join loop over `[first, last)` with the given stride.
    /// The calling thread participates; pool workers steal indices from a
    /// shared atomic cursor. Returns once every index has been processed.
    ///
    /// Helper jobs count themselves only once they actually start, so the
    /// final wait covers exactly the helpers that are touching the range.
    /// A helper scheduled but not yet started by then will find the cursor
    /// exhausted and exit without dereferencing the loop body, which is why
    /// calling this from a pool worker cannot deadlock even on a pool of
    /// one.
    pub fn parallel_for<F>(&self, first: usize, last: usize, step: usize, func: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        assert!(step > 0, "parallel_for requires a positive step");
        if first >= last {
            return;
        }

        let helpers = self.num_workers().min((last - first) / step);
        if helpers == 0 || !self.is_running() {
            let mut index = first;
            while index < last {
                func(index);
                index += step;
            }
            return;
        }

        let func_ref: *const (dyn Fn(usize) + Send + Sync + '_) = &func;
        // SAFETY: erase the borrow's lifetime; `ctx.active.wait_zero()` below
        // guarantees no helper dereferences this pointer after `func` (and
        // this stack frame) goes away.
        let func_ref: *const (dyn Fn(usize) + Send + Sync) =
            unsafe { std::mem::transmute(func_ref) };
        let ctx = Arc::new(ParallelForCtx {
            current: AtomicUsize::new(first),
            last,
            step,
            func: FnRef(func_ref),
            active: CompletionCounter::new(),
        });

        for _ in 0..helpers {
            if self.dispatch(Job::new(parallel_for_job, ctx.clone())).is_err() {
                break;
            }
        }

        // The caller owns `func` and may call it directly.
        loop {
            let index = ctx.current.fetch_add(step, MemOrdering::AcqRel);
            if index >= last {
                break;
            }
            func(index);
        }

        // Any helper inside the loop body borrowed `func` from this frame;
        // wait them out. Helpers that start later find nothing to do.
        ctx.active.wait_zero();
    }
}

impl Default for JobDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Pointer to the caller's loop body. Only dereferenced while the cursor
/// still has work, which the caller's completion wait keeps sound; a stale
/// pointer held by a late helper is never touched.
struct FnRef(*const (dyn Fn(usize) + Send + Sync));

unsafe impl Send for FnRef {}
unsafe impl Sync for FnRef {}

struct ParallelForCtx {
    current: AtomicUsize,
    last: usize,
    step: usize,
    func: FnRef,
    active: CompletionCounter,
}

impl ParallelForCtx {
    fn run_helper(&self) {
        loop {
            let index = self.current.fetch_add(self.step, MemOrdering::AcqRel);
            if index >= self.last {
                break;
            }
            unsafe { (*self.func.0)(index) };
        }
    }
}

fn parallel_for_job(data: JobData) {
    let ctx = data
        .downcast::<ParallelForCtx>()
        .expect("parallel_for job payload must be its context");
    ctx.active.increment();
    ctx.run_helper();
    ctx.active.decrement();
}

/// Mutex-and-condvar counter used to join forked work.
struct CompletionCounter {
    count: Mutex<usize>,
    cv: Condvar,
}

impl CompletionCounter {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn increment(&self) {
        *self.count.lock().expect("counter lock poisoned") += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().expect("counter lock poisoned");
        *count -= 1;
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    fn wait_zero(&self) {
        let mut count = self.count.lock().expect("counter lock poisoned");
        while *count > 0 {
            count = self.cv.wait(count).expect("counter lock poisoned");
        }
    }
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let job = {
            let mut queue = inner.queue.lock().expect("dispatcher lock poisoned");
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if !queue.running {
                    return;
                }
                queue = inner
                    .queue_cv
                    .wait(queue)
                    .expect("dispatcher lock poisoned");
            }
        };
        job.run();
    }
}

fn timer_loop(inner: Arc<Inner>) {
    loop {
        let mut timed = inner.timed.lock().expect("dispatcher lock poisoned");
        if !timed.running {
            return;
        }

        let now = performance_time();
        let mut due_jobs = Vec::new();
        loop {
            let due = matches!(timed.heap.peek(), Some(next) if next.due <= now);
            if !due {
                break;
            }
            due_jobs.push(timed.heap.pop().expect("due job present").job);
        }

        if !due_jobs.is_empty() {
            drop(timed);
            for job in due_jobs {
                let mut queue = inner.queue.lock().expect("dispatcher lock poisoned");
                if queue.running {
                    queue.jobs.push_back(job);
                    drop(queue);
                    inner.queue_cv.notify_one();
                }
            }
            continue;
        }

        let timeout = match timed.heap.peek() {
            Some(next) => Duration::from_secs_f64((next.due - now).max(0.0)),
            None => Duration::from_millis(50),
        };
        let (guard, _) = inner
            .timed_cv
            .wait_timeout(timed, timeout)
            .expect("dispatcher lock poisoned");
        drop(guard);
    }
}

// Global dispatcher, started by `init` and shared by all islands.

static GLOBAL: Mutex<Option<JobDispatcher>> = Mutex::new(None);

pub fn init_global(num_workers: usize) {
    let mut global = GLOBAL.lock().expect("global dispatcher lock poisoned");
    if global.is_some() {
        panic!("Global job dispatcher already initialized");
    }
    let dispatcher = JobDispatcher::new();
    dispatcher.start(num_workers);
    *global = Some(dispatcher);
}

pub fn deinit_global() {
    let dispatcher = GLOBAL
        .lock()
        .expect("global dispatcher lock poisoned")
        .take();
    if let Some(dispatcher) = dispatcher {
        dispatcher.stop();
    }
}

/// The process-wide dispatcher. Panics when `init_global` has not run.
pub fn global() -> JobDispatcher {
    GLOBAL
        .lock()
        .expect("global dispatcher lock poisoned")
        .clone()
        .expect("global job dispatcher not initialized; call init first")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CounterCtx {
        hits: AtomicU32,
        done: CompletionCounter,
    }

    fn bump(data: JobData) {
        let ctx = data.downcast::<CounterCtx>().unwrap();
        ctx.hits.fetch_add(1, MemOrdering::Relaxed);
        ctx.done.decrement();
    }

    #[test]
    fn jobs_run_once_each() {
        let dispatcher = JobDispatcher::new();
        dispatcher.start(2);

        let ctx = Arc::new(CounterCtx {
            hits: AtomicU32::new(0),
            done: CompletionCounter::new(),
        });
        for _ in 0..8 {
            ctx.done.increment();
            dispatcher.dispatch(Job::new(bump, ctx.clone())).unwrap();
        }
        ctx.done.wait_zero();
        assert_eq!(ctx.hits.load(MemOrdering::Relaxed), 8);
        dispatcher.stop();
    }

    #[test]
    fn delayed_jobs_respect_their_delay() {
        let dispatcher = JobDispatcher::new();
        dispatcher.start(1);

        let ctx = Arc::new(CounterCtx {
            hits: AtomicU32::new(0),
            done: CompletionCounter::new(),
        });
        ctx.done.increment();
        let start = performance_time();
        dispatcher
            .dispatch_after(0.05, Job::new(bump, ctx.clone()))
            .unwrap();
        ctx.done.wait_zero();
        let elapsed = performance_time() - start;
        assert!(elapsed >= 0.05, "job ran {}s early", 0.05 - elapsed);
        assert_eq!(ctx.hits.load(MemOrdering::Relaxed), 1);
        dispatcher.stop();
    }

    #[test]
    fn parallel_for_covers_the_whole_range() {
        let dispatcher = JobDispatcher::new();
        dispatcher.start(4);

        let flags: Vec<AtomicU32> = (0..1000).map(|_| AtomicU32::new(0)).collect();
        dispatcher.parallel_for(0, 1000, 1, |index| {
            flags[index].fetch_add(1, MemOrdering::Relaxed);
        });

        for (index, flag) in flags.iter().enumerate() {
            assert_eq!(
                flag.load(MemOrdering::Relaxed),
                1,
                "index {} must run exactly once",
                index
            );
        }
        dispatcher.stop();
    }

    #[test]
    fn dispatch_on_stopped_pool_fails_fast() {
        let dispatcher = JobDispatcher::new();
        let ctx = Arc::new(CounterCtx {
            hits: AtomicU32::new(0),
            done: CompletionCounter::new(),
        });
        assert_eq!(
            dispatcher.dispatch(Job::new(bump, ctx)),
            Err(DispatcherStopped)
        );
    }
}
