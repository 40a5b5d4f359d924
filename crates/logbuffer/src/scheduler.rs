//! Scheduler
//!
//! A single-threaded periodic runner shared by all scheduled tails of one
//! buffer. The thread is spawned lazily on the first schedule and driven
//! by a due-time ordered queue under a mutex and condvar.
//!
//! After each round a task is re-armed at `now + delay`, except that a
//! round reporting `reached_tip == false` is re-armed after a small
//! minimum delay so a large backlog is drained without waiting out the
//! configured period. A failed round is logged and re-armed normally;
//! retrying with the unmoved cursor is the delivery contract.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::buffer::lock;
use crate::error::Result;
use crate::tail::Runner;

/// Re-arm delay for rounds that report an unfinished backlog.
const CATCH_UP_DELAY: Duration = Duration::from_millis(1);

pub(crate) struct Scheduler {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    queue: Mutex<BinaryHeap<Due>>,
    signal: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
}

struct Task {
    name: String,
    runner: Arc<Mutex<dyn Runner>>,
    delay: Duration,
    cancelled: AtomicBool,
}

/// Handle for cancelling a scheduled task. Cancellation takes effect at
/// the task's next due time; an in-flight round always completes.
pub(crate) struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    pub(crate) fn cancel(&self) {
        self.task.cancelled.store(true, AtomicOrdering::SeqCst);
    }
}

struct Due {
    at: Instant,
    seq: u64,
    task: Arc<Task>,
}

// BinaryHeap is a max-heap; order by reversed due time to pop the
// earliest task first.
impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Due {}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(BinaryHeap::new()),
                signal: Condvar::new(),
                shutdown: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Schedules `runner` with the given inter-round delay. The first
    /// round is armed immediately. Spawns the scheduler thread on first
    /// use.
    pub(crate) fn schedule(
        &self,
        name: String,
        runner: Arc<Mutex<dyn Runner>>,
        delay: Duration,
    ) -> Result<TaskHandle> {
        {
            let mut thread = lock(&self.thread);
            if thread.is_none() {
                let inner = Arc::clone(&self.inner);
                *thread = Some(
                    thread::Builder::new()
                        .name("logbuffer-scheduler".to_string())
                        .spawn(move || run_loop(inner))?,
                );
            }
        }

        let task = Arc::new(Task {
            name,
            runner,
            delay,
            cancelled: AtomicBool::new(false),
        });
        self.inner.push(Instant::now(), Arc::clone(&task));
        Ok(TaskHandle { task })
    }

    /// Stops the scheduler thread and joins it. In-flight rounds complete
    /// first. Idempotent.
    pub(crate) fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::SeqCst);
        self.inner.signal.notify_all();
        if let Some(handle) = lock(&self.thread).take() {
            let _ = handle.join();
        }
        lock(&self.inner.queue).clear();
    }
}

impl Inner {
    fn push(&self, at: Instant, task: Arc<Task>) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        lock(&self.queue).push(Due { at, seq, task });
        self.signal.notify_all();
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(AtomicOrdering::SeqCst)
    }
}

fn run_loop(inner: Arc<Inner>) {
    let mut queue = lock(&inner.queue);
    loop {
        if inner.is_shut_down() {
            return;
        }

        let now = Instant::now();
        match queue.peek().map(|head| head.at) {
            None => {
                queue = inner.signal.wait(queue).unwrap_or_else(|e| e.into_inner());
                continue;
            }
            Some(at) if at > now => {
                queue = inner
                    .signal
                    .wait_timeout(queue, at - now)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
                continue;
            }
            Some(_) => {}
        }

        let Some(task) = queue.pop().map(|due| due.task) else {
            continue;
        };
        if task.cancelled.load(AtomicOrdering::SeqCst) {
            debug!(tail = %task.name, "dropping cancelled tail task");
            continue;
        }

        // Run the round without holding the queue lock so schedules and
        // cancels from other threads proceed.
        drop(queue);
        let next_delay = run_round(&task);
        queue = lock(&inner.queue);

        if !task.cancelled.load(AtomicOrdering::SeqCst) {
            let seq = inner.seq.fetch_add(1, AtomicOrdering::Relaxed);
            queue.push(Due {
                at: Instant::now() + next_delay,
                seq,
                task,
            });
        }
    }
}

fn run_round(task: &Task) -> Duration {
    let mut runner = lock(&task.runner);
    match runner.round() {
        Ok(result) if !result.reached_tip => CATCH_UP_DELAY,
        Ok(_) => task.delay,
        Err(err) => {
            warn!(tail = %task.name, error = %err, "tail round failed, retrying next round");
            task.delay
        }
    }
}
