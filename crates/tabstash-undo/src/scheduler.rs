//! Cancellable delayed tasks
//!
//! The undo engine never touches a timer directly. It asks a [`Scheduler`]
//! to run a task later and keeps the returned [`ScheduledTask`] so it can
//! cancel it. Production uses the tokio runtime; tests drive a
//! [`ManualScheduler`] whose clock only moves when told to.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay` unless the returned handle is cancelled
    /// first.
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask;
}

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const FIRED: u8 = 2;

/// Handle to a scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    state: Arc<AtomicU8>,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Prevent the task from running. No effect once it has fired.
    pub fn cancel(&self) {
        let _ = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Run `task` if the handle is still pending. Called by schedulers when
    /// the delay elapses.
    pub fn fire(&self, task: Task) -> bool {
        if self
            .state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            task();
            true
        } else {
            false
        }
    }
}

impl Default for ScheduledTask {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler backed by a tokio runtime.
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Scheduler on the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let scheduled = ScheduledTask::new();
        let handle = scheduled.clone();

        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if handle.is_pending() {
                // Persistence does blocking SQLite I/O
                let _ = tokio::task::spawn_blocking(move || handle.fire(task)).await;
            }
        });

        scheduled
    }
}

struct PendingTask {
    due: Duration,
    order: u64,
    handle: ScheduledTask,
    task: Task,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_order: u64,
    queue: Vec<PendingTask>,
}

/// Deterministic scheduler driven by [`ManualScheduler::advance`].
#[derive(Default)]
pub struct ManualScheduler {
    clock: Mutex<ManualClock>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Tasks still waiting to run (cancelled tasks excluded).
    pub fn pending(&self) -> usize {
        self.clock
            .lock()
            .queue
            .iter()
            .filter(|p| p.handle.is_pending())
            .count()
    }

    /// Move the virtual clock forward, running every task that comes due in
    /// deadline order. Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.lock().now + by;
        let mut ran = 0;

        loop {
            let next = {
                let mut clock = self.clock.lock();
                clock.queue.retain(|p| !p.handle.is_cancelled());
                let earliest = clock
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.due <= target)
                    .min_by_key(|(_, p)| (p.due, p.order))
                    .map(|(i, _)| i);

                match earliest {
                    Some(index) => {
                        let pending = clock.queue.remove(index);
                        clock.now = clock.now.max(pending.due);
                        Some(pending)
                    }
                    None => {
                        clock.now = target;
                        None
                    }
                }
            };

            // Run outside the lock; the task may schedule again
            match next {
                Some(pending) => {
                    if pending.handle.fire(pending.task) {
                        ran += 1;
                    }
                }
                None => break,
            }
        }

        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let handle = ScheduledTask::new();
        let mut clock = self.clock.lock();
        let order = clock.next_order;
        clock.next_order += 1;
        let due = clock.now + delay;
        clock.queue.push(PendingTask {
            due,
            order,
            handle: handle.clone(),
            task,
        });
        handle
    }
}
