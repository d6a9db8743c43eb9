//! A single-threaded, cooperative, deterministic executor driven by virtual
//! time rather than the wall clock.
//!
//! Tasks never run concurrently with each other — only one task's `poll` is
//! ever on the stack at a time — but futures are required to be `Send` so
//! the type system doesn't quietly grow a dependency on thread-confinement
//! that would make this executor harder to later run multi-threaded. Waking
//! is implemented with `futures::task::waker` + [`ArcWake`], so there is no
//! unsafe code anywhere in this module.
//!
//! Determinism (two tasks due at the same virtual time always run in the
//! same order across runs) comes from breaking ties on `(time, task id,
//! insertion sequence)` in the timer heap, and from draining the ready queue
//! strictly FIFO.

use crate::clock::VirtualTime;
use futures_util::task::ArcWake;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::{BinaryHeap, VecDeque};
use std::cmp::Reverse;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

thread_local! {
    /// Set for the duration of polling a task so that `Scheduler::delay`
    /// knows which task id it is registering a timer for, without the
    /// future having to carry its own id explicitly.
    static CURRENT_TASK: Cell<Option<usize>> = Cell::new(None);
}

struct TaskSlot {
    future: Option<BoxFuture>,
    /// true if this task id is currently sitting in `Inner::ready`.
    scheduled: bool,
}

struct TimerEntry {
    time: VirtualTime,
    task: usize,
    seq: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.task, self.seq) == (other.time, other.task, other.seq)
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.task, self.seq).cmp(&(other.time, other.task, other.seq))
    }
}

struct Inner {
    now: VirtualTime,
    tasks: Vec<Option<TaskSlot>>,
    ready: VecDeque<usize>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
}

impl Inner {
    fn mark_ready(&mut self, id: usize) {
        if let Some(Some(slot)) = self.tasks.get_mut(id) {
            if !slot.scheduled {
                slot.scheduled = true;
                self.ready.push_back(id);
            }
        }
    }
}

struct TaskWaker {
    id: usize,
    inner: Arc<Mutex<Inner>>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.inner.lock().mark_ready(arc_self.id);
    }
}

/// Handle to the executor. Cheap to clone — every task and every
/// `DelayedComp` holds one.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                now: VirtualTime::ZERO,
                tasks: Vec::new(),
                ready: VecDeque::new(),
                timers: BinaryHeap::new(),
                next_seq: 0,
            })),
        }
    }

    pub fn now(&self) -> VirtualTime {
        self.inner.lock().now
    }

    /// Spawns a task. It becomes eligible to run on the next drain of the
    /// ready queue.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        let mut inner = self.inner.lock();
        let id = inner.tasks.len();
        inner.tasks.push(Some(TaskSlot { future: Some(Box::pin(fut)), scheduled: true }));
        inner.ready.push_back(id);
    }

    /// Suspends the calling task until virtual time has advanced by `dt`.
    /// This is the only primitive in the workspace that advances virtual
    /// time; everything else (bandwidth charges, `DelayedComp::run`) is
    /// built on top of it.
    pub fn delay(&self, dt: VirtualTime) -> Delay {
        Delay { scheduler: self.clone(), dt, target: None }
    }

    fn poll_task(&self, id: usize) {
        let fut = {
            let mut inner = self.inner.lock();
            match inner.tasks.get_mut(id) {
                Some(Some(slot)) => {
                    slot.scheduled = false;
                    slot.future.take()
                }
                _ => None,
            }
        };
        let Some(mut fut) = fut else { return };

        let waker = futures_util::task::waker(Arc::new(TaskWaker { id, inner: self.inner.clone() }));
        let mut cx = Context::from_waker(&waker);
        CURRENT_TASK.with(|c| c.set(Some(id)));
        let poll = fut.as_mut().poll(&mut cx);
        CURRENT_TASK.with(|c| c.set(None));

        let mut inner = self.inner.lock();
        match poll {
            Poll::Ready(()) => inner.tasks[id] = None,
            Poll::Pending => {
                if let Some(Some(slot)) = inner.tasks.get_mut(id) {
                    slot.future = Some(fut);
                }
            }
        }
    }

    fn drain_ready(&self) {
        loop {
            let next = self.inner.lock().ready.pop_front();
            let Some(id) = next else { break };
            self.poll_task(id);
        }
    }

    /// Registers a wakeup for `task` at `time`, called only from
    /// `Delay::poll`.
    fn schedule_timer(&self, time: VirtualTime, task: usize) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.timers.push(Reverse(TimerEntry { time, task, seq }));
    }

    /// Advances to the next due timer (or set of timers sharing the same
    /// due time) and marks those tasks ready. Returns `false` if there was
    /// nothing left to advance to.
    fn advance(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some(Reverse(first)) = inner.timers.pop() else { return false };
        inner.now = first.time;
        let mut due = vec![first];
        while let Some(Reverse(peek)) = inner.timers.peek() {
            if peek.time == due[0].time {
                let Reverse(entry) = inner.timers.pop().unwrap();
                due.push(entry);
            } else {
                break;
            }
        }
        for entry in due {
            inner.mark_ready(entry.task);
        }
        true
    }

    /// Runs the executor until every task is either finished or parked
    /// forever (no ready tasks and no pending timers).
    pub fn run_until_quiescent(&self) {
        loop {
            self.drain_ready();
            if !self.advance() {
                return;
            }
        }
    }

    /// Runs `fut` (spawned as its own task) to completion, driving every
    /// other spawned task along the way, and returns its result. Intended
    /// for tests and for the top-level simulation driver.
    pub fn block_on<T: Send + 'static>(&self, fut: impl Future<Output = T> + Send + 'static) -> T {
        let result: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let slot = result.clone();
        self.spawn(async move {
            let value = fut.await;
            *slot.lock() = Some(value);
        });
        self.run_until_quiescent();
        Arc::try_unwrap(result)
            .unwrap_or_else(|_| panic!("block_on: scheduler still holds a reference"))
            .into_inner()
            .expect("block_on: driven future never completed — a task is stuck")
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`Scheduler::delay`].
pub struct Delay {
    scheduler: Scheduler,
    dt: VirtualTime,
    target: Option<VirtualTime>,
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.target {
            None => {
                let task = CURRENT_TASK.with(|c| c.get()).expect("Scheduler::delay polled outside a scheduled task");
                let now = this.scheduler.now();
                let target = now + this.dt;
                this.target = Some(target);
                this.scheduler.schedule_timer(target, task);
                Poll::Pending
            }
            Some(target) => {
                if this.scheduler.now() >= target {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn delay_advances_virtual_time_by_exactly_dt() {
        let scheduler = Scheduler::new();
        let observed = scheduler.block_on({
            let scheduler = scheduler.clone();
            async move {
                scheduler.delay(VirtualTime::from_micros(500)).await;
                scheduler.now()
            }
        });
        assert_eq!(observed, VirtualTime::from_micros(500));
    }

    #[test]
    fn tasks_due_at_the_same_time_run_in_spawn_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3u64 {
            let scheduler2 = scheduler.clone();
            let order = order.clone();
            scheduler.spawn(async move {
                scheduler2.delay(VirtualTime::from_micros(100)).await;
                order.lock().push(i);
            });
        }
        scheduler.run_until_quiescent();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn run_until_quiescent_stops_when_nothing_is_scheduled() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU64::new(0));
        let count2 = count.clone();
        scheduler.spawn(async move {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.run_until_quiescent();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // Idempotent: nothing left to run, so a second pass changes nothing.
        scheduler.run_until_quiescent();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
