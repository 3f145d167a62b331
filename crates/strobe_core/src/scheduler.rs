//! The cooperative scheduler: ready queue, deferred write queue, phase
//! state machine, and the callback trampolines registered with the GPI.
//!
//! One scheduler exists per thread, created lazily and never referencing
//! simulator objects at construction (the GPI is not ready when the
//! library loads). All queues are accessed only from simulator callbacks
//! on the single simulator thread, so the state lives in a thread-local
//! `RefCell`; the drain is structured so the cell is never borrowed while
//! user task code runs.
//!
//! Phase discipline: signal writes queued during task execution are
//! flushed to the simulator only inside the readwrite callback. While a
//! readonly callback is executing no readwrite callback may be registered;
//! the request is parked and re-armed through a next-time-step callback
//! when the readonly phase exits.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use log::{error, warn};

use crate::error::Failure;
use crate::gpi::{self, EdgeKind, RawHandle, SetAction};
use crate::runner;

/// Identifies a task registered with the scheduler.
///
/// This is the "resumption handle": triggers carry it into GPI callbacks
/// and the scheduler resumes the task by polling the future stored under
/// it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = Result<(), Failure>>>>;

struct TaskEntry {
    /// The suspended body. Taken out of the slot while being polled and on
    /// completion; `None` in a live entry means "currently polling".
    future: Option<TaskFuture>,
    detached: bool,
    completed: bool,
    cancelled: bool,
    failure: Option<Failure>,
    join_waiter: Option<TaskId>,
}

struct WriteRequest {
    handle: RawHandle,
    value: i64,
}

/// Per-thread scheduler state.
pub struct Scheduler {
    tasks: HashMap<TaskId, TaskEntry>,
    active: HashSet<TaskId>,
    ready: VecDeque<TaskId>,
    pending_writes: VecDeque<WriteRequest>,
    rw_barrier_waiters: Vec<TaskId>,
    ro_barrier_waiters: Vec<TaskId>,
    rw_cb_pending: bool,
    ro_cb_pending: bool,
    in_readonly: bool,
    need_rw_after_ro: bool,
    next_id: u64,
}

thread_local! {
    static SCHED: RefCell<Scheduler> = RefCell::new(Scheduler::new());
    static CURRENT: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// Returns the task currently being resumed by the drain, if any.
pub(crate) fn current_task() -> Option<TaskId> {
    CURRENT.get()
}

impl Scheduler {
    fn new() -> Self {
        Scheduler {
            tasks: HashMap::new(),
            active: HashSet::new(),
            ready: VecDeque::new(),
            pending_writes: VecDeque::new(),
            rw_barrier_waiters: Vec::new(),
            ro_barrier_waiters: Vec::new(),
            rw_cb_pending: false,
            ro_cb_pending: false,
            in_readonly: false,
            need_rw_after_ro: false,
            next_id: 0,
        }
    }

    /// Runs `f` with the thread's scheduler borrowed mutably.
    ///
    /// Callers must not invoke user code or re-entrant scheduler
    /// operations inside `f`.
    pub(crate) fn with<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
        SCHED.with(|s| f(&mut s.borrow_mut()))
    }

    /// Registers a new task in the suspended state. The body is not polled
    /// and the task is not yet active or ready.
    pub(crate) fn spawn_suspended(&mut self, future: TaskFuture) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.tasks.insert(
            id,
            TaskEntry {
                future: Some(future),
                detached: false,
                completed: false,
                cancelled: false,
                failure: None,
                join_waiter: None,
            },
        );
        id
    }

    /// Marks a task detached: it manages its own destruction on completion
    /// unless a joiner claims it first.
    pub(crate) fn set_detached(&mut self, id: TaskId) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            entry.detached = true;
        }
    }

    /// Returns true once the task body has returned.
    pub(crate) fn is_completed(&self, id: TaskId) -> bool {
        self.tasks.get(&id).is_none_or(|e| e.completed)
    }

    /// Returns a copy of the task's stored failure, if any.
    pub(crate) fn stored_failure(&self, id: TaskId) -> Option<Failure> {
        self.tasks.get(&id).and_then(|e| e.failure.clone())
    }

    /// Requests that the task be destroyed on its next scheduler visit,
    /// without resuming it. Also retires it from the active set: a
    /// cancelled task can never become schedulable again.
    pub(crate) fn cancel(&mut self, id: TaskId) {
        self.active.remove(&id);
        if let Some(entry) = self.tasks.get_mut(&id) {
            if !entry.completed {
                entry.cancelled = true;
            }
        }
    }


    /// Number of tasks in the active set (spawned, not yet completed or
    /// cancelled).
    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Makes a task schedulable: inserts it into the active set and the
    /// ready queue.
    fn schedule_locked(&mut self, id: TaskId) {
        self.active.insert(id);
        self.ready.push_back(id);
    }

    fn queue_write_locked(&mut self, handle: RawHandle, value: i64) {
        self.pending_writes.push_back(WriteRequest { handle, value });
    }

    /// Arms the readwrite callback unless one is already pending. Inside a
    /// readonly callback the registration is parked; exiting readonly
    /// re-arms it through a next-time-step callback.
    fn request_readwrite_locked(&mut self) -> RwRequest {
        if self.in_readonly {
            self.need_rw_after_ro = true;
            return RwRequest::Deferred;
        }
        if self.rw_cb_pending {
            return RwRequest::AlreadyPending;
        }
        self.rw_cb_pending = true;
        RwRequest::Register
    }
}

/// Outcome of a readwrite-callback request while the scheduler is locked;
/// the actual GPI registration happens after the borrow is released.
enum RwRequest {
    Register,
    AlreadyPending,
    Deferred,
}

/// Schedules a task for its first resumption (or a later one) in the next
/// drain pass.
pub(crate) fn schedule(id: TaskId) {
    Scheduler::with(|s| s.schedule_locked(id));
}

/// Enqueues a resumption and requests a readwrite callback so any writes
/// performed by the resumed body get flushed in the next writable phase.
pub(crate) fn enqueue_ready(id: TaskId) {
    let req = Scheduler::with(|s| {
        s.schedule_locked(id);
        s.request_readwrite_locked()
    });
    finish_rw_request(req);
}

/// Queues a deferred signal write and requests the flush phase.
pub(crate) fn queue_write(handle: RawHandle, value: i64) {
    let req = Scheduler::with(|s| {
        s.queue_write_locked(handle, value);
        s.request_readwrite_locked()
    });
    finish_rw_request(req);
}

/// Requests a readwrite callback (idempotent; deferred inside readonly).
pub(crate) fn request_readwrite_callback() {
    let req = Scheduler::with(|s| s.request_readwrite_locked());
    finish_rw_request(req);
}

fn finish_rw_request(req: RwRequest) {
    if let RwRequest::Register = req {
        if gpi::register_readwrite_callback(Box::new(readwrite_callback)).is_none() {
            error!(target: "strobe.scheduler", "readwrite callback registration rejected");
            Scheduler::with(|s| s.rw_cb_pending = false);
        }
    }
}

/// Registers a timed callback that resumes `id` through the readwrite
/// path after `delay_ticks`. A rejected registration degrades to an
/// immediate ready-enqueue so the waiter cannot wedge.
pub(crate) fn schedule_after_time(id: TaskId, delay_ticks: u64) {
    let registered =
        gpi::register_timed_callback(delay_ticks, Box::new(move || timer_fired(id))).is_some();
    if !registered {
        error!(target: "strobe.scheduler", "timed callback registration rejected for {id}");
        enqueue_ready(id);
    }
}

/// Registers a value-change callback that resumes `id` when the edge
/// fires. Rejection degrades to an immediate ready-enqueue.
pub(crate) fn schedule_on_edge(id: TaskId, signal: RawHandle, edge: EdgeKind) {
    let registered =
        gpi::register_value_change_callback(signal, edge, Box::new(move || edge_fired(id)))
            .is_some();
    if !registered {
        error!(target: "strobe.scheduler", "value-change callback registration rejected for {id}");
        enqueue_ready(id);
    }
}

/// Parks `id` until the next writable phase.
pub(crate) fn schedule_rw_barrier(id: TaskId) {
    let req = Scheduler::with(|s| {
        s.rw_barrier_waiters.push(id);
        s.request_readwrite_locked()
    });
    finish_rw_request(req);
}

/// Parks `id` until the next read-only phase.
pub(crate) fn schedule_ro_barrier(id: TaskId) {
    let register = Scheduler::with(|s| {
        s.ro_barrier_waiters.push(id);
        if s.ro_cb_pending {
            false
        } else {
            s.ro_cb_pending = true;
            true
        }
    });
    if register && gpi::register_readonly_callback(Box::new(readonly_callback)).is_none() {
        error!(target: "strobe.scheduler", "readonly callback registration rejected");
        Scheduler::with(|s| s.ro_cb_pending = false);
    }
}

/// Records `waiter` as the continuation of `target`, scheduling `target`
/// if it has never run and is not self-managing. If `target` is already
/// complete (or gone), the waiter is enqueued for the next pass instead;
/// it is never resumed synchronously.
pub(crate) fn register_join(target: TaskId, waiter: TaskId) {
    enum Outcome {
        WaiterReady,
        Registered { start_target: bool },
    }
    let outcome = Scheduler::with(|s| {
        let already_started = s.active.contains(&target);
        match s.tasks.get_mut(&target) {
            None => Outcome::WaiterReady,
            Some(entry) if entry.completed => Outcome::WaiterReady,
            Some(entry) => {
                if entry.join_waiter.is_some() {
                    warn!(target: "strobe.scheduler", "{target} already has a join waiter");
                    return Outcome::WaiterReady;
                }
                entry.join_waiter = Some(waiter);
                Outcome::Registered {
                    start_target: !entry.detached && !already_started,
                }
            }
        }
    });
    match outcome {
        Outcome::WaiterReady => enqueue_ready(waiter),
        Outcome::Registered { start_target } => {
            if start_target {
                schedule(target);
            }
        }
    }
}

/// Removes a task outright. Used for tasks that were never scheduled and
/// by the runner's consumption path.
///
/// The entry is dropped after the scheduler borrow is released: a
/// suspended body's destructor can run user code (a held `JoinHandle`
/// cancelling its task, for example) that calls back in here.
pub(crate) fn destroy_task(id: TaskId) {
    let entry = Scheduler::with(|s| {
        s.active.remove(&id);
        s.tasks.remove(&id)
    });
    drop(entry);
}

/// Consumes a joined task on waiter resumption: takes the stored failure
/// and destroys the entry. Ownership of the target ends here.
pub(crate) fn consume_join(target: TaskId) -> Result<(), Failure> {
    Scheduler::with(|s| {
        let completed = match s.tasks.get(&target) {
            None => return Ok(()),
            Some(entry) => entry.completed,
        };
        if !completed {
            warn!(target: "strobe.scheduler", "join consumed before {target} completed");
            return Ok(());
        }
        match s.tasks.remove(&target).and_then(|e| e.failure) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    })
}

/// Marks every active task except `keep` as cancelled and destroys those
/// that have already completed. Tasks still parked on simulator callbacks
/// are destroyed lazily when their callback fires.
pub(crate) fn cancel_all_except(keep: Option<TaskId>) {
    Scheduler::with(|s| {
        let doomed: Vec<TaskId> = s
            .active
            .iter()
            .copied()
            .filter(|id| Some(*id) != keep)
            .collect();
        for id in doomed {
            s.active.remove(&id);
            let completed = match s.tasks.get(&id) {
                None => continue,
                Some(entry) => entry.completed,
            };
            if completed {
                s.tasks.remove(&id);
            } else if let Some(entry) = s.tasks.get_mut(&id) {
                entry.cancelled = true;
            }
        }
    });
}

/// Flushes the deferred write queue to the simulator, in order, and
/// re-arms the readwrite request flag. Only the readwrite callback and
/// the join handoff path call this.
pub(crate) fn flush_pending_writes() {
    loop {
        let write = Scheduler::with(|s| s.pending_writes.pop_front());
        match write {
            Some(w) => gpi::set_signal_value(w.handle, w.value, SetAction::Deposit),
            None => break,
        }
    }
    Scheduler::with(|s| s.rw_cb_pending = false);
}

/// Number of tasks currently in the active set: spawned and neither
/// completed nor cancelled. Regression cleanup drives this to zero
/// between tests (modulo the test task itself).
pub fn active_task_count() -> usize {
    Scheduler::with(|s| s.active_count())
}

enum DrainStep {
    Idle,
    Skip,
    /// A cancelled task's entry, removed from the table; dropped outside
    /// the scheduler borrow.
    Destroy(TaskEntry),
    Poll(TaskId, TaskFuture),
}

/// The ready drain invoked from every GPI callback trampoline.
///
/// Pops tasks in FIFO order, destroying cancelled ones without resumption
/// and resuming the rest. Runs until the ready queue is empty, then
/// returns control to the simulator. `flush_writes` is true only when
/// invoked from the readwrite callback.
pub(crate) fn run_ready(flush_writes: bool) {
    if flush_writes {
        flush_pending_writes();
    }
    loop {
        let step = Scheduler::with(|s| {
            let Some(id) = s.ready.pop_front() else {
                return DrainStep::Idle;
            };
            let cancelled = match s.tasks.get(&id) {
                None => return DrainStep::Skip,
                Some(entry) => entry.cancelled,
            };
            if cancelled {
                s.active.remove(&id);
                return match s.tasks.remove(&id) {
                    Some(entry) => DrainStep::Destroy(entry),
                    None => DrainStep::Skip,
                };
            }
            match s.tasks.get_mut(&id).and_then(|entry| entry.future.take()) {
                Some(future) => DrainStep::Poll(id, future),
                None => DrainStep::Skip,
            }
        });
        match step {
            DrainStep::Idle => break,
            DrainStep::Skip => continue,
            DrainStep::Destroy(entry) => {
                drop(entry);
                continue;
            }
            DrainStep::Poll(id, mut future) => {
                CURRENT.set(Some(id));
                let polled = catch_unwind(AssertUnwindSafe(|| {
                    let mut cx = Context::from_waker(Waker::noop());
                    future.as_mut().poll(&mut cx)
                }));
                CURRENT.set(None);
                match polled {
                    Ok(Poll::Pending) => {
                        Scheduler::with(|s| {
                            if let Some(entry) = s.tasks.get_mut(&id) {
                                entry.future = Some(future);
                            }
                        });
                    }
                    Ok(Poll::Ready(result)) => finish_task(id, result.err(), flush_writes),
                    Err(payload) => {
                        drop(future);
                        let failure = Failure::from_panic(payload);
                        error!(target: "strobe.scheduler", "{id} panicked: {failure}");
                        finish_task(id, Some(failure), flush_writes);
                    }
                }
            }
        }
    }
}

/// Completion path for a task whose body just returned.
///
/// Sets `completed` exactly once, retires the task from the active set,
/// and hands the task off: to its joiner (write-flush delta handoff when
/// completing inside the readwrite phase), to the test runner if it is
/// the current test, or to immediate destruction if detached.
fn finish_task(id: TaskId, failure: Option<Failure>, in_readwrite: bool) {
    let (join_waiter, detached) = Scheduler::with(|s| {
        let Some(entry) = s.tasks.get_mut(&id) else {
            return (None, false);
        };
        entry.completed = true;
        entry.failure = failure;
        entry.future = None;
        s.active.remove(&id);
        (entry.join_waiter, entry.detached)
    });

    if let Some(waiter) = join_waiter {
        let writes_pending = Scheduler::with(|s| !s.pending_writes.is_empty());
        if in_readwrite && writes_pending {
            // The completing body queued writes inside the writable phase.
            // Flush them now and hand the joiner off through a zero-delay
            // timed callback: one delta cycle for the simulator to observe
            // the writes before the joiner resumes.
            flush_pending_writes();
            schedule_after_time(waiter, 0);
        } else {
            enqueue_ready(waiter);
        }
        // Ownership transfers to the joiner; the entry stays until consumed.
    } else if runner::is_current_test(id) {
        runner::on_test_complete();
    } else if detached {
        destroy_task(id);
    }
}

fn timer_fired(id: TaskId) {
    let req = Scheduler::with(|s| {
        s.schedule_locked(id);
        s.request_readwrite_locked()
    });
    finish_rw_request(req);
}

fn edge_fired(id: TaskId) {
    Scheduler::with(|s| s.schedule_locked(id));
    run_ready(false);
}

fn readwrite_callback() {
    Scheduler::with(|s| {
        let waiters = std::mem::take(&mut s.rw_barrier_waiters);
        for id in waiters {
            s.schedule_locked(id);
        }
    });
    run_ready(true);
}

fn readonly_callback() {
    Scheduler::with(|s| {
        s.ro_cb_pending = false;
        s.in_readonly = true;
        let waiters = std::mem::take(&mut s.ro_barrier_waiters);
        for id in waiters {
            s.schedule_locked(id);
        }
    });
    run_ready(false);
    let rearm = Scheduler::with(|s| {
        s.in_readonly = false;
        std::mem::take(&mut s.need_rw_after_ro)
    });
    if rearm && gpi::register_nexttime_callback(Box::new(nexttime_callback)).is_none() {
        error!(target: "strobe.scheduler", "next-time-step callback registration rejected");
    }
}

fn nexttime_callback() {
    request_readwrite_callback();
}
