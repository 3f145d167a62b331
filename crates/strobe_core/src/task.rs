//! Task spawning, joining, and cancellation.
//!
//! A task is a suspendable routine owned by the scheduler; user code holds
//! either a [`Task`] (suspended, not yet started) or a [`JoinHandle`]
//! (started detached via [`start_soon`]). Awaiting either suspends the
//! awaiter until the target completes, then re-raises the target's stored
//! failure into the awaiter and destroys the target.
//!
//! Ownership rules: a non-detached task is owned by its first joiner, which
//! destroys it on resume. A detached task without a joiner is owned by the
//! scheduler and destroyed on completion. Dropping a [`JoinHandle`] without
//! awaiting it signals cancellation on the underlying task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Failure;
use crate::scheduler::{self, Scheduler, TaskId};

/// Boxed task body as accepted by [`spawn`] and [`start_soon`].
pub type TaskBody = Pin<Box<dyn Future<Output = Result<(), Failure>>>>;

/// Creates a task in the suspended state.
///
/// The body does not execute until the task is scheduled, either by
/// awaiting its [`Task::join`] or through the test runner. Dropping the
/// `Task` un-released destroys it without the body ever running.
pub fn spawn(body: impl Future<Output = Result<(), Failure>> + 'static) -> Task {
    let id = Scheduler::with(|s| s.spawn_suspended(Box::pin(body)));
    Task { id: Some(id) }
}

/// Spawns a detached task and enqueues it for its first resumption.
///
/// Returns a [`JoinHandle`] that can be awaited for completion; dropping
/// the handle un-joined cancels the task instead.
pub fn start_soon(body: impl Future<Output = Result<(), Failure>> + 'static) -> JoinHandle {
    let id = Scheduler::with(|s| {
        let id = s.spawn_suspended(Box::pin(body));
        s.set_detached(id);
        id
    });
    scheduler::schedule(id);
    JoinHandle {
        id,
        joined: false,
        registered: false,
    }
}

/// A suspended task that has not been handed to the scheduler yet.
#[derive(Debug)]
pub struct Task {
    id: Option<TaskId>,
}

impl Task {
    /// Yields the resumption handle, relinquishing destruction ownership.
    pub fn release(mut self) -> TaskId {
        self.id.take().expect("task already released")
    }

    /// Marks the task self-managing: on completion without a joiner the
    /// scheduler destroys it.
    pub fn detach(&self) {
        if let Some(id) = self.id {
            Scheduler::with(|s| s.set_detached(id));
        }
    }

    /// Returns true once the body has returned.
    pub fn done(&self) -> bool {
        self.id
            .map(|id| Scheduler::with(|s| s.is_completed(id)))
            .unwrap_or(true)
    }

    /// Returns a copy of the failure stored by the body, if any.
    pub fn failure(&self) -> Option<Failure> {
        self.id.and_then(|id| Scheduler::with(|s| s.stored_failure(id)))
    }

    /// Returns an awaitable for the task's completion, transferring
    /// ownership to the joiner.
    pub fn join(mut self) -> Join {
        let id = self.id.take().expect("task already released");
        Join::new(id)
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            scheduler::destroy_task(id);
        }
    }
}

/// Handle to a task started with [`start_soon`].
///
/// Awaitable; resolves when the task completes, re-raising its stored
/// failure. Dropped un-joined, it signals cancellation: the scheduler
/// destroys the task at its next visit without resuming it.
#[derive(Debug)]
pub struct JoinHandle {
    id: TaskId,
    joined: bool,
    registered: bool,
}

impl JoinHandle {
    /// The underlying resumption handle.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns true once the task body has returned.
    pub fn done(&self) -> bool {
        Scheduler::with(|s| s.is_completed(self.id))
    }

    /// Converts the handle into the join awaitable, giving up the
    /// cancel-on-drop behavior.
    pub fn join(mut self) -> Join {
        self.joined = true;
        Join::new(self.id)
    }
}

impl Future for JoinHandle {
    type Output = Result<(), Failure>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.joined = true;
        let target = self.id;
        poll_join(target, &mut self.registered)
    }
}

impl Drop for JoinHandle {
    fn drop(&mut self) {
        if !self.joined {
            Scheduler::with(|s| s.cancel(self.id));
        }
    }
}

/// Awaitable for another task's completion.
///
/// First poll registers the awaiter as the target's continuation; it
/// never resumes synchronously, even if the target is already complete
/// (the awaiter is enqueued for the next scheduler pass). Second poll consumes
/// the target: its stored failure, if any, is returned and the target is
/// destroyed.
#[derive(Debug)]
pub struct Join {
    target: TaskId,
    registered: bool,
}

impl Join {
    fn new(target: TaskId) -> Self {
        Join {
            target,
            registered: false,
        }
    }
}

impl Future for Join {
    type Output = Result<(), Failure>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let target = self.target;
        poll_join(target, &mut self.registered)
    }
}

fn poll_join(target: TaskId, registered: &mut bool) -> Poll<Result<(), Failure>> {
    if !*registered {
        *registered = true;
        match scheduler::current_task() {
            Some(waiter) => {
                scheduler::register_join(target, waiter);
                Poll::Pending
            }
            None => {
                log::error!(
                    target: "strobe.scheduler",
                    "join awaited outside a scheduled task"
                );
                Poll::Ready(Ok(()))
            }
        }
    } else {
        Poll::Ready(scheduler::consume_join(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    // These run without a GPI backend: callback registration fails, which
    // degrades to immediate ready-enqueues, so a manual drain suffices.

    #[test]
    fn spawned_task_runs_only_when_scheduled() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let task = spawn(async move {
            flag.set(true);
            Ok(())
        });
        assert!(!task.done());
        scheduler::run_ready(false);
        assert!(!ran.get());

        let id = task.release();
        scheduler::schedule(id);
        scheduler::run_ready(false);
        assert!(ran.get());
    }

    #[test]
    fn dropped_task_never_runs() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let task = spawn(async move {
            flag.set(true);
            Ok(())
        });
        drop(task);
        scheduler::run_ready(false);
        assert!(!ran.get());
    }

    #[test]
    fn dropped_join_handle_cancels() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let handle = start_soon(async move {
            flag.set(true);
            Ok(())
        });
        drop(handle);
        scheduler::run_ready(false);
        assert!(!ran.get());
    }

    #[test]
    fn join_re_raises_the_stored_failure() {
        let outcome = Rc::new(Cell::new(false));
        let saw_failure = outcome.clone();

        let child = spawn(async { Err(Failure::msg("boom")) });
        let join = child.join();
        let parent = spawn(async move {
            let result = join.await;
            saw_failure.set(matches!(result, Err(Failure::Message(m)) if m == "boom"));
            Ok(())
        });
        parent.detach();
        let id = parent.release();
        scheduler::schedule(id);
        scheduler::run_ready(false);
        assert!(outcome.get());
    }

    #[test]
    fn join_handle_awaits_child_completion() {
        let outcome = Rc::new(Cell::new(false));
        let done = outcome.clone();
        let parent = spawn(async move {
            let child = start_soon(async { Ok(()) });
            child.await?;
            done.set(true);
            Ok(())
        });
        parent.detach();
        let id = parent.release();
        scheduler::schedule(id);
        scheduler::run_ready(false);
        assert!(outcome.get());
    }
}
