//! Trigger awaitables: the only suspension points a task has.
//!
//! Each trigger registers itself with the scheduler on its first poll and
//! completes on the next poll. That is valid because a task has at most
//! one outstanding trigger, so the scheduler re-polls the task only after
//! the trigger's callback has fired. Awaiting a trigger outside a scheduled
//! task cannot suspend; it logs an error and completes immediately so the
//! caller does not wedge.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::gpi::{self, EdgeKind};
use crate::handle::SimHandle;
use crate::scheduler::{self, TaskId};
use crate::time::TimeUnit;

fn waiting_task(what: &str) -> Option<TaskId> {
    let current = scheduler::current_task();
    if current.is_none() {
        log::error!(target: "strobe.scheduler", "{what} awaited outside a scheduled task");
    }
    current
}

/// Suspends the awaiting task for a simulated duration.
///
/// The delay is converted from `unit` to simulator precision ticks at
/// suspension time. A zero delay never suspends. On firing, the waiter is
/// resumed through the readwrite path, so writes it performs are flushed
/// in the next writable phase.
#[derive(Debug)]
pub struct Timer {
    delay: u64,
    unit: TimeUnit,
    armed: bool,
}

impl Timer {
    /// A timer for `delay` counted in `unit`.
    pub fn new(delay: u64, unit: TimeUnit) -> Self {
        Timer {
            delay,
            unit,
            armed: false,
        }
    }

    /// A timer counted directly in simulator precision ticks.
    pub fn ticks(delay: u64) -> Self {
        Timer::new(delay, TimeUnit::Step)
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.armed {
            return Poll::Ready(());
        }
        if self.delay == 0 {
            return Poll::Ready(());
        }
        let Some(waiter) = waiting_task("Timer") else {
            return Poll::Ready(());
        };
        self.armed = true;
        let ticks = self.unit.to_ticks(self.delay, gpi::sim_precision());
        scheduler::schedule_after_time(waiter, ticks);
        Poll::Pending
    }
}

#[derive(Debug)]
struct EdgeWait {
    signal: SimHandle,
    edge: EdgeKind,
    armed: bool,
}

impl Future for EdgeWait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.armed {
            return Poll::Ready(());
        }
        let Some(waiter) = waiting_task("edge trigger") else {
            return Poll::Ready(());
        };
        self.armed = true;
        scheduler::schedule_on_edge(waiter, self.signal.raw(), self.edge);
        Poll::Pending
    }
}

/// Suspends until the signal transitions low-to-high.
///
/// Edge firings are delivered in whatever simulator phase emits them; the
/// resumed body's writes go through the scheduler's normal deferred path.
#[derive(Debug)]
pub struct RisingEdge(EdgeWait);

impl RisingEdge {
    /// An awaitable rising edge of `signal`.
    pub fn new(signal: &SimHandle) -> Self {
        RisingEdge(EdgeWait {
            signal: signal.clone(),
            edge: EdgeKind::Rising,
            armed: false,
        })
    }
}

impl Future for RisingEdge {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Suspends until the signal transitions high-to-low.
#[derive(Debug)]
pub struct FallingEdge(EdgeWait);

impl FallingEdge {
    /// An awaitable falling edge of `signal`.
    pub fn new(signal: &SimHandle) -> Self {
        FallingEdge(EdgeWait {
            signal: signal.clone(),
            edge: EdgeKind::Falling,
            armed: false,
        })
    }
}

impl Future for FallingEdge {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Suspends until the signal changes value in either direction.
#[derive(Debug)]
pub struct ValueChange(EdgeWait);

impl ValueChange {
    /// An awaitable value change of `signal`.
    pub fn new(signal: &SimHandle) -> Self {
        ValueChange(EdgeWait {
            signal: signal.clone(),
            edge: EdgeKind::Any,
            armed: false,
        })
    }
}

impl Future for ValueChange {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Suspends until the simulator's next writable phase.
///
/// Queued writes are flushed immediately before the waiter resumes.
#[derive(Debug, Default)]
pub struct ReadWrite {
    armed: bool,
}

impl ReadWrite {
    /// An awaitable readwrite-phase barrier.
    pub fn new() -> Self {
        ReadWrite::default()
    }
}

impl Future for ReadWrite {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.armed {
            return Poll::Ready(());
        }
        let Some(waiter) = waiting_task("ReadWrite") else {
            return Poll::Ready(());
        };
        self.armed = true;
        scheduler::schedule_rw_barrier(waiter);
        Poll::Pending
    }
}

/// Suspends until the simulator's next read-only settled phase.
///
/// Writes queued by the resumed body cannot be applied inside readonly;
/// they are deferred through a next-time-step callback.
#[derive(Debug, Default)]
pub struct ReadOnly {
    armed: bool,
}

impl ReadOnly {
    /// An awaitable readonly-phase barrier.
    pub fn new() -> Self {
        ReadOnly::default()
    }
}

impl Future for ReadOnly {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.armed {
            return Poll::Ready(());
        }
        let Some(waiter) = waiting_task("ReadOnly") else {
            return Poll::Ready(());
        };
        self.armed = true;
        scheduler::schedule_ro_barrier(waiter);
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    fn poll_once<F: Future + Unpin>(f: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(f).poll(&mut cx)
    }

    #[test]
    fn zero_delay_timer_is_immediately_ready() {
        let mut t = Timer::new(0, TimeUnit::Ns);
        assert!(poll_once(&mut t).is_ready());
    }

    #[test]
    fn zero_tick_timer_is_immediately_ready() {
        let mut t = Timer::ticks(0);
        assert!(poll_once(&mut t).is_ready());
    }

    #[test]
    fn timer_outside_task_does_not_wedge() {
        // No backend, no current task: the trigger must complete rather
        // than suspend forever.
        let mut t = Timer::new(5, TimeUnit::Ns);
        assert!(poll_once(&mut t).is_ready());
    }
}
