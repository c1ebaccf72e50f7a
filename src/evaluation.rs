//! Evaluations: handles to the outcome of a spawned task.
//!
//! [EventLoop::spawn](crate::EventLoop::spawn) returns an [Evaluation]. The
//! evaluation is *pending* until an outcome is written into it, and
//! *concluded* from then on. Exactly one outcome is ever written: the body's
//! own return value, a cancellation, or a value forced in with
//! [Evaluation::conclude_with]. Whichever comes first wins and every later
//! attempt is ignored (or, for explicit calls, rejected).
//!
//! # Waiting for the result
//!
//! From another task, `.await` the future returned by [Evaluation::result].
//! From synchronous code, call [Evaluation::join] (or
//! [AwaitResult::join] when options are needed), which drives the loop until
//! the result is available.
//!
//! ```
//! use coloop::{Error, EventLoop};
//! use std::time::Duration;
//!
//! let lp = EventLoop::new();
//! let slow = {
//!     let lp = lp.clone();
//!     lp.clone().spawn(async move {
//!         lp.wait(Duration::from_millis(50)).await;
//!         Ok(42)
//!     })
//! };
//!
//! let impatient = slow.result().within(Duration::from_millis(5)).join();
//! assert!(matches!(impatient, Err(Error::Timeout { .. })));
//!
//! // Timing out a wait does not affect the evaluation itself.
//! assert_eq!(slow.join().unwrap(), 42);
//! ```
//!
//! # Cancellation
//!
//! [Evaluation::cancel] concludes a pending evaluation with
//! [Error::Cancelled]. If the task has not started yet its body never runs;
//! otherwise the body is dropped at the `.await` it is suspended on.
use std::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
    time::Duration,
};

use log::debug;
use slab::Slab;

use crate::{
    error::{Error, Result},
    futures::manual::Manual,
    task::{EventLoop, Inner, TaskCell, STOPPED},
    timer::TimerHandle,
};

/// Returned by a successful [Evaluation::cancel].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Reason used by [Evaluation::cancel_default].
pub const DEFAULT_CANCEL_REASON: &str = "evaluation cancelled";

pub(crate) struct EvalState<T, D> {
    outcome: RefCell<Option<Result<T>>>,
    waiting: Cell<bool>,
    waiters: RefCell<Slab<Waker>>,
    data: D,
    task: Option<Rc<TaskCell>>,
}

impl<T, D> EvalState<T, D> {
    pub(crate) fn new(data: D, task: Option<Rc<TaskCell>>) -> Self {
        Self {
            outcome: RefCell::new(None),
            waiting: Cell::new(false),
            waiters: RefCell::new(Slab::new()),
            data,
            task,
        }
    }

    fn is_concluded(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Write `outcome` unless one was written before. Returns whether this
    /// call won.
    fn conclude(&self, outcome: Result<T>) -> bool {
        {
            let mut slot = self.outcome.borrow_mut();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }

        let waiters: Vec<Waker> = self.waiters.borrow_mut().drain().collect();
        for waker in waiters {
            waker.wake();
        }

        true
    }

    /// Conclude from outside the task's own body and make sure the task
    /// notices, so a body that is still suspended gets dropped.
    fn conclude_externally(&self, outcome: Result<T>) -> Result<()> {
        if !self.conclude(outcome) {
            return Err(Error::protocol("already concluded"));
        }

        if let Some(task) = &self.task {
            task.waker.wake_by_ref();
        }

        Ok(())
    }
}

/// Drives the body of a spawned task and writes its outcome.
pub(crate) struct Driver<F, T, D> {
    body: Option<Pin<Box<F>>>,
    state: Rc<EvalState<T, D>>,
    lp: Weak<Inner>,
}

impl<F, T, D> Driver<F, T, D> {
    pub(crate) fn new(body: F, state: Rc<EvalState<T, D>>, lp: Weak<Inner>) -> Self {
        Self {
            body: Some(Box::pin(body)),
            state,
            lp,
        }
    }
}

impl<F, T, D> Future for Driver<F, T, D>
where
    F: Future<Output = Result<T>>,
{
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.state.is_concluded() {
            if self.body.take().is_some() {
                debug!("dropping the body of an evaluation concluded from outside");
            }
            return Poll::Ready(());
        }

        let Some(body) = self.body.as_mut() else {
            return Poll::Ready(());
        };

        match body.as_mut().poll(cx) {
            Poll::Ready(outcome) => {
                self.body = None;

                if let (Err(e), Some(lp)) = (&outcome, self.lp.upgrade()) {
                    lp.report_uncaught(e);
                }

                if !self.state.conclude(outcome) {
                    debug!("discarding the late outcome of an already concluded evaluation");
                }

                Poll::Ready(())
            }
            // Concluded while the body was running, e.g. it cancelled itself.
            Poll::Pending if self.state.is_concluded() => {
                self.body = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<F, T, D> Drop for Driver<F, T, D> {
    fn drop(&mut self) {
        // Only reachable with a live body when the loop is stopped.
        if self.body.is_some() {
            self.body = None;
            self.state.conclude(Err(Error::cancelled(STOPPED)));
        }
    }
}

/// Handle to the eventual outcome of a task.
///
/// See the [module-level documentation](self) for more information.
pub struct Evaluation<T, D = ()> {
    state: Rc<EvalState<T, D>>,
    lp: Weak<Inner>,
}

impl<T, D> Clone for Evaluation<T, D> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            lp: self.lp.clone(),
        }
    }
}

impl<T, D> Evaluation<T, D> {
    pub(crate) fn concluded(outcome: Result<T>, data: D, lp: Weak<Inner>) -> Self {
        let state = EvalState::new(data, None);
        state.conclude(outcome);

        Self {
            state: Rc::new(state),
            lp,
        }
    }

    pub(crate) fn new(state: Rc<EvalState<T, D>>, lp: Weak<Inner>) -> Self {
        Self { state, lp }
    }

    fn event_loop(&self) -> Result<EventLoop> {
        self.lp
            .upgrade()
            .map(|inner| EventLoop { inner })
            .ok_or_else(|| Error::protocol("the event loop of this evaluation is gone"))
    }

    /// The data attached at spawn time.
    pub fn data(&self) -> &D {
        &self.state.data
    }

    pub fn is_concluded(&self) -> bool {
        self.state.is_concluded()
    }

    /// Whether somebody has asked for the result while it was pending.
    pub fn is_waiting(&self) -> bool {
        self.state.waiting.get()
    }

    /// Conclude with a cancellation error carrying `reason`.
    ///
    /// Fails with a protocol error if the evaluation is already concluded.
    pub fn cancel(&self, reason: impl Into<String>) -> Result<Cancelled> {
        let reason = reason.into();
        self.state
            .conclude_externally(Err(Error::cancelled(reason.clone())))?;
        debug!("evaluation cancelled: {reason}");
        Ok(Cancelled)
    }

    /// [Evaluation::cancel] with the reason "evaluation cancelled".
    pub fn cancel_default(&self) -> Result<Cancelled> {
        self.cancel(DEFAULT_CANCEL_REASON)
    }

    /// Force the evaluation to conclude with `value`. A value the body
    /// returns afterwards is discarded.
    pub fn conclude_with(&self, value: T) -> Result<()> {
        self.state.conclude_externally(Ok(value))
    }

    /// Resume a task suspended in
    /// [EventLoop::await_manual_resume](crate::EventLoop::await_manual_resume)
    /// with `value`.
    pub fn manually_resume<V: 'static>(&self, value: Option<V>) -> Result<()> {
        let not_parked = || Error::protocol("evaluation is not awaiting a manual resume");

        let task = self.state.task.as_ref().ok_or_else(not_parked)?;
        let lp = self.event_loop()?;

        let handle = match *task.manual.borrow() {
            Manual::Parked(handle) => handle,
            _ => return Err(not_parked()),
        };

        *task.manual.borrow_mut() = Manual::Resumed(Box::new(value));

        let waker = lp.inner.timers.borrow_mut().take(handle);
        if let Some(waker) = waker {
            waker.wake();
        }

        Ok(())
    }
}

impl<T: Clone, D> Evaluation<T, D> {
    /// A future resolving to the outcome. Configure it with
    /// [AwaitResult::within], [AwaitResult::timeout_result] and
    /// [AwaitResult::with_result].
    pub fn result(&self) -> AwaitResult<T, D> {
        AwaitResult {
            eval: self.clone(),
            within: None,
            timeout_result: None,
            timer: None,
            waiter: None,
        }
    }
}

impl<T: Clone + 'static, D: 'static> Evaluation<T, D> {
    /// Drive the loop until the evaluation concludes and return its outcome.
    pub fn join(&self) -> Result<T> {
        self.result().join()
    }
}

/// Future returned by [Evaluation::result].
pub struct AwaitResult<T, D = ()> {
    eval: Evaluation<T, D>,
    within: Option<Duration>,
    timeout_result: Option<Result<T>>,
    timer: Option<TimerHandle>,
    waiter: Option<usize>,
}

impl<T, D> Unpin for AwaitResult<T, D> {}

impl<T, D> AwaitResult<T, D> {
    fn cleanup(&mut self) {
        if let Some(key) = self.waiter.take() {
            self.eval.state.waiters.borrow_mut().try_remove(key);
        }

        if let (Some(handle), Some(inner)) = (self.timer.take(), self.eval.lp.upgrade()) {
            inner.timers.borrow_mut().cancel(handle);
        }
    }
}

impl<T: Clone, D> AwaitResult<T, D> {
    /// Give up waiting after `d`. The evaluation itself keeps going.
    pub fn within(mut self, d: Duration) -> Self {
        self.within = Some(d);
        self
    }

    /// Outcome to produce when the `within` bound runs out, instead of
    /// [Error::Timeout].
    pub fn timeout_result(mut self, outcome: Result<T>) -> Self {
        self.timeout_result = Some(outcome);
        self
    }

    /// Map both the success and the failure outcome through `f`. An `Err`
    /// returned by `f` is what the caller gets as the error.
    pub async fn with_result<U>(self, f: impl FnOnce(Result<T>) -> Result<U>) -> Result<U> {
        f(self.await)
    }
}

impl<T: Clone + 'static, D: 'static> AwaitResult<T, D> {
    /// Drive the loop until this future resolves.
    pub fn join(self) -> Result<T> {
        if let Some(outcome) = self.eval.state.outcome.borrow().clone() {
            return outcome;
        }

        self.eval.event_loop()?.block_on(self)?
    }
}

impl<T: Clone, D> Future for AwaitResult<T, D> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let state = self.eval.state.clone();
        let concluded = state.outcome.borrow().clone();

        if let Some(outcome) = concluded {
            self.cleanup();
            return Poll::Ready(outcome);
        }

        let Ok(lp) = self.eval.event_loop() else {
            self.cleanup();
            return Poll::Ready(Err(Error::protocol(
                "the event loop of this evaluation is gone",
            )));
        };

        if let Some(handle) = self.timer {
            if !lp.inner.timers.borrow().is_armed(handle) {
                self.timer = None;
                self.cleanup();

                let elapsed = self.within.unwrap_or_default();
                let outcome = self
                    .timeout_result
                    .take()
                    .unwrap_or_else(|| Err(Error::timeout(elapsed)));

                return Poll::Ready(outcome);
            }
        }

        state.waiting.set(true);

        if let (None, Some(within)) = (self.timer, self.within) {
            let handle =
                lp.inner
                    .timers
                    .borrow_mut()
                    .schedule(cx.waker().clone(), Some(within), lp.inner.clock.now());
            self.timer = Some(handle);
        }

        let waker = cx.waker().clone();
        let mut waiters = state.waiters.borrow_mut();
        match self.waiter.and_then(|key| waiters.get_mut(key)) {
            Some(slot) => *slot = waker,
            None => self.waiter = Some(waiters.insert(waker)),
        }

        Poll::Pending
    }
}

impl<T, D> Drop for AwaitResult<T, D> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
