//! Parking a task until it is resumed by hand.
//!
//! [EventLoop::await_manual_resume] suspends the current task without any
//! timer or descriptor that could wake it. It only continues once some other
//! code calls [Evaluation::manually_resume](crate::Evaluation::manually_resume)
//! on the task's evaluation, and it resolves to exactly the value passed
//! there.
//!
//! ```
//! use coloop::EventLoop;
//! use std::time::Duration;
//!
//! let lp = EventLoop::new();
//! let parked = {
//!     let lp2 = lp.clone();
//!     lp.spawn(async move { lp2.await_manual_resume::<&str>().await })
//! };
//!
//! {
//!     let (lp2, parked) = (lp.clone(), parked.clone());
//!     lp.spawn(async move {
//!         lp2.wait(Duration::from_millis(1)).await;
//!         parked.manually_resume(Some("resumed"))
//!     });
//! }
//!
//! assert_eq!(parked.join().unwrap(), Some("resumed"));
//! ```
use std::{
    any::Any,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use crate::{
    error::{Error, Result},
    task::{EventLoop, TaskCell},
    timer::TimerHandle,
};

/// Manual-resume state of a task.
pub(crate) enum Manual {
    Idle,
    Parked(TimerHandle),
    Resumed(Box<dyn Any>),
}

/// Future returned by [EventLoop::await_manual_resume].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ManualResume<V> {
    lp: EventLoop,
    task: Option<Rc<TaskCell>>,
    handle: Option<TimerHandle>,
    _value: PhantomData<fn() -> V>,
}

impl EventLoop {
    /// Park the current task until its evaluation is resumed with
    /// [Evaluation::manually_resume](crate::Evaluation::manually_resume).
    ///
    /// Resolves to the value given there, `None` if it was resumed without
    /// one. Fails if awaited outside of a task or if the value has a
    /// different type than `V`.
    pub fn await_manual_resume<V: 'static>(&self) -> ManualResume<V> {
        ManualResume {
            lp: self.clone(),
            task: None,
            handle: None,
            _value: PhantomData,
        }
    }
}

impl<V: 'static> Future for ManualResume<V> {
    type Output = Result<Option<V>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.lp.inner.clone();

        let task = match self.task.clone() {
            Some(task) => task,
            None => {
                let Some(task) = inner.current_task() else {
                    return Poll::Ready(Err(Error::protocol(
                        "awaiting a manual resume outside of a task",
                    )));
                };
                self.task = Some(task.clone());
                task
            }
        };

        let state = std::mem::replace(&mut *task.manual.borrow_mut(), Manual::Idle);

        match state {
            Manual::Resumed(value) => {
                self.handle = None;
                Poll::Ready(
                    value
                        .downcast::<Option<V>>()
                        .map(|v| *v)
                        .map_err(|_| Error::protocol("manual resume value has an unexpected type")),
                )
            }
            Manual::Parked(handle) => {
                *task.manual.borrow_mut() = Manual::Parked(handle);
                Poll::Pending
            }
            Manual::Idle => {
                let handle = inner
                    .timers
                    .borrow_mut()
                    .schedule(cx.waker().clone(), None, inner.clock.now());
                *task.manual.borrow_mut() = Manual::Parked(handle);
                self.handle = Some(handle);
                Poll::Pending
            }
        }
    }
}

impl<V> Drop for ManualResume<V> {
    fn drop(&mut self) {
        let (Some(handle), Some(task)) = (self.handle.take(), self.task.as_ref()) else {
            return;
        };

        let mut manual = task.manual.borrow_mut();
        if matches!(*manual, Manual::Parked(h) if h == handle) {
            *manual = Manual::Idle;
        }
        drop(manual);

        self.lp.inner.timers.borrow_mut().cancel(handle);
    }
}
