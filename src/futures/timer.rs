//! Sleeping.
//!
//! # Example
//! Let's put a task to sleep for 20 milliseconds.
//! ```
//! use coloop::EventLoop;
//! use std::time::{Duration, Instant};
//!
//! let lp = EventLoop::new();
//! let lp2 = lp.clone();
//! lp.block_on(async move {
//!     let now = Instant::now();
//!
//!     lp2.wait(Duration::from_millis(20)).await;
//!
//!     assert!(now.elapsed() >= Duration::from_millis(20));
//! })
//! .unwrap();
//! ```
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use crate::{task::EventLoop, timer::TimerHandle};

/// Future returned by [EventLoop::wait].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Wait {
    lp: EventLoop,
    delay: Duration,
    timer: Option<TimerHandle>,
}

impl EventLoop {
    /// Suspend the current task for `delay`.
    ///
    /// The task is suspended for *at least* `delay`; it could sleep for
    /// longer. A zero delay still yields to the loop once.
    pub fn wait(&self, delay: Duration) -> Wait {
        Wait {
            lp: self.clone(),
            delay,
            timer: None,
        }
    }
}

impl Future for Wait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.lp.inner.clone();

        match self.timer {
            Some(handle) if !inner.timers.borrow().is_armed(handle) => {
                self.timer = None;
                Poll::Ready(())
            }
            Some(_) => Poll::Pending,
            None => {
                let handle = inner.timers.borrow_mut().schedule(
                    cx.waker().clone(),
                    Some(self.delay),
                    inner.clock.now(),
                );
                self.timer = Some(handle);
                Poll::Pending
            }
        }
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.take() {
            self.lp.inner.timers.borrow_mut().cancel(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        future::Future,
        rc::Rc,
        time::{Duration, Instant},
    };

    use anyhow::Result;

    use crate::task::EventLoop;

    #[test]
    fn sleep_simple() -> Result<()> {
        let lp = EventLoop::new();
        let lp2 = lp.clone();
        let before = Instant::now();

        lp.block_on(async move {
            lp2.wait(Duration::from_millis(100)).await;
        })?;

        assert!(before.elapsed() >= Duration::from_millis(100));

        Ok(())
    }

    #[test]
    fn sleep_multiple_tasks() -> Result<()> {
        let lp = EventLoop::new();
        let before = Instant::now();

        let sleeper = |ms| {
            let lp2 = lp.clone();
            lp.spawn(async move {
                lp2.wait(Duration::from_millis(ms)).await;
                Ok(before.elapsed())
            })
        };

        let t1 = sleeper(100);
        let t2 = sleeper(100);
        let t3 = sleeper(200);

        lp.run()?;

        let (e1, e2, e3) = (t1.join()?, t2.join()?, t3.join()?);
        assert!(e1 >= Duration::from_millis(100) && e1 < Duration::from_millis(190));
        assert!(e2 >= Duration::from_millis(100) && e2 < Duration::from_millis(190));
        assert!(e3 >= Duration::from_millis(200));
        assert!(before.elapsed() < Duration::from_millis(350));

        Ok(())
    }

    #[test]
    fn equal_delays_resume_in_spawn_order() -> Result<()> {
        let lp = EventLoop::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for (name, delay) in [("a", 0.0), ("b", 0.0), ("c", 0.0001)] {
            let lp2 = lp.clone();
            let order = order.clone();
            lp.spawn(async move {
                lp2.wait(Duration::from_secs_f64(delay)).await;
                order.borrow_mut().push(name);
                Ok(())
            });
        }

        lp.run()?;
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);

        Ok(())
    }

    #[test]
    fn distinct_delays_resume_in_ascending_order() -> Result<()> {
        let lp = EventLoop::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for ms in [30, 10, 20] {
            let lp2 = lp.clone();
            let order = order.clone();
            lp.spawn(async move {
                lp2.wait(Duration::from_millis(ms)).await;
                order.borrow_mut().push(ms);
                Ok(())
            });
        }

        lp.run()?;
        assert_eq!(*order.borrow(), vec![10, 20, 30]);

        Ok(())
    }

    #[test]
    fn longest_wait_does_not_overflow() -> Result<()> {
        let lp = EventLoop::new();
        let lp2 = lp.clone();

        let sleeper = lp.spawn(async move {
            lp2.wait(Duration::MAX).await;
            Ok(1)
        });

        let r = sleeper
            .result()
            .within(Duration::from_millis(1))
            .timeout_result(Ok(0))
            .join()?;
        assert_eq!(r, 0);
        assert!(!sleeper.is_concluded());

        lp.stop();

        Ok(())
    }

    #[test]
    fn dropped_wait_disarms_its_timer() -> Result<()> {
        let lp = EventLoop::new();
        let lp2 = lp.clone();

        lp.block_on(async move {
            let w = lp2.wait(Duration::from_secs(3600));
            let mut w = Box::pin(w);
            // Poll once to arm the timer, then drop it.
            std::future::poll_fn(|cx| {
                let _ = w.as_mut().poll(cx);
                std::task::Poll::Ready(())
            })
            .await;
            assert_eq!(lp2.inner.timers.borrow().len(), 1);
            drop(w);
            assert_eq!(lp2.inner.timers.borrow().len(), 0);
        })?;

        Ok(())
    }
}
