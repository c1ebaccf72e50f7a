//! Waiting for IO readiness.
//!
//! [EventLoop::await_readable] and [EventLoop::await_writable] suspend the
//! current task until a descriptor can be read from or written to without
//! blocking. Both take an optional `within` bound and resolve to `Ok(true)`
//! when the descriptor became ready and `Ok(false)` when the bound ran out
//! first.
//!
//! Only one task may wait for a given role on a descriptor at a time: a
//! second reader of the same descriptor fails with [Error::Protocol].
//!
//! # Example
//!
//! ```
//! use coloop::EventLoop;
//! use std::{io::Write, os::unix::net::UnixStream, time::Duration};
//!
//! let lp = EventLoop::new();
//! let (a, mut b) = UnixStream::pair().unwrap();
//!
//! let lp2 = lp.clone();
//! let ready = lp.block_on(async move {
//!     let idle = lp2.await_readable(&a, Some(Duration::from_millis(5))).await?;
//!     b.write_all(b"ping")?;
//!     let readable = lp2.await_readable(&a, None).await?;
//!     Ok::<_, coloop::Error>((idle, readable))
//! });
//!
//! assert_eq!(ready.unwrap().unwrap(), (false, true));
//! ```
use std::{
    fmt,
    future::Future,
    marker::PhantomData,
    os::fd::{AsFd, AsRawFd, RawFd},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use log::trace;

use crate::{
    error::{Error, Result},
    reactor::ReadinessWatcher,
    task::EventLoop,
    timer::TimerHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Reader,
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Reader => f.write_str("reader"),
            Role::Writer => f.write_str("writer"),
        }
    }
}

impl Role {
    fn is_watching(self, watcher: &ReadinessWatcher, fd: RawFd) -> bool {
        match self {
            Role::Reader => watcher.is_watching_reader(fd),
            Role::Writer => watcher.is_watching_writer(fd),
        }
    }

    fn watch(self, watcher: &mut ReadinessWatcher, fd: RawFd, cx: &Context<'_>) {
        match self {
            Role::Reader => watcher.watch_reader(fd, cx.waker().clone()),
            Role::Writer => watcher.watch_writer(fd, cx.waker().clone()),
        }
    }

    fn cancel(self, watcher: &mut ReadinessWatcher, fd: RawFd) {
        match self {
            Role::Reader => watcher.cancel_watching_reader(fd),
            Role::Writer => watcher.cancel_watching_writer(fd),
        }
    }
}

/// Future returned by [EventLoop::await_readable] and
/// [EventLoop::await_writable].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Readiness<'fd> {
    lp: EventLoop,
    fd: RawFd,
    role: Role,
    within: Option<Duration>,
    timer: Option<TimerHandle>,
    registered: bool,
    _fd: PhantomData<&'fd ()>,
}

impl EventLoop {
    /// Suspend the current task until `fd` is readable, or until `within`
    /// has elapsed. Resolves to whether the descriptor became readable.
    pub fn await_readable<'fd, F>(&self, fd: &'fd F, within: Option<Duration>) -> Readiness<'fd>
    where
        F: AsFd + ?Sized,
    {
        self.readiness(fd.as_fd().as_raw_fd(), Role::Reader, within)
    }

    /// Suspend the current task until `fd` is writable, or until `within`
    /// has elapsed. Resolves to whether the descriptor became writable.
    pub fn await_writable<'fd, F>(&self, fd: &'fd F, within: Option<Duration>) -> Readiness<'fd>
    where
        F: AsFd + ?Sized,
    {
        self.readiness(fd.as_fd().as_raw_fd(), Role::Writer, within)
    }

    fn readiness<'fd>(&self, fd: RawFd, role: Role, within: Option<Duration>) -> Readiness<'fd> {
        Readiness {
            lp: self.clone(),
            fd,
            role,
            within,
            timer: None,
            registered: false,
            _fd: PhantomData,
        }
    }
}

impl Readiness<'_> {
    fn deregister(&mut self) {
        let inner = &self.lp.inner;

        if std::mem::take(&mut self.registered) {
            self.role.cancel(&mut inner.watcher.borrow_mut(), self.fd);
        }

        if let Some(handle) = self.timer.take() {
            inner.timers.borrow_mut().cancel(handle);
        }
    }
}

impl Future for Readiness<'_> {
    type Output = Result<bool>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.lp.inner.clone();
        let (fd, role) = (self.fd, self.role);

        if !self.registered {
            let mut watcher = inner.watcher.borrow_mut();

            if role.is_watching(&watcher, fd) {
                return Poll::Ready(Err(Error::protocol(format!(
                    "descriptor {fd} already has a {role} waiting"
                ))));
            }

            role.watch(&mut watcher, fd, cx);
            drop(watcher);
            self.registered = true;

            if let Some(within) = self.within {
                let handle = inner.timers.borrow_mut().schedule(
                    cx.waker().clone(),
                    Some(within),
                    inner.clock.now(),
                );
                self.timer = Some(handle);
            }

            return Poll::Pending;
        }

        // The watcher drops the registration when it wakes us.
        if !role.is_watching(&inner.watcher.borrow(), fd) {
            self.registered = false;
            self.deregister();
            trace!("descriptor {fd} ready for its {role}");
            return Poll::Ready(Ok(true));
        }

        if let Some(handle) = self.timer {
            if !inner.timers.borrow().is_armed(handle) {
                self.timer = None;
                self.deregister();
                trace!("{role} of descriptor {fd} timed out");
                return Poll::Ready(Ok(false));
            }
        }

        role.watch(&mut inner.watcher.borrow_mut(), fd, cx);
        Poll::Pending
    }
}

impl Drop for Readiness<'_> {
    fn drop(&mut self) {
        self.deregister();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use anyhow::Result;
    use assert_fs::{prelude::*, NamedTempFile};

    use crate::{
        error::Error,
        reactor::tests::{socketpair, write},
        task::EventLoop,
    };

    #[test]
    fn readable_after_write_from_other_task() -> Result<()> {
        let lp = EventLoop::new();
        let (a, b) = socketpair();

        let reader = {
            let lp2 = lp.clone();
            lp.spawn(async move {
                lp2.await_readable(&a, None).await
            })
        };

        {
            let lp2 = lp.clone();
            lp.spawn(async move {
                lp2.wait(Duration::from_millis(20)).await;
                write(&b, b"x");
                Ok(())
            });
        }

        let before = Instant::now();
        assert!(reader.join()?);
        assert!(before.elapsed() >= Duration::from_millis(20));

        Ok(())
    }

    #[test]
    fn times_out_without_data() -> Result<()> {
        let lp = EventLoop::new();
        let (a, _b) = socketpair();
        let lp2 = lp.clone();

        let before = Instant::now();
        let readable = lp.block_on(async move {
            let r = lp2.await_readable(&a, Some(Duration::from_millis(30))).await;
            // Nothing is left registered after a timeout.
            assert!(!lp2.inner.watcher.borrow().watches());
            assert_eq!(lp2.inner.timers.borrow().len(), 0);
            r
        })??;

        assert!(!readable);
        assert!(before.elapsed() >= Duration::from_millis(30));

        Ok(())
    }

    #[test]
    fn socket_is_writable() -> Result<()> {
        let lp = EventLoop::new();
        let (a, _b) = socketpair();
        let lp2 = lp.clone();

        let writable = lp.block_on(async move {
            lp2.await_writable(&a, Some(Duration::from_secs(1))).await
        })??;

        assert!(writable);

        Ok(())
    }

    #[test]
    fn regular_file_is_always_ready() -> Result<()> {
        let file = NamedTempFile::new("ready.txt")?;
        file.write_str("hello")?;

        let lp = EventLoop::new();
        let lp2 = lp.clone();
        let f = std::fs::File::open(file.path())?;

        let (r, w) = lp.block_on(async move {
            let r = lp2.await_readable(&f, None).await?;
            let w = lp2.await_writable(&f, None).await?;
            Ok::<_, Error>((r, w))
        })??;

        assert!(r && w);

        Ok(())
    }

    #[test]
    fn second_reader_is_rejected() -> Result<()> {
        let lp = EventLoop::new();
        let (a, _b) = socketpair();
        let a = std::rc::Rc::new(a);

        let first = {
            let (lp2, a) = (lp.clone(), a.clone());
            lp.spawn(async move { lp2.await_readable(&*a, Some(Duration::from_millis(50))).await })
        };
        let second = {
            let (lp2, a) = (lp.clone(), a.clone());
            lp.spawn(async move { lp2.await_readable(&*a, None).await })
        };

        assert!(matches!(second.join(), Err(Error::Protocol(_))));
        assert!(!first.join()?);

        Ok(())
    }

    #[test]
    fn cancelled_waiter_stops_watching() -> Result<()> {
        let lp = EventLoop::new();
        let (a, _b) = socketpair();

        let waiter = {
            let lp2 = lp.clone();
            lp.spawn(async move { lp2.await_readable(&a, None).await })
        };

        let lp2 = lp.clone();
        let waiter2 = waiter.clone();
        lp.block_on(async move {
            lp2.wait(Duration::from_millis(5)).await;
            assert!(lp2.inner.watcher.borrow().watches());
            waiter2.cancel_default().unwrap();
            lp2.wait(Duration::ZERO).await;
            assert!(!lp2.inner.watcher.borrow().watches());
        })?;

        assert!(matches!(waiter.join(), Err(Error::Cancelled(_))));

        Ok(())
    }
}
