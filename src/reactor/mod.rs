//! IO readiness watcher.
//!
//! The watcher keeps, for every descriptor, at most one task waiting for it to
//! become readable and at most one waiting for it to become writable. When the
//! loop has nothing due in the timer queue it calls
//! [ReadinessWatcher::process_ready_in], which blocks the whole thread in
//! `ppoll(2)` until a watched descriptor becomes ready or the next timer is
//! due.
use std::{collections::HashMap, io, os::fd::RawFd, task::Waker, time::Duration};

use log::trace;

mod poll;

#[derive(Default)]
struct WatchEntry {
    reader: Option<Waker>,
    writer: Option<Waker>,
}

impl WatchEntry {
    fn is_empty(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }
}

const READ_READY: i16 = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
const WRITE_READY: i16 = libc::POLLOUT | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

pub(crate) struct ReadinessWatcher {
    entries: HashMap<RawFd, WatchEntry>,
}

impl ReadinessWatcher {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn watch_reader(&mut self, fd: RawFd, waker: Waker) {
        self.entries.entry(fd).or_default().reader = Some(waker);
    }

    pub fn watch_writer(&mut self, fd: RawFd, waker: Waker) {
        self.entries.entry(fd).or_default().writer = Some(waker);
    }

    pub fn cancel_watching_reader(&mut self, fd: RawFd) {
        self.deregister(fd, |e| e.reader.take());
    }

    pub fn cancel_watching_writer(&mut self, fd: RawFd) {
        self.deregister(fd, |e| e.writer.take());
    }

    pub fn is_watching_reader(&self, fd: RawFd) -> bool {
        self.entries.get(&fd).is_some_and(|e| e.reader.is_some())
    }

    pub fn is_watching_writer(&self, fd: RawFd) -> bool {
        self.entries.get(&fd).is_some_and(|e| e.writer.is_some())
    }

    pub fn watches(&self) -> bool {
        !self.entries.is_empty()
    }

    fn deregister(
        &mut self,
        fd: RawFd,
        role: impl FnOnce(&mut WatchEntry) -> Option<Waker>,
    ) -> Option<Waker> {
        let entry = self.entries.get_mut(&fd)?;
        let waker = role(entry);

        if entry.is_empty() {
            self.entries.remove(&fd);
        }

        waker
    }

    /// Block for up to `timeout` (forever if `None`) and wake the reader
    /// and/or writer of every descriptor that became ready. Woken roles are
    /// deregistered. Returns the number of tasks woken.
    pub fn process_ready_in(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut fds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .map(|(fd, e)| poll::pollfd(*fd, e.reader.is_some(), e.writer.is_some()))
            .collect();

        trace!(
            "waiting on {} descriptor(s) for {:?}",
            fds.len(),
            timeout
        );

        if poll::wait(&mut fds, timeout)? == 0 {
            return Ok(0);
        }

        let mut ready = Vec::new();

        for pfd in fds.iter().filter(|p| p.revents != 0) {
            if pfd.revents & READ_READY != 0 {
                ready.extend(self.deregister(pfd.fd, |e| e.reader.take()));
            }

            if pfd.revents & WRITE_READY != 0 {
                ready.extend(self.deregister(pfd.fd, |e| e.writer.take()));
            }
        }

        let n = ready.len();

        for waker in ready {
            waker.wake();
        }

        Ok(n)
    }

    pub fn clear(&mut self) -> Vec<Waker> {
        self.entries
            .drain()
            .flat_map(|(_, e)| e.reader.into_iter().chain(e.writer))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        os::fd::{AsRawFd, FromRawFd, OwnedFd},
        sync::{Arc, Mutex},
        task::{Wake, Waker},
        time::{Duration, Instant},
    };

    use libc::{AF_LOCAL, SOCK_NONBLOCK, SOCK_STREAM};

    use super::ReadinessWatcher;

    struct Recorder {
        id: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Wake for Recorder {
        fn wake(self: Arc<Self>) {
            self.log.lock().unwrap().push(self.id);
        }
    }

    fn waker(id: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Waker {
        Waker::from(Arc::new(Recorder {
            id,
            log: log.clone(),
        }))
    }

    pub(crate) fn socketpair() -> (OwnedFd, OwnedFd) {
        let mut fds = [0, 0];
        let ret =
            unsafe { libc::socketpair(AF_LOCAL, SOCK_STREAM | SOCK_NONBLOCK, 0, fds.as_mut_ptr()) };

        if ret == -1 {
            panic!("socketpair failed");
        }

        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    pub(crate) fn write(fd: &OwnedFd, buf: &[u8]) {
        let ret = unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr() as *const _, buf.len() as _) };

        if ret == -1 {
            panic!("write failed");
        }
    }

    #[test]
    fn sleeps_without_descriptors() {
        let mut watcher = ReadinessWatcher::new();
        let before = Instant::now();

        assert!(!watcher.watches());
        assert_eq!(
            watcher
                .process_ready_in(Some(Duration::from_millis(20)))
                .unwrap(),
            0
        );
        assert!(before.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wakes_ready_roles_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut watcher = ReadinessWatcher::new();
        let (a, b) = socketpair();

        // Nothing written yet: `a` is writable but not readable.
        watcher.watch_reader(a.as_raw_fd(), waker("reader", &log));
        watcher.watch_writer(a.as_raw_fd(), waker("writer", &log));

        assert_eq!(watcher.process_ready_in(Some(Duration::ZERO)).unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["writer"]);
        assert!(watcher.is_watching_reader(a.as_raw_fd()));
        assert!(!watcher.is_watching_writer(a.as_raw_fd()));

        write(&b, b"x");

        assert_eq!(watcher.process_ready_in(None).unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["writer", "reader"]);
        assert!(!watcher.watches());
    }

    #[test]
    fn times_out_when_nothing_is_ready() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut watcher = ReadinessWatcher::new();
        let (a, _b) = socketpair();

        watcher.watch_reader(a.as_raw_fd(), waker("reader", &log));

        let before = Instant::now();
        assert_eq!(
            watcher
                .process_ready_in(Some(Duration::from_millis(10)))
                .unwrap(),
            0
        );
        assert!(before.elapsed() >= Duration::from_millis(10));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut watcher = ReadinessWatcher::new();

        watcher.cancel_watching_reader(42);
        watcher.watch_reader(42, waker("first", &log));
        watcher.watch_reader(42, waker("second", &log));
        assert!(watcher.is_watching_reader(42));

        watcher.cancel_watching_reader(42);
        watcher.cancel_watching_reader(42);
        watcher.cancel_watching_writer(42);
        assert!(!watcher.watches());
    }
}
