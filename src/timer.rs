//! The timer queue.
//!
//! Every suspension that involves time goes through here: a freshly spawned
//! task (armed with a zero delay), `wait`, the `within` bound of `result` and
//! of the readiness waits, and the indefinite park of a manual resume (armed
//! with no deadline at all). An entry is bound to the [Waker] of the task that
//! armed it; firing an entry wakes that task.
//!
//! Entries are keyed by `(wake time, sequence number)` so that timers due at
//! the same instant fire in the order they were armed.
use std::{
    collections::{BTreeMap, HashMap},
    task::Waker,
    time::{Duration, Instant},
};

use crate::clock::Clock;

/// Identifies an armed timer. Handles are never reused, so a stale handle
/// simply refers to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerHandle {
    at: Option<Instant>,
    seq: u64,
}

pub(crate) struct TimerQueue {
    armed: BTreeMap<(Instant, u64), Waker>,
    parked: HashMap<u64, Waker>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            armed: BTreeMap::new(),
            parked: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Arm a timer waking `waker` after `delay`. `None` parks the task: the
    /// entry never fires on its own and can only be [taken](Self::take). A
    /// delay too large to be represented as an [Instant] parks as well.
    pub fn schedule(&mut self, waker: Waker, delay: Option<Duration>, now: Instant) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;

        match delay.and_then(|d| now.checked_add(d)) {
            Some(at) => {
                self.armed.insert((at, seq), waker);
                TimerHandle { at: Some(at), seq }
            }
            None => {
                self.parked.insert(seq, waker);
                TimerHandle { at: None, seq }
            }
        }
    }

    pub fn cancel(&mut self, handle: TimerHandle) {
        self.take(handle);
    }

    /// Remove an entry that has not fired yet and hand back its waker.
    pub fn take(&mut self, handle: TimerHandle) -> Option<Waker> {
        match handle.at {
            Some(at) => self.armed.remove(&(at, handle.seq)),
            None => self.parked.remove(&handle.seq),
        }
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        match handle.at {
            Some(at) => self.armed.contains_key(&(at, handle.seq)),
            None => self.parked.contains_key(&handle.seq),
        }
    }

    /// `Some(ZERO)` if a timer is already due, `None` if no entry carries a
    /// deadline, otherwise the time until the soonest one.
    pub fn waiting_time(&self, clock: &Clock) -> Option<Duration> {
        clock.remaining(self.armed.keys().next().map(|(at, _)| *at))
    }

    /// Fire every timer due at `now`, in wake time then arming order. Timers
    /// armed by the woken tasks are left for a later pass.
    pub fn process_pending(&mut self, now: Instant) -> usize {
        let mut due = Vec::new();

        while let Some(entry) = self.armed.first_entry() {
            if entry.key().0 > now {
                break;
            }

            due.push(entry.remove());
        }

        let n = due.len();

        for waker in due {
            waker.wake();
        }

        n
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.armed.len() + self.parked.len()
    }

    pub fn clear(&mut self) -> Vec<Waker> {
        let mut wakers: Vec<Waker> = std::mem::take(&mut self.armed).into_values().collect();
        wakers.extend(std::mem::take(&mut self.parked).into_values());
        wakers
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        task::{Wake, Waker},
        time::{Duration, Instant},
    };

    use super::TimerQueue;
    use crate::clock::Clock;

    struct Recorder {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
    }

    impl Wake for Recorder {
        fn wake(self: Arc<Self>) {
            self.log.lock().unwrap().push(self.id);
        }
    }

    fn waker(id: usize, log: &Arc<Mutex<Vec<usize>>>) -> Waker {
        Waker::from(Arc::new(Recorder {
            id,
            log: log.clone(),
        }))
    }

    #[test]
    fn fires_in_deadline_then_fifo_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut q = TimerQueue::new();
        let clock = Clock;
        let now = clock.now();

        q.schedule(waker(3, &log), Some(Duration::from_secs(1)), now);
        q.schedule(waker(1, &log), Some(Duration::ZERO), now);
        q.schedule(waker(2, &log), Some(Duration::ZERO), now);

        assert_eq!(q.waiting_time(&clock), Some(Duration::ZERO));
        assert_eq!(q.process_pending(now), 2);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);

        let left = q.waiting_time(&clock).unwrap();
        assert!(left > Duration::ZERO && left <= Duration::from_secs(1));
        assert_eq!(q.process_pending(now + Duration::from_secs(2)), 1);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(q.waiting_time(&clock), None);
    }

    #[test]
    fn cancel_and_take() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut q = TimerQueue::new();
        let now = Instant::now();

        let a = q.schedule(waker(1, &log), Some(Duration::ZERO), now);
        let b = q.schedule(waker(2, &log), Some(Duration::ZERO), now);

        q.cancel(a);
        assert!(!q.is_armed(a));
        assert!(q.is_armed(b));

        q.process_pending(now);
        assert!(!q.is_armed(b));
        assert_eq!(*log.lock().unwrap(), vec![2]);

        // Cancelling a fired timer is a no-op.
        q.cancel(b);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn parked_entries_never_fire() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut q = TimerQueue::new();
        let now = Instant::now();

        let parked = q.schedule(waker(7, &log), None, now);

        assert_eq!(q.waiting_time(&Clock), None);
        assert_eq!(q.process_pending(now + Duration::from_secs(3600)), 0);
        assert!(q.is_armed(parked));

        q.take(parked).unwrap().wake();
        assert!(!q.is_armed(parked));
        assert_eq!(*log.lock().unwrap(), vec![7]);
    }

    #[test]
    fn waiting_time_counts_down() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut q = TimerQueue::new();
        let clock = Clock;

        q.schedule(waker(1, &log), Some(Duration::from_millis(10)), clock.now());

        let left = q.waiting_time(&clock).unwrap();
        assert!(left <= Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(q.waiting_time(&clock), Some(Duration::ZERO));
    }

    #[test]
    fn unrepresentable_deadline_never_fires() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut q = TimerQueue::new();
        let now = Instant::now();

        let forever = q.schedule(waker(1, &log), Some(Duration::MAX), now);

        assert!(q.is_armed(forever));
        assert_eq!(q.waiting_time(&Clock), None);
        assert_eq!(q.process_pending(now + Duration::from_secs(3600)), 0);

        q.cancel(forever);
        assert_eq!(q.len(), 0);
        assert!(log.lock().unwrap().is_empty());
    }
}
