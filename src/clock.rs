use std::time::{Duration, Instant};

/// Monotonic time source of an event loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct Clock;

impl Clock {
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Time left until `deadline`, clamped at zero. `None` means there is no
    /// deadline, i.e. the wait is unbounded.
    pub fn remaining(&self, deadline: Option<Instant>) -> Option<Duration> {
        deadline.map(|d| d.saturating_duration_since(self.now()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Clock;

    #[test]
    fn remaining_is_clamped() {
        let clock = Clock;
        let past = clock.now();
        std::thread::sleep(Duration::from_millis(1));

        assert_eq!(clock.remaining(Some(past)), Some(Duration::ZERO));
        assert_eq!(clock.remaining(None), None);

        let future = clock.now() + Duration::from_secs(10);
        let left = clock.remaining(Some(future)).unwrap();
        assert!(left > Duration::from_secs(9));
        assert!(left <= Duration::from_secs(10));
    }
}
