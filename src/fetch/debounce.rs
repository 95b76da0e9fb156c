use std::time::{Duration, Instant};

/// Trailing-edge debouncer driven by explicit instants.
///
/// Every `signal` pushes the deadline out by `window`; `poll` fires once the
/// deadline has passed with no newer signal.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn signal(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true exactly once per quiet period.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_after_quiet_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        debouncer.signal(start);
        assert!(!debouncer.poll(start + Duration::from_millis(199)));
        assert!(debouncer.poll(start + Duration::from_millis(200)));
        assert!(!debouncer.poll(start + Duration::from_millis(400)));
    }

    #[test]
    fn test_signals_coalesce() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(150));
        for step in 0..10 {
            debouncer.signal(start + Duration::from_millis(step * 50));
        }
        // Last signal at 450ms.
        assert!(!debouncer.poll(start + Duration::from_millis(500)));
        assert!(debouncer.poll(start + Duration::from_millis(600)));
    }

    #[test]
    fn test_cancel_clears_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        debouncer.signal(start);
        debouncer.cancel();
        assert!(!debouncer.is_pending());
        assert!(!debouncer.poll(start + Duration::from_secs(1)));
    }
}
