use std::sync::{Condvar, Mutex, PoisonError};

/// Counting cross-thread wake primitive.
///
/// Semaphore semantics: `signal` increments the counter and wakes a waiter,
/// `wait` blocks until the counter is positive and decrements it. One signal
/// is consumed per wait, so a consumer that drains more than one item per
/// wake simply observes some later waits return with nothing left to drain.
#[derive(Debug, Default)]
pub struct WakeCounter {
    pending: Mutex<u64>,
    cond: Condvar,
}

impl WakeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter and wake one waiter.
    pub fn signal(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending += 1;
        drop(pending);
        self.cond.notify_one();
    }

    /// Block until the counter is positive, then take one unit.
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending == 0 {
            pending = self
                .cond
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *pending -= 1;
    }

    /// Current counter value. Staleness applies as soon as it is returned.
    pub fn pending(&self) -> u64 {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_then_wait_does_not_block() {
        let wake = WakeCounter::new();
        wake.signal();
        wake.signal();
        assert_eq!(wake.pending(), 2);

        wake.wait();
        wake.wait();
        assert_eq!(wake.pending(), 0);
    }

    #[test]
    fn wait_blocks_until_signalled() {
        let wake = Arc::new(WakeCounter::new());

        let waiter = {
            let wake = Arc::clone(&wake);
            thread::spawn(move || wake.wait())
        };

        // Give the waiter a moment to park, then release it.
        thread::sleep(Duration::from_millis(20));
        wake.signal();
        waiter.join().unwrap();
        assert_eq!(wake.pending(), 0);
    }
}
