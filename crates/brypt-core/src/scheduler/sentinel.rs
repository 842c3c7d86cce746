//! `Sentinel` — the scheduler's wait/wake primitive: an atomic
//! available-task counter paired with a condition variable so
//! `Service::execute` can block until there is something to do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct Sentinel {
    available: AtomicUsize,
    lock: Mutex<()>,
    condition: Condvar,
}

impl Sentinel {
    pub fn new() -> Self {
        Self {
            available: AtomicUsize::new(0),
            lock: Mutex::new(()),
            condition: Condvar::new(),
        }
    }

    /// Called by a delegate's producer when new work becomes available.
    pub fn notify_task_available(&self) {
        self.available.fetch_add(1, Ordering::SeqCst);
        self.condition.notify_all();
    }

    /// Called by the scheduler after running a tick's worth of delegates.
    pub fn notify_task_completed(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut remaining = self.available.load(Ordering::SeqCst);
        loop {
            let next = remaining.saturating_sub(count);
            match self.available.compare_exchange(
                remaining,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => remaining = actual,
            }
        }
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    /// Blocks until a task becomes available or `timeout` elapses, returning
    /// whether work is available.
    pub fn await_task(&self, timeout: Duration) -> bool {
        if self.available() > 0 {
            return true;
        }
        let guard = self.lock.lock().unwrap();
        let (_guard, _timeout_result) = self
            .condition
            .wait_timeout_while(guard, timeout, |_| self.available() == 0)
            .unwrap();
        self.available() > 0
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn await_task_wakes_on_notification() {
        let sentinel = Arc::new(Sentinel::new());
        let waiter = Arc::clone(&sentinel);
        let handle = thread::spawn(move || waiter.await_task(Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(20));
        sentinel.notify_task_available();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn await_task_times_out_with_no_work() {
        let sentinel = Sentinel::new();
        assert!(!sentinel.await_task(Duration::from_millis(20)));
    }

    #[test]
    fn notify_completed_decrements_available_count() {
        let sentinel = Sentinel::new();
        sentinel.notify_task_available();
        sentinel.notify_task_available();
        sentinel.notify_task_completed(1);
        assert_eq!(sentinel.available(), 1);
    }
}
