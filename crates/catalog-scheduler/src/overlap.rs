//! Concurrent-execution ceiling for a single job.
//!
//! Every job carries an `InstanceGuard` sized by its `max_instances`. The
//! dispatch loop acquires an `InstanceSlot` before launching a body; a
//! firing that finds the guard full is skipped rather than queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks in-flight executions of one job against its ceiling.
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct InstanceGuard {
    running: Arc<AtomicUsize>,
    max_instances: usize,
}

impl InstanceGuard {
    /// Create a guard allowing at most `max_instances` concurrent runs.
    pub fn new(max_instances: usize) -> Self {
        Self {
            running: Arc::new(AtomicUsize::new(0)),
            max_instances,
        }
    }

    /// A guard with a new ceiling that keeps counting `self`'s in-flight
    /// executions. Used when a job is replaced while it is running.
    pub(crate) fn resized(&self, max_instances: usize) -> Self {
        Self {
            running: self.running.clone(),
            max_instances,
        }
    }

    /// Attempt to claim an execution slot.
    ///
    /// Returns `None` when `max_instances` executions are already in flight.
    /// The increment is atomic, so concurrent callers can never push the
    /// count past the ceiling.
    pub fn try_acquire(&self) -> Option<InstanceSlot> {
        let mut current = self.running.load(Ordering::SeqCst);
        loop {
            if current >= self.max_instances {
                return None;
            }
            match self.running.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(InstanceSlot {
                        running: self.running.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of executions currently in flight.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }
}

/// RAII slot that releases its claim when dropped.
///
/// The release happens on success, failure and panic alike.
#[derive(Debug)]
pub struct InstanceSlot {
    running: Arc<AtomicUsize>,
}

impl Drop for InstanceSlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_instance_blocks_second_acquire() {
        let guard = InstanceGuard::new(1);

        let run1 = guard.try_acquire();
        assert!(run1.is_some());
        assert_eq!(guard.running(), 1);

        assert!(guard.try_acquire().is_none());

        drop(run1);
        assert_eq!(guard.running(), 0);
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_ceiling_of_three() {
        let guard = InstanceGuard::new(3);

        let slots: Vec<_> = (0..3).filter_map(|_| guard.try_acquire()).collect();
        assert_eq!(slots.len(), 3);
        assert!(guard.try_acquire().is_none());
        assert_eq!(guard.running(), 3);

        drop(slots);
        assert_eq!(guard.running(), 0);
    }

    #[test]
    fn test_resized_guard_shares_in_flight_count() {
        let old = InstanceGuard::new(1);
        let in_flight = old.try_acquire().unwrap();

        let replacement = old.resized(2);
        assert_eq!(replacement.running(), 1);
        assert_eq!(replacement.max_instances(), 2);

        let second = replacement.try_acquire();
        assert!(second.is_some());
        assert!(replacement.try_acquire().is_none());

        drop(in_flight);
        drop(second);
        assert_eq!(replacement.running(), 0);
    }

    #[test]
    fn test_slot_released_on_panic() {
        let guard = InstanceGuard::new(1);
        let clone = guard.clone();

        let result = thread::spawn(move || {
            let _slot = clone.try_acquire().unwrap();
            panic!("job body exploded");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(guard.running(), 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_ceiling() {
        let guard = InstanceGuard::new(2);
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                let peak = peak.clone();
                thread::spawn(move || {
                    if let Some(_slot) = guard.try_acquire() {
                        peak.fetch_max(guard.running(), Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(guard.running(), 0);
    }
}
