//! Per-fingerprint fetch gate
//!
//! Callers that miss on the same fingerprint inside one process queue behind
//! the first fetcher instead of all hitting the backend at once. Different
//! fingerprints never wait on each other.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use crate::key::Fingerprint;

#[derive(Debug, Default)]
pub(crate) struct InflightFetches {
    active: Mutex<HashSet<Fingerprint>>,
    released: Condvar,
}

impl InflightFetches {
    /// Blocks until no other caller holds `fingerprint`, then claims it
    pub(crate) fn acquire(&self, fingerprint: &Fingerprint) -> InflightGuard<'_> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        while active.contains(fingerprint) {
            active = self
                .released
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
        active.insert(fingerprint.clone());

        InflightGuard {
            owner: self,
            fingerprint: fingerprint.clone(),
        }
    }
}

/// Releases the claim on drop, including when the fetcher panics
pub(crate) struct InflightGuard<'a> {
    owner: &'a InflightFetches,
    fingerprint: Fingerprint,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut active = self
            .owner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.fingerprint);
        self.owner.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_fingerprint_is_exclusive() {
        let gate = Arc::new(InflightFetches::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let fingerprint = Fingerprint::from("f".repeat(64));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let inside = Arc::clone(&inside);
                let fingerprint = fingerprint.clone();
                thread::spawn(move || {
                    let _guard = gate.acquire(&fingerprint);
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_different_fingerprints_do_not_block() {
        let gate = InflightFetches::default();
        let a = Fingerprint::from("a".repeat(64));
        let b = Fingerprint::from("b".repeat(64));

        let _first = gate.acquire(&a);
        let _second = gate.acquire(&b);
    }

    #[test]
    fn test_release_allows_reacquire() {
        let gate = InflightFetches::default();
        let a = Fingerprint::from("a".repeat(64));

        drop(gate.acquire(&a));
        let _again = gate.acquire(&a);
    }
}
