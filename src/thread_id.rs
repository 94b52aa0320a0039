// Stable per-thread identifier, dense in [0, T) where T is the peak observed
// concurrency. Used by the combining tree (§6's thread-identity hook) to map
// a calling thread onto a leaf.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Returns a non-negative integer assigned once per thread on first call and
/// persistent for that thread's lifetime. Ids are allocated in increasing
/// order starting at zero and are never reused, even after the allocating
/// thread exits.
pub fn current() -> usize {
    THREAD_ID.with(|slot| {
        if let Some(id) = slot.get() {
            return id;
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        slot.set(Some(id));
        id
    })
}

/// Number of distinct threads that have called [`current`] so far.
pub fn observed_count() -> usize {
    NEXT_ID.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stable_within_thread() {
        let a = current();
        let b = current();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_across_threads() {
        let before = observed_count();
        let ids: Vec<usize> = (0..8)
            .map(|_| thread::spawn(current).join().unwrap())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
        assert!(observed_count() >= before + 8);
    }
}
