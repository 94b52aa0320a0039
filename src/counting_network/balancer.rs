// A balancer is the atomic building block of a counting network: a token
// entering on either wire leaves on the toggled output wire, flipping the
// toggle for the next arrival. Traversal is a single CAS loop; no lock is
// ever held.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::CachePadded;

use crate::concurrent::Backoff;

/// Two-output toggle satisfying the step property: `|out0 - out1| <= 1` at
/// every point in the traversal history. `Merger`/`Bitonic` networks pack
/// many balancers into one `Vec` layer, so the toggle is cache-padded —
/// without it, a balancer under contention would false-share its cache
/// line with its neighbors in that layer.
#[derive(Debug, Default)]
pub struct Balancer {
    toggle: CachePadded<AtomicBool>,
}

impl Balancer {
    pub fn new() -> Self {
        Self {
            toggle: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Routes one token through the balancer, returning the output wire it
    /// leaves on (0 or 1). Retries the CAS, backing off under contention,
    /// until it wins.
    pub fn traverse(&self) -> usize {
        let mut backoff = Backoff::new();
        loop {
            let current = self.toggle.load(Ordering::Acquire);
            if self
                .toggle
                .compare_exchange(current, !current, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return usize::from(current);
            }
            backoff.snooze();
        }
    }
}
