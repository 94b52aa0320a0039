// Copyright (c) 2025 RustyDB Contributors
//
// Hazard pointers - safe memory reclamation for lock-free data structures.
//
// Reference: Maged M. Michael. "Hazard pointers: Safe memory reclamation for
// lock-free objects." IEEE Transactions on Parallel and Distributed Systems,
// 2004.
//
// Unlike a process-wide registry, `HazardPointerManager` is constructed per
// domain (one per data structure type, say), so a thread may hold records in
// several managers at once. The thread-local record for a given manager is
// keyed by the manager's address; the manager must outlive every thread that
// has acquired a record from it (typically: wrap it in an `Arc`).

use std::cell::RefCell;
use std::collections::HashSet;
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::concurrent::Backoff;
use crate::error::{Result, ToolkitError};

struct RetiredPtr {
    ptr: *mut (),
    deleter: unsafe fn(*mut ()),
}

// Safety: the pointer is only ever dereferenced by its deleter, under the
// owning record's retire-list lock.
unsafe impl Send for RetiredPtr {}

#[repr(C, align(64))]
struct HazardRecord {
    active: AtomicBool,
    hazards: Box<[AtomicPtr<()>]>,
    retired: Mutex<Vec<RetiredPtr>>,
    next: AtomicPtr<HazardRecord>,
}

impl HazardRecord {
    fn new(k: usize) -> Self {
        let hazards = (0..k).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Self {
            active: AtomicBool::new(true),
            hazards,
            retired: Mutex::new(Vec::new()),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

struct ThreadRecords(RefCell<Vec<(usize, NonNull<HazardRecord>)>>);

impl Drop for ThreadRecords {
    fn drop(&mut self) {
        // Thread is exiting: release our claim on every record we hold, but
        // leave retired pointers for another thread's HelpScan to collect —
        // we have no way to know whether the owning manager is still alive.
        for (_, record) in self.0.borrow_mut().drain(..) {
            unsafe {
                let record = record.as_ref();
                for hazard in record.hazards.iter() {
                    hazard.store(ptr::null_mut(), Ordering::Release);
                }
                record.active.store(false, Ordering::Release);
            }
        }
    }
}

thread_local! {
    static THREAD_RECORDS: ThreadRecords = ThreadRecords(RefCell::new(Vec::new()));
}

/// Publishes and retires hazard-protected pointers for one logical domain.
///
/// `K` hazard slots are reserved per thread; slot indices are caller-chosen
/// and validated against `K` at `guard()` time.
pub struct HazardPointerManager {
    k: usize,
    head: AtomicPtr<HazardRecord>,
    /// Observed count of distinct thread records ever allocated (`L`).
    count: AtomicUsize,
}

// Safety: all mutable state behind shared references is atomics or
// parking_lot primitives.
unsafe impl Send for HazardPointerManager {}
unsafe impl Sync for HazardPointerManager {}

impl HazardPointerManager {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            head: AtomicPtr::new(ptr::null_mut()),
            count: AtomicUsize::new(0),
        }
    }

    /// Number of per-thread slots this manager grants (`K`).
    pub fn slot_count(&self) -> usize {
        self.k
    }

    fn manager_key(&self) -> usize {
        self as *const _ as usize
    }

    fn thread_record(&self) -> NonNull<HazardRecord> {
        let key = self.manager_key();
        THREAD_RECORDS.with(|tr| {
            if let Some((_, record)) = tr.0.borrow().iter().find(|(k, _)| *k == key) {
                return *record;
            }
            let record = self.acquire_record();
            tr.0.borrow_mut().push((key, record));
            record
        })
    }

    fn acquire_record(&self) -> NonNull<HazardRecord> {
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            let record = unsafe { &*current };
            if record
                .active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return unsafe { NonNull::new_unchecked(current) };
            }
            current = record.next.load(Ordering::Acquire);
        }

        let record = Box::into_raw(Box::new(HazardRecord::new(self.k)));
        let mut backoff = Backoff::new();
        loop {
            let old_head = self.head.load(Ordering::Acquire);
            unsafe { (*record).next.store(old_head, Ordering::Relaxed) };
            if self
                .head
                .compare_exchange(old_head, record, Ordering::Release, Ordering::Acquire)
                .is_ok()
            {
                let l = self.count.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(slots = l, "allocated new hazard pointer record");
                return unsafe { NonNull::new_unchecked(record) };
            }
            backoff.snooze();
        }
    }

    /// Acquires write access to hazard slot `index` of the calling thread's
    /// record. `index` must lie in `[0, K)`.
    pub fn guard(&self, index: usize) -> Result<HazardGuard<'_>> {
        if index >= self.k {
            return Err(ToolkitError::InvalidSlot(index));
        }
        let record = self.thread_record();
        Ok(HazardGuard {
            manager: self,
            record,
            index,
        })
    }

    /// Convenience: acquire slot `index` and publish `p` into it in one call.
    pub fn protect<T>(&self, index: usize, p: *mut T) -> Result<HazardGuard<'_>> {
        let guard = self.guard(index)?;
        guard.publish(p);
        Ok(guard)
    }

    /// Introspection snapshot for tests and diagnostics: how many per-thread
    /// records this manager has ever allocated, and how many retired
    /// pointers across all of them are still waiting on a scan to reclaim
    /// them.
    pub fn stats(&self) -> HazardStats {
        let mut pending_retired = 0;
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            let record = unsafe { &*current };
            pending_retired += record.retired.lock().len();
            current = record.next.load(Ordering::Acquire);
        }
        HazardStats {
            records: self.count.load(Ordering::Relaxed),
            pending_retired,
        }
    }

    /// Retires `p`, to be destroyed via `Box::from_raw` once no hazard slot
    /// protects it.
    pub fn retire<T>(&self, p: *mut T) {
        unsafe fn deleter<T>(p: *mut ()) {
            drop(Box::from_raw(p as *mut T));
        }
        self.retire_with_deleter(p as *mut (), deleter::<T>);
    }

    /// Retires `p` with a caller-supplied deleter.
    pub fn retire_with_deleter(&self, p: *mut (), deleter: unsafe fn(*mut ())) {
        let record = self.thread_record();
        let l = self.count.load(Ordering::Relaxed).max(1);
        let threshold = 2 * l;

        let reached_threshold = {
            let mut retired = unsafe { record.as_ref() }.retired.lock();
            retired.push(RetiredPtr { ptr: p, deleter });
            retired.len() >= threshold
        };

        if reached_threshold {
            self.scan(record);
            self.help_scan(record);
        }
    }

    fn collect_protected(&self) -> HashSet<*mut ()> {
        let mut protected = HashSet::new();
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            let record = unsafe { &*current };
            for hazard in record.hazards.iter() {
                let p = hazard.load(Ordering::Acquire);
                if !p.is_null() {
                    protected.insert(p);
                }
            }
            current = record.next.load(Ordering::Acquire);
        }
        protected
    }

    /// Snapshots every published hazard slot and destroys any entry in
    /// `record`'s retire list that is no longer protected.
    fn scan(&self, record: NonNull<HazardRecord>) {
        let protected = self.collect_protected();
        let mut retired = unsafe { record.as_ref() }.retired.lock();
        let before = retired.len();
        retired.retain(|entry| {
            if protected.contains(&entry.ptr) {
                true
            } else {
                unsafe { (entry.deleter)(entry.ptr) };
                false
            }
        });
        trace!(reclaimed = before - retired.len(), "hazard pointer scan");
    }

    /// Attempts to claim every other inactive record; on success, merges its
    /// retire list into `ours` and re-runs `scan`.
    fn help_scan(&self, ours: NonNull<HazardRecord>) {
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            let record = unsafe { &*current };
            let next = record.next.load(Ordering::Acquire);

            if !ptr::eq(current, ours.as_ptr())
                && record
                    .active
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                let drained: Vec<RetiredPtr> = record.retired.lock().drain(..).collect();
                if !drained.is_empty() {
                    unsafe { ours.as_ref() }.retired.lock().extend(drained);
                    self.scan(ours);
                }
                record.active.store(false, Ordering::Release);
            }

            current = next;
        }
    }
}

impl Drop for HazardPointerManager {
    fn drop(&mut self) {
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            let record = unsafe { Box::from_raw(current) };
            current = record.next.load(Ordering::Acquire);
            for entry in record.retired.lock().drain(..) {
                unsafe { (entry.deleter)(entry.ptr) };
            }
        }
    }
}

/// Point-in-time counts reported by [`HazardPointerManager::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HazardStats {
    pub records: usize,
    pub pending_retired: usize,
}

/// RAII handle for one hazard slot. Protects whatever was last `publish`ed
/// until dropped or `clear`ed.
pub struct HazardGuard<'m> {
    manager: &'m HazardPointerManager,
    record: NonNull<HazardRecord>,
    index: usize,
}

impl<'m> HazardGuard<'m> {
    /// Stores `p` into the guarded slot, then issues a full fence so any
    /// subsequent validating load by this thread is ordered after the
    /// publication. An acquire/release pair is insufficient here: the store
    /// and the validating load are on the same thread, but must be observed
    /// as ordered by *other* threads running `Scan`.
    pub fn publish<T>(&self, p: *mut T) {
        unsafe { self.record.as_ref() }.hazards[self.index].store(p as *mut (), Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    pub fn clear(&self) {
        unsafe { self.record.as_ref() }.hazards[self.index]
            .store(ptr::null_mut(), Ordering::Release);
    }

    pub fn manager(&self) -> &'m HazardPointerManager {
        self.manager
    }
}

impl<'m> Drop for HazardGuard<'m> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guard_rejects_out_of_range_index() {
        let manager = HazardPointerManager::new(4);
        assert!(manager.guard(4).is_err());
        assert!(manager.guard(3).is_ok());
    }

    #[test]
    fn retire_is_deferred_while_published() {
        let manager = HazardPointerManager::new(2);
        static DROPPED: AtomicBool = AtomicBool::new(false);
        struct MarkOnDrop;
        impl Drop for MarkOnDrop {
            fn drop(&mut self) {
                DROPPED.store(true, Ordering::SeqCst);
            }
        }

        let value = Box::into_raw(Box::new(MarkOnDrop));
        let guard = manager.guard(0).unwrap();
        guard.publish(value);

        // Force a scan by retiring enough entries to cross the threshold.
        manager.retire(value);
        for _ in 0..4 {
            manager.retire(Box::into_raw(Box::new(MarkOnDrop)));
        }
        assert!(!DROPPED.load(Ordering::SeqCst));

        drop(guard);
        manager.retire(Box::into_raw(Box::new(MarkOnDrop)));
        for _ in 0..4 {
            manager.retire(Box::into_raw(Box::new(MarkOnDrop)));
        }
        assert!(DROPPED.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_publish_and_retire() {
        let manager = Arc::new(HazardPointerManager::new(4));
        let value = Arc::new(AtomicPtr::new(Box::into_raw(Box::new(AtomicI32::new(0)))));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let manager = manager.clone();
            let value = value.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let guard = manager.guard(0).unwrap();
                    let p = value.load(Ordering::Acquire);
                    guard.publish(p);
                    let p = value.load(Ordering::Acquire);
                    if !p.is_null() {
                        unsafe { (*p).fetch_add(1, Ordering::Relaxed) };
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let p = value.load(Ordering::Acquire);
        manager.retire(p);
    }
}
