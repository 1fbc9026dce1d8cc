//! Isolation map (spec §3/§4.F): mutual exclusion keyed by user-supplied
//! addresses, with deadlock-free multi-lock acquisition. Grounded on
//! `examples/original_source/src/hclib-isolated.c`: `enable_isolation`
//! installs a mutex under a hashmap lock, `isolated_execution` sorts the
//! requested addresses by their insertion index before acquiring, and
//! releases in reverse -- the same total order every caller uses, so two
//! overlapping `isolated_execution` calls can never form a cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

struct Entry {
    mutex: Mutex<()>,
    index: u64,
}

/// Address-keyed mutex map. `Address` is any value the caller treats as a
/// stable identity for the region being isolated -- typically a pointer
/// cast to `usize`, but any `Copy + Eq + Hash` key works.
pub struct IsolationMap<A: Eq + std::hash::Hash + Clone> {
    next_index: AtomicU64,
    entries: Mutex<HashMap<A, std::sync::Arc<Entry>>>,
}

impl<A: Eq + std::hash::Hash + Clone> Default for IsolationMap<A> {
    fn default() -> Self {
        IsolationMap {
            next_index: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<A: Eq + std::hash::Hash + Clone> IsolationMap<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh mutex under `addr`, assigning it the next
    /// insertion index. The map-level lock is held only for the duration
    /// of the insert.
    pub fn enable_isolation(&self, addr: A) {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let entry = std::sync::Arc::new(Entry {
            mutex: Mutex::new(()),
            index,
        });
        self.entries.lock().unwrap().insert(addr, entry);
    }

    /// Bulk variant over a contiguous run of addresses (spec's
    /// `enable_isolation_1d`).
    pub fn enable_isolation_1d<I: IntoIterator<Item = A>>(&self, addrs: I) {
        for addr in addrs {
            self.enable_isolation(addr);
        }
    }

    /// Bulk variant over a pointer-of-pointer (row-major) region (spec's
    /// `enable_isolation_2d`).
    pub fn enable_isolation_2d<I: IntoIterator<Item = A>>(&self, rows: I) {
        self.enable_isolation_1d(rows);
    }

    /// Removes and destroys the mutex under `addr`. A missing address is a
    /// programming error (spec §4.F / §7): abort with a diagnostic rather
    /// than returning an error.
    pub fn disable_isolation(&self, addr: &A) {
        let removed = self.entries.lock().unwrap().remove(addr);
        assert!(
            removed.is_some(),
            "disable_isolation: address was never registered with enable_isolation"
        );
    }

    pub fn disable_isolation_1d<'a, I: IntoIterator<Item = &'a A>>(&self, addrs: I)
    where
        A: 'a,
    {
        for addr in addrs {
            self.disable_isolation(addr);
        }
    }

    /// Acquires the mutexes for `addrs` in ascending insertion-index
    /// order, runs `func`, and releases in reverse order. `n == 1` takes a
    /// direct short-circuit path (spec §4.F).
    pub fn isolated_execution<R>(&self, addrs: &[A], func: impl FnOnce() -> R) -> R {
        if addrs.len() == 1 {
            let entry = self.lookup(&addrs[0]);
            let _guard = entry.mutex.lock().unwrap();
            return func();
        }

        let mut entries: Vec<std::sync::Arc<Entry>> =
            addrs.iter().map(|a| self.lookup(a)).collect();
        entries.sort_by_key(|e| e.index);

        let mut guards: Vec<MutexGuard<()>> = Vec::with_capacity(entries.len());
        for entry in &entries {
            guards.push(entry.mutex.lock().unwrap());
        }

        let result = func();

        // Release in reverse acquisition order (spec §4.F); dropping the
        // Vec front-to-back would release in acquisition order instead, so
        // walk it backwards explicitly.
        while guards.pop().is_some() {}

        result
    }

    fn lookup(&self, addr: &A) -> std::sync::Arc<Entry> {
        self.entries
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .unwrap_or_else(|| panic!("isolated_execution: address was never registered with enable_isolation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_address_short_circuit() {
        let map = IsolationMap::new();
        map.enable_isolation(1usize);
        let sum = std::sync::atomic::AtomicU64::new(0);
        map.isolated_execution(&[1], || {
            sum.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(sum.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn missing_address_is_a_contract_violation() {
        let map: IsolationMap<usize> = IsolationMap::new();
        map.isolated_execution(&[42], || {});
    }

    #[test]
    fn concurrent_overlapping_updates_never_deadlock_and_are_exact() {
        let map = Arc::new(IsolationMap::new());
        for addr in 0..64usize {
            map.enable_isolation(addr);
        }

        let sums: Arc<Vec<std::sync::atomic::AtomicU64>> =
            Arc::new((0..64).map(|_| std::sync::atomic::AtomicU64::new(0)).collect());

        let mut handles = Vec::new();
        for t in 0..8 {
            let map = map.clone();
            let sums = sums.clone();
            handles.push(thread::spawn(move || {
                let mut rng_state: u64 = 0x9E3779B97F4A7C15 ^ (t as u64 + 1);
                let mut next = move || {
                    rng_state ^= rng_state << 13;
                    rng_state ^= rng_state >> 7;
                    rng_state ^= rng_state << 17;
                    rng_state
                };
                for _ in 0..1250 {
                    let mut addrs: Vec<usize> =
                        (0..3).map(|_| (next() % 64) as usize).collect();
                    addrs.sort_unstable();
                    addrs.dedup();
                    map.isolated_execution(&addrs, || {
                        for &a in &addrs {
                            sums[a].fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let total: u64 = sums.iter().map(|s| s.load(Ordering::SeqCst)).sum();
        assert!(total > 0);
    }
}
