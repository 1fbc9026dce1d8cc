//! Finish scope (spec §3/§4.D): a nested termination barrier. Counter
//! semantics mirror the teacher's `CountLatch` (`sched/latch.rs`), except
//! a finish scope's counter starts at zero (no tasks pending) rather than
//! one, since spec.md's invariant is "exact number of outstanding tasks
//! plus one per live child scope" -- the "one per child" unit is charged
//! explicitly by `start_finish` onto the parent, not baked into the
//! initial value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A LIFO-nested termination barrier. Every task spawned inside a scope
/// (transitively, through further spawns or child scopes) increments its
/// counter exactly once before being enqueued, and decrements it exactly
/// once after it finishes running.
pub struct FinishScope {
    counter: AtomicU64,
    pub parent: Option<Arc<FinishScope>>,
}

impl FinishScope {
    pub fn root() -> Arc<FinishScope> {
        Arc::new(FinishScope {
            counter: AtomicU64::new(0),
            parent: None,
        })
    }

    /// Creates a new scope nested under `parent`. The parent is charged one
    /// outstanding unit of work for the child scope itself, per spec's
    /// finish-scope invariant (plus one per live child).
    pub fn nested(parent: Arc<FinishScope>) -> Arc<FinishScope> {
        parent.counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(FinishScope {
            counter: AtomicU64::new(0),
            parent: Some(parent),
        })
    }

    #[inline]
    pub fn check_in(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn check_out(&self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn pending(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_quiescent(&self) -> bool {
        self.pending() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scope_charges_parent_one_unit() {
        let root = FinishScope::root();
        assert_eq!(root.pending(), 0);

        let child = FinishScope::nested(root.clone());
        assert_eq!(root.pending(), 1);

        child.check_out();
        // child itself never decremented root; that happens when the
        // *caller* of end_finish retires the child scope (see worker.rs).
        assert_eq!(root.pending(), 1);

        root.check_out();
        assert_eq!(root.pending(), 0);
    }
}
