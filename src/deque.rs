//! Bounded, fixed-capacity work-stealing deque.
//!
//! Unlike a textbook Chase-Lev deque (and unlike `crossbeam_deque`, which
//! the teacher's scheduler built on), this deque never grows: it is backed
//! by a single circular array allocated once at construction. A full
//! `push` returns `false` instead of reallocating, so the caller can fall
//! back to inline execution (spec §4.A / §4.C).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicIsize, Ordering};

/// Outcome of a `steal()` attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Steal<T> {
    /// Nothing to steal right now.
    Empty,
    /// Stole a single item.
    Success(T),
    /// Lost a race with another stealer or the owner; caller should retry
    /// or move on to the next candidate deque.
    Retry,
}

impl<T> Steal<T> {
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(v) => Some(v),
            _ => None,
        }
    }
}

/// Owner pushes/pops at `bottom`; thieves race for `top`. Both indices only
/// ever increase, and are masked into the backing array's capacity.
pub struct BoundedDeque<T> {
    top: AtomicIsize,
    bottom: AtomicIsize,
    capacity: usize,
    mask: usize,
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

unsafe impl<T: Send> Send for BoundedDeque<T> {}
unsafe impl<T: Send> Sync for BoundedDeque<T> {}

impl<T> BoundedDeque<T> {
    /// `capacity` is rounded up to the next power of two (required for the
    /// index mask below).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let mut buf = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buf.push(UnsafeCell::new(MaybeUninit::uninit()));
        }

        BoundedDeque {
            top: AtomicIsize::new(0),
            bottom: AtomicIsize::new(0),
            capacity,
            mask: capacity - 1,
            buf: buf.into_boxed_slice(),
        }
    }

    #[inline]
    fn slot(&self, idx: isize) -> *mut MaybeUninit<T> {
        self.buf[(idx as usize) & self.mask].get()
    }

    /// Owner-only. Returns `false` if the deque is full; the caller is
    /// expected to execute the job inline instead (spec: overflow is a
    /// warning, not an error).
    pub fn push(&self, value: T) -> bool {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);

        if (bottom - top) as usize >= self.capacity {
            return false;
        }

        unsafe {
            ptr::write((*self.slot(bottom)).as_mut_ptr(), value);
        }
        self.bottom.store(bottom + 1, Ordering::Release);
        true
    }

    /// Owner-only LIFO pop, from the bottom (spec §4.A).
    pub fn pop(&self) -> Option<T> {
        let bottom = self.bottom.load(Ordering::Relaxed);
        if bottom == self.top.load(Ordering::Relaxed) {
            return None;
        }

        let bottom = bottom - 1;
        self.bottom.store(bottom, Ordering::Relaxed);
        std::sync::atomic::fence(Ordering::SeqCst);

        let top = self.top.load(Ordering::Relaxed);
        if bottom < top {
            // Already drained by a thief; restore the invariant.
            self.bottom.store(top, Ordering::Relaxed);
            return None;
        }

        let value = unsafe { ptr::read((*self.slot(bottom)).as_ptr()) };

        if bottom > top {
            return Some(value);
        }

        // Last slot: race the stealers for it.
        let won = self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(top + 1, Ordering::Relaxed);

        if won {
            Some(value)
        } else {
            std::mem::forget(value);
            None
        }
    }

    /// Thief-only FIFO steal, from the top (spec §4.A). Never blocks: an
    /// empty deque returns `Steal::Empty` immediately.
    pub fn steal(&self) -> Steal<T> {
        let top = self.top.load(Ordering::Acquire);
        std::sync::atomic::fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);

        if top >= bottom {
            return Steal::Empty;
        }

        let value = unsafe { ptr::read((*self.slot(top)).as_ptr()) };

        if self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            Steal::Success(value)
        } else {
            std::mem::forget(value);
            Steal::Retry
        }
    }

    pub fn is_empty(&self) -> bool {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Relaxed);
        bottom <= top
    }

    pub fn len(&self) -> usize {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Relaxed);
        (bottom - top).max(0) as usize
    }
}

impl<T> Drop for BoundedDeque<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_is_lifo() {
        let d = BoundedDeque::with_capacity(16);
        assert!(d.push(1));
        assert!(d.push(2));
        assert!(d.push(3));
        assert_eq!(d.pop(), Some(3));
        assert_eq!(d.pop(), Some(2));
        assert_eq!(d.pop(), Some(1));
        assert_eq!(d.pop(), None);
    }

    #[test]
    fn steal_is_fifo() {
        let d = BoundedDeque::with_capacity(16);
        d.push(1);
        d.push(2);
        d.push(3);
        assert_eq!(d.steal(), Steal::Success(1));
        assert_eq!(d.pop(), Some(3));
        assert_eq!(d.pop(), Some(2));
    }

    #[test]
    fn overflow_push_fails_without_growing() {
        let d = BoundedDeque::with_capacity(4);
        for i in 0..4 {
            assert!(d.push(i));
        }
        assert!(!d.push(4), "capacity 4 deque should refuse a 5th push");
        assert_eq!(d.pop(), Some(3));
    }

    #[test]
    fn steal_empty_never_blocks() {
        let d: BoundedDeque<u32> = BoundedDeque::with_capacity(8);
        assert_eq!(d.steal(), Steal::Empty);
    }

    #[test]
    fn concurrent_steal_takes_each_item_exactly_once() {
        let d = Arc::new(BoundedDeque::with_capacity(1024));
        for i in 0..500 {
            d.push(i);
        }

        let thieves: Vec<_> = (0..4)
            .map(|_| {
                let d = d.clone();
                thread::spawn(move || {
                    let mut stolen = Vec::new();
                    loop {
                        match d.steal() {
                            Steal::Success(v) => stolen.push(v),
                            Steal::Empty => break,
                            Steal::Retry => continue,
                        }
                    }
                    stolen
                })
            })
            .collect();

        let mut all: Vec<u32> = Vec::new();
        for t in thieves {
            all.extend(t.join().unwrap());
        }
        while let Some(v) = d.pop() {
            all.push(v);
        }

        all.sort();
        assert_eq!(all, (0..500).collect::<Vec<_>>());
    }
}
