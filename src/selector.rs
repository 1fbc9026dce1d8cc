//! Selector (spec §3/§4.I): owns `N` mailboxes and chains their
//! completion so that calling `done` on one mailbox eventually marks
//! all `N` done, in ring order. Grounded on
//! `examples/original_source/modules/bale_actor/inc/selector.h`'s
//! `Selector<N, T, SIZE>`. The original's completion chain indexes
//! `mb[(mb_id+1) % SIZE]` -- `SIZE` is the buffer capacity (default
//! 1000001), not the mailbox count, so on any run with `N < SIZE` that
//! modulus never wraps and the chain silently never reaches every
//! mailbox. This port uses `% N`, the mailbox count, so the chain always
//! visits every mailbox exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::conveyor::Conveyor;
use crate::mailbox::{LoopEndLatch, Mailbox};

pub struct Selector<T> {
    mailboxes: Vec<Arc<Mailbox<T>>>,
    latches: Vec<Arc<LoopEndLatch>>,
    num_done: AtomicUsize,
}

impl<T: Clone + Default + Send + 'static> Selector<T> {
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "a selector needs at least one mailbox");
        Selector {
            mailboxes: (0..n).map(|_| Arc::new(Mailbox::new())).collect(),
            latches: (0..n).map(|_| Arc::new(LoopEndLatch::new())).collect(),
            num_done: AtomicUsize::new(0),
        }
    }

    pub fn num_mailboxes(&self) -> usize {
        self.mailboxes.len()
    }

    /// Spawns one worker-loop thread per mailbox, each driving its own
    /// conveyor instance built by `make_conveyor` and dispatching
    /// arrivals to its own handler built by `make_handler`.
    pub fn start<C, F>(
        &self,
        mut make_conveyor: impl FnMut(usize) -> C,
        mut make_handler: impl FnMut(usize) -> F,
    ) -> Vec<thread::JoinHandle<()>>
    where
        C: Conveyor<T> + 'static,
        F: FnMut(T, i64) + Send + 'static,
    {
        self.mailboxes
            .iter()
            .zip(self.latches.iter())
            .enumerate()
            .map(|(id, (mailbox, latch))| {
                let mailbox = mailbox.clone();
                let latch = latch.clone();
                let conveyor = make_conveyor(id);
                let handler = make_handler(id);
                thread::spawn(move || {
                    let mut handler = handler;
                    mailbox.run_worker_loop(conveyor, move |payload, rank| {
                        handler(payload, rank)
                    });
                    latch.signal();
                })
            })
            .collect()
    }

    pub fn send(&self, mb_id: usize, pkt: T, rank: i64) {
        self.mailboxes[mb_id].send(pkt, rank);
    }

    /// Marks mailbox `mb_id` done, then -- once that mailbox's worker
    /// loop has actually finished -- chains to `(mb_id + 1) % N` unless
    /// every mailbox has already been marked, recursing so a single call
    /// propagates all the way around the ring (spec property: "if
    /// `done(i)` is called exactly once on any i, all N mailbox loops
    /// terminate"). Blocks the calling thread until the whole chain has
    /// completed.
    pub fn done(&self, mb_id: usize) {
        self.mailboxes[mb_id].done();
        self.latches[mb_id].wait();

        let finished = self.num_done.fetch_add(1, Ordering::SeqCst) + 1;
        if finished < self.num_mailboxes() {
            let next = (mb_id + 1) % self.num_mailboxes();
            self.done(next);
        }
    }

    pub fn join(&self, handles: Vec<thread::JoinHandle<()>>) {
        for handle in handles {
            handle.join().expect("mailbox worker loop panicked");
        }
    }
}

/// Runs `lambda` after starting `selector`'s worker loops, matching the
/// original's `hclib::selector::finish` free function.
pub fn finish<T, C, F>(
    selector: &Selector<T>,
    make_conveyor: impl FnMut(usize) -> C,
    make_handler: impl FnMut(usize) -> F,
    lambda: impl FnOnce(),
) where
    T: Clone + Default + Send + 'static,
    C: Conveyor<T> + 'static,
    F: FnMut(T, i64) + Send + 'static,
{
    let handles = selector.start(make_conveyor, make_handler);
    lambda();
    selector.join(handles);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conveyor::LoopbackConveyor;
    use std::sync::Mutex;

    #[test]
    fn completion_chain_visits_every_mailbox_even_with_n_less_than_buffer_size() {
        let selector: Arc<Selector<u32>> = Arc::new(Selector::new(4));
        let received: Arc<Vec<Mutex<Vec<u32>>>> =
            Arc::new((0..4).map(|_| Mutex::new(Vec::new())).collect());

        let handles = selector.start(
            |_| LoopbackConveyor::new(),
            {
                let received = received.clone();
                move |id| {
                    let received = received.clone();
                    move |payload: u32, _rank: i64| {
                        received[id].lock().unwrap().push(payload);
                    }
                }
            },
        );

        selector.send(0, 42, 0);
        selector.done(0);

        selector.join(handles);

        assert_eq!(selector.num_done.load(Ordering::SeqCst), 4);
        assert_eq!(received[0].lock().unwrap().as_slice(), &[42]);
    }
}
