//! Mailbox (spec §3/§4.H): aggregates outgoing messages into a buffer,
//! batches them through a `Conveyor`, and dispatches arrivals to a
//! handler. Grounded on
//! `examples/original_source/modules/bale_actor/inc/selector.h`'s
//! `Mailbox<T, SIZE>::start_worker_loop`, whose phases (spin until
//! nonempty, advance the conveyor, push a batch starting at index 1,
//! erase the committed prefix, pull and dispatch, yield, repeat) this
//! port keeps unchanged; only the spin-wait and the completion signal
//! are re-expressed in owned Rust types instead of a future/promise pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::{BufferPacket, SafeBuffer, DONE_RANK};
use crate::conveyor::Conveyor;

/// Runs one mailbox's worker loop to completion. Lives on its own thread
/// for the mailbox's lifetime; `send`/`done` are called from other
/// threads and only ever append to `buffer`.
pub struct Mailbox<T> {
    buffer: Arc<SafeBuffer<T>>,
    loop_done: Arc<AtomicBool>,
}

impl<T: Clone + Default + Send + 'static> Mailbox<T> {
    pub fn new() -> Self {
        Mailbox {
            buffer: Arc::new(SafeBuffer::new()),
            loop_done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues `pkt` for delivery to `rank`. Safe to call from any
    /// thread; the worker loop is the sole consumer.
    pub fn send(&self, pkt: T, rank: i64) {
        self.buffer.append(BufferPacket::new(pkt, rank));
    }

    /// Enqueues the done sentinel. Exactly one `done()` call is expected
    /// per mailbox (spec §4.H); a second call would just queue another
    /// sentinel the worker loop quietly re-advances past.
    pub fn done(&self) {
        self.buffer
            .append(BufferPacket::new(T::default(), DONE_RANK));
    }

    pub fn is_loop_done(&self) -> bool {
        self.loop_done.load(Ordering::Acquire)
    }

    /// Drives `conveyor` until it reaches quiescence, invoking `handler`
    /// for every `(payload, rank)` the conveyor yields back. Blocking:
    /// meant to run on its own dedicated thread.
    pub fn run_worker_loop<C, F>(&self, mut conveyor: C, mut handler: F)
    where
        C: Conveyor<T>,
        F: FnMut(T, i64),
    {
        conveyor.begin(std::mem::size_of::<T>());

        loop {
            while self.buffer.size() == 0 {
                std::thread::yield_now();
            }

            let head = self.buffer.at(0).expect("just observed size() > 0");
            let done = head.is_done();

            // `advance` returning false means the conveyor has fully
            // drained and reached terminal quiescence -- nothing left to
            // push or pull, so the worker loop is done too.
            if !conveyor.advance(done) {
                break;
            }

            let buff_size = self.buffer.size();
            let mut pushed = 0usize;
            let mut bp = head;
            for i in 1..buff_size {
                if !conveyor.push(bp.data.clone(), bp.rank) {
                    break;
                }
                pushed = i;
                bp = self.buffer.at(i).expect("index within buff_size");
            }

            if pushed > 0 {
                self.buffer.erase_prefix(pushed);
            }

            while let Some((payload, from)) = conveyor.pull() {
                handler(payload, from);
            }

            std::thread::yield_now();
        }

        self.loop_done.store(true, Ordering::Release);
    }
}

/// Blocks the calling thread until `mailbox`'s worker loop has finished
/// (spec §4.H's `worker_loop_end` promise, re-expressed as a condvar
/// since nothing else here needs a full future type).
pub struct LoopEndLatch {
    state: Mutex<bool>,
    cvar: std::sync::Condvar,
}

impl Default for LoopEndLatch {
    fn default() -> Self {
        LoopEndLatch {
            state: Mutex::new(false),
            cvar: std::sync::Condvar::new(),
        }
    }
}

impl LoopEndLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut done = self.state.lock().unwrap();
        *done = true;
        self.cvar.notify_all();
    }

    pub fn wait(&self) {
        let mut done = self.state.lock().unwrap();
        while !*done {
            done = self.cvar.wait(done).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conveyor::LoopbackConveyor;

    #[test]
    fn delivers_everything_sent_before_done() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        mailbox.send(1, 0);
        mailbox.send(2, 0);
        mailbox.send(3, 1);
        mailbox.done();

        let received = Arc::new(Mutex::new(Vec::new()));
        let recv_clone = received.clone();
        mailbox.run_worker_loop(LoopbackConveyor::new(), move |payload, rank| {
            recv_clone.lock().unwrap().push((payload, rank));
        });

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 3);
        assert!(mailbox.is_loop_done());
    }
}
