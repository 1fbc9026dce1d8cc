//! Safe buffer (spec §3/§4.G): a bounded FIFO of `BufferPacket`s. Producers
//! (user threads calling `Mailbox::send`) only ever append; the mailbox's
//! own worker loop is the sole consumer of `size`/`at`/`erase_prefix`.
//! Grounded on `examples/original_source/modules/bale_actor/inc/selector.h`'s
//! `safe_buffer`. The original gates its mutex behind `#ifdef USE_LOCK`;
//! this port always takes the lock, since the uncontended cost of an
//! uncontested `Mutex` is not worth a build switch (see DESIGN.md).

use std::collections::VecDeque;
use std::sync::Mutex;

pub const DONE_RANK: i64 = -1;

/// A `(payload, destination rank)` pair. `rank == DONE_RANK` is the
/// distinguished "no further sends" sentinel.
#[derive(Debug, Clone)]
pub struct BufferPacket<T> {
    pub data: T,
    pub rank: i64,
}

impl<T> BufferPacket<T> {
    pub fn new(data: T, rank: i64) -> Self {
        BufferPacket { data, rank }
    }

    pub fn is_done(&self) -> bool {
        self.rank == DONE_RANK
    }
}

pub struct SafeBuffer<T> {
    queue: Mutex<VecDeque<BufferPacket<T>>>,
}

impl<T> Default for SafeBuffer<T> {
    fn default() -> Self {
        SafeBuffer {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T: Clone> SafeBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer-only append.
    pub fn append(&self, packet: BufferPacket<T>) {
        self.queue.lock().unwrap().push_back(packet);
    }

    pub fn size(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Indexed read without removal; `None` past the end.
    pub fn at(&self, index: usize) -> Option<BufferPacket<T>> {
        self.queue.lock().unwrap().get(index).cloned()
    }

    /// Removes the first `k` packets. Only the mailbox worker loop calls
    /// this, and only after those packets have already been accepted by
    /// the conveyor (spec §4.H invariant: loss-free handoff).
    pub fn erase_prefix(&self, k: usize) {
        let mut queue = self.queue.lock().unwrap();
        for _ in 0..k {
            queue.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_append_and_erase() {
        let buf: SafeBuffer<u32> = SafeBuffer::new();
        buf.append(BufferPacket::new(1, 0));
        buf.append(BufferPacket::new(2, 1));
        buf.append(BufferPacket::new(3, 2));
        assert_eq!(buf.size(), 3);
        assert_eq!(buf.at(0).unwrap().data, 1);

        buf.erase_prefix(2);
        assert_eq!(buf.size(), 1);
        assert_eq!(buf.at(0).unwrap().data, 3);
    }

    #[test]
    fn done_sentinel_is_recognized() {
        let packet: BufferPacket<()> = BufferPacket::new((), DONE_RANK);
        assert!(packet.is_done());
    }
}
