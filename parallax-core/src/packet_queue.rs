//! # Packet Queue - Bounded FIFO in front of the decode thread
//!
//! ```text
//! ┌──────────┐  push  ┌─────────────┐  pop   ┌──────────────┐
//! │ Demuxer  │───────►│ PacketQueue │───────►│ Decode loop  │
//! │ adapter  │        │ (capacity)  │        │ (one thread) │
//! └──────────┘        └─────────────┘        └──────────────┘
//! ```
//!
//! A full queue rejects the packet and hands it back: the producer is
//! expected to retry later. Control markers are ordinary entries, so a
//! `Flush` only takes effect once everything queued before it is consumed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::packet::CompressedPacket;

/// Back-pressure signal; the rejected packet is returned to the caller.
#[derive(Debug, Error)]
#[error("packet queue is full")]
pub struct QueueFull(pub CompressedPacket);

pub struct PacketQueue {
    packets: Mutex<VecDeque<CompressedPacket>>,
    not_empty: Condvar,
    capacity: usize,
    /// Mirror of the deque length for lock-free reads.
    len: AtomicUsize,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            packets: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity,
            len: AtomicUsize::new(0),
        }
    }

    // ========================================================================
    // Producer API
    // ========================================================================

    /// Append a packet. Fails when the queue holds `capacity` packets.
    pub fn push(&self, packet: CompressedPacket) -> Result<(), QueueFull> {
        let mut queue = self.packets.lock();
        if queue.len() >= self.capacity {
            return Err(QueueFull(packet));
        }
        queue.push_back(packet);
        self.len.store(queue.len(), Ordering::Release);
        drop(queue);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append a control marker regardless of capacity.
    ///
    /// Control markers carry no payload and must never be lost to
    /// back-pressure (a dropped `Quit` would leave the thread running).
    pub fn push_control(&self, packet: CompressedPacket) {
        let mut queue = self.packets.lock();
        queue.push_back(packet);
        self.len.store(queue.len(), Ordering::Release);
        drop(queue);
        self.not_empty.notify_one();
    }

    // ========================================================================
    // Consumer API
    // ========================================================================

    /// Block until a packet is available.
    pub fn pop(&self) -> CompressedPacket {
        let mut queue = self.packets.lock();
        loop {
            if let Some(packet) = queue.pop_front() {
                self.len.store(queue.len(), Ordering::Release);
                return packet;
            }
            self.not_empty.wait(&mut queue);
        }
    }

    /// Wait at most `timeout` for a packet.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<CompressedPacket> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.packets.lock();
        loop {
            if let Some(packet) = queue.pop_front() {
                self.len.store(queue.len(), Ordering::Release);
                return Some(packet);
            }
            if self.not_empty.wait_until(&mut queue, deadline).timed_out() {
                let packet = queue.pop_front();
                self.len.store(queue.len(), Ordering::Release);
                return packet;
            }
        }
    }

    pub fn try_pop(&self) -> Option<CompressedPacket> {
        let mut queue = self.packets.lock();
        let packet = queue.pop_front();
        self.len.store(queue.len(), Ordering::Release);
        packet
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued packet.
    pub fn clear(&self) {
        let mut queue = self.packets.lock();
        queue.clear();
        self.len.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
