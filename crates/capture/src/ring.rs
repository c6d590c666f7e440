//! Fixed-capacity frame ring between the reader and the decoder
//!
//! Capture must never block the interface read: when the ring is full the
//! oldest undecoded frame is evicted and counted. The decoder side blocks
//! on a condvar until a frame arrives or the ring is closed.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct FrameRing {
    frames: Mutex<VecDeque<Vec<u8>>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Push a frame, evicting the oldest one when full. Never blocks.
    pub fn push(&self, frame: Vec<u8>) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            frames.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        frames.push_back(frame);
        drop(frames);
        self.available.notify_one();
    }

    /// Pop the oldest frame, blocking until one arrives. `None` once the
    /// ring is closed and drained.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let mut frames = self.frames.lock();
        loop {
            if let Some(frame) = frames.pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.available.wait(&mut frames);
        }
    }

    /// Close the producer side. The decoder drains what remains.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_all();
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn drop_oldest_accounting() {
        let ring = FrameRing::new(4);
        for i in 0u8..10 {
            ring.push(vec![i]);
        }
        assert_eq!(ring.dropped(), 6);
        assert_eq!(ring.len(), 4);

        ring.close();
        let mut popped = Vec::new();
        while let Some(frame) = ring.pop() {
            popped.push(frame[0]);
        }
        // Oldest evicted first: the survivors are the last four pushed.
        assert_eq!(popped, vec![6, 7, 8, 9]);
        // emitted + dropped == total pushed
        assert_eq!(popped.len() as u64 + ring.dropped(), 10);
    }

    #[test]
    fn pop_blocks_until_push() {
        let ring = Arc::new(FrameRing::new(8));
        let producer = ring.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            producer.push(vec![42]);
            producer.close();
        });
        assert_eq!(ring.pop(), Some(vec![42]));
        assert_eq!(ring.pop(), None);
        handle.join().unwrap();
    }

    #[test]
    fn close_unblocks_empty_pop() {
        let ring = Arc::new(FrameRing::new(8));
        let closer = ring.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            closer.close();
        });
        assert_eq!(ring.pop(), None);
        handle.join().unwrap();
    }
}
