use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::pool::SharedBuffer;

/// What a full queue does with an incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// A key frame evicts everything queued and is admitted; other frames are dropped.
    KeyFrameFlush,
    /// The oldest queued frame is evicted to make room.
    DropOldest,
}

/// A frame waiting in a client queue.
#[derive(Debug)]
pub struct QueuedFrame {
    pub buffer: SharedBuffer,
    pub timestamp_us: u64,
    pub key_frame: bool,
}

/// Outcome of [`FrameQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Admitted after evicting `evicted` older frames.
    Queued { evicted: usize },
    /// Not admitted; the frame has been dropped.
    Rejected,
}

/// Bounded per-client frame queue. Producers never wait.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<QueuedFrame>>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
    closed: AtomicBool,
}

impl FrameQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, frame: QueuedFrame) -> Push {
        if self.is_closed() {
            return Push::Rejected;
        }
        let evicted = {
            let mut frames = self.frames.lock();
            let mut evicted = 0;
            if frames.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::KeyFrameFlush if frame.key_frame => {
                        evicted = frames.len();
                        frames.clear();
                    }
                    OverflowPolicy::KeyFrameFlush => return Push::Rejected,
                    OverflowPolicy::DropOldest => {
                        frames.pop_front();
                        evicted = 1;
                    }
                }
            }
            frames.push_back(frame);
            evicted
        };
        self.notify.notify_one();
        Push::Queued { evicted }
    }

    /// Wait for the next frame. `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<QueuedFrame> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.frames.lock().pop_front() {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting frames and wake any waiting consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop every queued frame. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueuedFrame> = self.frames.lock().drain(..).collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
