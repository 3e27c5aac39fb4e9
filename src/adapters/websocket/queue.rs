//! Bounded per-connection outbound queue.
//!
//! Enqueueing never blocks. When the queue is full the overflow policy
//! decides: drop the oldest queued frame, or refuse the frame so the hub
//! disconnects the slow client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest frame.
    DroppedOldest,
    /// Full under the `Disconnect` policy; the client should be closed.
    Overflow,
    Closed,
}

pub struct OutboundQueue {
    frames: Mutex<VecDeque<String>>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, frame: String) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            if frames.len() < self.capacity {
                frames.push_back(frame);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        frames.pop_front();
                        frames.push_back(frame);
                        PushOutcome::DroppedOldest
                    }
                    OverflowPolicy::Disconnect => PushOutcome::Overflow,
                }
            }
        };

        match outcome {
            PushOutcome::Queued => self.notify.notify_one(),
            PushOutcome::DroppedOldest => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
            }
            _ => {}
        }
        outcome
    }

    /// Waits for frames and takes up to `max` of them in enqueue order.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv_batch(&self, max: usize) -> Option<Vec<String>> {
        loop {
            {
                let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
                if !frames.is_empty() {
                    let take = frames.len().min(max.max(1));
                    return Some(frames.drain(..take).collect());
                }
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames evicted by the drop-oldest policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
