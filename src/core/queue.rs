use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Notify;

use super::payload::OutboundFrame;
use super::types::{GatewayError, GatewayResult};

/// Ordering policy for the outbound queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Strict insertion order.
    #[default]
    Fifo,
    /// Earliest deadline first; entries without a deadline rank last and
    /// ties fall back to insertion order, so nothing is starved by peers
    /// of equal urgency.
    Deadline,
}

struct DeadlineEntry {
    frame: OutboundFrame,
    deadline: Option<Instant>,
    ticket: u64,
}

impl PartialEq for DeadlineEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ticket == other.ticket
    }
}

impl Eq for DeadlineEntry {}

impl Ord for DeadlineEntry {
    // BinaryHeap is a max-heap: "greater" means popped first. An earlier
    // deadline beats a later one, any deadline beats none, and a lower
    // ticket (earlier insertion) breaks ties.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.deadline, other.deadline) {
            (Some(lhs), Some(rhs)) => rhs
                .cmp(&lhs)
                .then_with(|| other.ticket.cmp(&self.ticket)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => other.ticket.cmp(&self.ticket),
        }
    }
}

impl PartialOrd for DeadlineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum Backing {
    Fifo(VecDeque<OutboundFrame>),
    Deadline(BinaryHeap<DeadlineEntry>),
}

impl Backing {
    fn push(&mut self, frame: OutboundFrame, deadline: Option<Instant>, ticket: u64) {
        match self {
            Self::Fifo(items) => items.push_back(frame),
            Self::Deadline(heap) => heap.push(DeadlineEntry {
                frame,
                deadline,
                ticket,
            }),
        }
    }

    fn take(&mut self) -> Option<OutboundFrame> {
        match self {
            Self::Fifo(items) => items.pop_front(),
            Self::Deadline(heap) => heap.pop().map(|entry| entry.frame),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Fifo(items) => items.len(),
            Self::Deadline(heap) => heap.len(),
        }
    }
}

struct QueueState {
    backing: Backing,
    closed: bool,
    next_ticket: u64,
}

/// Multi-producer, single-consumer queue of pending outbound frames.
///
/// The sole synchronization point between frame producers (lifecycle
/// controller, heartbeat timer, consumer API) and the single writer.
/// `push` never blocks; `pop` parks until a frame or closure arrives.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        let backing = match policy {
            QueuePolicy::Fifo => Backing::Fifo(VecDeque::new()),
            QueuePolicy::Deadline => Backing::Deadline(BinaryHeap::new()),
        };
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    backing,
                    closed: false,
                    next_ticket: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue a frame and wake the writer. Fails once the queue is closed.
    pub fn push(&self, frame: OutboundFrame) -> GatewayResult<()> {
        self.push_with_deadline(frame, None)
    }

    /// Enqueue a frame with an optional send deadline (only meaningful
    /// under [`QueuePolicy::Deadline`]).
    pub fn push_with_deadline(
        &self,
        frame: OutboundFrame,
        deadline: Option<Instant>,
    ) -> GatewayResult<()> {
        {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            if state.closed {
                return Err(GatewayError::QueueClosed);
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.backing.push(frame, deadline, ticket);
        }
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Dequeue the next frame, waiting if the queue is empty.
    ///
    /// Returns `None` once the queue has been closed *and* drained, so the
    /// writer flushes everything that was accepted before shutdown.
    /// Single-consumer: only the writer task may call this.
    pub async fn pop(&self) -> Option<OutboundFrame> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock().expect("queue lock poisoned");
                if let Some(frame) = state.backing.take() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue: wake all waiters, reject further pushes.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            state.closed = true;
        }
        self.inner.notify.notify_waiters();
        // A stored `notify_one` permit may have been consumed by a popper
        // racing the close; wake it again so it observes `closed`.
        self.inner.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().expect("queue lock poisoned").backing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
