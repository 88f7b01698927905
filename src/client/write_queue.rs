//! Lock-free write-state word plus a bounded per-client ring buffer. The
//! 32-bit atomic word is partitioned into four 8-bit fields,
//! `closing | read-index | write-index | pending-writes`, so enqueue,
//! dequeue, and disconnect coordination never need a mutex on the hot path.
//! Slot *storage* still goes through a small per-slot `Mutex` (no `unsafe`);
//! contention is negligible because the atomic word already serializes
//! which slot any given call is allowed to touch.

use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

const CAPACITY: usize = 64;
const LSR_CAP: usize = 15;

const CLOSING_SHIFT: u32 = 24;
const READ_SHIFT: u32 = 16;
const WRITE_SHIFT: u32 = 8;

pub const CLOSING_OPEN: u8 = 0;
pub const CLOSING_AFTER_FLUSH: u8 = 1;
pub const CLOSING_FORCED: u8 = 2;

fn pack(closing: u8, read: u8, write: u8, pending: u8) -> u32 {
    (closing as u32) << CLOSING_SHIFT
        | (read as u32) << READ_SHIFT
        | (write as u32) << WRITE_SHIFT
        | pending as u32
}

fn unpack(word: u32) -> (u8, u8, u8, u8) {
    (
        (word >> CLOSING_SHIFT) as u8,
        (word >> READ_SHIFT) as u8,
        (word >> WRITE_SHIFT) as u8,
        word as u8,
    )
}

#[derive(Debug, Clone)]
pub struct ErrorObject {
    pub message: String,
    pub code: Option<String>,
}

/// A queued RPC response, pre-coalescing. This is the shape `realtime::rpc`
/// builds; `write_queue` only needs enough of it to decide whether it's a
/// lazy-success candidate.
#[derive(Debug, Clone)]
pub struct ResponseEntry {
    pub callback_id: Option<u64>,
    pub body: Option<Value>,
    pub error: Option<ErrorObject>,
    pub event_name: Option<String>,
    pub latency_ms: Option<String>,
    pub processed_by: Option<String>,
    /// Set when this response must close the socket once it's been written
    /// (fatal paths such as `BodyTooLargeError`/`OTConsistencyError`).
    pub close_after: bool,
}

impl ResponseEntry {
    /// A "success-only" response: nothing but a callback correlation and
    /// latency to report, no body, error, or event name to deliver.
    fn is_lazy_success_candidate(&self) -> bool {
        !self.close_after
            && self.body.is_none()
            && self.error.is_none()
            && self.event_name.is_none()
            && self.callback_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LazySuccess {
    pub callback_id: u64,
    pub latency_ms: Option<String>,
}

#[derive(Debug, Clone)]
pub enum WriteEntry {
    /// Pre-serialized bulk message shared by every client in a broadcast
    /// fan-out (serialized once per room, reused for every eligible client).
    Broadcast(Arc<str>),
    Response(ResponseEntry),
}

/// A resolved frame ready for the transport to serialize and write. Lazy
/// success responses accumulated since the last non-lazy frame are threaded
/// through so the wire encoder can attach them as `s`.
#[derive(Debug, Clone)]
pub enum ResolvedFrame {
    Prepared(Arc<str>),
    Response(ResponseEntry, Vec<LazySuccess>),
}

pub enum EnqueueOutcome {
    Enqueued { should_schedule: bool },
    OutOfSync,
    QueueFull,
}

pub enum DrainStep {
    Frame(ResolvedFrame),
    /// Nothing left to read right now.
    Empty,
}

/// What the writer should do once a `drain` loop runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterDrain {
    /// Stay open; more writes may arrive later.
    Idle,
    /// `TriggerDisconnect` was raised and the queue is now empty: close.
    CloseAfterFlush,
    /// `ForceDisconnect` was raised: close immediately regardless of queue
    /// contents (remaining entries are simply dropped by the caller).
    ForceClosed,
}

pub struct WriteQueue {
    state: AtomicU32,
    slots: Vec<Mutex<Option<WriteEntry>>>,
    lsr: Mutex<Vec<LazySuccess>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(CAPACITY);
        slots.resize_with(CAPACITY, || Mutex::new(None));
        Self {
            state: AtomicU32::new(pack(CLOSING_OPEN, 0, 0, 0)),
            slots,
            lsr: Mutex::new(Vec::with_capacity(LSR_CAP)),
        }
    }

    /// Enqueue `entry`. Returns whether the caller should enqueue this
    /// client on the shared `scheduleChannel` to wake a writer.
    pub fn ensure_queue_message(&self, entry: WriteEntry) -> EnqueueOutcome {
        let mut claimed_slot: Option<u8> = None;
        let mut was_closing = false;
        let mut was_full = false;
        let result = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
            let (closing, r, w, pending) = unpack(word);
            claimed_slot = None;
            if closing > CLOSING_OPEN {
                was_closing = true;
                return None;
            }
            was_closing = false;
            let occupied = w.wrapping_sub(r);
            if occupied as usize >= CAPACITY {
                was_full = true;
                return None;
            }
            was_full = false;
            claimed_slot = Some(w);
            Some(pack(closing, r, w.wrapping_add(1), pending.wrapping_add(1)))
        });

        if result.is_err() {
            if was_closing {
                return EnqueueOutcome::OutOfSync;
            }
            if was_full {
                self.force_disconnect();
                return EnqueueOutcome::QueueFull;
            }
            unreachable!("fetch_update failed without setting a reason");
        }

        let slot = claimed_slot.expect("fetch_update succeeded without claiming a slot");
        let (_, r_before, w_before, _) = unpack(result.unwrap());
        let was_empty = r_before == w_before;

        *self.slots[slot as usize % CAPACITY].lock().unwrap() = Some(entry);

        // Writing the payload is done; release the pending-writes credit we
        // took out above so a concurrent pop sees a consistent queue.
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (closing, r, w, pending) = unpack(word);
                Some(pack(closing, r, w, pending.saturating_sub(1)))
            })
            .ok();

        EnqueueOutcome::Enqueued {
            should_schedule: was_empty,
        }
    }

    /// Fast path for `TryWriteResponseOrQueue`: the caller should attempt an
    /// inline write when this returns `true` (ring empty, nothing pending);
    /// otherwise fall through to `ensure_queue_message`.
    pub fn is_idle(&self) -> bool {
        let (_, r, w, pending) = unpack(self.state.load(Ordering::Acquire));
        r == w && pending == 0
    }

    /// Pop one entry, resolving it against the lazy-success buffer. Returns
    /// `DrainStep::Empty` once the ring is caught up.
    pub fn pop(&self) -> DrainStep {
        let mut claimed: Option<u8> = None;
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (closing, r, w, pending) = unpack(word);
                if r == w {
                    claimed = None;
                    return None;
                }
                claimed = Some(r);
                Some(pack(closing, r.wrapping_add(1), w, pending))
            })
            .ok();

        let Some(r) = claimed else {
            return DrainStep::Empty;
        };

        let entry = self.slots[r as usize % CAPACITY]
            .lock()
            .unwrap()
            .take()
            .expect("slot claimed by read index must hold an entry");

        match entry {
            WriteEntry::Broadcast(text) => DrainStep::Frame(ResolvedFrame::Prepared(text)),
            WriteEntry::Response(resp) => {
                if resp.is_lazy_success_candidate() {
                    let mut lsr = self.lsr.lock().unwrap();
                    if lsr.len() < LSR_CAP {
                        lsr.push(LazySuccess {
                            callback_id: resp.callback_id.unwrap(),
                            latency_ms: resp.latency_ms.clone(),
                        });
                        drop(lsr);
                        // Coalesced away; caller should keep draining.
                        return self.pop();
                    }
                    drop(lsr);
                    // Buffer is full: flush it as a non-lazy frame now.
                    let pending = self.take_lazy_successes();
                    DrainStep::Frame(ResolvedFrame::Response(resp, pending))
                } else {
                    let pending = self.take_lazy_successes();
                    DrainStep::Frame(ResolvedFrame::Response(resp, pending))
                }
            }
        }
    }

    fn take_lazy_successes(&self) -> Vec<LazySuccess> {
        std::mem::take(&mut *self.lsr.lock().unwrap())
    }

    /// Whether the queue is caught up and should close per the current
    /// closing level.
    pub fn after_drain(&self) -> AfterDrain {
        let (closing, r, w, _) = unpack(self.state.load(Ordering::Acquire));
        match closing {
            CLOSING_FORCED => AfterDrain::ForceClosed,
            CLOSING_AFTER_FLUSH if r == w => AfterDrain::CloseAfterFlush,
            _ => AfterDrain::Idle,
        }
    }

    /// Sets `closing = disconnectAfterFlush`. Returns `true` if the caller
    /// must schedule a drain (the queue was idle at the moment of the
    /// raise, so nothing else will wake a writer).
    pub fn trigger_disconnect(&self) -> bool {
        self.raise_closing(CLOSING_AFTER_FLUSH)
    }

    /// Sets `closing = forceDisconnected`.
    pub fn force_disconnect(&self) -> bool {
        self.raise_closing(CLOSING_FORCED)
    }

    fn raise_closing(&self, level: u8) -> bool {
        let mut should_schedule = false;
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (closing, r, w, pending) = unpack(word);
                if closing >= level {
                    should_schedule = false;
                    return None;
                }
                should_schedule = r == w;
                Some(pack(level, r, w, pending))
            })
            .ok();
        should_schedule
    }

    pub fn is_closing(&self) -> bool {
        let (closing, ..) = unpack(self.state.load(Ordering::Acquire));
        closing > CLOSING_OPEN
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast(text: &str) -> WriteEntry {
        WriteEntry::Broadcast(Arc::from(text))
    }

    fn lazy_success(callback_id: u64) -> WriteEntry {
        WriteEntry::Response(ResponseEntry {
            callback_id: Some(callback_id),
            body: None,
            error: None,
            event_name: None,
            latency_ms: Some("1".into()),
            processed_by: None,
            close_after: false,
        })
    }

    #[test]
    fn fifo_order_preserved() {
        let q = WriteQueue::new();
        q.ensure_queue_message(broadcast("a"));
        q.ensure_queue_message(broadcast("b"));
        let first = match q.pop() {
            DrainStep::Frame(ResolvedFrame::Prepared(s)) => s,
            _ => panic!("expected a frame"),
        };
        assert_eq!(&*first, "a");
        let second = match q.pop() {
            DrainStep::Frame(ResolvedFrame::Prepared(s)) => s,
            _ => panic!("expected a frame"),
        };
        assert_eq!(&*second, "b");
        assert!(matches!(q.pop(), DrainStep::Empty));
    }

    #[test]
    fn first_enqueue_on_empty_queue_requests_schedule() {
        let q = WriteQueue::new();
        match q.ensure_queue_message(broadcast("x")) {
            EnqueueOutcome::Enqueued { should_schedule } => assert!(should_schedule),
            _ => panic!("expected Enqueued"),
        }
        match q.ensure_queue_message(broadcast("y")) {
            EnqueueOutcome::Enqueued { should_schedule } => assert!(!should_schedule),
            _ => panic!("expected Enqueued"),
        }
    }

    #[test]
    fn lazy_successes_coalesce_until_a_non_lazy_frame() {
        let q = WriteQueue::new();
        q.ensure_queue_message(lazy_success(1));
        q.ensure_queue_message(lazy_success(2));
        q.ensure_queue_message(broadcast("flush-me"));

        match q.pop() {
            DrainStep::Frame(ResolvedFrame::Prepared(s)) => assert_eq!(&*s, "flush-me"),
            DrainStep::Empty => panic!("expected the broadcast frame to absorb lsr"),
        }
    }

    #[test]
    fn ring_full_forces_disconnect() {
        let q = WriteQueue::new();
        for i in 0..CAPACITY {
            assert!(
                matches!(
                    q.ensure_queue_message(broadcast("x")),
                    EnqueueOutcome::Enqueued { .. }
                ),
                "unexpected outcome at {i}"
            );
        }
        match q.ensure_queue_message(broadcast("overflow")) {
            EnqueueOutcome::QueueFull => {}
            _ => panic!("expected QueueFull"),
        }
        assert!(q.is_closing());
    }

    #[test]
    fn trigger_disconnect_then_force_disconnect_is_monotonic() {
        let q = WriteQueue::new();
        assert!(q.trigger_disconnect());
        // Raising to the same or a lower level again must not reset state.
        assert!(!q.trigger_disconnect());
        assert_eq!(q.after_drain(), AfterDrain::CloseAfterFlush);
        // Still r == w (nothing was ever enqueued), so raising to ForceClosed
        // requests a schedule too. A redundant wake of an already-scheduled
        // writer is harmless, but a raise with no writer ever scheduled must
        // not be silently dropped.
        assert!(q.force_disconnect());
        assert_eq!(q.after_drain(), AfterDrain::ForceClosed);
    }

    #[test]
    fn out_of_sync_after_closing() {
        let q = WriteQueue::new();
        q.force_disconnect();
        match q.ensure_queue_message(broadcast("too-late")) {
            EnqueueOutcome::OutOfSync => {}
            _ => panic!("expected OutOfSync"),
        }
    }
}
