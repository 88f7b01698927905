use super::capability::Capability;
use super::public_id::PublicId;
use super::write_queue::{EnqueueOutcome, WriteEntry, WriteQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Sentinel for "not joined to any doc" (`joinedDocId`'s zero value).
/// `Uuid::nil()` is the all-zero UUID.
pub fn no_doc() -> Uuid {
    Uuid::nil()
}

/// What a drained, resolved frame ultimately becomes on the wire. The `ws`
/// transport owns the actual socket and just forwards `Text`/`Pong`
/// payloads and honors `Close`; this type lives here (not in `ws`) because
/// it's the write path's own vocabulary for "what happens next to this
/// connection", not a WebSocket framing detail. `Pong` rides the same
/// channel as queued responses so a single task still owns every write to
/// the socket (at most one writer task at a time per client).
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Text(Arc<str>),
    Pong(Vec<u8>),
    Close,
}

/// One WebSocket connection's server-side state. Created at upgrade, filled
/// in by bootstrap, torn down on disconnect.
pub struct Client {
    pub public_id: PublicId,
    project_id: std::sync::Mutex<Uuid>,
    user_id: std::sync::Mutex<Uuid>,
    pub display_name: std::sync::Mutex<String>,
    capabilities: std::sync::Mutex<Capability>,
    /// A UUID doesn't fit an atomic word, so `joinedDocId` is a
    /// mutex-guarded `Uuid`, guarded the same way `project_id`/`user_id`
    /// are: writes are rare (once per `joinDoc`/`leaveDoc`), reads are on
    /// every `applyUpdate`.
    joined_doc_id: std::sync::Mutex<Uuid>,
    pub write_queue: WriteQueue,
    /// Monotonically increasing generation, bumped every time `joinedDocId`
    /// changes, so a concurrent OT fan-out task can detect a join/leave
    /// race without holding the mutex across the fan-out.
    doc_generation: AtomicU64,
    /// Shared handle into the writer worker pool: pushing `self` here means
    /// "please drain my queue" (the `scheduleChannel`).
    schedule: async_channel::Sender<Arc<Client>>,
    /// The one connection-owning task that actually holds the socket reads
    /// resolved frames off here and writes them out in order (at most one
    /// writer task at a time per client).
    outbound: tokio::sync::mpsc::UnboundedSender<OutboundFrame>,
}

impl Client {
    pub fn new(
        schedule: async_channel::Sender<Arc<Client>>,
        outbound: tokio::sync::mpsc::UnboundedSender<OutboundFrame>,
    ) -> Self {
        Self {
            public_id: PublicId::generate(),
            project_id: std::sync::Mutex::new(Uuid::nil()),
            user_id: std::sync::Mutex::new(Uuid::nil()),
            display_name: std::sync::Mutex::new(String::new()),
            capabilities: std::sync::Mutex::new(Capability::NONE),
            joined_doc_id: std::sync::Mutex::new(Uuid::nil()),
            write_queue: WriteQueue::new(),
            doc_generation: AtomicU64::new(0),
            schedule,
            outbound,
        }
    }

    /// Hand a resolved frame to the connection's own writer task. A `Close`
    /// is sent once the write queue reports `CloseAfterFlush`/`ForceClosed`
    /// and nothing remains to drain.
    pub fn send_outbound(&self, frame: OutboundFrame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    pub fn project_id(&self) -> Uuid {
        *self.project_id.lock().unwrap()
    }

    pub fn user_id(&self) -> Uuid {
        *self.user_id.lock().unwrap()
    }

    pub fn set_identity(&self, project_id: Uuid, user_id: Uuid, display_name: String, capabilities: Capability) {
        *self.project_id.lock().unwrap() = project_id;
        *self.user_id.lock().unwrap() = user_id;
        *self.display_name.lock().unwrap() = display_name;
        *self.capabilities.lock().unwrap() = capabilities;
    }

    pub fn capabilities(&self) -> Capability {
        *self.capabilities.lock().unwrap()
    }

    pub fn has_capability(&self, prime: u16) -> bool {
        self.capabilities().includes(prime)
    }

    /// Capability values only ever shrink post-bootstrap; there is no
    /// corresponding "grant" method.
    pub fn take_away_capability(&self, prime: u16) {
        self.capabilities.lock().unwrap().take_away(prime);
    }

    pub fn joined_doc_id(&self) -> Uuid {
        *self.joined_doc_id.lock().unwrap()
    }

    pub fn is_joined_to(&self, doc_id: Uuid) -> bool {
        self.joined_doc_id() == doc_id
    }

    pub fn set_joined_doc_id(&self, doc_id: Uuid) {
        *self.joined_doc_id.lock().unwrap() = doc_id;
        self.doc_generation.fetch_add(1, Ordering::Release);
    }

    pub fn leave_doc(&self) {
        self.set_joined_doc_id(Uuid::nil());
    }

    /// Raise the write queue's closing level and, if the queue was idle at
    /// that moment, wake a writer so the close actually happens (nothing
    /// else will schedule one).
    pub fn trigger_disconnect_shared(self: &Arc<Self>) {
        if self.write_queue.trigger_disconnect() {
            let _ = self.schedule.try_send(Arc::clone(self));
        }
    }

    pub fn force_disconnect_shared(self: &Arc<Self>) {
        if self.write_queue.force_disconnect() {
            let _ = self.schedule.try_send(Arc::clone(self));
        }
    }
}

/// Arc-level helpers that need a real `Arc<Client>` to hand to the
/// scheduleChannel. The caller checks `write_queue.is_idle()` and, if true,
/// writes inline via the transport; otherwise falls through to
/// `enqueue_shared`.
pub trait ScheduleOnQueue {
    fn enqueue_shared(&self, entry: WriteEntry) -> EnqueueOutcome;
}

impl ScheduleOnQueue for Arc<Client> {
    fn enqueue_shared(&self, entry: WriteEntry) -> EnqueueOutcome {
        let outcome = self.write_queue.ensure_queue_message(entry);
        if let EnqueueOutcome::Enqueued { should_schedule: true } = outcome {
            let _ = self.schedule.try_send(Arc::clone(self));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::capability::{CAN_EDIT_CONTENT, CAN_SEE_OTHER_CLIENTS};

    fn test_client() -> Arc<Client> {
        let (tx, _rx) = async_channel::unbounded();
        let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Client::new(tx, outbound_tx))
    }

    #[test]
    fn starts_unjoined() {
        let client = test_client();
        assert_eq!(client.joined_doc_id(), Uuid::nil());
        assert!(client.is_joined_to(Uuid::nil()));
    }

    #[test]
    fn capabilities_only_shrink() {
        let client = test_client();
        client.set_identity(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Ada".into(),
            Capability::from_primes(&[CAN_EDIT_CONTENT, CAN_SEE_OTHER_CLIENTS]),
        );
        assert!(client.has_capability(CAN_EDIT_CONTENT));
        client.take_away_capability(CAN_EDIT_CONTENT);
        assert!(!client.has_capability(CAN_EDIT_CONTENT));
        assert!(client.has_capability(CAN_SEE_OTHER_CLIENTS));
    }

    #[test]
    fn joining_a_doc_is_observable() {
        let client = test_client();
        let doc = Uuid::new_v4();
        client.set_joined_doc_id(doc);
        assert!(client.is_joined_to(doc));
        client.leave_doc();
        assert!(client.is_joined_to(Uuid::nil()));
    }

    #[test]
    fn enqueue_schedules_exactly_once_while_idle() {
        let (tx, rx) = async_channel::unbounded();
        let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let client = Arc::new(Client::new(tx, outbound_tx));
        client.enqueue_shared(WriteEntry::Broadcast(Arc::from("a")));
        client.enqueue_shared(WriteEntry::Broadcast(Arc::from("b")));
        assert_eq!(rx.len(), 1);
    }
}
