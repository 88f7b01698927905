//! `RoomManager`: project→room map, idle-room reclamation, and the bus
//! dispatcher loop.
//!
//! Grounded in a `get_or_create_room` (read-lock-then-write-lock
//! double-check) and `cleanup_empty_rooms` shape, generalized so membership
//! bookkeeping also drives subscribe/unsubscribe via `PendingOperation`s
//! behind a single-slot semaphore.

use crate::client::Client;
use crate::pubsub::{InboundFrame, PendingOperation, PubSubChannel, WaitOutcome};
use crate::room::room::Room;
use crate::tracking::ClientTracking;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

/// Per-project subscribe/unsubscribe bookkeeping tracked alongside the
/// room itself.
struct RoomState {
    room: Arc<Room>,
    /// Set once the room is empty; cleared if a join arrives before
    /// reclamation completes.
    idle: bool,
    /// In-flight subscribe/unsubscribe, if any. Every subscribe/unsubscribe
    /// is wrapped in a `PendingOperation`.
    pending: Option<PendingOperation>,
}

/// Map of project → room, guarded by a single-slot semaphore: a separate
/// `RwLock` would work too, but the semaphore composes cleanly with the
/// `.await` points inside `Join`/`Leave` (subscribe/unsubscribe
/// confirmation).
pub struct RoomManager {
    rooms: tokio::sync::Mutex<HashMap<Uuid, RoomState>>,
    admission: Semaphore,
    pubsub: PubSubChannel,
    pub tracking: Arc<ClientTracking>,
    subscribe_timeout: Duration,
}

impl RoomManager {
    pub fn new(pubsub: PubSubChannel, tracking: Arc<ClientTracking>, subscribe_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            rooms: tokio::sync::Mutex::new(HashMap::new()),
            admission: Semaphore::new(1),
            pubsub,
            tracking,
            subscribe_timeout,
        })
    }

    /// Look up or create the room, append the client, and, if the room was
    /// previously empty or never subscribed, issue a subscribe and await
    /// it.
    pub async fn join(&self, client: Arc<Client>, project_id: Uuid, display_name: String) -> Arc<Room> {
        let permit = self.admission.acquire().await.expect("semaphore never closed");

        // Look up or create the room and decide whether a subscribe is
        // needed, without holding the map lock across the subscribe call
        // itself: the semaphore guards map mutations, not the bus round
        // trip.
        let (room, needs_subscribe) = {
            let mut rooms = self.rooms.lock().await;
            let needs_subscribe = match rooms.get(&project_id) {
                // A pending unsubscribe racing this join is effectively
                // replaced by this subscribe (cancel the pending unsubscribe
                // and replace it with a subscribe).
                Some(state) => !state.room.is_ready() && state.pending.is_none(),
                None => true,
            };
            let state = rooms.entry(project_id).or_insert_with(|| RoomState {
                room: Arc::new(Room::new(project_id)),
                idle: false,
                pending: None,
            });
            state.idle = false;
            (Arc::clone(&state.room), needs_subscribe)
        };

        let mut pending = if needs_subscribe {
            let op = self
                .pubsub
                .subscribe(vec![crate::pubsub::project_channel(&project_id)])
                .await;
            let mut rooms = self.rooms.lock().await;
            if let Some(state) = rooms.get_mut(&project_id) {
                state.pending = Some(op.clone());
            }
            Some(op)
        } else {
            let rooms = self.rooms.lock().await;
            rooms.get(&project_id).and_then(|s| s.pending.clone())
        };

        room.join(Arc::clone(&client), display_name);
        drop(permit);

        if let Some(op) = pending.as_mut() {
            if op.wait(self.subscribe_timeout).await == WaitOutcome::Succeeded {
                room.mark_ready();
            }
        } else {
            room.mark_ready();
        }

        let mut rooms = self.rooms.lock().await;
        if let Some(state) = rooms.get_mut(&project_id) {
            state.pending = None;
        }

        room
    }

    /// Mark the client removed; if the room becomes empty, mark it idle.
    /// Does NOT immediately unsubscribe.
    pub async fn leave(&self, client: &Client, project_id: Uuid) {
        let _permit = self.admission.acquire().await.expect("semaphore never closed");
        let mut rooms = self.rooms.lock().await;
        if let Some(state) = rooms.get_mut(&project_id) {
            state.room.leave(client);
            if state.room.is_empty() {
                state.idle = true;
            }
        }
    }

    /// Runs periodically; once the idle-room count crosses `threshold`,
    /// snapshot their ids, unsubscribe them in bulk, and await the result
    /// before allowing `cleanup`.
    pub async fn sweep_idle(self: &Arc<Self>, threshold: usize) {
        let idle_ids: Vec<Uuid> = {
            let rooms = self.rooms.lock().await;
            rooms
                .iter()
                .filter(|(_, state)| state.idle && state.pending.is_none())
                .map(|(id, _)| *id)
                .collect()
        };
        if idle_ids.len() < threshold {
            return;
        }

        let mut op = self.pubsub.unsubscribe_bulk(&idle_ids).await;
        {
            let mut rooms = self.rooms.lock().await;
            for id in &idle_ids {
                if let Some(state) = rooms.get_mut(id) {
                    state.pending = Some(op.clone());
                }
            }
        }

        let outcome = op.wait(self.subscribe_timeout).await;
        if outcome == WaitOutcome::Succeeded {
            for id in idle_ids {
                self.cleanup(id).await;
            }
        } else {
            let mut rooms = self.rooms.lock().await;
            for id in &idle_ids {
                if let Some(state) = rooms.get_mut(id) {
                    state.pending = None;
                }
            }
        }
    }

    /// Triggered once the bus confirms an unsubscribe. Re-verify emptiness
    /// under the admission lock before removing the room; a concurrent
    /// re-join wins.
    pub async fn cleanup(&self, project_id: Uuid) {
        let _permit = self.admission.acquire().await.expect("semaphore never closed");
        let mut rooms = self.rooms.lock().await;
        let still_empty = rooms.get(&project_id).map(|s| s.room.is_empty()).unwrap_or(false);
        if still_empty {
            rooms.remove(&project_id);
        } else if let Some(state) = rooms.get_mut(&project_id) {
            state.idle = false;
            state.pending = None;
        }
    }

    /// Drain each room's coalesced `roomChanges` buffer and flush it to
    /// presence. Called on the flush timer.
    pub async fn flush_room_changes(&self) {
        let snapshots: Vec<(Uuid, Arc<Room>)> = {
            let rooms = self.rooms.lock().await;
            rooms.iter().map(|(id, state)| (*id, Arc::clone(&state.room))).collect()
        };
        for (project_id, room) in snapshots {
            let changes = room.take_pending_room_changes();
            if changes.is_empty() {
                continue;
            }
            if let Err(err) = self.tracking.flush_room_changes(project_id, changes).await {
                tracing::warn!(%project_id, %err, "failed to flush room changes");
            }
        }
    }

    /// One project's room, if present (used by RPC handlers that already
    /// know the client is joined).
    pub async fn room_for(&self, project_id: Uuid) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(&project_id).map(|s| Arc::clone(&s.room))
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Consume pub/sub frames. A project-scoped frame routes to one room;
    /// a frame on the base channel (the "all" channel) broadcasts to every
    /// room, holding the admission semaphore so the room set is stable
    /// while it iterates.
    pub async fn run_dispatcher(self: Arc<Self>, mut frames: mpsc::UnboundedReceiver<InboundFrame>) {
        while let Some(frame) = frames.recv().await {
            if frame.channel == crate::pubsub::BASE_CHANNEL {
                self.dispatch_to_all(&frame).await;
                continue;
            }
            let Some(project_id) = Self::project_id_from_channel(&frame.channel) else {
                continue;
            };

            if crate::pubsub::EditorEvent::is_unsubscribe_signal(frame.payload.len()) {
                self.cleanup(project_id).await;
                continue;
            }

            let Ok(event) = serde_json::from_slice::<crate::pubsub::EditorEvent>(&frame.payload) else {
                tracing::warn!(%project_id, "malformed editor-events frame");
                continue;
            };

            if let Some(room) = self.room_for(project_id).await {
                room.handle_event(event);
            }
        }
    }

    async fn dispatch_to_all(&self, frame: &InboundFrame) {
        let _permit = self.admission.acquire().await.expect("semaphore never closed");
        if crate::pubsub::EditorEvent::is_unsubscribe_signal(frame.payload.len()) {
            return;
        }
        let Ok(event) = serde_json::from_slice::<crate::pubsub::EditorEvent>(&frame.payload) else {
            return;
        };
        let rooms = self.rooms.lock().await;
        for state in rooms.values() {
            state.room.handle_event(event.clone());
        }
    }

    fn project_id_from_channel(channel: &str) -> Option<Uuid> {
        let suffix = channel.strip_prefix(&format!("{}:", crate::pubsub::BASE_CHANNEL))?;
        Uuid::parse_str(suffix).ok()
    }
}
