//! Per-project room: clients snapshot, pub/sub frame dispatch, OT update
//! fan-out, and the coalescing `roomChanges` buffer flushed on a short
//! timer.
//!
//! Grounded in a broadcast/membership shape generalized from a
//! `HashMap`-backed room to the lock-free snapshot model, plus the lock
//! ordering discipline for join/leave/cleanup.

use crate::client::{capability, Client, ResponseEntry, ScheduleOnQueue, WriteEntry};
use crate::ot::Op;
use crate::pubsub::EditorEvent;
use crate::room::clients_snapshot::{ClientsSnapshot, ClientsSnapshotSlot};
use crate::tracking::RoomChange;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// An applied document update as seen by clients other than the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedDocumentUpdate {
    #[serde(rename = "docId")]
    pub doc_id: Uuid,
    pub source: crate::client::PublicId,
    #[serde(rename = "type")]
    pub update_type: Option<String>,
    pub op: Op,
    pub version: u64,
}

/// The embedded payload of an `otUpdateApplied` bus message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUpdateMeta {
    pub source: crate::client::PublicId,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub timestamp: i64,
    #[serde(rename = "ingestionTime", skip_serializing_if = "Option::is_none")]
    pub ingestion_time: Option<i64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub update_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUpdate {
    #[serde(rename = "docId")]
    pub doc_id: Uuid,
    pub version: u64,
    pub op: Op,
    pub meta: DocumentUpdateMeta,
    #[serde(default)]
    pub dup: bool,
}

/// Message tags that only require `CanSeeNonRestrictedEvents` rather than
/// `CanSeeAllEditorEvents`.
fn required_capability(tag: &str) -> u16 {
    const NON_RESTRICTED_PREFIXES: &[&str] = &[
        "file-tree", "project:", "auth", "system",
    ];
    if NON_RESTRICTED_PREFIXES.iter().any(|p| tag.starts_with(p)) {
        capability::CAN_SEE_NON_RESTRICTED_EVENTS
    } else {
        capability::CAN_SEE_ALL_EDITOR_EVENTS
    }
}

/// Per-project room.
pub struct Room {
    pub project_id: Uuid,
    clients: ClientsSnapshotSlot,
    /// Set once the room's subscribe has been confirmed.
    ready: AtomicBool,
    /// Coalesced join/leave deltas since the last flush tick, in arrival
    /// order.
    pending_room_changes: Mutex<Vec<RoomChange>>,
}

impl Room {
    pub fn new(project_id: Uuid) -> Self {
        Self {
            project_id,
            clients: ClientsSnapshotSlot::new(),
            ready: AtomicBool::new(false),
            pending_room_changes: Mutex::new(Vec::new()),
        }
    }

    pub fn clients(&self) -> Arc<ClientsSnapshot> {
        self.clients.load()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn join(&self, client: Arc<Client>, display_name: String) {
        self.pending_room_changes.lock().unwrap().push(RoomChange {
            public_id: client.public_id.clone(),
            display_name,
            is_join: true,
        });
        self.clients.join(client);
    }

    pub fn leave(&self, client: &Client) {
        self.pending_room_changes.lock().unwrap().push(RoomChange {
            public_id: client.public_id.clone(),
            display_name: String::new(),
            is_join: false,
        });
        self.clients.leave(&client.public_id);
    }

    pub fn is_empty(&self) -> bool {
        self.clients.load().is_empty()
    }

    /// Drain the coalesced room-change buffer for a flush tick. Called by
    /// the room manager's flush timer.
    pub fn take_pending_room_changes(&self) -> Vec<RoomChange> {
        std::mem::take(&mut *self.pending_room_changes.lock().unwrap())
    }

    /// Dispatch one inbound bus frame.
    pub fn handle_event(&self, event: EditorEvent) {
        match event.message.as_str() {
            "otUpdateApplied" => self.handle_ot_update_applied(event),
            "project:publicAccessLevel:changed" => {
                if let Some(level) = event.payload.get("newAccessLevel").and_then(|v| v.as_str()) {
                    if level == "private" {
                        self.force_disconnect_clients_without(capability::CAN_SEE_OTHER_CLIENTS);
                    }
                }
                self.broadcast(event);
            }
            "project:membership:changed" => {
                if let Some(user_id) = event
                    .payload
                    .get("userId")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                {
                    for client in self.clients.load().iter() {
                        if client.user_id() == user_id {
                            client.trigger_disconnect_shared();
                        }
                    }
                }
                self.broadcast(event);
            }
            _ => self.broadcast(event),
        }
    }

    fn force_disconnect_clients_without(&self, required: u16) {
        for client in self.clients.load().iter() {
            if !client.has_capability(required) {
                client.force_disconnect_shared();
            }
        }
    }

    /// Generic broadcast: skip the source, filter by required capability,
    /// serialize once, reuse for every eligible client.
    fn broadcast(&self, event: EditorEvent) {
        let required = required_capability(&event.message);
        let snapshot = self.clients.load();

        let frame = ResponseEntry {
            callback_id: None,
            body: Some(event.payload.clone()),
            error: None,
            event_name: Some(event.message.clone()),
            latency_ms: None,
            processed_by: Some(event.processed_by.clone()),
            close_after: false,
        };
        let prepared: Arc<str> = Arc::from(crate::realtime::rpc::encode_broadcast(&frame));

        for client in snapshot.iter() {
            if Some(&client.public_id) == event.source.as_ref() {
                continue;
            }
            if !client.has_capability(required) {
                continue;
            }
            client.enqueue_shared(WriteEntry::Broadcast(Arc::clone(&prepared)));
        }
    }

    fn handle_ot_update_applied(&self, event: EditorEvent) {
        let Ok(update) = serde_json::from_value::<DocumentUpdate>(event.payload.clone()) else {
            tracing::warn!(project_id = %self.project_id, "malformed otUpdateApplied payload");
            return;
        };
        let ingestion_latency_ms = update.meta.ingestion_time.map(|t| {
            let now = chrono::Utc::now().timestamp_millis();
            (now - t).max(0)
        });

        let snapshot = self.clients.load();
        for client in snapshot.iter() {
            if client.public_id == update.meta.source {
                let ack = ResponseEntry {
                    callback_id: None,
                    body: Some(serde_json::json!({
                        "docId": update.doc_id,
                        "version": update.version,
                    })),
                    error: None,
                    event_name: None,
                    latency_ms: ingestion_latency_ms.map(|ms| ms.to_string()),
                    processed_by: Some(event.processed_by.clone()),
                    close_after: false,
                };
                client.enqueue_shared(WriteEntry::Response(ack));
                continue;
            }
            if update.dup {
                continue;
            }
            if !client.is_joined_to(update.doc_id) {
                continue;
            }
            let applied = AppliedDocumentUpdate {
                doc_id: update.doc_id,
                source: update.meta.source.clone(),
                update_type: update.meta.update_type.clone(),
                op: update.op.clone(),
                version: update.version,
            };
            let body = serde_json::to_value(&applied).expect("AppliedDocumentUpdate always serializes");
            let frame = ResponseEntry {
                callback_id: None,
                body: Some(body),
                error: None,
                event_name: Some("otUpdateApplied".into()),
                latency_ms: None,
                processed_by: Some(event.processed_by.clone()),
                close_after: false,
            };
            client.enqueue_shared(WriteEntry::Response(frame));
        }
    }
}

/// Inbound-frame dispatcher channel a room listens on (one per room,
/// populated by the room manager's bus fan-out loop).
pub type RoomInbox = mpsc::UnboundedReceiver<EditorEvent>;
