//! Per-connection lifecycle orchestration: bootstrap, RPC dispatch, and
//! disconnect. Dispatch is a `match` over the `action` string, generalized
//! from a fixed match over a small message-kind enum to the five RPC
//! actions this deployment recognizes.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::client::write_queue::ResponseEntry;
use crate::client::{Client, ScheduleOnQueue, WriteEntry};
use crate::config::Timeouts;
use crate::ot::Op;
use crate::realtime::access::{resolve_capabilities, ProjectAccess};
use crate::realtime::claims::BootstrapClaims;
use crate::realtime::rpc::RPCRequest;
use crate::room::manager::RoomManager;
use crate::tracking::ClientPosition;
use crate::updater::DocumentUpdater;
use crate::RtError;

/// Response body for a successful bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapWsResponse {
    pub project: Value,
    #[serde(rename = "privilegeLevel")]
    pub privilege_level: crate::realtime::access::PrivilegeLevel,
    #[serde(rename = "connectedClients")]
    pub connected_clients: Vec<crate::tracking::ConnectedClient>,
    #[serde(rename = "publicId")]
    pub public_id: crate::client::PublicId,
}

/// Wires the room manager, the document-updater collaborator, and the
/// project-access collaborator together behind the five RPC actions and
/// the bootstrap/disconnect lifecycle.
pub struct RealTimeManager {
    rooms: Arc<RoomManager>,
    documents: Arc<dyn DocumentUpdater>,
    projects: Arc<dyn ProjectAccess>,
    timeouts: Timeouts,
    max_doc_size_bytes: usize,
}

impl RealTimeManager {
    pub fn new(
        rooms: Arc<RoomManager>,
        documents: Arc<dyn DocumentUpdater>,
        projects: Arc<dyn ProjectAccess>,
        timeouts: Timeouts,
        max_doc_size_bytes: usize,
    ) -> Self {
        Self { rooms, documents, projects, timeouts, max_doc_size_bytes }
    }

    /// Runs the full bootstrap sequence for a newly upgraded connection.
    pub async fn bootstrap(
        &self,
        client: &Arc<Client>,
        claims: &BootstrapClaims,
    ) -> Result<BootstrapWsResponse, RtError> {
        let project = self.projects.get_project_details(claims).await?;
        let user = self.projects.get_user_public_info(claims).await?;

        let capabilities = resolve_capabilities(project.privilege_level, project.is_restricted_user);
        client.set_identity(project.id, user.id, user.display_name.clone(), capabilities);

        self.rooms
            .tracking
            .persist_initial_presence(project.id, &client.public_id, &user.display_name)
            .await?;

        self.rooms.join(Arc::clone(client), project.id, user.display_name.clone()).await;

        // A timeout here degrades to an empty roster rather than failing
        // bootstrap outright: the client can refetch the roster afterward.
        let connected_clients = match tokio::time::timeout(
            self.timeouts.connected_clients_race,
            self.rooms.tracking.get_connected_clients(project.id),
        )
        .await
        {
            Ok(Ok(clients)) => clients,
            Ok(Err(err)) => {
                tracing::warn!(project_id = %project.id, %err, "getConnectedClients failed during bootstrap");
                Vec::new()
            }
            Err(_) => Vec::new(),
        };

        Ok(BootstrapWsResponse {
            project: serde_json::json!({
                "id": project.id,
                "name": project.name,
                "ownerId": project.owner_id,
            }),
            privilege_level: project.privilege_level,
            connected_clients,
            public_id: client.public_id.clone(),
        })
    }

    /// RPC dispatch by `action`. Always returns a `ResponseEntry`; callers
    /// enqueue it via `ScheduleOnQueue` rather than propagating errors
    /// further, since every RPC failure must still reach the client on its
    /// originating callback.
    pub async fn rpc(&self, client: &Arc<Client>, request: RPCRequest) -> ResponseEntry {
        let callback_id = request.c;
        match self.dispatch(client, &request).await {
            Ok(body) => ResponseEntry {
                callback_id,
                body,
                error: None,
                event_name: None,
                latency_ms: None,
                processed_by: None,
                close_after: false,
            },
            Err(err) => {
                tracing::warn!(action = %request.a, %err, "rpc failed");
                crate::realtime::rpc::error_response(callback_id, &err, None)
            }
        }
    }

    async fn dispatch(&self, client: &Arc<Client>, request: &RPCRequest) -> Result<Option<Value>, RtError> {
        self.can_do(client, &request.a, request.d)?;

        match request.a.as_str() {
            "ping" => Ok(None),

            "joinDoc" => {
                let doc_id = request.d.ok_or_else(|| RtError::Validation("joinDoc requires docId".into()))?;
                let from_version = request
                    .b
                    .as_ref()
                    .and_then(|b| b.get("fromVersion"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let snapshot = self.documents.get_doc(client.project_id(), doc_id, from_version).await?;
                client.set_joined_doc_id(doc_id);
                Ok(Some(serde_json::json!({
                    "snapshot": snapshot.snapshot,
                    "version": snapshot.version,
                    "updates": snapshot.updates,
                })))
            }

            "applyUpdate" => {
                let doc_id = request.d.ok_or_else(|| RtError::Validation("applyUpdate requires docId".into()))?;
                if !client.is_joined_to(doc_id) {
                    return Err(RtError::InvalidState("applyUpdate before joinDoc".into()));
                }
                let body = request.b.as_ref().ok_or_else(|| RtError::Validation("applyUpdate requires a body".into()))?;
                let raw_len = serde_json::to_string(body).map(|s| s.len()).unwrap_or(0);
                if raw_len > self.max_doc_size_bytes {
                    return Err(RtError::BodyTooLarge { size: raw_len, max: self.max_doc_size_bytes });
                }
                let op: Op = serde_json::from_value(
                    body.get("op").cloned().ok_or_else(|| RtError::Validation("applyUpdate body missing op".into()))?,
                )
                .map_err(|err| RtError::Validation(format!("malformed op: {err}")))?;

                self.documents.queue_update(client.project_id(), doc_id, op, client.user_id()).await?;
                Ok(None)
            }

            "clientTracking.getConnectedUsers" => {
                let clients = self.rooms.tracking.get_connected_clients(client.project_id()).await?;
                Ok(Some(serde_json::to_value(clients).expect("ConnectedClient always serializes")))
            }

            "clientTracking.updatePosition" => {
                let pos: ClientPosition = request
                    .b
                    .as_ref()
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|err| RtError::Validation(format!("malformed position: {err}")))?
                    .unwrap_or_default();
                let display_name = client.display_name.lock().unwrap().clone();
                self.rooms
                    .tracking
                    .update_position(client.project_id(), &client.public_id, &display_name, pos)
                    .await?;
                Ok(None)
            }

            "leaveDoc" => {
                let doc_id = request.d.ok_or_else(|| RtError::Validation("leaveDoc requires docId".into()))?;
                if client.is_joined_to(doc_id) {
                    client.leave_doc();
                }
                Ok(None)
            }

            other => Err(RtError::Validation(format!("unknown action {other}"))),
        }
    }

    /// All RPCs validate the client's capability for the action first;
    /// unknown actions return a validation error.
    fn can_do(&self, client: &Client, action: &str, doc_id: Option<Uuid>) -> Result<(), RtError> {
        use crate::client::capability::{CAN_EDIT_CONTENT, CAN_SEE_OTHER_CLIENTS};

        match action {
            "ping" | "leaveDoc" => Ok(()),
            "joinDoc" => Ok(()),
            "applyUpdate" => {
                if !client.has_capability(CAN_EDIT_CONTENT) {
                    return Err(RtError::NotAuthorized);
                }
                let _ = doc_id;
                Ok(())
            }
            "clientTracking.getConnectedUsers" | "clientTracking.updatePosition" => {
                if !client.has_capability(CAN_SEE_OTHER_CLIENTS) {
                    return Err(RtError::NotAuthorized);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Disconnect path: leave the room; if this was the last client in the
    /// project, fire a best-effort 30s flush behind an independent context
    /// (the socket is already gone by the time this completes or times
    /// out, so the result is only logged).
    pub async fn disconnect(&self, client: &Arc<Client>) {
        let project_id = client.project_id();
        if project_id.is_nil() {
            return; // never finished bootstrap
        }

        self.rooms.leave(client, project_id).await;

        let is_last = self
            .rooms
            .room_for(project_id)
            .await
            .map(|room| room.is_empty())
            .unwrap_or(true);
        if !is_last {
            return;
        }

        let documents = Arc::clone(&self.documents);
        let deadline = self.timeouts.disconnect_flush;
        tokio::spawn(async move {
            if tokio::time::timeout(deadline, documents.flush_project(project_id)).await.is_err() {
                tracing::warn!(%project_id, "flush_project timed out on disconnect");
            }
        });
    }
}

/// Enqueue `entry` onto the client's write queue, waking the writer pool as
/// needed. Kept here rather than on `Client` itself since it's the
/// RPC/broadcast call site's convenience, not a property of the write
/// queue.
pub fn enqueue_response(client: &Arc<Client>, response: ResponseEntry) {
    client.enqueue_shared(WriteEntry::Response(response));
}
