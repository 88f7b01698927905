//! The document-updater service is out of scope here: it owns canonical
//! document storage and the OT update queue. This module only defines the
//! seam this crate calls through, `DocumentUpdater`, plus an in-memory
//! stand-in so the rest of the crate (and `bin/server.rs`, absent a real
//! collaborator) can be exercised end-to-end.
//!
//! Grounded in the `Node` trait's shape: a small `async_trait` boundary
//! between orchestration and the thing that actually owns state.

use crate::ot::Op;
use crate::RtError;
use async_trait::async_trait;
use uuid::Uuid;

/// Response to `joinDoc`: the current snapshot plus any ops that arrived
/// after `from_version`.
#[derive(Debug, Clone)]
pub struct DocSnapshot {
    pub snapshot: String,
    pub version: u64,
    pub updates: Vec<Op>,
}

#[async_trait]
pub trait DocumentUpdater: Send + Sync {
    /// `GetDoc(projectId, docId, fromVersion)`, called from `joinDoc`.
    async fn get_doc(
        &self,
        project_id: Uuid,
        doc_id: Uuid,
        from_version: u64,
    ) -> Result<DocSnapshot, RtError>;

    /// `QueueUpdate`, called from `applyUpdate`. Ordering/persistence of the
    /// queue itself lives entirely in the external service; this call is
    /// fire-and-forget from this crate's point of view beyond surfacing a
    /// transport-level failure.
    async fn queue_update(
        &self,
        project_id: Uuid,
        doc_id: Uuid,
        op: Op,
        user_id: Uuid,
    ) -> Result<(), RtError>;

    /// Best-effort flush issued when the last client leaves a project, on
    /// the disconnect path, behind its own 30s deadline.
    async fn flush_project(&self, project_id: Uuid) -> Result<(), RtError>;
}

pub use stub::StubDocumentUpdater;

/// In-memory stand-in for the out-of-scope document-updater service. Not
/// gated to `#[cfg(test)]`: `bin/server.rs` also wires this in by default
/// since this crate owns no real collaborator client (the
/// document-updater's actual storage and queue are someone else's
/// deployment). Swapping in a real client only requires a new
/// `DocumentUpdater` impl; nothing else in this crate changes.
mod stub {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// No attempt is made to model the real document-updater's persistence
    /// or queue semantics; it just remembers the last snapshot/version/ops
    /// per doc so callers can assert on what was requested.
    #[derive(Default)]
    pub struct StubDocumentUpdater {
        docs: Mutex<HashMap<Uuid, (String, u64)>>,
        queued: Mutex<Vec<(Uuid, Uuid, Op, Uuid)>>,
        flushed: Mutex<Vec<Uuid>>,
    }

    impl StubDocumentUpdater {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, doc_id: Uuid, snapshot: impl Into<String>, version: u64) {
            self.docs
                .lock()
                .unwrap()
                .insert(doc_id, (snapshot.into(), version));
        }

        pub fn queued_updates(&self) -> Vec<(Uuid, Uuid, Op, Uuid)> {
            self.queued.lock().unwrap().clone()
        }

        pub fn flushed_projects(&self) -> Vec<Uuid> {
            self.flushed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentUpdater for StubDocumentUpdater {
        async fn get_doc(
            &self,
            _project_id: Uuid,
            doc_id: Uuid,
            from_version: u64,
        ) -> Result<DocSnapshot, RtError> {
            let docs = self.docs.lock().unwrap();
            let (snapshot, version) = docs
                .get(&doc_id)
                .cloned()
                .ok_or_else(|| RtError::InvalidState(format!("unknown doc {doc_id}")))?;
            let _ = from_version; // mock never replays historical ops
            Ok(DocSnapshot {
                snapshot,
                version,
                updates: Vec::new(),
            })
        }

        async fn queue_update(
            &self,
            project_id: Uuid,
            doc_id: Uuid,
            op: Op,
            user_id: Uuid,
        ) -> Result<(), RtError> {
            self.queued
                .lock()
                .unwrap()
                .push((project_id, doc_id, op, user_id));
            Ok(())
        }

        async fn flush_project(&self, project_id: Uuid) -> Result<(), RtError> {
            self.flushed.lock().unwrap().push(project_id);
            Ok(())
        }
    }
}
