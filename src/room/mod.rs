//! Per-project rooms, the lock-free clients snapshot they hold, and the
//! room manager that owns the project→room map and bus dispatch.

pub mod clients_snapshot;
pub mod manager;
pub mod room;

pub use clients_snapshot::{ClientsSnapshot, ClientsSnapshotSlot};
pub use manager::RoomManager;
pub use room::{AppliedDocumentUpdate, DocumentUpdate, DocumentUpdateMeta, Room, RoomInbox};
