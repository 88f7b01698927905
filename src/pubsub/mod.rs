//! Redis-style pub/sub channel abstraction: the `editor-events` base
//! channel plus per-project derived channels.

pub mod channel;
pub mod event;
pub mod pending;

pub use channel::{project_channel, InboundFrame, PubSubChannel, BASE_CHANNEL};
pub use event::EditorEvent;
pub use pending::{PendingHandle, PendingOperation, PendingState, WaitOutcome};
