//! A single WebSocket connection's server-side state: identity, capability
//! set, joined-doc pointer, and the bounded write queue that fans responses
//! and broadcasts back out to the socket.

pub mod capability;
pub mod client;
pub mod public_id;
pub mod write_queue;

pub use capability::Capability;
pub use client::{no_doc, Client, OutboundFrame, ScheduleOnQueue};
pub use public_id::PublicId;
pub use write_queue::{AfterDrain, DrainStep, EnqueueOutcome, ResolvedFrame, ResponseEntry, WriteEntry, WriteQueue};
