//! Core real-time collaboration backend: room fan-out, OT text engine,
//! client write path, presence tracking, and the WebSocket transport that
//! ties them together.

pub mod client;
pub mod config;
pub mod error;
pub mod ot;
pub mod pubsub;
pub mod realtime;
pub mod room;
pub mod tracking;
pub mod updater;
pub mod ws;

pub use error::RtError;
