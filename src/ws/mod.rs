//! WebSocket transport: HTTP/1.1 upgrade parsing, the post-upgrade
//! read/write split, and the writer worker pool that drains client write
//! queues.

pub mod http;
pub mod server;
pub mod writer_pool;

pub use server::{run, AppState};
