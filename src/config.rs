//! Process configuration: environment + CLI flags layered over defaults.
//!
//! A serde struct with `#[serde(default = "...")]` field defaults, sourced
//! primarily from `clap` since this binary has no on-disk config file of
//! its own.

use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "editor-realtime-server")]
pub struct ServerArgs {
    /// Address to bind the WebSocket/status listener on.
    #[arg(long, env = "RT_BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    /// Redis connection string backing pub/sub and presence tracking.
    #[arg(long, env = "RT_REDIS_URL", default_value = "redis://127.0.0.1/")]
    pub redis_url: String,

    /// Maximum accepted `applyUpdate` body size, in bytes.
    #[arg(long, env = "RT_MAX_DOC_SIZE_BYTES", default_value_t = 2 * 1024 * 1024)]
    pub max_doc_size_bytes: usize,

    /// Number of writer-pool worker tasks draining client queues.
    #[arg(long, env = "RT_WRITER_WORKERS", default_value_t = 16)]
    pub writer_workers: usize,

    /// Bootstrap concurrency limit: 42 concurrent executions.
    #[arg(long, env = "RT_BOOTSTRAP_CONCURRENCY", default_value_t = 42)]
    pub bootstrap_concurrency: usize,

    /// Idle-room sweep interval, in milliseconds.
    #[arg(long, env = "RT_IDLE_SWEEP_MS", default_value_t = 30_000)]
    pub idle_sweep_ms: u64,

    /// Room-change coalescing flush interval, in milliseconds (~10ms).
    #[arg(long, env = "RT_ROOM_CHANGE_FLUSH_MS", default_value_t = 10)]
    pub room_change_flush_ms: u64,

    /// HMAC/RSA key material used to verify bootstrap JWTs (opaque bytes;
    /// the auth/JWT issuer that produces these tokens is out of scope here).
    #[arg(long, env = "RT_JWT_SECRET", default_value = "")]
    pub jwt_secret: String,
}

impl ServerArgs {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }
}

/// Suspension-point timeouts.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub bootstrap: Duration,
    pub per_rpc: Duration,
    pub user_refresh: Duration,
    pub disconnect_flush: Duration,
    pub bootstrap_deadline: Duration,
    pub idle_deadline: Duration,
    pub connected_clients_race: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            bootstrap: Duration::from_secs(10),
            per_rpc: Duration::from_secs(10),
            user_refresh: Duration::from_secs(10),
            disconnect_flush: Duration::from_secs(30),
            bootstrap_deadline: Duration::from_secs(30),
            idle_deadline: Duration::from_secs(70),
            connected_clients_race: Duration::from_secs(1),
        }
    }
}

/// Client-tracking TTLs.
#[derive(Debug, Clone, Copy)]
pub struct TrackingTtls {
    pub project_expiry: Duration,
    pub user_expiry: Duration,
    pub refresh_user_every: Duration,
}

impl Default for TrackingTtls {
    fn default() -> Self {
        let user_expiry = Duration::from_secs(15 * 60);
        Self {
            project_expiry: Duration::from_secs(60 * 60),
            user_expiry,
            refresh_user_every: user_expiry - Duration::from_secs(60),
        }
    }
}
