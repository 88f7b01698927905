//! editor-realtime-server: process entry point. Wires Redis, the room
//! manager, the real-time lifecycle manager, the writer worker pool, and
//! the WebSocket accept loop together, then runs until interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use editor_realtime::config::ServerArgs;
use editor_realtime::pubsub::PubSubChannel;
use editor_realtime::realtime::{RealTimeManager, StubProjectAccess};
use editor_realtime::room::RoomManager;
use editor_realtime::tracking::ClientTracking;
use editor_realtime::updater::StubDocumentUpdater;
use editor_realtime::ws::{self, AppState};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = ServerArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("[editor-realtime] starting on {}", args.bind_addr);

    let redis_client = match redis::Client::open(args.redis_url.clone()) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!("[editor-realtime] invalid redis url {}: {}", args.redis_url, err);
            std::process::exit(1);
        }
    };
    let redis_conn = match redis_client.get_connection_manager().await {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!("[editor-realtime] cannot reach redis at {}: {}", args.redis_url, err);
            std::process::exit(1);
        }
    };

    let timeouts = args.timeouts();
    let ttls = editor_realtime::config::TrackingTtls::default();

    let (pubsub, inbound_frames) = match PubSubChannel::connect(&args.redis_url).await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::error!("[editor-realtime] failed to connect pub/sub: {}", err);
            std::process::exit(1);
        }
    };

    let tracking = Arc::new(ClientTracking::new(redis_conn, pubsub.clone(), ttls));
    let rooms = RoomManager::new(pubsub, Arc::clone(&tracking), timeouts.bootstrap);

    let documents: Arc<dyn editor_realtime::updater::DocumentUpdater> = Arc::new(StubDocumentUpdater::new());
    let projects: Arc<dyn editor_realtime::realtime::ProjectAccess> = Arc::new(StubProjectAccess::new());
    let manager = Arc::new(RealTimeManager::new(
        Arc::clone(&rooms),
        documents,
        projects,
        timeouts,
        args.max_doc_size_bytes,
    ));

    let (schedule_tx, schedule_rx) = async_channel::unbounded();
    ws::writer_pool::spawn_pool(schedule_rx, args.writer_workers);

    let dispatcher_rooms = Arc::clone(&rooms);
    tokio::spawn(dispatcher_rooms.run_dispatcher(inbound_frames));

    let sweep_rooms = Arc::clone(&rooms);
    let idle_sweep_interval = Duration::from_millis(args.idle_sweep_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(idle_sweep_interval);
        loop {
            ticker.tick().await;
            sweep_rooms.sweep_idle(1).await;
        }
    });

    let flush_rooms = Arc::clone(&rooms);
    let flush_interval = Duration::from_millis(args.room_change_flush_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_interval);
        loop {
            ticker.tick().await;
            flush_rooms.flush_room_changes().await;
        }
    });

    let state = Arc::new(AppState {
        rooms,
        manager,
        schedule: schedule_tx,
        jwt_secret: args.jwt_secret.clone().into_bytes(),
        timeouts,
        bootstrap_semaphore: Arc::new(Semaphore::new(args.bootstrap_concurrency)),
        ok: Arc::new(AtomicBool::new(true)),
    });

    let listener = match TcpListener::bind(&args.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("[editor-realtime] failed to bind {}: {}", args.bind_addr, err);
            std::process::exit(1);
        }
    };

    let accept_state = Arc::clone(&state);
    let accept_handle = tokio::spawn(ws::run(listener, accept_state));

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("[editor-realtime] received ctrl-c, draining");
        }
    }

    state.ok.store(false, Ordering::Release);
    accept_handle.abort();
    tracing::info!("[editor-realtime] shutdown complete");
}
