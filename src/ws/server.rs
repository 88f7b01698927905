//! Accept loop and per-connection task: hands a raw TCP stream through the
//! upgrade parser, then owns the post-upgrade read/write split for the
//! lifetime of the connection.
//!
//! Grounded in a `handle_connection` shape (split stream, a direct-send
//! task fed by an mpsc channel, a read loop driving application logic),
//! generalized to this deployment's bootstrap-then-RPC lifecycle instead
//! of a single message match.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::client::{Client, OutboundFrame, ScheduleOnQueue, WriteEntry};
use crate::config::Timeouts;
use crate::realtime::{rpc, RealTimeManager};
use crate::room::manager::RoomManager;

/// Shared state every accepted connection needs.
pub struct AppState {
    pub rooms: Arc<RoomManager>,
    pub manager: Arc<RealTimeManager>,
    pub schedule: async_channel::Sender<Arc<Client>>,
    pub jwt_secret: Vec<u8>,
    pub timeouts: Timeouts,
    /// Bootstrap rate limit: 42 concurrent executions.
    pub bootstrap_semaphore: Arc<Semaphore>,
    /// Flipped to `false` while draining for shutdown; backs `/status`.
    pub ok: Arc<AtomicBool>,
}

/// Accept connections off `listener` forever, spawning one task per
/// connection.
pub async fn run(listener: TcpListener, state: Arc<AppState>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(%err, "accept failed");
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_connection(stream, addr, state).await;
        });
    }
}

async fn handle_connection(mut stream: TcpStream, addr: SocketAddr, state: Arc<AppState>) {
    let request = match super::http::parse_request(&mut stream).await {
        Ok(request) => request,
        Err(err) => {
            let _ = stream.write_all(err.status_line().as_bytes()).await;
            return;
        }
    };

    let (sec_websocket_key, bootstrap_jwt) = match request {
        super::http::Request::Status => {
            let ok = state.ok.load(Ordering::Acquire);
            let _ = stream.write_all(super::http::status_response(ok).as_bytes()).await;
            return;
        }
        super::http::Request::Upgrade { sec_websocket_key, bootstrap_jwt } => (sec_websocket_key, bootstrap_jwt),
    };

    if stream
        .write_all(super::http::upgrade_response(&sec_websocket_key).as_bytes())
        .await
        .is_err()
    {
        return;
    }

    let ws_stream = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let client = Arc::new(Client::new(state.schedule.clone(), outbound_tx));

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let msg = match frame {
                OutboundFrame::Text(text) => Message::Text(text.to_string()),
                OutboundFrame::Pong(payload) => Message::Pong(payload),
                OutboundFrame::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    if bootstrap_and_serve(&client, &mut ws_rx, &state, bootstrap_jwt).await {
        state.manager.disconnect(&client).await;
    }
    client.force_disconnect_shared();
    send_task.abort();
    tracing::debug!(%addr, public_id = %client.public_id, "connection closed");
}

type WsReadHalf = futures::stream::SplitStream<WebSocketStream<TcpStream>>;

/// Bootstrap then, on success, run the per-connection RPC loop. Returns
/// `true` if bootstrap succeeded (so the caller should run the disconnect
/// path), `false` if the connection was rejected pre-bootstrap.
async fn bootstrap_and_serve(
    client: &Arc<Client>,
    ws_rx: &mut WsReadHalf,
    state: &Arc<AppState>,
    bootstrap_jwt: Result<String, crate::RtError>,
) -> bool {
    let token = match bootstrap_jwt {
        Ok(token) => token,
        Err(_) => {
            reject(client, "BadWsBootstrapBlob");
            return false;
        }
    };
    let claims = match crate::realtime::decode_bootstrap_jwt(&token, &state.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => {
            reject(client, "BadWsBootstrapBlob");
            return false;
        }
    };

    let Ok(_permit) = state.bootstrap_semaphore.acquire().await else {
        reject(client, "Retry");
        return false;
    };

    let bootstrap = tokio::time::timeout(state.timeouts.bootstrap_deadline, state.manager.bootstrap(client, &claims)).await;
    let response = match bootstrap {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::warn!(%err, "bootstrap failed");
            reject(client, "Retry");
            return false;
        }
        Err(_) => {
            reject(client, "Retry");
            return false;
        }
    };

    let ack = crate::client::write_queue::ResponseEntry {
        callback_id: None,
        body: Some(serde_json::to_value(&response).expect("BootstrapWsResponse always serializes")),
        error: None,
        event_name: Some("bootstrap".into()),
        latency_ms: None,
        processed_by: None,
        close_after: false,
    };
    client.enqueue_shared(WriteEntry::Response(ack));

    read_loop(client, ws_rx, state).await;
    true
}

async fn read_loop(client: &Arc<Client>, ws_rx: &mut WsReadHalf, state: &Arc<AppState>) {
    loop {
        let next = tokio::time::timeout(state.timeouts.idle_deadline, ws_rx.next()).await;
        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(_))) | Ok(None) | Err(_) => return,
        };

        match message {
            Message::Text(text) => {
                let response = match rpc::decode_request(&text) {
                    Ok(request) => state.manager.rpc(client, request).await,
                    Err(err) => rpc::error_response(None, &err, None),
                };
                let close_after = response.close_after;
                client.enqueue_shared(WriteEntry::Response(response));
                if close_after {
                    client.trigger_disconnect_shared();
                    return;
                }
            }
            Message::Ping(payload) => {
                client.send_outbound(OutboundFrame::Pong(payload));
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}

fn reject(client: &Arc<Client>, reason: &str) {
    let response = rpc::rejection_response(reason);
    let wire = rpc::encode_response(&response, &[]);
    client.send_outbound(OutboundFrame::Text(std::sync::Arc::from(wire)));
    client.send_outbound(OutboundFrame::Close);
}
