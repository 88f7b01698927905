//! Writer worker pool: a fixed set of tasks pop clients off the shared
//! `scheduleChannel` and drain each one's write queue to empty before
//! looping back to `recv()` for the next client.
//!
//! Grounded in a per-peer `direct_tx`/outbound-channel handoff,
//! generalized from one send task per connection to a shared pool
//! draining many connections' queues behind `async_channel`.

use std::sync::Arc;

use crate::client::{AfterDrain, Client, DrainStep, OutboundFrame, ResolvedFrame};
use crate::realtime::rpc;

/// Spawn `workers` tasks all draining the same `scheduleChannel`.
pub fn spawn_pool(schedule: async_channel::Receiver<Arc<Client>>, workers: usize) {
    for _ in 0..workers.max(1) {
        let rx = schedule.clone();
        tokio::spawn(run_worker(rx));
    }
}

async fn run_worker(schedule: async_channel::Receiver<Arc<Client>>) {
    while let Ok(client) = schedule.recv().await {
        drain_one(&client);
    }
}

/// Pop and resolve entries until the queue is caught up, then honor
/// whatever closing level `after_drain` reports.
fn drain_one(client: &Arc<Client>) {
    loop {
        match client.write_queue.pop() {
            DrainStep::Frame(frame) => {
                let text: Arc<str> = match frame {
                    ResolvedFrame::Prepared(text) => text,
                    ResolvedFrame::Response(resp, lazy) => Arc::from(rpc::encode_response(&resp, &lazy)),
                };
                if !client.send_outbound(OutboundFrame::Text(text)) {
                    // The connection's own task is already gone.
                    return;
                }
            }
            DrainStep::Empty => break,
        }
    }

    match client.write_queue.after_drain() {
        AfterDrain::Idle => {}
        AfterDrain::CloseAfterFlush | AfterDrain::ForceClosed => {
            let _ = client.send_outbound(OutboundFrame::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::write_queue::{ErrorObject, ResponseEntry};
    use crate::client::ScheduleOnQueue;
    use crate::client::WriteEntry;

    fn test_client() -> (Arc<Client>, tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, _rx) = async_channel::unbounded();
        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        (Arc::new(Client::new(tx, outbound_tx)), outbound_rx)
    }

    #[test]
    fn drains_a_response_to_a_text_frame() {
        // A body (or error/event name) disqualifies this from the
        // lazy-success fast path, so it drains as its own frame rather
        // than being absorbed into `lsr`.
        let (client, mut outbound_rx) = test_client();
        client.enqueue_shared(WriteEntry::Response(ResponseEntry {
            callback_id: Some(1),
            body: Some(serde_json::json!({"version": 5})),
            error: None,
            event_name: None,
            latency_ms: None,
            processed_by: None,
            close_after: false,
        }));
        drain_one(&client);
        match outbound_rx.try_recv().unwrap() {
            OutboundFrame::Text(text) => assert_eq!(&*text, r#"{"h":13,"b":{"version":5},"c":1}"#),
            other => panic!("expected Text, got {other:?}"),
        }
        assert!(outbound_rx.try_recv().is_err());
    }

    #[test]
    fn bodyless_success_only_response_is_coalesced_not_sent() {
        // A success-only response (no body/error/name) is a lazy-success
        // candidate and is buffered rather than written, since nothing
        // else is queued behind it to flush `lsr` through.
        let (client, mut outbound_rx) = test_client();
        client.enqueue_shared(WriteEntry::Response(ResponseEntry {
            callback_id: Some(1),
            body: None,
            error: None,
            event_name: None,
            latency_ms: None,
            processed_by: None,
            close_after: false,
        }));
        drain_one(&client);
        assert!(outbound_rx.try_recv().is_err());
    }

    #[test]
    fn fatal_response_closes_after_drain() {
        let (client, mut outbound_rx) = test_client();
        client.enqueue_shared(WriteEntry::Response(ResponseEntry {
            callback_id: Some(1),
            body: None,
            error: Some(ErrorObject { message: "too big".into(), code: Some("body_too_large".into()) }),
            event_name: None,
            latency_ms: None,
            processed_by: None,
            close_after: true,
        }));
        client.trigger_disconnect_shared();
        drain_one(&client);
        assert!(matches!(outbound_rx.try_recv().unwrap(), OutboundFrame::Text(_)));
        assert!(matches!(outbound_rx.try_recv().unwrap(), OutboundFrame::Close));
    }

    #[test]
    fn broadcast_frame_forwards_prepared_text_unchanged() {
        let (client, mut outbound_rx) = test_client();
        client.enqueue_shared(WriteEntry::Broadcast(Arc::from("already-encoded")));
        drain_one(&client);
        match outbound_rx.try_recv().unwrap() {
            OutboundFrame::Text(text) => assert_eq!(&*text, "already-encoded"),
            other => panic!("expected Text, got {other:?}"),
        }
    }
}
