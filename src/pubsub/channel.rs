//! Typed wrapper over a Redis-style pub/sub channel: one base
//! `editor-events` channel for cross-instance fan-out, plus per-project
//! channels derived from `base:<projectId>`. One subscription socket per
//! process; the background task spawned by `connect` owns it exclusively.
//!
//! Grounded in `harborgrid-justin-caddy`'s `redis::aio::ConnectionManager`
//! usage for the publish side (`src/scheduling/queue.rs`); the subscriber
//! loop has no direct teacher analogue and is built from the `redis` crate's
//! own async pub/sub API.

use super::event::EditorEvent;
use super::pending::{PendingHandle, PendingOperation, PendingState};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const BASE_CHANNEL: &str = "editor-events";

pub fn project_channel(project_id: &Uuid) -> String {
    format!("{BASE_CHANNEL}:{project_id}")
}

/// One inbound frame off the bus. `payload.is_empty()` is the
/// unsubscribe-confirmed control signal.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub channel: String,
    pub payload: Vec<u8>,
}

enum SubCommand {
    Subscribe(Vec<String>, PendingHandle),
    Unsubscribe(Vec<String>, PendingHandle),
}

/// Handle used by producers (the room manager) to subscribe/unsubscribe
/// and to publish.
#[derive(Clone)]
pub struct PubSubChannel {
    publish_conn: ConnectionManager,
    commands: mpsc::UnboundedSender<SubCommand>,
}

impl PubSubChannel {
    /// Connect to Redis, spawn the subscriber task, and subscribe to the
    /// base channel. Returns the channel handle and the inbound-frame
    /// receiver for the caller's dispatcher loop.
    pub async fn connect(
        redis_url: &str,
    ) -> redis::RedisResult<(Self, mpsc::UnboundedReceiver<InboundFrame>)> {
        let client = redis::Client::open(redis_url)?;
        let publish_conn = ConnectionManager::new(client.clone()).await?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let pubsub_conn = client.get_async_pubsub().await?;
        tokio::spawn(run_subscriber(pubsub_conn, commands_rx, frames_tx));

        let channel = Self {
            publish_conn,
            commands: commands_tx,
        };
        channel.subscribe(vec![BASE_CHANNEL.to_string()]).await;
        Ok((channel, frames_rx))
    }

    pub async fn publish(&self, channel: &str, event: &EditorEvent) -> redis::RedisResult<()> {
        let payload = serde_json::to_vec(event).expect("EditorEvent always serializes");
        let mut conn = self.publish_conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
    }

    /// Publish the empty-payload control frame that signals "unsubscribed,
    /// reclaim this room".
    pub async fn publish_unsubscribe_signal(&self, channel: &str) -> redis::RedisResult<()> {
        let mut conn = self.publish_conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(Vec::<u8>::new())
            .query_async(&mut conn)
            .await
    }

    pub async fn subscribe(&self, channels: Vec<String>) -> PendingOperation {
        let (handle, op) = PendingOperation::new();
        let _ = self.commands.send(SubCommand::Subscribe(channels, handle));
        op
    }

    pub async fn unsubscribe(&self, channels: Vec<String>) -> PendingOperation {
        let (handle, op) = PendingOperation::new();
        let _ = self.commands.send(SubCommand::Unsubscribe(channels, handle));
        op
    }

    /// Bulk-unsubscribe, used by the idle sweeper.
    pub async fn unsubscribe_bulk(&self, project_ids: &[Uuid]) -> PendingOperation {
        let channels = project_ids.iter().map(project_channel).collect();
        self.unsubscribe(channels).await
    }
}

async fn run_subscriber(
    mut pubsub: redis::aio::PubSub,
    mut commands: mpsc::UnboundedReceiver<SubCommand>,
    frames: mpsc::UnboundedSender<InboundFrame>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    None => return,
                    Some(SubCommand::Subscribe(channels, handle)) => {
                        let mut failed = false;
                        for c in &channels {
                            if pubsub.subscribe(c.as_str()).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        handle.resolve(if failed {
                            PendingState::Failed("subscribe failed".into())
                        } else {
                            PendingState::Succeeded
                        });
                    }
                    Some(SubCommand::Unsubscribe(channels, handle)) => {
                        let mut failed = false;
                        for c in &channels {
                            if pubsub.unsubscribe(c.as_str()).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        handle.resolve(if failed {
                            PendingState::Failed("unsubscribe failed".into())
                        } else {
                            PendingState::Succeeded
                        });
                    }
                }
            }
            msg = pubsub.on_message().next() => {
                let Some(msg) = msg else { return };
                let channel = msg.get_channel_name().to_string();
                let payload: Vec<u8> = msg.get_payload_bytes().to_vec();
                if frames.send(InboundFrame { channel, payload }).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_channel_is_base_plus_project_id() {
        let id = Uuid::nil();
        assert_eq!(project_channel(&id), format!("editor-events:{id}"));
    }
}
