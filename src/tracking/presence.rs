//! Redis-backed per-project presence hash and the coalesced `roomChanges`
//! publisher.
//!
//! Grounded in a `redis::cmd(...).arg(...).query_async(&mut conn.clone())`
//! idiom for individual commands, and a `redis::pipe().atomic()` style for
//! the `MULTI`/`EXEC` writes `UpdatePosition` and `FlushRoomChanges`
//! require.

use super::age_encoding::{decode_age, encode_age};
use crate::client::PublicId;
use crate::config::TrackingTtls;
use crate::pubsub::{project_channel, EditorEvent, PubSubChannel};
use crate::RtError;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shard count for the `GetConnectedClients` in-flight dedup map, keyed by
/// first byte of `projectId`.
const SHARD_COUNT: usize = 256;
/// `RefreshClientPositions` batch size.
const REFRESH_BATCH: usize = 100;

fn hash_key(project_id: &Uuid) -> String {
    format!("clientTracking:{{{project_id}}}")
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_nanos() as u64
}

fn redis_err(e: redis::RedisError) -> RtError {
    RtError::Upstream(format!("redis: {e}"))
}

/// A client's last-known cursor/selection, the `updatePosition` payload
/// `{row, column, entityId}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPosition {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub row: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub column: Option<i64>,
    #[serde(rename = "entityId", skip_serializing_if = "Option::is_none", default)]
    pub entity_id: Option<String>,
}

/// The JSON blob stored under the `pid` field of the presence hash: JSON of
/// `{ClientPosition, DisplayName}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceEntry {
    #[serde(flatten)]
    pub position: ClientPosition,
    #[serde(rename = "displayName", skip_serializing_if = "String::is_empty", default)]
    pub display_name: String,
}

/// One row of `GetConnectedClients`'s result array.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedClient {
    #[serde(rename = "publicId")]
    pub public_id: PublicId,
    #[serde(flatten)]
    pub presence: PresenceEntry,
}

/// A coalesced join/leave delta.
#[derive(Debug, Clone)]
pub struct RoomChange {
    pub public_id: PublicId,
    pub display_name: String,
    pub is_join: bool,
}

/// Wire shape for the `clientTracking.batch` event: `{"i": "<publicId>"[,
/// "n": "<displayName>"]["j": 1]}`. Built through `serde` rather than
/// hand-concatenated JSON; a hand-rolled encoder that optimistically
/// appends without escaping is a throughput optimization, not a
/// behavioral requirement, and `serde_json` already produces the same
/// bytes for printable `displayName`s while correctly escaping the rest.
#[derive(Debug, Clone, Serialize)]
struct RoomChangeWire {
    #[serde(rename = "i")]
    public_id: String,
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(rename = "j", skip_serializing_if = "Option::is_none")]
    join: Option<u8>,
}

impl From<&RoomChange> for RoomChangeWire {
    fn from(change: &RoomChange) -> Self {
        Self {
            public_id: change.public_id.to_string(),
            display_name: (change.is_join && !change.display_name.is_empty())
                .then(|| change.display_name.clone()),
            join: change.is_join.then_some(1),
        }
    }
}

type PendingFetch = Arc<OnceCell<Vec<ConnectedClient>>>;

/// Per-project presence hash plus the coalesced room-change publisher.
pub struct ClientTracking {
    redis: ConnectionManager,
    pubsub: PubSubChannel,
    ttls: TrackingTtls,
    pending: Vec<Mutex<HashMap<Uuid, PendingFetch>>>,
}

impl ClientTracking {
    pub fn new(redis: ConnectionManager, pubsub: PubSubChannel, ttls: TrackingTtls) -> Self {
        let mut pending = Vec::with_capacity(SHARD_COUNT);
        pending.resize_with(SHARD_COUNT, || Mutex::new(HashMap::new()));
        Self { redis, pubsub, ttls, pending }
    }

    fn shard_for(project_id: &Uuid) -> usize {
        project_id.as_bytes()[0] as usize % SHARD_COUNT
    }

    /// Bootstrap's initial presence write: HSET with zero position.
    pub async fn persist_initial_presence(
        &self,
        project_id: Uuid,
        public_id: &PublicId,
        display_name: &str,
    ) -> Result<(), RtError> {
        let entry = PresenceEntry {
            position: ClientPosition::default(),
            display_name: display_name.to_string(),
        };
        self.write_entry(project_id, public_id, &entry).await
    }

    /// `UpdatePosition(client, pos)`.
    pub async fn update_position(
        &self,
        project_id: Uuid,
        public_id: &PublicId,
        display_name: &str,
        pos: ClientPosition,
    ) -> Result<(), RtError> {
        let event = EditorEvent {
            source: Some(public_id.clone()),
            room_id: project_id,
            message: "clientTracking.clientUpdated".into(),
            payload: serde_json::json!({ "source": public_id, "pos": pos }),
            processed_by: String::new(),
        };
        self.pubsub
            .publish(&project_channel(&project_id), &event)
            .await
            .map_err(redis_err)?;

        let entry = PresenceEntry { position: pos, display_name: display_name.to_string() };
        self.write_entry(project_id, public_id, &entry).await
    }

    async fn write_entry(
        &self,
        project_id: Uuid,
        public_id: &PublicId,
        entry: &PresenceEntry,
    ) -> Result<(), RtError> {
        let key = hash_key(&project_id);
        let entry_json = serde_json::to_string(entry).expect("PresenceEntry always serializes");
        let age = encode_age(now_nanos());
        let mut conn = self.redis.clone();
        redis::pipe()
            .atomic()
            .cmd("HSET").arg(&key).arg(public_id.as_str()).arg(entry_json).ignore()
            .cmd("HSET").arg(&key).arg(format!("{public_id}:age")).arg(age).ignore()
            .cmd("EXPIRE").arg(&key).arg(self.ttls.project_expiry.as_secs() as i64).ignore()
            .query_async(&mut conn)
            .await
            .map_err(redis_err)
    }

    /// `GetConnectedClients(client)`: dedup concurrent requests per project
    /// behind a sharded map of pending futures; harvest stale entries in
    /// the background.
    pub async fn get_connected_clients(&self, project_id: Uuid) -> Result<Vec<ConnectedClient>, RtError> {
        let shard = &self.pending[Self::shard_for(&project_id)];
        let cell: PendingFetch = {
            let mut guard = shard.lock().unwrap();
            Arc::clone(guard.entry(project_id).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        let result = cell
            .get_or_try_init(|| self.fetch_connected_clients(project_id))
            .await
            .map(|v| v.clone());

        // Let the next caller start a fresh fetch rather than reusing a
        // value that may already be stale by the time this resolves.
        shard.lock().unwrap().remove(&project_id);

        result
    }

    async fn fetch_connected_clients(&self, project_id: Uuid) -> Result<Vec<ConnectedClient>, RtError> {
        let key = hash_key(&project_id);
        let mut conn = self.redis.clone();
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(redis_err)?;

        let stale_cutoff = now_nanos().saturating_sub(self.ttls.user_expiry.as_nanos() as u64);

        let mut ages: HashMap<String, u64> = HashMap::new();
        let mut entries: HashMap<String, PresenceEntry> = HashMap::new();
        for (field, value) in raw {
            if let Some(pid) = field.strip_suffix(":age") {
                if let Some(age) = decode_age(&value) {
                    ages.insert(pid.to_string(), age);
                }
            } else if let Ok(entry) = serde_json::from_str::<PresenceEntry>(&value) {
                entries.insert(field, entry);
            }
        }

        let mut connected = Vec::with_capacity(entries.len());
        let mut stale: Vec<String> = Vec::new();
        for (pid, entry) in entries {
            let is_stale = ages.get(&pid).map(|&age| age < stale_cutoff).unwrap_or(false);
            if is_stale {
                stale.push(pid);
                continue;
            }
            if let Ok(public_id) = pid.parse::<PublicId>() {
                connected.push(ConnectedClient { public_id, presence: entry });
            }
        }

        if !stale.is_empty() {
            let redis = self.redis.clone();
            tokio::spawn(async move {
                let mut conn = redis;
                let mut cmd = redis::cmd("HDEL");
                cmd.arg(&key);
                for pid in &stale {
                    cmd.arg(pid).arg(format!("{pid}:age"));
                }
                let _: Result<u64, _> = cmd.query_async(&mut conn).await;
            });
        }

        Ok(connected)
    }

    /// `FlushRoomChanges(projectId, changes)`.
    pub async fn flush_room_changes(&self, project_id: Uuid, changes: Vec<RoomChange>) -> Result<(), RtError> {
        if changes.is_empty() {
            return Ok(());
        }

        // A join superseded by a later leave of the same publicId within
        // this batch is dropped entirely rather than HSET-then-HDEL'd.
        let mut superseded: HashSet<usize> = HashSet::new();
        for (i, change) in changes.iter().enumerate() {
            if change.is_join {
                continue;
            }
            for j in (0..i).rev() {
                if changes[j].is_join
                    && changes[j].public_id == change.public_id
                    && !superseded.contains(&j)
                {
                    superseded.insert(j);
                    break;
                }
            }
        }
        let effective: Vec<RoomChange> = changes
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !superseded.contains(i))
            .map(|(_, c)| c)
            .collect();

        let key = hash_key(&project_id);
        let age = encode_age(now_nanos());
        let mut pipe = redis::pipe();
        pipe.atomic();
        for change in &effective {
            if change.is_join {
                let entry = PresenceEntry {
                    position: ClientPosition::default(),
                    display_name: change.display_name.clone(),
                };
                let entry_json = serde_json::to_string(&entry).expect("PresenceEntry always serializes");
                pipe.cmd("HSET").arg(&key).arg(change.public_id.as_str()).arg(entry_json).ignore();
                pipe.cmd("HSET").arg(&key).arg(format!("{}:age", change.public_id)).arg(&age).ignore();
            } else {
                pipe.cmd("HDEL")
                    .arg(&key)
                    .arg(change.public_id.as_str())
                    .arg(format!("{}:age", change.public_id))
                    .ignore();
            }
        }
        pipe.cmd("EXPIRE").arg(&key).arg(self.ttls.project_expiry.as_secs() as i64).ignore();
        let mut conn = self.redis.clone();
        pipe.query_async(&mut conn).await.map_err(redis_err)?;

        let wire: Vec<RoomChangeWire> = effective.iter().map(RoomChangeWire::from).collect();
        let event = EditorEvent {
            source: None,
            room_id: project_id,
            message: "clientTracking.batch".into(),
            payload: serde_json::to_value(&wire).expect("RoomChangeWire always serializes"),
            processed_by: String::new(),
        };
        self.pubsub
            .publish(&project_channel(&project_id), &event)
            .await
            .map_err(redis_err)
    }

    /// `RefreshClientPositions(lazyRooms)`: batches of ≤100.
    pub async fn refresh_client_positions(&self, project_id: Uuid, public_ids: &[PublicId]) -> Result<(), RtError> {
        let key = hash_key(&project_id);
        let age = encode_age(now_nanos());
        for batch in public_ids.chunks(REFRESH_BATCH) {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for pid in batch {
                pipe.cmd("HSET").arg(&key).arg(format!("{pid}:age")).arg(&age).ignore();
            }
            pipe.cmd("EXPIRE").arg(&key).arg(self.ttls.project_expiry.as_secs() as i64).ignore();
            let mut conn = self.redis.clone();
            pipe.query_async(&mut conn).await.map_err(redis_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn pid(seed: u64) -> PublicId {
        PublicId::generate_at(seed, &mut rand::rngs::StdRng::seed_from_u64(seed))
    }

    #[test]
    fn room_change_wire_omits_name_for_leaves() {
        let leave = RoomChange { public_id: pid(1), display_name: String::new(), is_join: false };
        let wire = RoomChangeWire::from(&leave);
        assert_eq!(wire.join, None);
        assert_eq!(wire.display_name, None);
    }

    #[test]
    fn room_change_wire_marks_joins() {
        let join = RoomChange { public_id: pid(2), display_name: "Ada".into(), is_join: true };
        let wire = RoomChangeWire::from(&join);
        assert_eq!(wire.join, Some(1));
        assert_eq!(wire.display_name, Some("Ada".into()));
    }

    #[test]
    fn hash_key_wraps_project_id_in_braces() {
        let id = Uuid::nil();
        assert_eq!(hash_key(&id), format!("clientTracking:{{{id}}}"));
    }
}
