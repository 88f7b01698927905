//! Immutable clients snapshot behind an atomically swapped pointer. Readers
//! never take a lock; writers build a new `ClientsSnapshot` and swap it in.

use crate::client::Client;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Tombstones accumulate until this many removals have happened without a
/// compaction; the 11th removal compacts.
const COMPACTION_THRESHOLD: usize = 10;

#[derive(Clone)]
pub struct ClientsSnapshot {
    all: Arc<[Arc<Client>]>,
    /// Indices into `all` that are logically removed but not yet compacted
    /// out. Capacity-bounded; exceeding it forces compaction.
    removed: Arc<[usize]>,
}

impl ClientsSnapshot {
    pub fn empty() -> Self {
        Self {
            all: Arc::from(Vec::new()),
            removed: Arc::from(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.all.len() - self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live clients, skipping tombstoned indices.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Client>> {
        let removed = self.removed.clone();
        self.all
            .iter()
            .enumerate()
            .filter(move |(i, _)| !removed.contains(i))
            .map(|(_, c)| c)
    }

    pub fn find(&self, public_id: &crate::client::PublicId) -> Option<&Arc<Client>> {
        self.iter().find(|c| &c.public_id == public_id)
    }

    fn with_added(&self, client: Arc<Client>) -> Self {
        let mut all: Vec<Arc<Client>> = self.all.to_vec();
        all.push(client);
        Self {
            all: Arc::from(all),
            removed: self.removed.clone(),
        }
    }

    /// Mark `public_id` removed, compacting once the tombstone count
    /// exceeds `COMPACTION_THRESHOLD`.
    fn with_removed(&self, public_id: &crate::client::PublicId) -> Self {
        let Some(index) = self.all.iter().position(|c| &c.public_id == public_id) else {
            return self.clone();
        };
        if self.removed.contains(&index) {
            return self.clone();
        }
        let mut removed: Vec<usize> = self.removed.to_vec();
        removed.push(index);

        if removed.len() > COMPACTION_THRESHOLD {
            let compacted: Vec<Arc<Client>> = self
                .all
                .iter()
                .enumerate()
                .filter(|(i, _)| !removed.contains(i))
                .map(|(_, c)| Arc::clone(c))
                .collect();
            return Self {
                all: Arc::from(compacted),
                removed: Arc::from(Vec::new()),
            };
        }

        Self {
            all: self.all.clone(),
            removed: Arc::from(removed),
        }
    }
}

impl Default for ClientsSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// The atomic pointer holder. `Room` embeds one of these; `join`/`leave`
/// build a new snapshot and swap it in without ever blocking a reader.
pub struct ClientsSnapshotSlot(ArcSwap<ClientsSnapshot>);

impl ClientsSnapshotSlot {
    pub fn new() -> Self {
        Self(ArcSwap::from_pointee(ClientsSnapshot::empty()))
    }

    pub fn load(&self) -> Arc<ClientsSnapshot> {
        self.0.load_full()
    }

    pub fn join(&self, client: Arc<Client>) {
        self.0.rcu(|current| Arc::new(current.with_added(Arc::clone(&client))));
    }

    pub fn leave(&self, public_id: &crate::client::PublicId) {
        self.0.rcu(|current| Arc::new(current.with_removed(public_id)));
    }
}

impl Default for ClientsSnapshotSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Arc<Client> {
        let (tx, _rx) = async_channel::unbounded();
        let (outbound_tx, _outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Client::new(tx, outbound_tx))
    }

    #[test]
    fn join_then_leave_is_observable_and_empty() {
        let slot = ClientsSnapshotSlot::new();
        let c = client();
        let id = c.public_id.clone();
        slot.join(c);
        assert_eq!(slot.load().len(), 1);
        slot.leave(&id);
        assert_eq!(slot.load().len(), 0);
    }

    #[test]
    fn compaction_happens_after_threshold_removals() {
        let slot = ClientsSnapshotSlot::new();
        let clients: Vec<_> = (0..COMPACTION_THRESHOLD + 5).map(|_| client()).collect();
        for c in &clients {
            slot.join(Arc::clone(c));
        }
        for c in &clients[..COMPACTION_THRESHOLD + 1] {
            slot.leave(&c.public_id);
        }
        let snap = slot.load();
        assert_eq!(snap.len(), clients.len() - (COMPACTION_THRESHOLD + 1));
        // After compaction the tombstone list resets.
        assert!(snap.removed.is_empty());
    }

    #[test]
    fn snapshot_is_immutable_while_readers_hold_it() {
        let slot = ClientsSnapshotSlot::new();
        let c = client();
        slot.join(Arc::clone(&c));
        let held = slot.load();
        slot.leave(&c.public_id);
        // The snapshot `held` captured before the leave is unaffected.
        assert_eq!(held.len(), 1);
        assert_eq!(slot.load().len(), 0);
    }
}
