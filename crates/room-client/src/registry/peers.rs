//! Registry of remote peers.

use crate::store::{set_field, PeerRecord, RoomStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use signaling_protocol::payloads::PeerInfo;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Which attachment set of a peer to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attachment {
    Consumer,
    DataConsumer,
}

#[derive(Debug)]
pub struct PeerRegistry {
    entries: DashMap<String, PeerRecord>,
    store: Arc<RoomStore>,
}

impl PeerRegistry {
    pub(crate) fn new(store: Arc<RoomStore>) -> Self {
        Self {
            entries: DashMap::new(),
            store,
        }
    }

    /// Add a peer. An existing peer with the same id keeps its attachments.
    pub fn add(&self, info: PeerInfo) {
        let mut entry = self
            .entries
            .entry(info.id.clone())
            .or_insert_with(|| PeerRecord {
                id: info.id.clone(),
                display_name: String::new(),
                device: None,
                consumers: BTreeSet::new(),
                data_consumers: BTreeSet::new(),
            });
        entry.display_name = info.display_name;
        entry.device = info.device;
        let published = entry.clone();
        self.store.peers.modify(|map| {
            map.insert(info.id, published);
            true
        });
    }

    /// Remove a peer, clearing the active-speaker and stats-target roles it held.
    pub fn remove(&self, peer_id: &str) -> Option<PeerRecord> {
        let removed = match self.entries.entry(peer_id.to_string()) {
            Entry::Occupied(entry) => {
                self.store.peers.modify(|map| map.remove(peer_id).is_some());
                entry.remove()
            }
            Entry::Vacant(_) => return None,
        };

        self.store.modify_room(|room| {
            let mut changed = false;
            if room.active_speaker_id.as_deref() == Some(peer_id) {
                room.active_speaker_id = None;
                changed = true;
            }
            if room.stats_peer_id.as_deref() == Some(peer_id) {
                room.stats_peer_id = None;
                changed = true;
            }
            changed
        });

        debug!(target: "room.registry", peer_id = %peer_id, "Peer removed");
        Some(removed)
    }

    pub fn set_display_name(&self, peer_id: &str, display_name: &str) -> bool {
        self.update(peer_id, |peer| {
            set_field(&mut peer.display_name, display_name.to_string())
        })
    }

    pub(crate) fn attach(&self, peer_id: &str, attachment: Attachment, id: &str) -> bool {
        self.update(peer_id, |peer| match attachment {
            Attachment::Consumer => peer.consumers.insert(id.to_string()),
            Attachment::DataConsumer => peer.data_consumers.insert(id.to_string()),
        })
    }

    pub(crate) fn detach(&self, peer_id: &str, attachment: Attachment, id: &str) -> bool {
        self.update(peer_id, |peer| match attachment {
            Attachment::Consumer => peer.consumers.remove(id),
            Attachment::DataConsumer => peer.data_consumers.remove(id),
        })
    }

    #[must_use]
    pub fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        self.entries.get(peer_id).map(|peer| peer.clone())
    }

    #[must_use]
    pub fn display_name(&self, peer_id: &str) -> Option<String> {
        self.entries.get(peer_id).map(|peer| peer.display_name.clone())
    }

    /// Remove every peer.
    pub fn clear(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove(&id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update(&self, peer_id: &str, f: impl FnOnce(&mut PeerRecord) -> bool) -> bool {
        let Some(mut peer) = self.entries.get_mut(peer_id) else {
            return false;
        };
        if !f(&mut peer) {
            return false;
        }
        let published = peer.clone();
        self.store.peers.modify(|map| {
            map.insert(peer_id.to_string(), published);
            true
        });
        true
    }
}
