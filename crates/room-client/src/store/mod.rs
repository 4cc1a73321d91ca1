//! `RoomStore` - versioned, observable snapshot of the session.
//!
//! Each slice is a `tokio::sync::watch` channel: subscribers see the current
//! value immediately and then every publication, with "most recent wins"
//! coalescing for rapid updates. Mutations are read-modify-publish under the
//! channel's write lock, so no reader ever observes a half-applied change.
//!
//! Collections are written only by the registries; the presentation layer
//! reads and subscribes.

mod notify;
mod records;

pub use notify::{Notify, NotifyKind, DEFAULT_ERROR_TIMEOUT, DEFAULT_INFO_TIMEOUT};
pub use records::{
    ConsumerRecord, DataConsumerRecord, DataProducerRecord, Me, PauseOrigin, PeerRecord,
    ProducerRecord, ProducerSource, RoomInfo,
};

use common::types::ConnectionState;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Records keyed by id.
pub type RecordMap<R> = BTreeMap<String, R>;

/// A published value with its publication counter.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// One observable slice of state.
#[derive(Debug)]
pub struct StateSlice<T> {
    tx: watch::Sender<Versioned<T>>,
}

impl<T: Clone> StateSlice<T> {
    fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(Versioned { version: 0, value });
        Self { tx }
    }

    /// Receiver primed with the current value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Versioned<T>> {
        self.tx.subscribe()
    }

    /// Current value.
    #[must_use]
    pub fn snapshot(&self) -> T {
        self.tx.borrow().value.clone()
    }

    /// Number of publications so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    /// Apply `f` and publish if it reports a change.
    pub(crate) fn modify(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(|current| {
            let changed = f(&mut current.value);
            if changed {
                current.version += 1;
            }
            changed
        })
    }
}

/// Central state store of one room session.
#[derive(Debug)]
pub struct RoomStore {
    room: StateSlice<RoomInfo>,
    me: StateSlice<Me>,
    pub(crate) producers: Arc<StateSlice<RecordMap<ProducerRecord>>>,
    pub(crate) consumers: Arc<StateSlice<RecordMap<ConsumerRecord>>>,
    pub(crate) data_producers: Arc<StateSlice<RecordMap<DataProducerRecord>>>,
    pub(crate) data_consumers: Arc<StateSlice<RecordMap<DataConsumerRecord>>>,
    pub(crate) peers: StateSlice<RecordMap<PeerRecord>>,
    notify_subscribers: Mutex<Vec<mpsc::UnboundedSender<Notify>>>,
}

impl RoomStore {
    #[must_use]
    pub fn new(room: RoomInfo, me: Me) -> Self {
        Self {
            room: StateSlice::new(room),
            me: StateSlice::new(me),
            producers: Arc::new(StateSlice::new(RecordMap::new())),
            consumers: Arc::new(StateSlice::new(RecordMap::new())),
            data_producers: Arc::new(StateSlice::new(RecordMap::new())),
            data_consumers: Arc::new(StateSlice::new(RecordMap::new())),
            peers: StateSlice::new(RecordMap::new()),
            notify_subscribers: Mutex::new(Vec::new()),
        }
    }

    // ========================================================================
    // Presentation boundary
    // ========================================================================

    pub fn room(&self) -> &StateSlice<RoomInfo> {
        &self.room
    }

    pub fn me(&self) -> &StateSlice<Me> {
        &self.me
    }

    pub fn producers(&self) -> &StateSlice<RecordMap<ProducerRecord>> {
        &self.producers
    }

    pub fn consumers(&self) -> &StateSlice<RecordMap<ConsumerRecord>> {
        &self.consumers
    }

    pub fn data_producers(&self) -> &StateSlice<RecordMap<DataProducerRecord>> {
        &self.data_producers
    }

    pub fn data_consumers(&self) -> &StateSlice<RecordMap<DataConsumerRecord>> {
        &self.data_consumers
    }

    pub fn peers(&self) -> &StateSlice<RecordMap<PeerRecord>> {
        &self.peers
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.room.tx.borrow().value.state
    }

    /// Subscribe to notifications published from now on.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<Notify> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Publish a notification to every live subscriber.
    pub(crate) fn notify(&self, notify: Notify) {
        debug!(target: "room.store", kind = ?notify.kind, text = %notify.text, "Notify");
        let mut subscribers = self
            .notify_subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(notify.clone()).is_ok());
    }

    /// Move to `next` if the transition is allowed.
    ///
    /// Entering `Closed` also clears every collection and the local flags.
    pub(crate) fn set_room_state(&self, next: ConnectionState) -> bool {
        let changed = self.room.modify(|room| {
            if room.state == next {
                return false;
            }
            if !room.state.can_transition_to(next) {
                warn!(
                    target: "room.store",
                    from = ?room.state,
                    to = ?next,
                    "Ignoring invalid state transition"
                );
                return false;
            }
            room.state = next;
            if next == ConnectionState::Closed {
                room.active_speaker_id = None;
                room.stats_peer_id = None;
            }
            true
        });

        if changed && next == ConnectionState::Closed {
            self.peers.modify(clear_map);
            self.producers.modify(clear_map);
            self.consumers.modify(clear_map);
            self.data_producers.modify(clear_map);
            self.data_consumers.modify(clear_map);
            self.me.modify(|me| {
                me.clear_flags();
                true
            });
        }
        changed
    }

    pub(crate) fn modify_room(&self, f: impl FnOnce(&mut RoomInfo) -> bool) -> bool {
        self.room.modify(f)
    }

    pub(crate) fn modify_me(&self, f: impl FnOnce(&mut Me) -> bool) -> bool {
        self.me.modify(f)
    }
}

fn clear_map<R>(map: &mut RecordMap<R>) -> bool {
    let changed = !map.is_empty();
    map.clear();
    changed
}

/// Assign `value` to `slot`, reporting whether it changed.
pub(crate) fn set_field<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
