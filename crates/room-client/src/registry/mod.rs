//! `Registries` - concurrent maps of every open media resource and peer.
//!
//! An entry exists iff its media-engine object is open: entries own their
//! handles, and removal hands the handle back to the caller to close.
//! Lookups of missing ids return `None`/`false`; notifications routinely race
//! with local teardown, so absence is never an error.

mod peers;
mod resource_map;

pub use peers::PeerRegistry;
pub use resource_map::ResourceMap;

use crate::media::{Consumer, DataConsumer, DataProducer, Producer};
use crate::observability::metrics;
use crate::store::{
    set_field, ConsumerRecord, DataConsumerRecord, DataProducerRecord, PauseOrigin,
    ProducerRecord, ProducerSource, RoomStore,
};
use common::types::MediaKind;
use peers::Attachment;
use signaling_protocol::payloads::{
    ConsumerLayersChangedNotification, ConsumerScore, NewConsumerRequest,
    NewDataConsumerRequest, ScoreSample,
};
use std::sync::Arc;
use tracing::debug;

/// Handles removed by [`Registries::dispose_media`], to be closed by the caller.
#[derive(Default)]
pub struct DisposedMedia {
    pub producers: Vec<Arc<dyn Producer>>,
    pub consumers: Vec<Arc<dyn Consumer>>,
    pub data_producers: Vec<Arc<dyn DataProducer>>,
    pub data_consumers: Vec<Arc<dyn DataConsumer>>,
}

impl DisposedMedia {
    /// Close every handle.
    pub fn close_all(self) {
        self.producers.iter().for_each(|p| p.close());
        self.consumers.iter().for_each(|c| c.close());
        self.data_producers.iter().for_each(|d| d.close());
        self.data_consumers.iter().for_each(|d| d.close());
    }
}

#[derive(Debug)]
pub struct Registries {
    pub producers: ResourceMap<dyn Producer, ProducerRecord>,
    pub consumers: ResourceMap<dyn Consumer, ConsumerRecord>,
    pub data_producers: ResourceMap<dyn DataProducer, DataProducerRecord>,
    pub data_consumers: ResourceMap<dyn DataConsumer, DataConsumerRecord>,
    pub peers: PeerRegistry,
}

impl Registries {
    #[must_use]
    pub fn new(store: &Arc<RoomStore>) -> Self {
        Self {
            producers: ResourceMap::new(Arc::clone(&store.producers)),
            consumers: ResourceMap::new(Arc::clone(&store.consumers)),
            data_producers: ResourceMap::new(Arc::clone(&store.data_producers)),
            data_consumers: ResourceMap::new(Arc::clone(&store.data_consumers)),
            peers: PeerRegistry::new(Arc::clone(store)),
        }
    }

    // ========================================================================
    // Producers
    // ========================================================================

    pub fn add_producer(&self, handle: Arc<dyn Producer>, source: ProducerSource) {
        let record = ProducerRecord {
            id: handle.id().to_string(),
            kind: handle.kind(),
            source,
            paused: handle.is_paused(),
            score: Vec::new(),
        };
        debug!(target: "room.registry", producer_id = %record.id, source = source.as_str(), "Producer added");
        self.producers.insert(record.id.clone(), handle, record);
        metrics::set_producers_active(self.producers.len());
    }

    pub fn remove_producer(&self, producer_id: &str) -> Option<Arc<dyn Producer>> {
        let (handle, _) = self.producers.remove(producer_id)?;
        debug!(target: "room.registry", producer_id = %producer_id, "Producer removed");
        metrics::set_producers_active(self.producers.len());
        Some(handle)
    }

    /// The producer currently sending `source`, if any.
    #[must_use]
    pub fn producer_by_source(&self, source: ProducerSource) -> Option<(String, Arc<dyn Producer>)> {
        self.producers
            .find(|record| record.source == source)
            .into_iter()
            .next()
    }

    pub fn set_producer_paused(&self, producer_id: &str, paused: bool) -> bool {
        self.producers
            .update(producer_id, |record| set_field(&mut record.paused, paused))
    }

    pub fn set_producer_score(&self, producer_id: &str, score: Vec<ScoreSample>) -> bool {
        self.producers
            .update(producer_id, |record| set_field(&mut record.score, score))
    }

    // ========================================================================
    // Consumers
    // ========================================================================

    /// Register a consumer created for `request` and attach it to its peer.
    pub fn add_consumer(&self, handle: Arc<dyn Consumer>, request: &NewConsumerRequest) {
        let record = ConsumerRecord {
            id: request.id.clone(),
            peer_id: request.peer_id.clone(),
            producer_id: request.producer_id.clone(),
            kind: request.kind,
            consumer_type: request.consumer_type,
            locally_paused: false,
            remotely_paused: request.producer_paused,
            spatial_layer: None,
            temporal_layer: None,
            preferred_spatial_layer: None,
            preferred_temporal_layer: None,
            score: None,
        };
        self.consumers.insert(request.id.clone(), handle, record);
        self.peers
            .attach(&request.peer_id, Attachment::Consumer, &request.id);
        debug!(target: "room.registry", consumer_id = %request.id, peer_id = %request.peer_id, "Consumer added");
        metrics::set_consumers_active(self.consumers.len());
    }

    /// Unregister a consumer and detach it from its peer.
    pub fn remove_consumer(&self, consumer_id: &str) -> Option<Arc<dyn Consumer>> {
        let (handle, record) = self.consumers.remove(consumer_id)?;
        self.peers
            .detach(&record.peer_id, Attachment::Consumer, consumer_id);
        debug!(target: "room.registry", consumer_id = %consumer_id, "Consumer removed");
        metrics::set_consumers_active(self.consumers.len());
        Some(handle)
    }

    pub fn set_consumer_paused(&self, consumer_id: &str, origin: PauseOrigin, paused: bool) -> bool {
        self.consumers
            .update(consumer_id, |record| record.set_paused(origin, paused))
    }

    pub fn set_consumer_layers(&self, layers: &ConsumerLayersChangedNotification) -> bool {
        self.consumers.update(&layers.consumer_id, |record| {
            let spatial = set_field(&mut record.spatial_layer, layers.spatial_layer);
            let temporal = set_field(&mut record.temporal_layer, layers.temporal_layer);
            spatial || temporal
        })
    }

    pub fn set_consumer_score(&self, consumer_id: &str, score: ConsumerScore) -> bool {
        self.consumers
            .update(consumer_id, |record| set_field(&mut record.score, Some(score)))
    }

    /// Consumers of `kind`, sorted by id.
    #[must_use]
    pub fn consumers_of_kind(&self, kind: MediaKind) -> Vec<(String, Arc<dyn Consumer>)> {
        self.consumers.find(|record| record.kind == kind)
    }

    // ========================================================================
    // Data channels
    // ========================================================================

    pub fn add_data_producer(&self, handle: Arc<dyn DataProducer>, protocol: &str) {
        let record = DataProducerRecord {
            id: handle.id().to_string(),
            label: handle.label().to_string(),
            protocol: protocol.to_string(),
        };
        self.data_producers.insert(record.id.clone(), handle, record);
    }

    pub fn remove_data_producer(&self, data_producer_id: &str) -> Option<Arc<dyn DataProducer>> {
        self.data_producers
            .remove(data_producer_id)
            .map(|(handle, _)| handle)
    }

    /// The data producer with `label`, if any.
    #[must_use]
    pub fn data_producer_by_label(&self, label: &str) -> Option<Arc<dyn DataProducer>> {
        self.data_producers
            .find(|record| record.label == label)
            .into_iter()
            .next()
            .map(|(_, handle)| handle)
    }

    pub fn add_data_consumer(&self, handle: Arc<dyn DataConsumer>, request: &NewDataConsumerRequest) {
        let record = DataConsumerRecord {
            id: request.id.clone(),
            peer_id: request.peer_id.clone(),
            data_producer_id: request.data_producer_id.clone(),
            label: request.label.clone(),
            protocol: request.protocol.clone(),
        };
        self.data_consumers.insert(request.id.clone(), handle, record);
        if let Some(peer_id) = &request.peer_id {
            self.peers
                .attach(peer_id, Attachment::DataConsumer, &request.id);
        }
    }

    pub fn remove_data_consumer(&self, data_consumer_id: &str) -> Option<Arc<dyn DataConsumer>> {
        let (handle, record) = self.data_consumers.remove(data_consumer_id)?;
        if let Some(peer_id) = &record.peer_id {
            self.peers
                .detach(peer_id, Attachment::DataConsumer, data_consumer_id);
        }
        Some(handle)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Remove every producer, consumer and data channel.
    pub fn dispose_media(&self) -> DisposedMedia {
        let disposed = DisposedMedia {
            producers: self
                .producers
                .drain()
                .into_iter()
                .map(|(handle, _)| handle)
                .collect(),
            consumers: self
                .consumers
                .drain()
                .into_iter()
                .map(|(handle, record)| {
                    self.peers
                        .detach(&record.peer_id, Attachment::Consumer, &record.id);
                    handle
                })
                .collect(),
            data_producers: self
                .data_producers
                .drain()
                .into_iter()
                .map(|(handle, _)| handle)
                .collect(),
            data_consumers: self
                .data_consumers
                .drain()
                .into_iter()
                .map(|(handle, record)| {
                    if let Some(peer_id) = &record.peer_id {
                        self.peers
                            .detach(peer_id, Attachment::DataConsumer, &record.id);
                    }
                    handle
                })
                .collect(),
        };
        metrics::set_producers_active(0);
        metrics::set_consumers_active(0);
        disposed
    }
}
