//! End-to-end scenarios for the room session.
//!
//! Each test spawns a `RoomClient` against the in-memory signaling server and
//! the recording media engine, then drives it through commands, server
//! requests and notifications while observing the store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use common::types::{ConnectionState, MediaKind};
use room_client::errors::RoomError;
use room_client::media::{Consumer, Producer};
use room_client::store::{Notify, NotifyKind, ProducerSource};
use room_client::transport::ReconnectPolicy;
use room_client::{RoomClient, RoomConfig, RoomStore};
use room_test_utils::{
    is_accepted, new_consumer, new_data_consumer, peer_info, test_config, to_value,
    wait_for_state, wait_until, MockMediaEngine, MockSignalingServer, Reply, WAIT_TIMEOUT,
};
use serde_json::json;
use signaling_protocol::message::{Response, ResponseOutcome};
use signaling_protocol::payloads::{ConsumerScore, ScoreSample};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// Harness
// ============================================================================

struct Session {
    server: MockSignalingServer,
    engine: Arc<MockMediaEngine>,
    client: RoomClient,
    store: Arc<RoomStore>,
    task: JoinHandle<()>,
    notifications: mpsc::UnboundedReceiver<Notify>,
}

impl Session {
    /// Spawn a client and issue `join` without waiting for the outcome.
    fn spawn(config: RoomConfig, server: MockSignalingServer, engine: Arc<MockMediaEngine>) -> Self {
        let (client, task) = RoomClient::spawn(config, engine.clone(), server.connector());
        let store = client.store();
        let notifications = store.subscribe_notifications();
        client.join().unwrap();
        Self {
            server,
            engine,
            client,
            store,
            task,
            notifications,
        }
    }

    /// Spawn, join and wait for the automatic post-join commands to finish.
    async fn joined(
        config: RoomConfig,
        server: MockSignalingServer,
        engine: Arc<MockMediaEngine>,
    ) -> Self {
        let session = Self::spawn(config, server, engine);
        wait_for_state(&session.store, ConnectionState::Connected).await;
        session.client.flush().await;
        session
    }

    async fn default_joined() -> Self {
        Self::joined(
            test_config("session"),
            MockSignalingServer::builder()
                .with_peer(peer_info("alice", "Alice"))
                .build(),
            MockMediaEngine::builder().build(),
        )
        .await
    }

    /// Send a server request and wait for the client's answer.
    async fn server_request(&self, method: &str, data: serde_json::Value) -> Response {
        let id = self.server.request(method, data);
        self.server.wait_for_response(id).await
    }

    async fn add_consumer(&self, id: &str, kind: MediaKind) {
        let response = self
            .server_request("newConsumer", to_value(&new_consumer(id, "alice", kind)))
            .await;
        assert!(is_accepted(&response), "newConsumer {id} rejected: {response:?}");
    }

    async fn expect_notification(&mut self, predicate: impl Fn(&Notify) -> bool) -> Notify {
        let wait = async {
            loop {
                let notify = self
                    .notifications
                    .recv()
                    .await
                    .expect("notification channel closed");
                if predicate(&notify) {
                    return notify;
                }
            }
        };
        tokio::time::timeout(WAIT_TIMEOUT, wait)
            .await
            .expect("expected notification never arrived")
    }

    async fn finished(self) -> Self {
        let Self {
            server,
            engine,
            client,
            store,
            task,
            notifications,
        } = self;
        tokio::time::timeout(WAIT_TIMEOUT, task)
            .await
            .expect("room actor did not stop")
            .expect("room actor panicked");
        Self {
            server,
            engine,
            client,
            store,
            task: tokio::spawn(async {}),
            notifications,
        }
    }
}

async fn wait_for_close_frame(server: &MockSignalingServer) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while server.client_closes().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "close frame never arrived");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(server.client_closes(), vec![(1000, "bye".to_string())]);
}

fn mic_producer_id(store: &RoomStore) -> String {
    store
        .producers()
        .snapshot()
        .into_iter()
        .find(|(_, p)| p.source == ProducerSource::Mic)
        .map(|(id, _)| id)
        .expect("no mic producer")
}

fn rejected(response: &Response) -> (i64, String) {
    match &response.outcome {
        ResponseOutcome::Rejected { code, reason } => (*code, reason.clone()),
        ResponseOutcome::Accepted(data) => panic!("expected a reject, got accept {data}"),
    }
}

// ============================================================================
// Join
// ============================================================================

#[tokio::test]
async fn test_join_produce_and_consume() {
    let mut session = Session::default_joined().await;

    assert_eq!(session.store.state(), ConnectionState::Connected);
    session
        .expect_notification(|n| n.text == "You are in the room!")
        .await;

    let methods = session.server.methods();
    assert_eq!(
        &methods[..4],
        &[
            "getRouterRtpCapabilities",
            "createWebRtcTransport",
            "createWebRtcTransport",
            "join"
        ]
    );

    let create = session.server.requests_for("createWebRtcTransport");
    assert_eq!(create[0].data["producing"], json!(true));
    assert_eq!(create[0].data["consuming"], json!(false));
    assert_eq!(create[1].data["producing"], json!(false));
    assert_eq!(create[1].data["consuming"], json!(true));
    assert!(create[0].data.get("sctpCapabilities").is_some());

    let join = session.server.wait_for_request("join").await;
    assert_eq!(join.data["displayName"], json!("Tester"));
    assert!(join.data.get("rtpCapabilities").is_some());
    assert!(join.data.get("sctpCapabilities").is_some());

    assert_eq!(session.engine.load_calls(), 1);
    assert!(session.engine.send_transport().is_some());
    assert!(session.engine.recv_transport().is_some());
    assert!(session.store.consumers().snapshot().is_empty());

    let peers = session.store.peers().snapshot();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers["alice"].display_name, "Alice");

    let me = session.store.me().snapshot();
    assert!(me.can_send_mic);
    assert!(me.can_send_cam);
    assert!(me.can_change_cam);
    assert!(!me.cam_in_progress);

    // Mic, cam and chat are enabled right after joining.
    let producers = session.store.producers().snapshot();
    let sources: Vec<ProducerSource> = producers.values().map(|p| p.source).collect();
    assert_eq!(producers.len(), 2);
    assert!(sources.contains(&ProducerSource::Mic));
    assert!(sources.contains(&ProducerSource::Cam));
    assert_eq!(session.server.requests_for("produce").len(), 2);
    assert_eq!(session.store.data_producers().snapshot().len(), 1);

    let send = session.engine.send_transport().unwrap();
    assert!(send.is_connected());
    assert_eq!(session.server.requests_for("connectWebRtcTransport").len(), 1);

    let data_producers = send.data_producers();
    let chat = &data_producers[0];
    assert!(!chat.ordered());
    assert_eq!(chat.max_retransmits(), Some(1));
}

#[tokio::test]
async fn test_join_empty_room() {
    let mut session = Session::joined(
        test_config("empty"),
        MockSignalingServer::default(),
        MockMediaEngine::builder().build(),
    )
    .await;

    session
        .expect_notification(|n| n.text == "You are in the room!")
        .await;
    assert_eq!(session.store.state(), ConnectionState::Connected);
    assert!(session.store.peers().snapshot().is_empty());
    assert!(session.client.registries().peers.is_empty());
    assert!(session.store.room().snapshot().active_speaker_id.is_none());

    let join = session.server.wait_for_request("join").await;
    assert_eq!(join.data["displayName"], json!("Tester"));
    assert_eq!(session.store.producers().snapshot().len(), 2);
    assert_eq!(session.store.data_producers().snapshot().len(), 1);
}

#[tokio::test]
async fn test_join_as_observer_skips_transports() {
    let config = test_config("observer")
        .with_produce(false)
        .with_consume(false)
        .with_data_channel(false);
    let session = Session::joined(
        config,
        MockSignalingServer::default(),
        MockMediaEngine::builder().build(),
    )
    .await;

    assert_eq!(
        session.server.methods(),
        vec!["getRouterRtpCapabilities", "join"]
    );
    let join = session.server.wait_for_request("join").await;
    assert!(join.data.get("rtpCapabilities").is_none());
    assert!(join.data.get("sctpCapabilities").is_none());
    assert!(session.engine.send_transport().is_none());
    assert!(session.engine.recv_transport().is_none());
    assert!(session.store.producers().snapshot().is_empty());
}

#[tokio::test]
async fn test_join_without_audio_device_skips_mic() {
    let session = Session::joined(
        test_config("no-mic"),
        MockSignalingServer::default(),
        MockMediaEngine::builder().without_audio().build(),
    )
    .await;

    let me = session.store.me().snapshot();
    assert!(!me.can_send_mic);
    assert!(me.can_send_cam);

    let producers = session.store.producers().snapshot();
    assert_eq!(producers.len(), 1);
    assert!(producers.values().all(|p| p.source == ProducerSource::Cam));
}

#[tokio::test]
async fn test_join_twice_is_invalid() {
    let session = Session::default_joined().await;

    assert!(matches!(
        session.client.join(),
        Err(RoomError::InvalidState(_))
    ));
    assert_eq!(session.server.requests_for("join").len(), 1);
}

#[tokio::test]
async fn test_join_rejected_closes_session() {
    let server = MockSignalingServer::builder()
        .reject("join", 500, "room full")
        .build();
    let session = Session::spawn(
        test_config("full"),
        server,
        MockMediaEngine::builder().build(),
    );
    let mut session = session.finished().await;

    let notify = session
        .expect_notification(|n| n.text.starts_with("Could not join the room"))
        .await;
    assert_eq!(notify.kind, NotifyKind::Error);
    assert!(notify.text.contains("room full"));
    assert_eq!(session.store.state(), ConnectionState::Closed);
    assert!(session.engine.is_released());
    assert!(session.engine.send_transport().unwrap().is_closed());
    assert!(session.client.is_closed());
}

// ============================================================================
// Server requests
// ============================================================================

#[tokio::test]
async fn test_new_consumer_registers_consumer() {
    let session = Session::default_joined().await;

    session.add_consumer("c1", MediaKind::Audio).await;

    let consumers = session.store.consumers().snapshot();
    assert_eq!(consumers.len(), 1);
    let record = &consumers["c1"];
    assert_eq!(record.peer_id, "alice");
    assert_eq!(record.producer_id, "remote-c1");
    assert_eq!(record.kind, MediaKind::Audio);
    assert!(!record.locally_paused);
    assert!(!record.remotely_paused);

    assert!(session.store.peers().snapshot()["alice"]
        .consumers
        .contains("c1"));
    assert!(session
        .engine
        .recv_transport()
        .unwrap()
        .consumer("c1")
        .is_some());
}

#[tokio::test]
async fn test_new_consumer_dropped_when_accept_cannot_be_sent() {
    let config = test_config("late-accept")
        .with_produce(false)
        .with_server_request_timeout(Duration::from_millis(50));
    let session = Session::joined(
        config,
        MockSignalingServer::builder()
            .silent("connectWebRtcTransport")
            .build(),
        MockMediaEngine::builder().build(),
    )
    .await;

    // The first consume connects the receive transport; hold that answer
    // until the server request has already timed out.
    let id = session.server.request(
        "newConsumer",
        to_value(&new_consumer("c1", "alice", MediaKind::Audio)),
    );
    let connect = session
        .server
        .wait_for_request("connectWebRtcTransport")
        .await;
    let response = session.server.wait_for_response(id).await;
    assert_eq!(rejected(&response), (408, "request timeout".to_string()));

    session.server.respond(connect.id, Reply::Accept(json!({})));

    let recv = session.engine.recv_transport().unwrap();
    wait_until(&session.store, |_| {
        recv.consumer("c1").is_some_and(|consumer| consumer.is_closed())
    })
    .await;
    session.client.flush().await;
    assert!(session.store.consumers().snapshot().is_empty());
    assert!(session.client.registries().consumers.is_empty());
    assert_eq!(session.server.requests_for("resumeConsumer").len(), 0);
}

#[tokio::test]
async fn test_new_consumer_refused_when_not_consuming() {
    let session = Session::joined(
        test_config("no-consume").with_consume(false),
        MockSignalingServer::default(),
        MockMediaEngine::builder().build(),
    )
    .await;
    let consumers_version = session.store.consumers().version();

    let response = session
        .server_request(
            "newConsumer",
            to_value(&new_consumer("c1", "alice", MediaKind::Video)),
        )
        .await;

    assert_eq!(
        rejected(&response),
        (403, "I do not want to consume".to_string())
    );
    assert!(session.store.consumers().snapshot().is_empty());
    assert_eq!(session.store.consumers().version(), consumers_version);
    assert!(session.engine.recv_transport().is_none());
}

#[tokio::test]
async fn test_new_consumer_with_malformed_payload_is_bad_request() {
    let session = Session::default_joined().await;

    let response = session
        .server_request("newConsumer", json!({ "id": 42 }))
        .await;

    let (code, _) = rejected(&response);
    assert_eq!(code, 400);
    assert!(session.store.consumers().snapshot().is_empty());
}

#[tokio::test]
async fn test_new_consumer_engine_failure_notifies_and_rejects() {
    let mut session = Session::joined(
        test_config("broken"),
        MockSignalingServer::default(),
        MockMediaEngine::builder().fail_consume("decoder missing").build(),
    )
    .await;

    let response = session
        .server_request(
            "newConsumer",
            to_value(&new_consumer("c1", "alice", MediaKind::Video)),
        )
        .await;

    let (code, reason) = rejected(&response);
    assert_eq!(code, 500);
    assert!(reason.contains("decoder missing"));
    let notify = session
        .expect_notification(|n| n.text.starts_with("Error creating a Consumer"))
        .await;
    assert_eq!(notify.kind, NotifyKind::Error);
    assert!(session.store.consumers().snapshot().is_empty());
}

#[tokio::test]
async fn test_new_data_consumer_refused_without_data_channels() {
    let session = Session::joined(
        test_config("no-dc").with_data_channel(false),
        MockSignalingServer::default(),
        MockMediaEngine::builder().build(),
    )
    .await;

    let response = session
        .server_request(
            "newDataConsumer",
            to_value(&new_data_consumer("dc1", "alice", "chat")),
        )
        .await;

    assert_eq!(
        rejected(&response),
        (403, "I do not want DataChannels".to_string())
    );
    assert!(session.store.data_consumers().snapshot().is_empty());
    assert!(session.store.data_producers().snapshot().is_empty());
}

#[tokio::test]
async fn test_unknown_server_request_is_forbidden() {
    let session = Session::default_joined().await;

    let response = session.server_request("fooBar", json!({})).await;

    assert_eq!(rejected(&response), (403, "unknown method fooBar".to_string()));
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_peer_join_rename_and_leave() {
    let mut session = Session::default_joined().await;

    session
        .server
        .notify("newPeer", to_value(&peer_info("bob", "Bob")));
    session
        .expect_notification(|n| n.text == "Bob has joined the room")
        .await;
    assert!(session.store.peers().snapshot().contains_key("bob"));

    session.server.notify(
        "peerDisplayNameChanged",
        json!({ "peerId": "bob", "displayName": "Robert", "oldDisplayName": "Bob" }),
    );
    session
        .expect_notification(|n| n.text == "Bob is now Robert")
        .await;
    assert_eq!(
        session.store.peers().snapshot()["bob"].display_name,
        "Robert"
    );

    session.server.notify("peerClosed", json!({ "peerId": "bob" }));
    wait_until(&session.store, |store| {
        !store.peers().snapshot().contains_key("bob")
    })
    .await;
    assert!(session.store.peers().snapshot().contains_key("alice"));
}

#[tokio::test]
async fn test_consumer_closed_notification_removes_consumer() {
    let session = Session::default_joined().await;
    session.add_consumer("c1", MediaKind::Video).await;

    session
        .server
        .notify("consumerClosed", json!({ "consumerId": "c1" }));

    wait_until(&session.store, |store| store.consumers().snapshot().is_empty()).await;
    let consumer = session.engine.recv_transport().unwrap().consumer("c1").unwrap();
    assert!(consumer.is_closed());
    assert!(!session.store.peers().snapshot()["alice"]
        .consumers
        .contains("c1"));
}

#[tokio::test]
async fn test_remote_pause_and_resume() {
    let session = Session::default_joined().await;
    session.add_consumer("c1", MediaKind::Video).await;

    session
        .server
        .notify("consumerPaused", json!({ "consumerId": "c1" }));
    wait_until(&session.store, |store| {
        store.consumers().snapshot()["c1"].remotely_paused
    })
    .await;
    assert!(!session.store.consumers().snapshot()["c1"].locally_paused);

    session
        .server
        .notify("consumerResumed", json!({ "consumerId": "c1" }));
    wait_until(&session.store, |store| {
        !store.consumers().snapshot()["c1"].remotely_paused
    })
    .await;
}

#[tokio::test]
async fn test_active_speaker_and_unknown_notifications() {
    let session = Session::default_joined().await;

    session.server.notify("somethingNew", json!({ "x": 1 }));
    session
        .server
        .notify("activeSpeaker", json!({ "peerId": "alice", "volume": -20 }));

    wait_until(&session.store, |store| {
        store.room().snapshot().active_speaker_id.as_deref() == Some("alice")
    })
    .await;
    assert_eq!(session.store.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_score_layer_and_bandwidth_notifications() {
    let session = Session::default_joined().await;
    session.add_consumer("c1", MediaKind::Video).await;
    let response = session
        .server_request(
            "newDataConsumer",
            to_value(&new_data_consumer("dc1", "alice", "chat")),
        )
        .await;
    assert!(is_accepted(&response));
    let mic_id = mic_producer_id(&session.store);

    session.server.notify(
        "producerScore",
        json!({ "producerId": mic_id.clone(), "score": [{ "encodingIdx": 0, "ssrc": 1111, "score": 9 }] }),
    );
    let expected = vec![ScoreSample {
        encoding_idx: 0,
        ssrc: 1111,
        rid: None,
        score: 9,
    }];
    wait_until(&session.store, |store| {
        store.producers().snapshot()[&mic_id].score == expected
    })
    .await;

    session.server.notify(
        "consumerLayersChanged",
        json!({ "consumerId": "c1", "spatialLayer": 2, "temporalLayer": 1 }),
    );
    wait_until(&session.store, |store| {
        let record = &store.consumers().snapshot()["c1"];
        record.spatial_layer == Some(2) && record.temporal_layer == Some(1)
    })
    .await;

    session.server.notify(
        "consumerScore",
        json!({ "consumerId": "c1", "score": { "score": 7, "producerScore": 8, "producerScores": [8] } }),
    );
    let expected = Some(ConsumerScore {
        score: 7,
        producer_score: 8,
        producer_scores: vec![8],
    });
    wait_until(&session.store, |store| {
        store.consumers().snapshot()["c1"].score == expected
    })
    .await;

    session.server.notify(
        "downlinkBwe",
        json!({ "desiredBitrate": 1_000_000, "effectiveDesiredBitrate": 800_000, "availableBitrate": 600_000 }),
    );
    session
        .server
        .notify("dataConsumerClosed", json!({ "dataConsumerId": "dc1" }));
    wait_until(&session.store, |store| {
        store.data_consumers().snapshot().is_empty()
    })
    .await;

    assert!(session.engine.recv_transport().unwrap().data_consumers()[0].is_closed());
    assert!(!session.store.peers().snapshot()["alice"]
        .data_consumers
        .contains("dc1"));
    assert_eq!(session.store.consumers().snapshot().len(), 1);
    assert_eq!(session.store.state(), ConnectionState::Connected);
}

// ============================================================================
// Producers
// ============================================================================

#[tokio::test]
async fn test_producer_transport_close_removes_producer() {
    let session = Session::default_joined().await;
    let mic_id = mic_producer_id(&session.store);
    let send = session.engine.send_transport().unwrap();

    send.close_producer_transport(&mic_id);

    wait_until(&session.store, |store| {
        !store.producers().snapshot().contains_key(&mic_id)
    })
    .await;
    let mic = send
        .producers()
        .into_iter()
        .find(|p| p.id() == mic_id)
        .unwrap();
    assert!(mic.is_closed());
    assert!(session.client.registries().producers.record(&mic_id).is_none());
    assert_eq!(session.store.producers().snapshot().len(), 1);
    assert!(session.server.requests_for("closeProducer").is_empty());
}

#[tokio::test]
async fn test_disable_cam_closes_producer_once() {
    let session = Session::default_joined().await;
    let (cam_id, _) = session
        .store
        .producers()
        .snapshot()
        .into_iter()
        .find(|(_, p)| p.source == ProducerSource::Cam)
        .unwrap();

    session.client.disable_cam().unwrap();
    session.client.disable_cam().unwrap();
    session.client.flush().await;

    let closes = session.server.requests_for("closeProducer");
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].data["producerId"], json!(cam_id));

    let producers = session.store.producers().snapshot();
    assert_eq!(producers.len(), 1);
    assert!(producers.values().all(|p| p.source == ProducerSource::Mic));

    let send = session.engine.send_transport().unwrap();
    let closed: Vec<bool> = send.producers().iter().map(|p| p.is_closed()).collect();
    assert_eq!(closed.iter().filter(|c| **c).count(), 1);

    session.client.enable_cam().unwrap();
    session.client.flush().await;
    assert_eq!(session.server.requests_for("produce").len(), 3);
    assert_eq!(session.store.producers().snapshot().len(), 2);
}

#[tokio::test]
async fn test_enable_cam_twice_produces_once() {
    let session = Session::default_joined().await;

    session.client.enable_cam().unwrap();
    session.client.flush().await;

    assert_eq!(session.server.requests_for("produce").len(), 2);
}

#[tokio::test]
async fn test_enable_cam_track_failure_notifies() {
    let mut session = Session::joined(
        test_config("no-cam"),
        MockSignalingServer::default(),
        MockMediaEngine::builder().fail_track(MediaKind::Video).build(),
    )
    .await;

    let notify = session
        .expect_notification(|n| n.text.starts_with("Error enabling webcam"))
        .await;
    assert_eq!(notify.kind, NotifyKind::Error);
    assert!(!session.store.me().snapshot().cam_in_progress);
    assert_eq!(session.store.producers().snapshot().len(), 1);
}

#[tokio::test]
async fn test_mute_and_unmute_mic() {
    let session = Session::default_joined().await;

    session.client.mute_mic().unwrap();
    session.client.flush().await;

    assert_eq!(session.server.requests_for("pauseProducer").len(), 1);
    let producers = session.store.producers().snapshot();
    let mic = producers
        .values()
        .find(|p| p.source == ProducerSource::Mic)
        .unwrap();
    assert!(mic.paused);

    session.client.unmute_mic().unwrap();
    session.client.flush().await;

    assert_eq!(session.server.requests_for("resumeProducer").len(), 1);
    let producers = session.store.producers().snapshot();
    assert!(producers.values().all(|p| !p.paused));
}

#[tokio::test]
async fn test_change_cam() {
    let session = Session::default_joined().await;

    session.client.change_cam().unwrap();
    session.client.flush().await;

    assert_eq!(session.engine.camera_switches(), 1);
    assert!(!session.store.me().snapshot().cam_in_progress);
}

#[tokio::test]
async fn test_change_cam_ignored_with_single_camera() {
    let session = Session::joined(
        test_config("single-cam"),
        MockSignalingServer::default(),
        MockMediaEngine::builder().single_camera().build(),
    )
    .await;

    session.client.change_cam().unwrap();
    session.client.flush().await;

    assert!(!session.store.me().snapshot().can_change_cam);
    assert_eq!(session.engine.camera_switches(), 0);
}

// ============================================================================
// Consumers
// ============================================================================

#[tokio::test]
async fn test_audio_only_pauses_video_consumers() {
    let session = Session::default_joined().await;
    session.add_consumer("video", MediaKind::Video).await;
    session.add_consumer("audio", MediaKind::Audio).await;

    session.client.enable_audio_only().unwrap();
    session.client.flush().await;

    let consumers = session.store.consumers().snapshot();
    assert!(consumers["video"].locally_paused);
    assert!(!consumers["audio"].locally_paused);
    let pauses = session.server.requests_for("pauseConsumer");
    assert_eq!(pauses.len(), 1);
    assert_eq!(pauses[0].data["consumerId"], json!("video"));

    let recv = session.engine.recv_transport().unwrap();
    assert!(recv.consumer("video").unwrap().is_paused());
    assert!(!recv.consumer("audio").unwrap().is_paused());

    let me = session.store.me().snapshot();
    assert!(me.audio_only);
    assert!(!me.audio_only_in_progress);
    assert!(session
        .store
        .producers()
        .snapshot()
        .values()
        .all(|p| p.source != ProducerSource::Cam));

    // Video arriving while audio-only starts paused.
    session.add_consumer("late-video", MediaKind::Video).await;
    wait_until(&session.store, |store| {
        store
            .consumers()
            .snapshot()
            .get("late-video")
            .is_some_and(|c| c.locally_paused)
    })
    .await;

    session.client.disable_audio_only().unwrap();
    session.client.flush().await;

    let consumers = session.store.consumers().snapshot();
    assert!(consumers.values().all(|c| !c.locally_paused));
    assert_eq!(session.server.requests_for("resumeConsumer").len(), 2);
    assert!(!session.store.me().snapshot().audio_only);
    assert!(session
        .store
        .producers()
        .snapshot()
        .values()
        .any(|p| p.source == ProducerSource::Cam));
}

#[tokio::test]
async fn test_mute_audio_pauses_audio_consumers() {
    let session = Session::default_joined().await;
    session.add_consumer("audio", MediaKind::Audio).await;
    session.add_consumer("video", MediaKind::Video).await;

    session.client.mute_audio().unwrap();
    session.client.flush().await;

    let consumers = session.store.consumers().snapshot();
    assert!(consumers["audio"].locally_paused);
    assert!(!consumers["video"].locally_paused);
    assert!(session.store.me().snapshot().audio_muted);

    session.client.unmute_audio().unwrap();
    session.client.flush().await;

    assert!(!session.store.consumers().snapshot()["audio"].locally_paused);
    assert!(!session.store.me().snapshot().audio_muted);
}

#[tokio::test]
async fn test_pause_consumer_failure_leaves_record_untouched() {
    let server = MockSignalingServer::builder()
        .with_peer(peer_info("alice", "Alice"))
        .reject("pauseConsumer", 500, "consumer gone")
        .build();
    let mut session = Session::joined(
        test_config("pause-fail"),
        server,
        MockMediaEngine::builder().build(),
    )
    .await;
    session.add_consumer("audio", MediaKind::Audio).await;

    session.client.mute_audio().unwrap();
    session.client.flush().await;

    session
        .expect_notification(|n| n.text.starts_with("Error pausing Consumer"))
        .await;
    assert!(!session.store.consumers().snapshot()["audio"].locally_paused);
}

#[tokio::test]
async fn test_request_consumer_key_frame() {
    let mut session = Session::default_joined().await;
    session.add_consumer("video", MediaKind::Video).await;

    session.client.request_consumer_key_frame("video").unwrap();
    session.client.flush().await;

    let requests = session.server.requests_for("requestConsumerKeyFrame");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].data["consumerId"], json!("video"));
    session
        .expect_notification(|n| n.text == "Keyframe requested for video consumer")
        .await;
}

// ============================================================================
// Data channels
// ============================================================================

#[tokio::test]
async fn test_chat_send_and_receive() {
    let mut session = Session::default_joined().await;

    session.client.send_chat_message("hi there").unwrap();
    session.client.flush().await;

    let send = session.engine.send_transport().unwrap();
    assert_eq!(send.data_producers()[0].sent_text(), vec!["hi there"]);
    assert_eq!(session.server.requests_for("produceData").len(), 1);

    let response = session
        .server_request(
            "newDataConsumer",
            to_value(&new_data_consumer("dc1", "alice", "chat")),
        )
        .await;
    assert!(is_accepted(&response));
    assert!(session.store.data_consumers().snapshot().contains_key("dc1"));
    assert!(session.store.peers().snapshot()["alice"]
        .data_consumers
        .contains("dc1"));

    session
        .engine
        .recv_transport()
        .unwrap()
        .deliver_data("dc1", "hello");
    let notify = session
        .expect_notification(|n| n.text.contains("says"))
        .await;
    assert_eq!(notify.text, "Alice says: hello");
    assert_eq!(notify.kind, NotifyKind::Info);
}

#[tokio::test]
async fn test_chat_without_data_channels_reports_missing_producer() {
    let mut session = Session::joined(
        test_config("no-chat").with_data_channel(false),
        MockSignalingServer::default(),
        MockMediaEngine::builder().build(),
    )
    .await;

    session.client.send_chat_message("anyone?").unwrap();
    session
        .expect_notification(|n| n.text == "No chat DataProducer")
        .await;
    assert!(session.server.requests_for("produceData").is_empty());
}

// ============================================================================
// Session operations
// ============================================================================

#[tokio::test]
async fn test_restart_ice_on_both_transports() {
    let session = Session::default_joined().await;

    session.client.restart_ice().unwrap();
    session.client.flush().await;

    let send = session.engine.send_transport().unwrap();
    let recv = session.engine.recv_transport().unwrap();
    let ids: Vec<serde_json::Value> = session
        .server
        .requests_for("restartIce")
        .into_iter()
        .map(|r| r.data["transportId"].clone())
        .collect();
    assert_eq!(
        ids,
        vec![json!(send.transport_id()), json!(recv.transport_id())]
    );
    assert_eq!(send.ice_restarts().len(), 1);
    assert_eq!(recv.ice_restarts().len(), 1);
    assert!(!session.store.me().snapshot().restart_ice_in_progress);
}

#[tokio::test]
async fn test_change_display_name() {
    let mut session = Session::default_joined().await;

    session.client.change_display_name("Bob").unwrap();
    session.client.flush().await;

    let request = session.server.wait_for_request("changeDisplayName").await;
    assert_eq!(request.data["displayName"], json!("Bob"));
    assert_eq!(session.store.me().snapshot().display_name, "Bob");
    session
        .expect_notification(|n| n.text == "Display name changed")
        .await;
}

#[tokio::test]
async fn test_change_display_name_failure_keeps_old_name() {
    let server = MockSignalingServer::builder()
        .reject("changeDisplayName", 500, "name taken")
        .build();
    let mut session = Session::joined(
        test_config("rename"),
        server,
        MockMediaEngine::builder().build(),
    )
    .await;
    let me_version = session.store.me().version();

    session.client.change_display_name("Bob").unwrap();
    session.client.flush().await;

    let notify = session
        .expect_notification(|n| n.text.starts_with("Could not change display name"))
        .await;
    assert_eq!(notify.kind, NotifyKind::Error);
    assert_eq!(session.store.me().snapshot().display_name, "Tester");
    // Republished so views bound to the old value reset.
    assert!(session.store.me().version() > me_version);
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_disconnect_disposes_media_and_rejoins() {
    let mut session = Session::default_joined().await;
    session.add_consumer("c1", MediaKind::Audio).await;
    let first_send = session.engine.send_transport().unwrap();
    let first_recv = session.engine.recv_transport().unwrap();
    let first_producers = first_send.producers();

    session.server.drop_connection();

    session
        .expect_notification(|n| n.text == "WebSocket disconnected")
        .await;
    session.server.wait_for_nth_request("join", 2).await;
    wait_for_state(&session.store, ConnectionState::Connected).await;
    session.client.flush().await;

    assert!(first_send.is_closed());
    assert!(first_recv.is_closed());
    assert!(first_producers.iter().all(|p| p.is_closed()));
    assert!(first_recv.consumer("c1").unwrap().is_closed());

    assert_eq!(session.engine.load_calls(), 1, "capabilities loaded once");
    assert_eq!(session.engine.send_transports().len(), 2);
    assert_eq!(session.engine.recv_transports().len(), 2);
    assert!(session.store.consumers().snapshot().is_empty());
    assert_eq!(session.store.producers().snapshot().len(), 2);
    assert_eq!(session.store.peers().snapshot().len(), 1);
}

#[tokio::test]
async fn test_command_during_reconnect_fails_fast_and_rejoins() {
    let config = test_config("backoff").with_reconnect(ReconnectPolicy {
        max_retries: 3,
        factor: 2,
        min_timeout: Duration::from_millis(300),
        max_timeout: Duration::from_millis(300),
    });
    let mut session = Session::joined(
        config,
        MockSignalingServer::builder()
            .with_peer(peer_info("alice", "Alice"))
            .build(),
        MockMediaEngine::builder().build(),
    )
    .await;

    session.server.drop_connection();
    session
        .expect_notification(|n| n.text == "WebSocket disconnected")
        .await;
    assert_eq!(session.store.state(), ConnectionState::Connecting);

    session.client.change_display_name("New Name").unwrap();
    session
        .expect_notification(|n| n.text.starts_with("Could not change display name"))
        .await;

    session.server.wait_for_nth_request("join", 2).await;
    wait_for_state(&session.store, ConnectionState::Connected).await;
    assert_eq!(session.server.connection_count(), 2);
    assert!(session.server.requests_for("changeDisplayName").is_empty());
    assert_eq!(session.store.me().snapshot().display_name, "Tester");
}

#[tokio::test]
async fn test_connection_failures_before_join_are_reported() {
    let server = MockSignalingServer::builder().fail_connects(1).build();
    let mut session = Session::spawn(
        test_config("flaky"),
        server,
        MockMediaEngine::builder().build(),
    );

    session
        .expect_notification(|n| n.text == "WebSocket connection failed")
        .await;
    wait_for_state(&session.store, ConnectionState::Connected).await;
    assert_eq!(session.server.connection_count(), 2);
}

#[tokio::test]
async fn test_server_close_closes_session() {
    let session = Session::default_joined().await;

    session.server.close_connection();
    let session = session.finished().await;

    assert_eq!(session.store.state(), ConnectionState::Closed);
    assert!(session.engine.is_released());
    assert!(session.client.is_closed());
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_close_is_idempotent() {
    let session = Session::default_joined().await;
    let mut room = session.store.room().subscribe();
    let _ = room.borrow_and_update();

    session.client.close();
    session.client.close();
    let session = session.finished().await;

    assert_eq!(session.store.state(), ConnectionState::Closed);
    assert!(room.has_changed().unwrap());
    assert_eq!(room.borrow_and_update().value.state, ConnectionState::Closed);
    assert!(!room.has_changed().unwrap_or(false));

    assert!(session.engine.is_released());
    assert!(session.engine.send_transport().unwrap().is_closed());
    assert!(session.engine.recv_transport().unwrap().is_closed());
    assert!(session.store.producers().snapshot().is_empty());
    assert!(session.store.peers().snapshot().is_empty());
    assert!(session.client.registries().peers.is_empty());
    assert!(matches!(
        session.client.enable_mic(),
        Err(RoomError::Closed)
    ));

    wait_for_close_frame(&session.server).await;
}

#[tokio::test]
async fn test_close_interrupts_unanswered_join() {
    let session = Session::spawn(
        test_config("stuck-join"),
        MockSignalingServer::builder().silent("join").build(),
        MockMediaEngine::builder().build(),
    );
    session.server.wait_for_request("join").await;
    assert_eq!(session.store.state(), ConnectionState::Connecting);

    session.client.close();
    let session = session.finished().await;

    assert_eq!(session.store.state(), ConnectionState::Closed);
    assert!(session.engine.is_released());
    assert!(session.engine.send_transport().unwrap().is_closed());
    assert!(session.engine.recv_transport().unwrap().is_closed());
    wait_for_close_frame(&session.server).await;
}

#[tokio::test]
async fn test_cancel_interrupts_unanswered_request() {
    let session = Session::joined(
        test_config("stuck-ice"),
        MockSignalingServer::builder().silent("restartIce").build(),
        MockMediaEngine::builder().build(),
    )
    .await;

    session.client.restart_ice().unwrap();
    session.server.wait_for_request("restartIce").await;
    assert!(session.store.me().snapshot().restart_ice_in_progress);

    session.client.cancel();
    let session = session.finished().await;

    assert_eq!(session.store.state(), ConnectionState::Closed);
    assert!(session.engine.is_released());
    assert!(session.client.is_closed());
}

#[tokio::test]
async fn test_cancel_closes_session() {
    let session = Session::default_joined().await;

    session.client.cancel();
    let session = session.finished().await;

    assert_eq!(session.store.state(), ConnectionState::Closed);
    assert!(session.engine.is_released());
}

#[tokio::test]
async fn test_dropping_every_handle_ends_session() {
    let session = Session::default_joined().await;
    let Session {
        engine,
        client,
        store,
        task,
        ..
    } = session;

    drop(client);
    tokio::time::timeout(WAIT_TIMEOUT, task)
        .await
        .expect("room actor did not stop")
        .unwrap();

    assert_eq!(store.state(), ConnectionState::Closed);
    assert!(engine.is_released());
}
