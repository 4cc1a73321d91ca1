//! SFU Room Client
//!
//! Joins a room as a signaling-only observer and logs what happens in it.
//!
//! # Startup Flow
//!
//! 1. Initialize tracing from `LOG_LEVEL` / `LOG_FORMAT`
//! 2. Load the room configuration from environment
//! 3. Spawn the room session with the observer media engine
//! 4. Log notifications, peers and state changes
//! 5. Close the session on Ctrl-C or when the room closes

#![warn(clippy::pedantic)]

use anyhow::Context;
use common::config::ObservabilityConfig;
use common::observability::init_tracing;
use room_client::media::ObserverEngine;
use room_client::transport::WebSocketConnector;
use room_client::{RoomClient, RoomConfig};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&ObservabilityConfig::from_env()).context("Failed to initialize tracing")?;

    info!("Starting room client");

    let config = RoomConfig::from_env()
        .map_err(|e| {
            error!(error = %e, "Failed to load configuration");
            e
        })?
        .with_produce(false)
        .with_consume(false)
        .with_data_channel(false);

    info!(
        room_id = %config.room_id,
        peer_id = %config.peer_id,
        url = %config.protoo_url(),
        invitation_link = %config.invitation_link(),
        "Configuration loaded successfully"
    );

    let (client, task_handle) = RoomClient::spawn(
        config,
        Arc::new(ObserverEngine::new()),
        Arc::new(WebSocketConnector),
    );
    let store = client.store();
    let mut notifications = store.subscribe_notifications();
    let mut room = store.room().subscribe();
    let mut peers = store.peers().subscribe();

    client.join()?;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutdown signal received");
                break;
            }

            Some(notify) = notifications.recv() => {
                info!(kind = ?notify.kind, text = %notify.text, "Notification");
            }

            changed = room.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = room.borrow_and_update().value.state;
                info!(state = ?state, "Room state changed");
                if state.is_closed() {
                    break;
                }
            }

            changed = peers.changed() => {
                if changed.is_err() {
                    break;
                }
                let names: Vec<String> = peers
                    .borrow_and_update()
                    .value
                    .values()
                    .map(|peer| peer.display_name.clone())
                    .collect();
                info!(count = names.len(), peers = ?names, "Peers changed");
            }
        }
    }

    client.close();
    task_handle.await.context("Room actor task failed")?;

    info!("Room client stopped");
    Ok(())
}
