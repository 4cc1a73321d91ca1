//! `TransportSignaler` over the session's `RpcPeer`.

use crate::errors::MediaError;
use crate::media::TransportSignaler;
use crate::rpc::RpcPeer;
use async_trait::async_trait;
use common::types::MediaKind;
use serde_json::Value;
use signaling_protocol::methods::ClientMethod;
use signaling_protocol::payloads::{
    ConnectWebRtcTransportRequest, IdResponse, ProduceDataRequest, ProduceRequest,
};
use tracing::debug;

/// Issues the `connect`, `produce` and `produceData` round trips a media
/// transport needs.
#[derive(Debug, Clone)]
pub(crate) struct RpcSignaler {
    peer: RpcPeer,
}

impl RpcSignaler {
    pub(crate) fn new(peer: RpcPeer) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl TransportSignaler for RpcSignaler {
    async fn connect(&self, transport_id: &str, dtls_parameters: Value) -> Result<(), MediaError> {
        debug!(target: "room.actor", transport_id = %transport_id, "Connecting transport");
        self.peer
            .request(
                ClientMethod::ConnectWebRtcTransport,
                &ConnectWebRtcTransportRequest {
                    transport_id: transport_id.to_string(),
                    dtls_parameters,
                },
            )
            .await?;
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> Result<String, MediaError> {
        let response: IdResponse = self
            .peer
            .request_as(
                ClientMethod::Produce,
                &ProduceRequest {
                    transport_id: transport_id.to_string(),
                    kind,
                    rtp_parameters,
                    app_data,
                },
            )
            .await?;
        Ok(response.id)
    }

    async fn produce_data(
        &self,
        transport_id: &str,
        sctp_stream_parameters: Value,
        label: &str,
        protocol: &str,
        app_data: Value,
    ) -> Result<String, MediaError> {
        let response: IdResponse = self
            .peer
            .request_as(
                ClientMethod::ProduceData,
                &ProduceDataRequest {
                    transport_id: transport_id.to_string(),
                    sctp_stream_parameters,
                    label: label.to_string(),
                    protocol: protocol.to_string(),
                    app_data,
                },
            )
            .await?;
        Ok(response.id)
    }
}
