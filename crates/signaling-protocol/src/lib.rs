//! Signaling protocol for the SFU room client.
//!
//! This crate implements the protoo JSON envelope format used between the
//! room client and the media server's signaling endpoint: requests,
//! responses, and notifications, plus the typed payloads of each method.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;
pub mod methods;
pub mod payloads;

/// WebSocket sub-protocol negotiated with the signaling server.
pub const SUBPROTOCOL: &str = "protoo";
