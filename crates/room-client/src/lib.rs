//! SFU Room Client Library
//!
//! Client-side session orchestrator for a mediasoup-style conferencing room:
//!
//! - Resilient signaling channel with exponential-backoff reconnection
//! - Correlation-based request/response protocol (protoo) on top of it
//! - Room session state machine driving transport, producer and consumer
//!   creation and teardown
//! - Concurrent registries of every open media resource, feeding an
//!   observable state store
//!
//! # Architecture
//!
//! ```text
//! RoomClient (handle, any thread)
//! └── RoomActor (one task per session, serializes all mutations)
//!     ├── RpcPeer (dispatch task: responses, server requests, notifications)
//!     │   └── RetryingTransport (transport actor: connect, backoff, frames)
//!     ├── MediaEngine (capture/RTP, behind traits)
//!     └── Registries ──publish──> RoomStore (watch slices, notifications)
//! ```
//!
//! # Modules
//!
//! - [`transport`] - Reconnecting signaling channel
//! - [`rpc`] - Request/response protocol
//! - [`session`] - `RoomClient` handle and room actor
//! - [`registry`] - Media resource and peer registries
//! - [`store`] - Observable session state
//! - [`media`] - Media engine boundary
//! - [`config`] - Session configuration from environment
//! - [`errors`] - Error types with response codes

pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod store;
pub mod transport;

pub use config::RoomConfig;
pub use errors::RoomError;
pub use session::RoomClient;
pub use store::RoomStore;
