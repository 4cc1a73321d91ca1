//! # Room Test Utilities
//!
//! Shared test utilities for the SFU room client.
//!
//! This crate provides mock implementations and test fixtures for testing
//! room sessions without a media server or a real media stack.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable media engine with recording transports
//! - `mock_signaling` - In-memory protoo signaling server and its connector
//! - `fixtures` - Pre-configured payloads and configurations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = MockSignalingServer::builder()
//!         .with_peer(peer_info("alice", "Alice"))
//!         .build();
//!     let engine = MockMediaEngine::builder().build();
//!
//!     let (client, _task) = RoomClient::spawn(
//!         test_config("room-1"),
//!         engine.clone(),
//!         server.connector(),
//!     );
//!     client.join().unwrap();
//!     wait_for_state(&client.store(), ConnectionState::Connected).await;
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod mock_signaling;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_engine::*;
pub use mock_signaling::*;
