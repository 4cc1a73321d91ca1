//! Room session orchestration.
//!
//! [`RoomClient`] is the handle the application holds; it posts
//! [`RoomCommand`]s to a `RoomActor` task that owns the signaling peer, the
//! media transports and the registries.

mod actor;
mod client;
mod messages;
mod signaler;

pub use client::RoomClient;
pub use messages::RoomCommand;
