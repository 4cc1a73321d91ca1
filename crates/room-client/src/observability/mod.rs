//! Observability for the room client.
//!
//! Metric labels are bounded: `method` comes from the closed method
//! enumerations (unknown methods collapse to `unknown`), `status` and
//! `outcome` are fixed vocabularies.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `room_rpc_requests_total` | Counter | `method`, `status` |
//! | `room_rpc_request_duration_seconds` | Histogram | `method` |
//! | `room_transport_reconnects_total` | Counter | none |
//! | `room_notifications_total` | Counter | `method` |
//! | `room_server_requests_total` | Counter | `method`, `outcome` |
//! | `room_producers_active` | Gauge | none |
//! | `room_consumers_active` | Gauge | none |

pub mod metrics;
