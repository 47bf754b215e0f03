//! `telemetry-over-udp` — sensor telemetry over plain UDP with a light
//! acknowledgement/retransmission layer.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐     DATA / HEARTBEAT     ┌──────────────┐
//!  │ ReliableSender│────────────────────────▶│  Collector   │
//!  └──────┬───────┘                          └──────┬───────┘
//!         │ pending table                           │ decode → classify
//!  ┌──────▼───────┐          ACK             ┌──────▼───────┐
//!  │  Reconciler  │◀─────────────────────────│ AckResponder │
//!  │ (sweep task) │                          │ RecordSink   │
//!  └──────────────┘                          └──────────────┘
//! ```
//!
//! Delivery is best effort: a DATA frame is resent a bounded number of
//! times, then given up on.  The collector labels what arrives (duplicate,
//! gap, checksum validity) but never reorders or rejects it.
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (encode / decode / checksum)
//! - [`tracker`]    — per-device duplicate and gap classification
//! - [`pending`]    — unacknowledged-send table and timeout sweep
//! - [`sender`]     — sequence numbering, framing, background reconciler
//! - [`responder`]  — ACK frames for received DATA
//! - [`recorder`]   — CSV record sink, sorted re-emit, per-device summary
//! - [`server`]     — collector receive loop
//! - [`client`]     — sensor driver loop
//! - [`readings`]   — synthetic reading source
//! - [`simulator`]  — lossy/duplicating relay for testing
//! - [`socket`]     — async UDP socket abstraction
//! - [`timer`]      — ack timeout, retry budget, poll intervals
//! - [`config`]     — sensor and collector settings

pub mod client;
pub mod config;
pub mod packet;
pub mod pending;
pub mod readings;
pub mod recorder;
pub mod responder;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod timer;
pub mod tracker;
