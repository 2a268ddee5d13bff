//! # keyhub-relay
//!
//! Public key directory and zero-knowledge message relay for end-to-end
//! encrypted chat clients.
//!
//! This crate implements a hub that:
//! - Stores one public key per user id and serves it over HTTP
//! - Routes opaque payloads between clients over WebSocket
//! - Reports `offline` when the destination is not connected (no buffering)
//! - Never sees plaintext: payloads are forwarded byte for byte
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │   WebSocket JSON   │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │        keyhub-relay        │
//!        │  ┌──────────┐ ┌─────────┐  │
//!        │  │ key dir  │ │registry │  │
//!        │  └──────────┘ └─────────┘  │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Relay frames are JSON text tagged by `type`:
//! - identify → identified (bind a user id to the connection)
//! - send → sent | offline (forward a payload)
//! - ping → pong
//! - message (server → client, a forwarded payload)
//! - error (any rejected frame; the connection stays open)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod http;
pub mod limits;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
