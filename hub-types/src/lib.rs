//! # keyhub-types
//!
//! Wire format types for the keyhub relay protocol.
//!
//! This crate provides the types shared by the relay server and its clients:
//! - [`UserId`], [`ConnectionId`] - Identity types
//! - [`ClientFrame`] - Frames a client sends over the relay channel
//! - [`ServerFrame`] - Frames the relay sends back
//! - [`Payload`] - Opaque relayed payload, kept verbatim
//! - [`FrameError`] - Decoding failures for inbound frames

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frames;
mod ids;

pub use error::FrameError;
pub use frames::{ClientFrame, Payload, ServerFrame};
pub use ids::{ConnectionId, UserId};
