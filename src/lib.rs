//! peercall - signaling and negotiation for a single WebRTC call
//!
//! This crate drives one peer-to-peer call at a time: it binds a remote peer,
//! runs the offer/answer exchange over a pluggable signaling channel, relays
//! ICE candidates, and owns the lifetime of the underlying peer connection.

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod utils;

pub use error::{AppError, Result};
