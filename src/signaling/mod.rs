//! Signaling messages and transport

pub mod channel;
pub mod message;
pub mod relay;

pub use channel::SignalingChannel;
pub use message::{IceCandidate, PeerId, SdpType, SessionDescriptor, SignalingMessage, HANGUP};
pub use relay::{Delivery, LocalRelay, RelayEndpoint};
