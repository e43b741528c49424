//! Call session: connection ownership, negotiation, and the public controller
//!
//! ```text
//! SessionController (public API, clones freely)
//!     │  commands / inbound messages / engine events
//!     ▼
//! worker task ──> NegotiationEngine ──> ConnectionHandle ──> PeerConnection
//!                        │
//!                        └──> SignalingChannel
//! ```

pub mod controller;
pub mod engine;
pub mod handle;
pub mod state;

pub use controller::SessionController;
pub use engine::NegotiationEngine;
pub use handle::{ConnectionEvent, ConnectionHandle};
pub use state::{ConnectionState, SessionSnapshot};
