//! WebRTC transport
//!
//! Each node keeps one WebSocket to a [`SignalingServer`] that owns the
//! identity namespace. Every link is its own peer connection: media calls
//! carry one H.264 track, control links carry one reliable data channel.
//! ICE gathering completes before an offer or answer is sent, so a link
//! needs exactly one round trip through the server.

mod common;
mod peer;
pub mod server;
pub mod signal;
pub mod transport;

pub use server::SignalingServer;
pub use signal::{LinkKind, Relay, RelayPayload, SignalMessage};
pub use transport::WebRtcTransport;
