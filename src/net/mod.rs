//! Peer transport layer
//!
//! The node logic only talks to the [`Transport`] seam. Two implementations
//! ship with the crate: an in-process loopback broker and a WebRTC transport
//! negotiated through a WebSocket signaling server.

pub mod local;
pub mod media;
pub mod message;
pub mod transport;
pub mod webrtc;

pub use local::{LocalBroker, LocalTransport};
pub use media::{CaptureError, CaptureRequest, CaptureSource, DeviceCapture, MediaStream};
pub use message::{ControlMessage, TallyState};
pub use transport::{ControlChannel, Endpoint, Transport, TransportError, TransportEvent};
