//! Transport seam
//!
//! A transport turns a [`TransportId`] into a live endpoint on the peer
//! network. Everything the network reports back (incoming calls, streams,
//! channel traffic, closures) arrives as [`TransportEvent`]s on the channel
//! handed to [`Transport::open`], so the owning node processes them one at a
//! time.

use crate::net::media::MediaStream;
use crate::net::message::ControlMessage;
use crate::session::TransportId;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The identity could not be opened (taken, or signaling unreachable).
    #[error("transport init failure: {0}")]
    InitFailure(String),
    #[error("peer {0} is unavailable")]
    PeerUnavailable(TransportId),
    #[error("no pending call from {0}")]
    NoPendingCall(TransportId),
    #[error("control channel to {0} is closed")]
    ChannelClosed(TransportId),
    #[error("negotiation with {peer} failed: {reason}")]
    Negotiation { peer: TransportId, reason: String },
    #[error("signaling error: {0}")]
    Signaling(String),
    #[error("message encoding error: {0}")]
    Encoding(String),
    #[error("endpoint destroyed")]
    Destroyed,
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Encoding(e.to_string())
    }
}

pub enum TransportEvent {
    /// A remote peer wants to send us media; answer to receive it.
    IncomingCall { peer: TransportId },
    /// Media arrived on an answered or placed call. May repeat per peer.
    StreamReceived { peer: TransportId, stream: MediaStream },
    /// The media link with `peer` closed.
    CallClosed { peer: TransportId },
    /// A remote peer opened a control channel to us.
    ChannelOpened(Arc<dyn ControlChannel>),
    ChannelData { peer: TransportId, message: ControlMessage },
    /// A control channel with `peer` closed, from either side.
    ChannelClosed { peer: TransportId },
    /// The endpoint lost its signaling path; established links may survive.
    Disconnected { reason: String },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::IncomingCall { peer } => write!(f, "IncomingCall({peer})"),
            TransportEvent::StreamReceived { peer, stream } => {
                write!(f, "StreamReceived({peer}, {})", stream.id())
            }
            TransportEvent::CallClosed { peer } => write!(f, "CallClosed({peer})"),
            TransportEvent::ChannelOpened(channel) => {
                write!(f, "ChannelOpened({})", channel.peer())
            }
            TransportEvent::ChannelData { peer, message } => {
                write!(f, "ChannelData({peer}, {message:?})")
            }
            TransportEvent::ChannelClosed { peer } => write!(f, "ChannelClosed({peer})"),
            TransportEvent::Disconnected { reason } => write!(f, "Disconnected({reason})"),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens `requested` on the network, or a transport-assigned identity
    /// when `None`. Events for the new endpoint are delivered on `events`.
    async fn open(
        &self,
        requested: Option<TransportId>,
        events: EventSender,
    ) -> Result<Arc<dyn Endpoint>, TransportError>;
}

#[async_trait]
pub trait Endpoint: Send + Sync {
    fn id(&self) -> &TransportId;

    /// Accepts the pending media call from `peer`.
    async fn answer(&self, peer: &TransportId) -> Result<(), TransportError>;

    /// Places a media call carrying `stream` to `peer`.
    async fn call(&self, peer: &TransportId, stream: MediaStream) -> Result<(), TransportError>;

    /// Opens a control channel to `peer`. The channel may not be open yet
    /// when this returns.
    async fn connect(&self, peer: &TransportId) -> Result<Arc<dyn ControlChannel>, TransportError>;

    /// Ends the media call with `peer`, placed or answered. The peer sees
    /// it closed.
    async fn hang_up(&self, peer: &TransportId);

    /// Releases the identity and every link, without notice to the peers.
    async fn destroy(&self);
}

#[async_trait]
pub trait ControlChannel: Send + Sync + fmt::Debug {
    fn peer(&self) -> &TransportId;

    fn is_open(&self) -> bool;

    async fn send(&self, message: &ControlMessage) -> Result<(), TransportError>;

    async fn close(&self);
}
