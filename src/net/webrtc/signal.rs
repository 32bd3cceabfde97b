//! Signaling wire format
//!
//! JSON text frames with a `type` discriminator. A client registers once,
//! then exchanges relay envelopes; the server stamps `src` on everything it
//! forwards so peers cannot impersonate each other.

use crate::session::TransportId;
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Media,
    Control,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPayload {
    pub connection_id: String,
    pub kind: LinkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<RTCSessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<RTCIceCandidateInit>,
}

impl RelayPayload {
    pub fn new(connection_id: impl Into<String>, kind: LinkKind) -> Self {
        RelayPayload {
            connection_id: connection_id.into(),
            kind,
            sdp: None,
            candidate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relay {
    /// Set by the server; ignored when sent by a client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<TransportId>,
    pub dst: TransportId,
    pub payload: RelayPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SignalMessage {
    /// First frame of every client; `None` asks the server to pick an id.
    Register {
        #[serde(default)]
        id: Option<TransportId>,
    },
    Open {
        id: TransportId,
    },
    IdTaken {
        id: TransportId,
    },
    Offer(Relay),
    Answer(Relay),
    Candidate(Relay),
    Leave(Relay),
    /// The destination of a relay was not registered.
    Expire {
        src: TransportId,
    },
    Error {
        message: String,
    },
}

impl SignalMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn relay(&self) -> Option<&Relay> {
        match self {
            SignalMessage::Offer(relay)
            | SignalMessage::Answer(relay)
            | SignalMessage::Candidate(relay)
            | SignalMessage::Leave(relay) => Some(relay),
            _ => None,
        }
    }

    pub fn relay_mut(&mut self) -> Option<&mut Relay> {
        match self {
            SignalMessage::Offer(relay)
            | SignalMessage::Answer(relay)
            | SignalMessage::Candidate(relay)
            | SignalMessage::Leave(relay) => Some(relay),
            _ => None,
        }
    }
}
