use crate::net::message::ControlMessage;
use crate::net::transport::{ControlChannel, TransportError, TransportEvent};
use crate::net::webrtc::signal::LinkKind;
use crate::session::TransportId;
use crate::utils::sos::SignalOfStop;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

impl LinkKind {
    pub(crate) fn closed_event(self, peer: TransportId) -> TransportEvent {
        match self {
            LinkKind::Media => TransportEvent::CallClosed { peer },
            LinkKind::Control => TransportEvent::ChannelClosed { peer },
        }
    }
}

/// One peer connection carrying a single link to a remote node.
pub(crate) struct RtcLink {
    pub connection_id: String,
    pub kind: LinkKind,
    pub remote: TransportId,
    pub connection: Arc<RTCPeerConnection>,
    pub sos: SignalOfStop,
    /// Set once the closure of this link has been reported.
    closed: Arc<AtomicBool>,
}

impl RtcLink {
    pub fn new(
        connection_id: String,
        kind: LinkKind,
        remote: TransportId,
        connection: Arc<RTCPeerConnection>,
        sos: SignalOfStop,
    ) -> Self {
        RtcLink {
            connection_id,
            kind,
            remote,
            connection,
            sos,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Marks the link closed; true only for the first caller.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.sos.cancel();
        if let Err(e) = self.connection.close().await {
            log::debug!("Closing link {} failed: {}", self.connection_id, e);
        }
    }

    /// Creates the local offer and waits for ICE gathering, so the returned
    /// description already lists every candidate.
    pub async fn create_offer(&self) -> Result<RTCSessionDescription, webrtc::Error> {
        let offer = self.connection.create_offer(None).await?;
        let mut gathering = self.connection.gathering_complete_promise().await;
        self.connection.set_local_description(offer.clone()).await?;
        let _ = gathering.recv().await;
        Ok(self.connection.local_description().await.unwrap_or(offer))
    }

    pub async fn accept_offer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, webrtc::Error> {
        self.connection.set_remote_description(offer).await?;
        let answer = self.connection.create_answer(None).await?;
        let mut gathering = self.connection.gathering_complete_promise().await;
        self.connection.set_local_description(answer.clone()).await?;
        let _ = gathering.recv().await;
        Ok(self.connection.local_description().await.unwrap_or(answer))
    }
}

/// Control channel over a WebRTC data channel.
pub(crate) struct RtcChannel {
    peer: TransportId,
    channel: Arc<RTCDataChannel>,
}

impl RtcChannel {
    pub fn new(peer: TransportId, channel: Arc<RTCDataChannel>) -> Self {
        RtcChannel { peer, channel }
    }
}

impl fmt::Debug for RtcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcChannel")
            .field("peer", &self.peer)
            .field("label", &self.channel.label())
            .field("state", &self.channel.ready_state())
            .finish()
    }
}

#[async_trait]
impl ControlChannel for RtcChannel {
    fn peer(&self) -> &TransportId {
        &self.peer
    }

    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, message: &ControlMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed(self.peer.clone()));
        }
        let raw = message.encode()?;
        self.channel
            .send_text(raw)
            .await
            .map_err(|e| TransportError::Negotiation {
                peer: self.peer.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close().await {
            log::debug!("Closing control channel to {} failed: {}", self.peer, e);
        }
    }
}
