use crate::assets::CONTROL_CHANNEL_LABEL;
use crate::config::Config;
use crate::net::media::{MediaStream, TrackSettings};
use crate::net::message::ControlMessage;
use crate::net::transport::{
    ControlChannel, Endpoint, EventSender, Transport, TransportError, TransportEvent,
};
use crate::net::webrtc::common::{
    create_peer_connection, create_video_track, create_webrtc_api, new_connection_id,
};
use crate::net::webrtc::peer::{RtcChannel, RtcLink};
use crate::net::webrtc::signal::{LinkKind, Relay, RelayPayload, SignalMessage};
use crate::session::TransportId;
use crate::utils::sos::SignalOfStop;
use async_trait::async_trait;
use async_tungstenite::tokio::connect_async;
use async_tungstenite::tungstenite::Message;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use webrtc::api::API;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::media::Sample;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Disconnected can recover on its own, so only these end a link.
fn is_dropped(state: RTCPeerConnectionState) -> bool {
    matches!(
        state,
        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
    )
}

fn negotiation(peer: &TransportId, e: impl std::fmt::Display) -> TransportError {
    TransportError::Negotiation {
        peer: peer.clone(),
        reason: e.to_string(),
    }
}

pub struct WebRtcTransport {
    signaling_url: String,
    ice_servers: Vec<String>,
}

impl WebRtcTransport {
    pub fn new(signaling_url: impl Into<String>, ice_servers: Vec<String>) -> Self {
        WebRtcTransport {
            signaling_url: signaling_url.into(),
            ice_servers,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        WebRtcTransport::new(config.signaling_url.clone(), config.ice_servers.clone())
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn open(
        &self,
        requested: Option<TransportId>,
        events: EventSender,
    ) -> Result<Arc<dyn Endpoint>, TransportError> {
        let api = create_webrtc_api().map_err(|e| TransportError::InitFailure(format!("{e:#}")))?;

        let (ws_stream, _) = connect_async(self.signaling_url.as_str())
            .await
            .map_err(|e| TransportError::InitFailure(format!("signaling unreachable: {e}")))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let register = SignalMessage::Register { id: requested }.encode()?;
        ws_sender
            .send(Message::text(register))
            .await
            .map_err(|e| TransportError::InitFailure(e.to_string()))?;

        let id = loop {
            let frame = match ws_receiver.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(TransportError::InitFailure(e.to_string())),
                None => {
                    return Err(TransportError::InitFailure(
                        "signaling closed before OPEN".into(),
                    ));
                }
            };
            let Message::Text(text) = frame else {
                continue;
            };
            match SignalMessage::decode(text.as_str()) {
                Ok(SignalMessage::Open { id }) => break id,
                Ok(SignalMessage::IdTaken { id }) => {
                    return Err(TransportError::InitFailure(format!("identity {id} is taken")));
                }
                Ok(SignalMessage::Error { message }) => {
                    return Err(TransportError::InitFailure(message));
                }
                Ok(other) => log::debug!("Ignoring {:?} before OPEN", other),
                Err(e) => log::warn!("Malformed signaling frame: {}", e),
            }
        };
        log::info!("Signaling open as {}", id);

        let sos = SignalOfStop::new();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<SignalMessage>();

        sos.spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let raw = match msg.encode() {
                    Ok(raw) => raw,
                    Err(e) => {
                        log::warn!("Failed to encode signaling message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::text(raw)).await.is_err() {
                    log::warn!("Failed to send signaling message, socket closed");
                    break;
                }
            }
            let _ = SinkExt::close(&mut ws_sender).await;
        });

        let shared = Arc::new(Shared {
            id,
            api,
            ice_servers: self.ice_servers.clone(),
            outbound,
            events,
            links: Mutex::new(HashMap::new()),
            pending_media: Mutex::new(HashMap::new()),
            sos: sos.clone(),
        });

        let reader = Arc::downgrade(&shared);
        sos.spawn(async move {
            let reason = loop {
                let frame = match ws_receiver.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => break e.to_string(),
                    None => break "signaling socket closed".to_string(),
                };
                let Some(shared) = reader.upgrade() else {
                    return;
                };
                match frame {
                    Message::Text(text) => match SignalMessage::decode(text.as_str()) {
                        Ok(msg) => shared.on_signal(msg).await,
                        Err(e) => log::warn!("Malformed signaling frame: {}", e),
                    },
                    Message::Close(_) => break "signaling closed by server".to_string(),
                    _ => {}
                }
            };
            if let Some(shared) = reader.upgrade() {
                log::warn!("Endpoint {} lost signaling: {}", shared.id, reason);
                shared.emit(TransportEvent::Disconnected { reason });
            }
        });

        Ok(Arc::new(WebRtcEndpoint { shared }))
    }
}

struct Shared {
    id: TransportId,
    api: Arc<API>,
    ice_servers: Vec<String>,
    outbound: mpsc::UnboundedSender<SignalMessage>,
    events: EventSender,
    /// Live links by connection id
    links: Mutex<HashMap<String, Arc<RtcLink>>>,
    /// Media offers waiting for `answer`, by caller
    pending_media: Mutex<HashMap<TransportId, (String, RTCSessionDescription)>>,
    sos: SignalOfStop,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if let Err(e) = self.events.send(event) {
            log::debug!("Endpoint {} dropped event {:?}", self.id, e.0);
        }
    }

    fn relay(
        &self,
        wrap: fn(Relay) -> SignalMessage,
        dst: &TransportId,
        payload: RelayPayload,
    ) -> Result<(), TransportError> {
        let msg = wrap(Relay {
            src: None,
            dst: dst.clone(),
            payload,
        });
        self.outbound
            .send(msg)
            .map_err(|_| TransportError::Signaling("signaling connection closed".into()))
    }

    fn link(&self, connection_id: &str) -> Option<Arc<RtcLink>> {
        lock(&self.links).get(connection_id).cloned()
    }

    fn forget(&self, connection_id: &str) -> Option<Arc<RtcLink>> {
        lock(&self.links).remove(connection_id)
    }

    async fn new_link(
        self: &Arc<Self>,
        peer: &TransportId,
        connection_id: String,
        kind: LinkKind,
    ) -> Result<Arc<RtcLink>, TransportError> {
        let connection = create_peer_connection(&self.api, &self.ice_servers)
            .await
            .map_err(|e| negotiation(peer, format!("{e:#}")))?;
        let link = Arc::new(RtcLink::new(
            connection_id.clone(),
            kind,
            peer.clone(),
            connection,
            self.sos.child(),
        ));

        let closed = link.closed_flag();
        let events = self.events.clone();
        let remote = peer.clone();
        let weak: Weak<Shared> = Arc::downgrade(self);
        let cid = connection_id.clone();
        link.connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                log::info!("Link {} with {} state changed: {}", cid, remote, state);
                if is_dropped(state) {
                    if !closed.swap(true, Ordering::SeqCst) {
                        let _ = events.send(kind.closed_event(remote.clone()));
                    }
                    // closing from inside this handler would wait on the handler itself
                    if let Some(link) = weak.upgrade().and_then(|shared| shared.forget(&cid)) {
                        tokio::spawn(async move { link.close().await });
                    }
                }
                Box::pin(async {})
            }));

        lock(&self.links).insert(connection_id, Arc::clone(&link));
        Ok(link)
    }

    /// Hooks a data channel up to the event queue. Inbound channels are
    /// announced once they open.
    fn wire_channel(
        &self,
        link: &RtcLink,
        channel: Arc<RTCDataChannel>,
        inbound: bool,
    ) -> Arc<RtcChannel> {
        let peer = link.remote.clone();
        let control = Arc::new(RtcChannel::new(peer.clone(), Arc::clone(&channel)));

        if inbound {
            let events = self.events.clone();
            let announced: Arc<dyn ControlChannel> = control.clone();
            channel.on_open(Box::new(move || {
                Box::pin(async move {
                    let _ = events.send(TransportEvent::ChannelOpened(announced));
                })
            }));
        }

        let events = self.events.clone();
        let from = peer.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            let from = from.clone();
            Box::pin(async move {
                let decoded = std::str::from_utf8(&msg.data)
                    .map_err(|e| e.to_string())
                    .and_then(|raw| ControlMessage::decode(raw).map_err(|e| e.to_string()));
                match decoded {
                    Ok(message) => {
                        let _ = events.send(TransportEvent::ChannelData { peer: from, message });
                    }
                    Err(e) => {
                        log::warn!("Dropping undecodable control message from {}: {}", from, e)
                    }
                }
            })
        }));

        let events = self.events.clone();
        let closed = link.closed_flag();
        channel.on_close(Box::new(move || {
            if !closed.swap(true, Ordering::SeqCst) {
                let _ = events.send(TransportEvent::ChannelClosed { peer: peer.clone() });
            }
            Box::pin(async {})
        }));

        control
    }

    async fn on_signal(self: &Arc<Self>, msg: SignalMessage) {
        match msg {
            SignalMessage::Offer(relay) => self.on_offer(relay).await,
            SignalMessage::Answer(relay) => self.on_answer(relay).await,
            SignalMessage::Candidate(relay) => self.on_candidate(relay).await,
            SignalMessage::Leave(relay) => self.on_leave(relay).await,
            SignalMessage::Expire { src } => self.on_expire(&src).await,
            other => log::debug!("Ignoring signaling message {:?}", other),
        }
    }

    async fn on_offer(self: &Arc<Self>, relay: Relay) {
        let (Some(src), Some(sdp)) = (relay.src, relay.payload.sdp) else {
            log::warn!("Dropping offer without source or description");
            return;
        };
        let connection_id = relay.payload.connection_id;

        match relay.payload.kind {
            LinkKind::Media => {
                lock(&self.pending_media).insert(src.clone(), (connection_id, sdp));
                self.emit(TransportEvent::IncomingCall { peer: src });
            }
            // control links are always accepted
            LinkKind::Control => {
                if let Err(e) = self.accept_control(&src, connection_id, sdp).await {
                    log::warn!("Failed to accept control link from {}: {}", src, e);
                }
            }
        }
    }

    async fn accept_control(
        self: &Arc<Self>,
        peer: &TransportId,
        connection_id: String,
        offer: RTCSessionDescription,
    ) -> Result<(), TransportError> {
        let link = self
            .new_link(peer, connection_id.clone(), LinkKind::Control)
            .await?;

        let weak = Arc::downgrade(self);
        let weak_link = Arc::downgrade(&link);
        link.connection
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                if let (Some(shared), Some(link)) = (weak.upgrade(), weak_link.upgrade()) {
                    shared.wire_channel(&link, channel, true);
                }
                Box::pin(async {})
            }));

        let answer = link
            .accept_offer(offer)
            .await
            .map_err(|e| negotiation(peer, e))?;
        let mut payload = RelayPayload::new(connection_id, LinkKind::Control);
        payload.sdp = Some(answer);
        self.relay(SignalMessage::Answer, peer, payload)
    }

    async fn on_answer(&self, relay: Relay) {
        let Some(link) = self.link(&relay.payload.connection_id) else {
            log::debug!("Answer for unknown link {}", relay.payload.connection_id);
            return;
        };
        let Some(sdp) = relay.payload.sdp else {
            return;
        };
        if let Err(e) = link.connection.set_remote_description(sdp).await {
            log::warn!("Failed to apply answer from {}: {}", link.remote, e);
        }
    }

    async fn on_candidate(&self, relay: Relay) {
        let (Some(link), Some(candidate)) = (
            self.link(&relay.payload.connection_id),
            relay.payload.candidate,
        ) else {
            return;
        };
        if let Err(e) = link.connection.add_ice_candidate(candidate).await {
            log::debug!("Failed to add ICE candidate from {}: {}", link.remote, e);
        }
    }

    async fn on_leave(&self, relay: Relay) {
        let connection_id = relay.payload.connection_id;
        if let Some(link) = self.forget(&connection_id) {
            self.drop_link(&link).await;
            return;
        }
        // a call withdrawn before it was answered
        let withdrawn = relay.src.filter(|src| {
            let mut pending = lock(&self.pending_media);
            let offered = pending
                .get(src)
                .is_some_and(|(offered, _)| *offered == connection_id);
            if offered {
                pending.remove(src);
            }
            offered
        });
        if let Some(peer) = withdrawn {
            self.emit(TransportEvent::CallClosed { peer });
        }
    }

    async fn on_expire(&self, peer: &TransportId) {
        log::warn!("Peer {} is not registered on the signaling server", peer);
        lock(&self.pending_media).remove(peer);
        let expired: Vec<_> = {
            let mut links = lock(&self.links);
            let ids: Vec<_> = links
                .values()
                .filter(|link| &link.remote == peer)
                .map(|link| link.connection_id.clone())
                .collect();
            ids.iter().filter_map(|id| links.remove(id)).collect()
        };
        for link in expired {
            self.drop_link(&link).await;
        }
    }

    async fn drop_link(&self, link: &RtcLink) {
        if link.mark_closed() {
            self.emit(link.kind.closed_event(link.remote.clone()));
        }
        link.close().await;
    }
}

pub struct WebRtcEndpoint {
    shared: Arc<Shared>,
}

impl WebRtcEndpoint {
    fn ensure_alive(&self) -> Result<(), TransportError> {
        if self.shared.sos.cancelled() {
            Err(TransportError::Destroyed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Endpoint for WebRtcEndpoint {
    fn id(&self) -> &TransportId {
        &self.shared.id
    }

    async fn answer(&self, peer: &TransportId) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let (connection_id, offer) = lock(&self.shared.pending_media)
            .remove(peer)
            .ok_or_else(|| TransportError::NoPendingCall(peer.clone()))?;
        let link = self
            .shared
            .new_link(peer, connection_id.clone(), LinkKind::Media)
            .await?;

        let events = self.shared.events.clone();
        let caller = peer.clone();
        let sos = link.sos.clone();
        let cid = connection_id.clone();
        link.connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let stream_id = format!("{}/{}", cid, track.id());
                let stream = MediaStream::new(stream_id, TrackSettings::default());
                let _ = events.send(TransportEvent::StreamReceived {
                    peer: caller.clone(),
                    stream: stream.clone(),
                });
                sos.spawn(async move {
                    while let Ok((packet, _)) = track.read_rtp().await {
                        if !stream.push(packet.payload) {
                            break;
                        }
                    }
                    stream.end();
                });
                Box::pin(async {})
            },
        ));

        let answer = link
            .accept_offer(offer)
            .await
            .map_err(|e| negotiation(peer, e))?;
        let mut payload = RelayPayload::new(connection_id, LinkKind::Media);
        payload.sdp = Some(answer);
        self.shared.relay(SignalMessage::Answer, peer, payload)
    }

    async fn call(&self, peer: &TransportId, stream: MediaStream) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let connection_id = new_connection_id("mc");
        let link = self
            .shared
            .new_link(peer, connection_id.clone(), LinkKind::Media)
            .await?;

        let track = create_video_track(stream.id());
        let rtp_sender = link
            .connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| negotiation(peer, e))?;

        // Read incoming RTCP packets
        link.sos.spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let mut chunks = stream.subscribe();
        let remote = peer.clone();
        link.sos.spawn(async move {
            let mut last_chunk = Instant::now();
            loop {
                match chunks.recv().await {
                    Ok(data) => {
                        let now = Instant::now();
                        let sample = Sample {
                            data,
                            duration: now.duration_since(last_chunk),
                            ..Default::default()
                        };
                        last_chunk = now;
                        if let Err(e) = track.write_sample(&sample).await {
                            log::warn!("Failed to send video sample to {}: {}", remote, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Video sender to {} skipped {} chunks", remote, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let offer = link.create_offer().await.map_err(|e| negotiation(peer, e))?;
        let mut payload = RelayPayload::new(connection_id, LinkKind::Media);
        payload.sdp = Some(offer);
        self.shared.relay(SignalMessage::Offer, peer, payload)
    }

    async fn connect(&self, peer: &TransportId) -> Result<Arc<dyn ControlChannel>, TransportError> {
        self.ensure_alive()?;
        let connection_id = new_connection_id("dc");
        let link = self
            .shared
            .new_link(peer, connection_id.clone(), LinkKind::Control)
            .await?;

        let channel = link
            .connection
            .create_data_channel(CONTROL_CHANNEL_LABEL, None)
            .await
            .map_err(|e| negotiation(peer, e))?;
        let control = self.shared.wire_channel(&link, channel, false);

        let offer = link.create_offer().await.map_err(|e| negotiation(peer, e))?;
        let mut payload = RelayPayload::new(connection_id, LinkKind::Control);
        payload.sdp = Some(offer);
        self.shared.relay(SignalMessage::Offer, peer, payload)?;

        Ok(control)
    }

    async fn hang_up(&self, peer: &TransportId) {
        let unanswered = lock(&self.shared.pending_media)
            .remove(peer)
            .map(|(connection_id, _)| connection_id);
        let calls: Vec<_> = {
            let mut links = lock(&self.shared.links);
            let ids: Vec<_> = links
                .values()
                .filter(|link| link.kind == LinkKind::Media && &link.remote == peer)
                .map(|link| link.connection_id.clone())
                .collect();
            ids.iter().filter_map(|id| links.remove(id)).collect()
        };

        let ended = unanswered
            .into_iter()
            .chain(calls.iter().map(|link| link.connection_id.clone()));
        for connection_id in ended {
            log::debug!("Endpoint {} hung up {} with {}", self.shared.id, connection_id, peer);
            let payload = RelayPayload::new(connection_id, LinkKind::Media);
            if let Err(e) = self.shared.relay(SignalMessage::Leave, peer, payload) {
                log::debug!("Failed to tell {} about hang up: {}", peer, e);
            }
        }
        for link in calls {
            link.mark_closed();
            link.close().await;
        }
    }

    async fn destroy(&self) {
        if self.shared.sos.cancelled() {
            return;
        }
        self.shared.sos.cancel();

        let links: Vec<_> = lock(&self.shared.links).drain().map(|(_, link)| link).collect();
        for link in links {
            link.mark_closed();
            link.close().await;
        }
        lock(&self.shared.pending_media).clear();
        log::info!("Endpoint {} destroyed", self.shared.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::media::DeviceCapture;
    use crate::net::webrtc::server::SignalingServer;
    use crate::node::driver::{spawn, NodeHandle};
    use crate::node::manager::ConnectionManager;
    use crate::node::tally::TallyState;
    use crate::session::{NodeState, Role};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(20);
    /// Start code plus a short IDR slice
    const FRAME: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x33];

    fn start(
        server: &SignalingServer,
        role: Role,
        capture: DeviceCapture,
        join: Option<String>,
    ) -> NodeHandle {
        let (manager, events) = ConnectionManager::new(
            Config::default(),
            role,
            Arc::new(WebRtcTransport::new(server.url(), Vec::new())),
            Arc::new(capture),
        );
        spawn(manager, events, join, SignalOfStop::new())
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[test]
    fn test_only_failed_or_closed_drops_link() {
        assert!(is_dropped(RTCPeerConnectionState::Failed));
        assert!(is_dropped(RTCPeerConnectionState::Closed));
        assert!(!is_dropped(RTCPeerConnectionState::Disconnected));
        assert!(!is_dropped(RTCPeerConnectionState::Connecting));
        assert!(!is_dropped(RTCPeerConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_open_fails_without_signaling() {
        let transport = WebRtcTransport::new("ws://127.0.0.1:1", Vec::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let res = transport.open(None, tx).await;
        assert!(matches!(res, Err(TransportError::InitFailure(_))));
    }

    #[tokio::test]
    async fn test_open_registers_identity() {
        let server = SignalingServer::bind("127.0.0.1:0").await.unwrap();
        let transport = WebRtcTransport::new(server.url(), Vec::new());

        let (tx, _rx) = mpsc::unbounded_channel();
        let hub = transport
            .open(Some(TransportId::from("multicam-4321")), tx)
            .await
            .unwrap();
        assert_eq!(hub.id().as_str(), "multicam-4321");

        let (tx, _rx2) = mpsc::unbounded_channel();
        let dup = transport
            .open(Some(TransportId::from("multicam-4321")), tx)
            .await;
        assert!(matches!(dup, Err(TransportError::InitFailure(_))));

        hub.destroy().await;
        assert!(matches!(
            hub.connect(&TransportId::from("anyone")).await,
            Err(TransportError::Destroyed)
        ));
        server.close();
    }

    #[tokio::test]
    async fn test_hang_up_withdraws_call() {
        let server = SignalingServer::bind("127.0.0.1:0").await.unwrap();
        let transport = WebRtcTransport::new(server.url(), Vec::new());
        let (tx, mut hub_rx) = mpsc::unbounded_channel();
        let hub = transport.open(None, tx).await.unwrap();
        let (tx, _sat_rx) = mpsc::unbounded_channel();
        let sat = transport.open(None, tx).await.unwrap();

        let camera = MediaStream::new("cam", TrackSettings::default());
        sat.call(hub.id(), camera).await.unwrap();
        assert!(matches!(
            next_event(&mut hub_rx).await,
            TransportEvent::IncomingCall { peer } if &peer == sat.id()
        ));

        sat.hang_up(hub.id()).await;
        assert!(matches!(
            next_event(&mut hub_rx).await,
            TransportEvent::CallClosed { peer } if &peer == sat.id()
        ));
        assert!(matches!(
            hub.answer(sat.id()).await,
            Err(TransportError::NoPendingCall(_))
        ));

        sat.destroy().await;
        hub.destroy().await;
        server.close();
    }

    #[tokio::test]
    async fn test_session_over_signaling() {
        let server = SignalingServer::bind("127.0.0.1:0").await.unwrap();
        let hub = start(&server, Role::Hub, DeviceCapture::unavailable(), None);
        let ready = timeout(WAIT, hub.wait_for(|s| s.state == NodeState::Ready))
            .await
            .unwrap()
            .unwrap();
        let code = ready.code.unwrap().as_str().to_string();

        // the hub only sees the track once media flows
        let camera = MediaStream::new("cam", TrackSettings::default());
        let feed = camera.clone();
        let frames = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(20));
            loop {
                tick.tick().await;
                if !feed.push(Bytes::from_static(FRAME)) {
                    break;
                }
            }
        });

        let sat = start(&server, Role::Satellite, DeviceCapture::new(camera), Some(code));
        timeout(WAIT, sat.wait_for(|s| s.state == NodeState::Streaming))
            .await
            .unwrap()
            .unwrap();
        let hub_view = timeout(WAIT, hub.wait_for(|s| s.streams.len() == 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(&hub_view.streams[0].0), sat.snapshot().id.as_ref());

        // the data channel may open after the first frames
        let mut sat_view = sat.subscribe();
        let recorded = timeout(WAIT, async {
            loop {
                assert!(hub.set_tally(TallyState::Recording));
                let seen = timeout(
                    Duration::from_millis(500),
                    sat_view.wait_for(|s| s.tally == TallyState::Recording),
                )
                .await;
                if seen.is_ok() {
                    break;
                }
            }
        })
        .await;
        assert!(recorded.is_ok());

        frames.abort();
        sat.shutdown().await;
        hub.shutdown().await;
        server.close();
    }

    #[tokio::test]
    async fn test_unknown_code_expires() {
        let server = SignalingServer::bind("127.0.0.1:0").await.unwrap();
        let camera = DeviceCapture::new(MediaStream::new("cam", TrackSettings::default()));
        let sat = start(&server, Role::Satellite, camera, Some("5555".into()));

        let settled = timeout(WAIT, sat.wait_for(|s| s.state == NodeState::Ready))
            .await
            .unwrap()
            .unwrap();
        assert!(settled.id.is_some());

        sat.shutdown().await;
        server.close();
    }
}
