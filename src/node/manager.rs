//! Connection manager
//!
//! Owns a node's transport endpoint and everything hanging off it: the
//! registry of Satellite streams (Hub), the uplink to the Hub (Satellite),
//! the control channels tally updates ride on, and the tally replica.
//!
//! All mutation goes through `&mut self`, so the node driver processes one
//! transport event or user command at a time.

use crate::config::Config;
use crate::net::media::{CaptureSource, MediaStream};
use crate::net::transport::{ControlChannel, Endpoint, Transport, TransportEvent};
use crate::node::registry::{PeerLink, StreamRegistry};
use crate::node::tally::{BroadcastReport, TallyBroadcaster, TallyError, TallyState};
use crate::session::{JoinCode, NodeState, Role, SessionDirectory, SessionError, TransportId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The transport identity could not be opened. Terminal.
    #[error("transport init failure: {0}")]
    TransportInitFailure(String),
    #[error("camera unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("invalid join code format: {0:?}")]
    InvalidCodeFormat(String),
    /// Rejected before any state change.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Media call or control channel to the Hub could not be opened.
    #[error("could not link to {peer}: {reason}")]
    LinkFailed { peer: TransportId, reason: String },
    #[error("{0} is not permitted on this node")]
    NotPermitted(&'static str),
    #[error("unknown peer {0}")]
    UnknownPeer(TransportId),
    #[error("node is {0}")]
    InvalidState(NodeState),
}

impl From<SessionError> for NodeError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidCodeFormat(raw) => NodeError::InvalidCodeFormat(raw),
            e @ SessionError::InvalidRange { .. } => NodeError::InvalidConfig(e.to_string()),
        }
    }
}

impl From<TallyError> for NodeError {
    fn from(e: TallyError) -> Self {
        match e {
            TallyError::NotAuthoritative => NodeError::NotPermitted("set_tally"),
        }
    }
}

/// What the UI layer gets to see of a node.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub role: Role,
    pub state: NodeState,
    pub id: Option<TransportId>,
    pub code: Option<JoinCode>,
    /// Registered streams in arrival order
    pub streams: Vec<(TransportId, MediaStream)>,
    pub tally: TallyState,
    pub selected: Option<TransportId>,
    /// Peer whose stream is shown full-screen
    pub active: Option<TransportId>,
    pub local_preview: Option<MediaStream>,
    pub alert: Option<NodeError>,
}

impl NodeSnapshot {
    pub fn initial(role: Role) -> Self {
        NodeSnapshot {
            role,
            state: NodeState::Init,
            id: None,
            code: None,
            streams: Vec::new(),
            tally: TallyState::Standby,
            selected: None,
            active: None,
            local_preview: None,
            alert: None,
        }
    }
}

pub struct ConnectionManager {
    role: Role,
    state: NodeState,
    config: Config,
    directory: SessionDirectory,
    transport: Arc<dyn Transport>,
    capture: Arc<dyn CaptureSource>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    endpoint: Option<Arc<dyn Endpoint>>,
    code: Option<JoinCode>,
    registry: StreamRegistry,
    /// Inbound control channels, the tally broadcast list
    links: Vec<Arc<dyn ControlChannel>>,
    /// Satellite's link to its Hub
    uplink: Option<PeerLink>,
    local_preview: Option<MediaStream>,
    selected: Option<TransportId>,
    tally: TallyBroadcaster,
    alert: Option<NodeError>,
}

impl ConnectionManager {
    /// Builds an idle node. Transport events for it arrive on the returned
    /// receiver once [`open`](Self::open) succeeds.
    pub fn new(
        config: Config,
        role: Role,
        transport: Arc<dyn Transport>,
        capture: Arc<dyn CaptureSource>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager {
            role,
            state: NodeState::Init,
            directory: SessionDirectory::from_config(&config),
            config,
            transport,
            capture,
            events_tx,
            endpoint: None,
            code: None,
            registry: StreamRegistry::new(),
            links: Vec::new(),
            uplink: None,
            local_preview: None,
            selected: None,
            tally: TallyBroadcaster::new(role == Role::Hub),
            alert: None,
        };
        (manager, events_rx)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn id(&self) -> Option<&TransportId> {
        self.endpoint.as_ref().map(|endpoint| endpoint.id())
    }

    pub fn code(&self) -> Option<&JoinCode> {
        self.code.as_ref()
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn uplink(&self) -> Option<&PeerLink> {
        self.uplink.as_ref()
    }

    pub fn active_links(&self) -> &[Arc<dyn ControlChannel>] {
        &self.links
    }

    pub fn tally(&self) -> TallyState {
        self.tally.state()
    }

    pub fn selected(&self) -> Option<&TransportId> {
        self.selected.as_ref()
    }

    pub fn local_preview(&self) -> Option<&MediaStream> {
        self.local_preview.as_ref()
    }

    pub fn alert(&self) -> Option<&NodeError> {
        self.alert.as_ref()
    }

    fn transition(&mut self, target: NodeState) -> bool {
        if !self.state.can_transition_to(&target) {
            log::warn!("Ignoring invalid transition {} -> {}", self.state, target);
            return false;
        }
        if self.state != target {
            log::info!("Node {:?} {} -> {}", self.role, self.state, target);
        }
        self.state = target;
        true
    }

    fn raise(&mut self, error: NodeError) -> NodeError {
        log::error!("{}", error);
        self.alert = Some(error.clone());
        error
    }

    /// Opens the node's transport identity.
    ///
    /// A Hub draws a fresh join code for it. A Satellite given `join`
    /// validates it before touching the transport, then links to that Hub.
    pub async fn open(&mut self, join: Option<&str>) -> Result<(), NodeError> {
        if self.state != NodeState::Init {
            return Err(NodeError::InvalidState(self.state));
        }
        self.config
            .validate()
            .map_err(|e| NodeError::InvalidConfig(format!("{e:#}")))?;

        let hub = match (self.role, join) {
            (Role::Hub, Some(_)) => return Err(NodeError::NotPermitted("joining a hub")),
            (Role::Satellite, Some(code)) => Some(self.directory.resolve(code)?),
            _ => None,
        };

        let requested = match self.role {
            Role::Hub => {
                let (code, id) = self.directory.issue_code()?;
                self.code = Some(code);
                Some(id)
            }
            Role::Satellite => None,
        };

        self.transition(NodeState::Connecting);
        let endpoint = match self.transport.open(requested, self.events_tx.clone()).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.transition(NodeState::Error);
                return Err(self.raise(NodeError::TransportInitFailure(e.to_string())));
            }
        };
        log::info!("Node {:?} open as {}", self.role, endpoint.id());
        self.endpoint = Some(endpoint);
        self.transition(NodeState::Ready);

        match hub {
            Some(hub) => self.link_to_hub(hub).await,
            None => Ok(()),
        }
    }

    async fn link_to_hub(&mut self, hub: TransportId) -> Result<(), NodeError> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Err(NodeError::InvalidState(self.state));
        };
        self.transition(NodeState::Linking);

        let stream = match self.capture.acquire(&self.config.capture).await {
            Ok(stream) => stream,
            Err(e) => {
                self.transition(NodeState::Ready);
                return Err(self.raise(NodeError::CaptureUnavailable(e.to_string())));
            }
        };
        self.local_preview = Some(stream.clone());

        let linked = match endpoint.call(&hub, stream.clone()).await {
            Ok(()) => match endpoint.connect(&hub).await {
                Ok(channel) => Ok(channel),
                Err(e) => {
                    endpoint.hang_up(&hub).await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };
        let channel = match linked {
            Ok(channel) => channel,
            Err(e) => {
                self.local_preview = None;
                self.transition(NodeState::Ready);
                return Err(self.raise(NodeError::LinkFailed {
                    peer: hub,
                    reason: e.to_string(),
                }));
            }
        };

        log::info!("Streaming {} to {}", stream.id(), hub);
        self.uplink = Some(PeerLink::new(hub).with_stream(stream).with_channel(channel));
        self.transition(NodeState::Streaming);
        Ok(())
    }

    /// Applies one transport event.
    pub async fn handle(&mut self, event: TransportEvent) {
        if self.state == NodeState::Closed {
            log::debug!("Node closed, dropping {:?}", event);
            return;
        }

        match event {
            TransportEvent::IncomingCall { peer } => self.on_incoming_call(peer).await,
            TransportEvent::StreamReceived { peer, stream } => self.on_stream(peer, stream),
            TransportEvent::CallClosed { peer } => self.on_call_closed(&peer),
            TransportEvent::ChannelOpened(channel) => {
                log::info!("Control channel opened by {}", channel.peer());
                self.links.push(channel);
            }
            TransportEvent::ChannelData { peer, message } => {
                log::debug!("Control message from {}: {:?}", peer, message);
                self.tally.apply(&message);
            }
            TransportEvent::ChannelClosed { peer } => self.on_channel_closed(&peer),
            TransportEvent::Disconnected { reason } => {
                log::warn!("Signaling lost ({}), established links are kept", reason);
            }
        }
    }

    async fn on_incoming_call(&mut self, peer: TransportId) {
        if self.role != Role::Hub {
            log::warn!("Satellite ignores incoming call from {}", peer);
            return;
        }
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        if let Err(e) = endpoint.answer(&peer).await {
            log::warn!("Failed to answer call from {}: {}", peer, e);
        }
    }

    fn on_stream(&mut self, peer: TransportId, stream: MediaStream) {
        if self.role != Role::Hub {
            log::debug!("Satellite ignores stream from {}", peer);
            return;
        }
        let id = stream.id().to_string();
        if self.registry.insert(peer.clone(), stream) {
            log::info!("Registered stream {} from {} ({} total)", id, peer, self.registry.len());
        } else {
            log::debug!("Duplicate stream {} from {} dropped", id, peer);
        }
    }

    fn on_call_closed(&mut self, peer: &TransportId) {
        match self.role {
            Role::Hub => {
                if self.registry.remove(peer).is_some() {
                    log::info!("Link to {} dropped", peer);
                }
                self.deselect(peer);
            }
            Role::Satellite => {
                let Some(uplink) = self.uplink.as_mut().filter(|link| &link.peer == peer) else {
                    return;
                };
                log::info!("Link to hub {} dropped", peer);
                uplink.stream = None;
                uplink.state = NodeState::Ready;
                if self.state == NodeState::Streaming {
                    self.transition(NodeState::Ready);
                }
            }
        }
    }

    fn on_channel_closed(&mut self, peer: &TransportId) {
        let before = self.links.len();
        self.links.retain(|channel| channel.peer() != peer);
        if self.links.len() != before {
            log::info!("Control channel with {} closed", peer);
        }

        if let Some(uplink) = self.uplink.as_mut().filter(|link| &link.peer == peer) {
            uplink.channel = None;
        }
    }

    fn deselect(&mut self, peer: &TransportId) {
        if self.selected.as_ref() == Some(peer) {
            self.selected = None;
        }
    }

    /// Hub record button: sets the authoritative tally and broadcasts it.
    pub async fn set_tally(&mut self, value: TallyState) -> Result<BroadcastReport, NodeError> {
        if self.state == NodeState::Closed {
            return Err(NodeError::InvalidState(self.state));
        }
        Ok(self.tally.set(value, &self.links).await?)
    }

    pub async fn toggle_tally(&mut self) -> Result<BroadcastReport, NodeError> {
        self.set_tally(self.tally.state().toggled()).await
    }

    /// Forgets a Satellite's stream. The peer is not told.
    pub fn remove_link(&mut self, peer: &TransportId) -> Result<bool, NodeError> {
        if self.role != Role::Hub {
            return Err(NodeError::NotPermitted("remove_link"));
        }
        let removed = self.registry.remove(peer).is_some();
        self.deselect(peer);
        if removed {
            log::info!("Removed link to {}", peer);
        }
        Ok(removed)
    }

    /// Picks the stream shown full-screen; `None` falls back to the first.
    pub fn select(&mut self, peer: Option<TransportId>) -> Result<(), NodeError> {
        if self.role != Role::Hub {
            return Err(NodeError::NotPermitted("select"));
        }
        if let Some(peer) = &peer {
            if !self.registry.contains(peer) {
                return Err(NodeError::UnknownPeer(peer.clone()));
            }
        }
        self.selected = peer;
        Ok(())
    }

    pub fn active_peer(&self) -> Option<&TransportId> {
        self.selected
            .as_ref()
            .or_else(|| self.registry.first().map(|link| &link.peer))
    }

    pub fn active_stream(&self) -> Option<&MediaStream> {
        self.active_peer().and_then(|peer| self.registry.stream(peer))
    }

    /// Releases the identity and every link. Events still queued for the
    /// node are dropped.
    pub async fn shutdown(&mut self) {
        if self.state == NodeState::Closed {
            return;
        }
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.destroy().await;
        }
        self.registry.clear();
        self.links.clear();
        self.uplink = None;
        self.selected = None;
        self.transition(NodeState::Closed);
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            role: self.role,
            state: self.state,
            id: self.id().cloned(),
            code: self.code.clone(),
            streams: self.registry.streams(),
            tally: self.tally.state(),
            selected: self.selected.clone(),
            active: self.active_peer().cloned(),
            local_preview: self.local_preview.clone(),
            alert: self.alert.clone(),
        }
    }
}
