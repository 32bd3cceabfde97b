//! Per-node link bookkeeping

use crate::net::media::MediaStream;
use crate::net::transport::ControlChannel;
use crate::session::{NodeState, TransportId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A remote peer as seen by the node that owns the link.
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub peer: TransportId,
    pub state: NodeState,
    pub stream: Option<MediaStream>,
    pub channel: Option<Arc<dyn ControlChannel>>,
    pub first_seen: DateTime<Utc>,
}

impl PeerLink {
    pub fn new(peer: TransportId) -> Self {
        PeerLink {
            peer,
            state: NodeState::Linking,
            stream: None,
            channel: None,
            first_seen: Utc::now(),
        }
    }

    pub fn with_stream(mut self, stream: MediaStream) -> Self {
        self.stream = Some(stream);
        self.state = NodeState::Streaming;
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn ControlChannel>) -> Self {
        self.channel = Some(channel);
        self
    }
}

/// Insertion-ordered streams keyed by peer identity, at most one per peer.
#[derive(Debug, Default, Clone)]
pub struct StreamRegistry {
    entries: Vec<PeerLink>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        StreamRegistry::default()
    }

    /// Registers the first stream announced by `peer`.
    ///
    /// Returns false, leaving the registry untouched, when the peer already
    /// has an entry.
    pub fn insert(&mut self, peer: TransportId, stream: MediaStream) -> bool {
        if self.contains(&peer) {
            return false;
        }
        self.entries.push(PeerLink::new(peer).with_stream(stream));
        true
    }

    pub fn remove(&mut self, peer: &TransportId) -> Option<PeerLink> {
        let pos = self.entries.iter().position(|link| &link.peer == peer)?;
        Some(self.entries.remove(pos))
    }

    pub fn get(&self, peer: &TransportId) -> Option<&PeerLink> {
        self.entries.iter().find(|link| &link.peer == peer)
    }

    pub fn stream(&self, peer: &TransportId) -> Option<&MediaStream> {
        self.get(peer).and_then(|link| link.stream.as_ref())
    }

    pub fn contains(&self, peer: &TransportId) -> bool {
        self.get(peer).is_some()
    }

    pub fn first(&self) -> Option<&PeerLink> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerLink> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// `(peer, stream)` pairs in registration order.
    pub fn streams(&self) -> Vec<(TransportId, MediaStream)> {
        self.entries
            .iter()
            .filter_map(|link| Some((link.peer.clone(), link.stream.clone()?)))
            .collect()
    }
}
