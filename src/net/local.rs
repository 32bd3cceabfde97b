//! In-process loopback transport
//!
//! Every endpoint opened through the same [`LocalBroker`] shares one
//! identity namespace. Calls and control channels are wired directly between
//! endpoints; control messages still go through their JSON encoding so both
//! ends see exactly what a network peer would.

use crate::net::media::MediaStream;
use crate::net::message::ControlMessage;
use crate::net::transport::{
    ControlChannel, Endpoint, EventSender, Transport, TransportError, TransportEvent,
};
use crate::session::TransportId;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EndpointShared {
    id: TransportId,
    events: EventSender,
    channels: Mutex<Vec<Arc<LocalChannel>>>,
    /// Inbound calls waiting for `answer`, by caller
    pending_calls: Mutex<HashMap<TransportId, MediaStream>>,
    media_peers: Mutex<HashSet<TransportId>>,
    destroyed: AtomicBool,
}

impl EndpointShared {
    fn emit(&self, event: TransportEvent) {
        if let Err(e) = self.events.send(event) {
            log::debug!("Endpoint {} dropped event {:?}", self.id, e.0);
        }
    }

    fn deliver(&self, from: &TransportId, raw: &str) {
        match ControlMessage::decode(raw) {
            Ok(message) => self.emit(TransportEvent::ChannelData {
                peer: from.clone(),
                message,
            }),
            Err(e) => log::warn!("Dropping undecodable control message from {}: {}", from, e),
        }
    }
}

/// Shared identity namespace for [`LocalTransport`] endpoints.
#[derive(Default)]
pub struct LocalBroker {
    nodes: Mutex<HashMap<TransportId, Arc<EndpointShared>>>,
}

impl LocalBroker {
    pub fn new() -> Arc<LocalBroker> {
        Arc::new(LocalBroker::default())
    }

    pub fn is_registered(&self, id: &TransportId) -> bool {
        lock(&self.nodes).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.nodes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(
        &self,
        requested: Option<TransportId>,
        events: EventSender,
    ) -> Result<Arc<EndpointShared>, TransportError> {
        let mut nodes = lock(&self.nodes);
        let id = match requested {
            Some(id) if nodes.contains_key(&id) => {
                return Err(TransportError::InitFailure(format!("identity {id} is taken")));
            }
            Some(id) => id,
            None => loop {
                let id = TransportId::new(format!("peer-{:016x}", rand::random::<u64>()));
                if !nodes.contains_key(&id) {
                    break id;
                }
            },
        };

        let shared = Arc::new(EndpointShared {
            id: id.clone(),
            events,
            channels: Mutex::new(Vec::new()),
            pending_calls: Mutex::new(HashMap::new()),
            media_peers: Mutex::new(HashSet::new()),
            destroyed: AtomicBool::new(false),
        });
        nodes.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    fn lookup(&self, id: &TransportId) -> Option<Arc<EndpointShared>> {
        lock(&self.nodes).get(id).cloned()
    }

    fn unregister(&self, id: &TransportId) {
        lock(&self.nodes).remove(id);
    }

    /// Simulates the network closing every link between `a` and `b`.
    pub fn sever(&self, a: &TransportId, b: &TransportId) {
        self.sever_control(a, b);
        let (Some(left), Some(right)) = (self.lookup(a), self.lookup(b)) else {
            return;
        };
        let linked = lock(&left.media_peers).remove(b);
        lock(&right.media_peers).remove(a);
        if linked {
            left.emit(TransportEvent::CallClosed { peer: b.clone() });
            right.emit(TransportEvent::CallClosed { peer: a.clone() });
        }
    }

    /// Simulates the network closing the control channels between `a` and `b`.
    pub fn sever_control(&self, a: &TransportId, b: &TransportId) {
        let Some(left) = self.lookup(a) else {
            return;
        };
        let channels: Vec<_> = lock(&left.channels)
            .iter()
            .filter(|c| c.peer() == b)
            .cloned()
            .collect();
        for channel in channels {
            channel.shutdown();
        }
    }
}

pub struct LocalTransport {
    broker: Arc<LocalBroker>,
}

impl LocalTransport {
    pub fn new(broker: Arc<LocalBroker>) -> Self {
        LocalTransport { broker }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn open(
        &self,
        requested: Option<TransportId>,
        events: EventSender,
    ) -> Result<Arc<dyn Endpoint>, TransportError> {
        let shared = self.broker.register(requested, events)?;
        log::debug!("Local endpoint {} opened", shared.id);
        Ok(Arc::new(LocalEndpoint {
            broker: Arc::clone(&self.broker),
            shared,
        }))
    }
}

pub struct LocalEndpoint {
    broker: Arc<LocalBroker>,
    shared: Arc<EndpointShared>,
}

impl LocalEndpoint {
    fn ensure_alive(&self) -> Result<(), TransportError> {
        if self.shared.destroyed.load(Ordering::Relaxed) {
            Err(TransportError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn remote(&self, peer: &TransportId) -> Result<Arc<EndpointShared>, TransportError> {
        self.broker
            .lookup(peer)
            .ok_or_else(|| TransportError::PeerUnavailable(peer.clone()))
    }
}

#[async_trait]
impl Endpoint for LocalEndpoint {
    fn id(&self) -> &TransportId {
        &self.shared.id
    }

    async fn answer(&self, peer: &TransportId) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let stream = lock(&self.shared.pending_calls)
            .remove(peer)
            .ok_or_else(|| TransportError::NoPendingCall(peer.clone()))?;
        let caller = self.remote(peer)?;

        lock(&self.shared.media_peers).insert(peer.clone());
        lock(&caller.media_peers).insert(self.shared.id.clone());

        self.shared.emit(TransportEvent::StreamReceived {
            peer: peer.clone(),
            stream,
        });
        Ok(())
    }

    async fn call(&self, peer: &TransportId, stream: MediaStream) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let callee = self.remote(peer)?;
        lock(&callee.pending_calls).insert(self.shared.id.clone(), stream);
        callee.emit(TransportEvent::IncomingCall {
            peer: self.shared.id.clone(),
        });
        Ok(())
    }

    async fn connect(&self, peer: &TransportId) -> Result<Arc<dyn ControlChannel>, TransportError> {
        self.ensure_alive()?;
        let remote = self.remote(peer)?;
        let open = Arc::new(AtomicBool::new(true));

        let ours = Arc::new(LocalChannel {
            owner: self.shared.id.clone(),
            peer: peer.clone(),
            open: Arc::clone(&open),
            local: Arc::downgrade(&self.shared),
            remote: Arc::downgrade(&remote),
        });
        let theirs = Arc::new(LocalChannel {
            owner: peer.clone(),
            peer: self.shared.id.clone(),
            open,
            local: Arc::downgrade(&remote),
            remote: Arc::downgrade(&self.shared),
        });

        lock(&self.shared.channels).push(Arc::clone(&ours));
        lock(&remote.channels).push(Arc::clone(&theirs));
        remote.emit(TransportEvent::ChannelOpened(theirs));

        Ok(ours)
    }

    async fn hang_up(&self, peer: &TransportId) {
        let id = &self.shared.id;
        lock(&self.shared.pending_calls).remove(peer);
        let linked = lock(&self.shared.media_peers).remove(peer);
        let Some(remote) = self.broker.lookup(peer) else {
            return;
        };
        let placed = lock(&remote.pending_calls).remove(id).is_some();
        let answered = lock(&remote.media_peers).remove(id);
        if linked || placed || answered {
            log::debug!("Local endpoint {} hung up on {}", id, peer);
            remote.emit(TransportEvent::CallClosed { peer: id.clone() });
        }
    }

    async fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::Relaxed) {
            return;
        }
        let id = &self.shared.id;
        self.broker.unregister(id);

        let channels: Vec<_> = lock(&self.shared.channels).drain(..).collect();
        for channel in channels {
            channel.shutdown();
        }

        let media_peers: Vec<_> = lock(&self.shared.media_peers).drain().collect();
        for peer in media_peers {
            if let Some(remote) = self.broker.lookup(&peer) {
                lock(&remote.media_peers).remove(id);
                remote.emit(TransportEvent::CallClosed { peer: id.clone() });
            }
        }
        lock(&self.shared.pending_calls).clear();
        log::debug!("Local endpoint {} destroyed", id);
    }
}

/// One end of a loopback control channel. Both ends share the open flag.
pub struct LocalChannel {
    owner: TransportId,
    peer: TransportId,
    open: Arc<AtomicBool>,
    local: Weak<EndpointShared>,
    remote: Weak<EndpointShared>,
}

impl LocalChannel {
    /// Closes both ends and drops them from their endpoints.
    fn shutdown(&self) {
        if !self.open.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(local) = self.local.upgrade() {
            lock(&local.channels).retain(|channel| channel.is_open());
            local.emit(TransportEvent::ChannelClosed {
                peer: self.peer.clone(),
            });
        }
        if let Some(remote) = self.remote.upgrade() {
            lock(&remote.channels).retain(|channel| channel.is_open());
            remote.emit(TransportEvent::ChannelClosed {
                peer: self.owner.clone(),
            });
        }
    }
}

impl fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalChannel")
            .field("owner", &self.owner)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl ControlChannel for LocalChannel {
    fn peer(&self) -> &TransportId {
        &self.peer
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    async fn send(&self, message: &ControlMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed(self.peer.clone()));
        }
        let Some(remote) = self.remote.upgrade() else {
            self.open.store(false, Ordering::Relaxed);
            return Err(TransportError::ChannelClosed(self.peer.clone()));
        };
        let raw = message.encode()?;
        remote.deliver(&self.owner, &raw);
        Ok(())
    }

    async fn close(&self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::media::TrackSettings;
    use crate::net::message::TallyState;
    use tokio::sync::mpsc;

    async fn open(
        broker: &Arc<LocalBroker>,
        id: Option<&str>,
    ) -> (Arc<dyn Endpoint>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = LocalTransport::new(Arc::clone(broker))
            .open(id.map(TransportId::from), tx)
            .await
            .unwrap();
        (endpoint, rx)
    }

    #[tokio::test]
    async fn test_identity_collision() {
        let broker = LocalBroker::new();
        let (_hub, _rx) = open(&broker, Some("multicam-1234")).await;

        let (tx, _rx2) = mpsc::unbounded_channel();
        let res = LocalTransport::new(Arc::clone(&broker))
            .open(Some(TransportId::from("multicam-1234")), tx)
            .await;
        assert!(matches!(res, Err(TransportError::InitFailure(_))));

        let (anon, _rx3) = open(&broker, None).await;
        assert!(anon.id().as_str().starts_with("peer-"));
        assert_eq!(broker.len(), 2);
    }

    #[tokio::test]
    async fn test_call_and_answer() {
        let broker = LocalBroker::new();
        let (hub, mut hub_rx) = open(&broker, Some("hub")).await;
        let (sat, _sat_rx) = open(&broker, Some("sat")).await;

        let stream = MediaStream::new("cam", TrackSettings::default());
        sat.call(hub.id(), stream.clone()).await.unwrap();

        let Some(TransportEvent::IncomingCall { peer }) = hub_rx.recv().await else {
            panic!("expected incoming call");
        };
        assert_eq!(peer.as_str(), "sat");
        hub.answer(&peer).await.unwrap();

        let Some(TransportEvent::StreamReceived { peer, stream: got }) = hub_rx.recv().await else {
            panic!("expected stream");
        };
        assert_eq!(peer.as_str(), "sat");
        assert!(got.same_stream(&stream));

        assert!(matches!(
            hub.answer(&peer).await,
            Err(TransportError::NoPendingCall(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_delivery_and_close() {
        let broker = LocalBroker::new();
        let (hub, mut hub_rx) = open(&broker, Some("hub")).await;
        let (sat, mut sat_rx) = open(&broker, Some("sat")).await;

        let uplink = sat.connect(hub.id()).await.unwrap();
        let Some(TransportEvent::ChannelOpened(downlink)) = hub_rx.recv().await else {
            panic!("expected channel");
        };
        assert_eq!(downlink.peer().as_str(), "sat");

        downlink
            .send(&ControlMessage::tally(TallyState::Recording))
            .await
            .unwrap();
        let Some(TransportEvent::ChannelData { peer, message }) = sat_rx.recv().await else {
            panic!("expected data");
        };
        assert_eq!(peer.as_str(), "hub");
        assert_eq!(message, ControlMessage::tally(TallyState::Recording));

        broker.sever_control(hub.id(), sat.id());
        assert!(!uplink.is_open());
        assert!(!downlink.is_open());
        assert!(matches!(
            downlink.send(&ControlMessage::tally(TallyState::Standby)).await,
            Err(TransportError::ChannelClosed(_))
        ));
        assert!(matches!(sat_rx.recv().await, Some(TransportEvent::ChannelClosed { .. })));
        assert!(matches!(hub_rx.recv().await, Some(TransportEvent::ChannelClosed { .. })));
    }

    async fn linked_pair(
        broker: &Arc<LocalBroker>,
    ) -> (Arc<dyn Endpoint>, Arc<dyn Endpoint>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (hub, mut hub_rx) = open(broker, Some("hub")).await;
        let (sat, sat_rx) = open(broker, Some("sat")).await;

        sat.call(hub.id(), MediaStream::new("cam", TrackSettings::default()))
            .await
            .unwrap();
        sat.connect(hub.id()).await.unwrap();
        hub.answer(sat.id()).await.unwrap();
        while hub_rx.try_recv().is_ok() {}

        drop(sat_rx);
        (hub, sat, hub_rx)
    }

    fn open_channels(broker: &LocalBroker, id: &str) -> usize {
        let shared = broker.lookup(&TransportId::from(id)).unwrap();
        lock(&shared.channels).len()
    }

    #[tokio::test]
    async fn test_sever_closes_everything_once() {
        let broker = LocalBroker::new();
        let (hub, sat, mut hub_rx) = linked_pair(&broker).await;
        assert_eq!(open_channels(&broker, "hub"), 1);
        assert_eq!(open_channels(&broker, "sat"), 1);

        for _ in 0..3 {
            broker.sever(hub.id(), sat.id());
        }
        assert_eq!(open_channels(&broker, "hub"), 0);
        assert_eq!(open_channels(&broker, "sat"), 0);

        let mut closed = Vec::new();
        while let Ok(event) = hub_rx.try_recv() {
            closed.push(format!("{event:?}"));
        }
        assert_eq!(closed, ["ChannelClosed(sat)", "CallClosed(sat)"]);

        // reconnecting does not pile up dead channels
        sat.connect(hub.id()).await.unwrap();
        broker.sever_control(hub.id(), sat.id());
        sat.connect(hub.id()).await.unwrap();
        assert_eq!(open_channels(&broker, "hub"), 1);
        assert_eq!(open_channels(&broker, "sat"), 1);
    }

    #[tokio::test]
    async fn test_hang_up() {
        let broker = LocalBroker::new();
        let (hub, mut hub_rx) = open(&broker, Some("hub")).await;
        let (sat, _sat_rx) = open(&broker, Some("sat")).await;

        sat.call(hub.id(), MediaStream::new("cam", TrackSettings::default()))
            .await
            .unwrap();
        sat.hang_up(hub.id()).await;

        assert!(matches!(hub_rx.recv().await, Some(TransportEvent::IncomingCall { .. })));
        assert!(matches!(hub_rx.recv().await, Some(TransportEvent::CallClosed { .. })));
        assert!(matches!(
            hub.answer(sat.id()).await,
            Err(TransportError::NoPendingCall(_))
        ));

        // nothing left to hang up
        sat.hang_up(hub.id()).await;
        assert!(hub_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_destroy_releases_identity() {
        let broker = LocalBroker::new();
        let (hub, mut hub_rx) = open(&broker, Some("hub")).await;
        let (sat, _sat_rx) = open(&broker, Some("sat")).await;

        sat.call(hub.id(), MediaStream::new("cam", TrackSettings::default()))
            .await
            .unwrap();
        let _ = hub_rx.recv().await;
        hub.answer(sat.id()).await.unwrap();
        let _ = hub_rx.recv().await;

        sat.destroy().await;
        assert!(!broker.is_registered(&TransportId::from("sat")));
        assert!(matches!(hub_rx.recv().await, Some(TransportEvent::CallClosed { .. })));
        assert!(matches!(
            sat.connect(hub.id()).await,
            Err(TransportError::Destroyed)
        ));
    }
}
