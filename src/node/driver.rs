//! Node driver
//!
//! Runs one [`ConnectionManager`] on its own task. Transport events and user
//! commands are applied one at a time, and the node's snapshot is published
//! on a watch channel after each of them.

use crate::net::transport::TransportEvent;
use crate::node::manager::{ConnectionManager, NodeSnapshot};
use crate::node::tally::TallyState;
use crate::session::{NodeState, TransportId};
use crate::utils::sos::SignalOfStop;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetTally(TallyState),
    ToggleTally,
    RemoveLink(TransportId),
    Select(Option<TransportId>),
    Shutdown,
}

pub struct NodeHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<NodeSnapshot>,
    sos: SignalOfStop,
    task: JoinHandle<()>,
}

impl NodeHandle {
    /// Queues a command; false once the node has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn set_tally(&self, value: TallyState) -> bool {
        self.send(Command::SetTally(value))
    }

    pub fn toggle_tally(&self) -> bool {
        self.send(Command::ToggleTally)
    }

    pub fn remove_link(&self, peer: TransportId) -> bool {
        self.send(Command::RemoveLink(peer))
    }

    pub fn select(&self, peer: Option<TransportId>) -> bool {
        self.send(Command::Select(peer))
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeSnapshot> {
        self.snapshot.clone()
    }

    /// Waits until a published snapshot satisfies `f`.
    pub async fn wait_for(&self, f: impl FnMut(&NodeSnapshot) -> bool) -> Option<NodeSnapshot> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(f).await.ok().map(|snapshot| snapshot.clone())
    }

    /// Stops the node and waits for its task to finish.
    pub async fn shutdown(self) {
        if !self.send(Command::Shutdown) {
            self.sos.cancel();
        }
        if let Err(e) = self.task.await {
            log::error!("Node task failed: {}", e);
        }
    }

    /// Hard stop without waiting.
    pub fn abort(&self) {
        self.sos.cancel();
    }
}

/// Opens `manager` (joining `join` for a Satellite) and keeps serving it on
/// a new task until shutdown or `sos` fires.
pub fn spawn(
    mut manager: ConnectionManager,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    join: Option<String>,
    sos: SignalOfStop,
) -> NodeHandle {
    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot) = watch::channel(manager.snapshot());
    let stop = sos.clone();

    let task = tokio::spawn(async move {
        if let Err(e) = manager.open(join.as_deref()).await {
            log::warn!("Node {:?} failed to open: {}", manager.role(), e);
        }
        snapshot_tx.send_replace(manager.snapshot());

        loop {
            tokio::select! {
                _ = stop.wait_cancellation() => {
                    manager.shutdown().await;
                }
                Some(event) = events.recv() => {
                    manager.handle(event).await;
                }
                command = commands.recv() => match command {
                    Some(command) => apply(&mut manager, command).await,
                    None => manager.shutdown().await,
                },
            }

            snapshot_tx.send_replace(manager.snapshot());
            if manager.state() == NodeState::Closed {
                break;
            }
        }
        log::debug!("Node {:?} driver stopped", manager.role());
    });

    NodeHandle {
        commands: commands_tx,
        snapshot,
        sos,
        task,
    }
}

async fn apply(manager: &mut ConnectionManager, command: Command) {
    let res = match command {
        Command::SetTally(value) => manager.set_tally(value).await.map(|_| ()),
        Command::ToggleTally => manager.toggle_tally().await.map(|_| ()),
        Command::RemoveLink(peer) => manager.remove_link(&peer).map(|_| ()),
        Command::Select(peer) => manager.select(peer),
        Command::Shutdown => {
            manager.shutdown().await;
            Ok(())
        }
    };
    if let Err(e) = res {
        log::warn!("Command rejected: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::net::local::{LocalBroker, LocalTransport};
    use crate::net::media::{DeviceCapture, MediaStream, TrackSettings};
    use crate::session::Role;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn start(
        broker: &Arc<LocalBroker>,
        role: Role,
        capture: DeviceCapture,
        join: Option<String>,
    ) -> NodeHandle {
        let (manager, events) = ConnectionManager::new(
            Config::default(),
            role,
            Arc::new(LocalTransport::new(Arc::clone(broker))),
            Arc::new(capture),
        );
        spawn(manager, events, join, SignalOfStop::new())
    }

    #[tokio::test]
    async fn test_hub_and_satellite_session() {
        let broker = LocalBroker::new();
        let hub = start(&broker, Role::Hub, DeviceCapture::unavailable(), None);
        let ready = timeout(Duration::from_secs(5), hub.wait_for(|s| s.state == NodeState::Ready))
            .await
            .unwrap()
            .unwrap();
        let code = ready.code.unwrap().as_str().to_string();

        let camera = DeviceCapture::new(MediaStream::new("cam", TrackSettings::default()));
        let sat = start(&broker, Role::Satellite, camera, Some(code));
        timeout(Duration::from_secs(5), sat.wait_for(|s| s.state == NodeState::Streaming))
            .await
            .unwrap()
            .unwrap();

        let hub_view = timeout(Duration::from_secs(5), hub.wait_for(|s| s.streams.len() == 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hub_view.active, Some(hub_view.streams[0].0.clone()));

        assert!(hub.set_tally(TallyState::Recording));
        timeout(Duration::from_secs(5), sat.wait_for(|s| s.tally == TallyState::Recording))
            .await
            .unwrap()
            .unwrap();

        sat.shutdown().await;
        timeout(Duration::from_secs(5), hub.wait_for(|s| s.streams.is_empty()))
            .await
            .unwrap()
            .unwrap();

        hub.shutdown().await;
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_command_keeps_running() {
        let broker = LocalBroker::new();
        let sat = start(&broker, Role::Satellite, DeviceCapture::unavailable(), None);
        timeout(Duration::from_secs(5), sat.wait_for(|s| s.state == NodeState::Ready))
            .await
            .unwrap()
            .unwrap();

        assert!(sat.set_tally(TallyState::Recording));
        assert!(sat.toggle_tally());
        sat.abort();
        let closed = timeout(Duration::from_secs(5), sat.wait_for(|s| s.state == NodeState::Closed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.tally, TallyState::Standby);
    }
}
