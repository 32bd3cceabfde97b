//! Signaling server
//!
//! Owns the identity namespace of a WebRTC deployment: a Hub registering
//! `multicam-1234` while another connection holds it is refused with
//! `ID-TAKEN`. Registered clients exchange relay envelopes; the server only
//! stamps the sender and forwards, it never looks at SDP.

use crate::net::webrtc::signal::SignalMessage;
use crate::session::TransportId;
use crate::utils::sos::SignalOfStop;
use anyhow::{bail, Context};
use async_tungstenite::tokio::accept_async;
use async_tungstenite::tungstenite::Message;
use futures_util::sink::{Sink, SinkExt};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

type ClientSender = mpsc::UnboundedSender<SignalMessage>;

/// Registered clients, by identity.
#[derive(Default)]
struct SignalStore {
    clients: Mutex<HashMap<TransportId, ClientSender>>,
}

impl SignalStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<TransportId, ClientSender>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `requested`, or a fresh random id. Returns the taken id on
    /// collision.
    fn claim(
        &self,
        requested: Option<TransportId>,
        sender: ClientSender,
    ) -> Result<TransportId, TransportId> {
        let mut clients = self.lock();
        let id = match requested {
            Some(id) if clients.contains_key(&id) => return Err(id),
            Some(id) => id,
            None => loop {
                let id = TransportId::new(format!("peer-{:016x}", rand::random::<u64>()));
                if !clients.contains_key(&id) {
                    break id;
                }
            },
        };
        clients.insert(id.clone(), sender);
        log::debug!("Signal store: registered {}, count={}", id, clients.len());
        Ok(id)
    }

    fn remove(&self, id: &TransportId) {
        let mut clients = self.lock();
        if clients.remove(id).is_some() {
            log::debug!("Signal store: removed {}, count={}", id, clients.len());
        }
    }

    fn get(&self, id: &TransportId) -> Option<ClientSender> {
        self.lock().get(id).cloned()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

pub struct SignalingServer {
    sos: SignalOfStop,
    clients: Arc<SignalStore>,
    local_addr: SocketAddr,
}

impl SignalingServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> anyhow::Result<Arc<SignalingServer>> {
        let listener = TcpListener::bind(addr)
            .await
            .context("binding signaling listener")?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new(SignalingServer {
            sos: SignalOfStop::new(),
            clients: Arc::new(SignalStore::default()),
            local_addr,
        });

        let sos = server.sos.clone();
        let clients = Arc::clone(&server.clients);
        server.sos.spawn(async move {
            log::info!("Signaling server listening on {}", local_addr);
            while let Ok((stream, remote)) = listener.accept().await {
                let clients = Arc::clone(&clients);
                let conn_sos = sos.clone();
                sos.spawn(async move {
                    if let Err(e) = handle_connection(stream, clients, conn_sos).await {
                        log::warn!("Signaling connection from {} ended: {:#}", remote, e);
                    }
                });
            }
        });

        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn close(&self) {
        self.sos.cancel();
    }
}

async fn send_signal<S>(sink: &mut S, msg: &SignalMessage) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    sink.send(Message::text(msg.encode()?)).await?;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    clients: Arc<SignalStore>,
    sos: SignalOfStop,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await.context("websocket handshake")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let requested = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => match SignalMessage::decode(text.as_str()) {
                Ok(SignalMessage::Register { id }) => break id,
                Ok(_) => {
                    let refusal = SignalMessage::Error {
                        message: "REGISTER expected".into(),
                    };
                    send_signal(&mut ws_sender, &refusal).await?;
                    bail!("client sent a relay before registering");
                }
                Err(e) => bail!("malformed register frame: {e}"),
            },
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = match clients.claim(requested, tx) {
        Ok(id) => id,
        Err(taken) => {
            log::info!("Refusing registration of {}: identity taken", taken);
            send_signal(&mut ws_sender, &SignalMessage::IdTaken { id: taken }).await?;
            let _ = SinkExt::close(&mut ws_sender).await;
            return Ok(());
        }
    };
    send_signal(&mut ws_sender, &SignalMessage::Open { id: id.clone() }).await?;

    let writer = sos.spawn(async move {
        while let Some(msg) = rx.recv().await {
            if send_signal(&mut ws_sender, &msg).await.is_err() {
                break;
            }
        }
        let _ = SinkExt::close(&mut ws_sender).await;
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match SignalMessage::decode(text.as_str()) {
                Ok(msg) => route(&clients, &id, msg),
                Err(e) => log::warn!("Dropping malformed frame from {}: {}", id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!("Signaling socket of {} failed: {}", id, e);
                break;
            }
        }
    }

    clients.remove(&id);
    writer.abort();
    Ok(())
}

fn route(clients: &SignalStore, from: &TransportId, mut msg: SignalMessage) {
    let Some(relay) = msg.relay_mut() else {
        log::warn!("Ignoring non-relay message from {}", from);
        return;
    };
    relay.src = Some(from.clone());
    let dst = relay.dst.clone();

    match clients.get(&dst) {
        Some(target) if target.send(msg).is_ok() => {}
        _ => {
            log::debug!("Relay from {} to unknown {}", from, dst);
            if let Some(sender) = clients.get(from) {
                let _ = sender.send(SignalMessage::Expire { src: dst });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::webrtc::signal::{LinkKind, Relay, RelayPayload};
    use async_tungstenite::tokio::{connect_async, ConnectStream};
    use async_tungstenite::WebSocketStream;
    use std::time::Duration;

    type Client = WebSocketStream<ConnectStream>;

    async fn register(server: &SignalingServer, id: Option<&str>) -> (Client, SignalMessage) {
        let (mut ws, _) = connect_async(server.url()).await.unwrap();
        let register = SignalMessage::Register {
            id: id.map(TransportId::from),
        };
        ws.send(Message::text(register.encode().unwrap())).await.unwrap();
        let reply = next_signal(&mut ws).await;
        (ws, reply)
    }

    async fn next_signal(ws: &mut Client) -> SignalMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for signal")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = frame {
                return SignalMessage::decode(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_register_and_collision() {
        let server = SignalingServer::bind("127.0.0.1:0").await.unwrap();

        let (_hub, reply) = register(&server, Some("multicam-1234")).await;
        assert!(matches!(reply, SignalMessage::Open { ref id } if id.as_str() == "multicam-1234"));

        let (_dup, reply) = register(&server, Some("multicam-1234")).await;
        assert!(matches!(reply, SignalMessage::IdTaken { .. }));

        let (_anon, reply) = register(&server, None).await;
        let SignalMessage::Open { id } = reply else {
            panic!("expected OPEN");
        };
        assert!(id.as_str().starts_with("peer-"));
        assert_eq!(server.client_count(), 2);

        server.close();
    }

    #[tokio::test]
    async fn test_relay_stamps_source_and_expires() {
        let server = SignalingServer::bind("127.0.0.1:0").await.unwrap();
        let (mut hub, _) = register(&server, Some("hub")).await;
        let (mut sat, _) = register(&server, Some("sat")).await;

        let offer = SignalMessage::Offer(Relay {
            src: Some(TransportId::from("spoofed")),
            dst: TransportId::from("hub"),
            payload: RelayPayload::new("dc_1", LinkKind::Control),
        });
        sat.send(Message::text(offer.encode().unwrap())).await.unwrap();

        let SignalMessage::Offer(relay) = next_signal(&mut hub).await else {
            panic!("expected OFFER");
        };
        assert_eq!(relay.src, Some(TransportId::from("sat")));
        assert_eq!(relay.payload.connection_id, "dc_1");

        let lost = SignalMessage::Offer(Relay {
            src: None,
            dst: TransportId::from("nobody"),
            payload: RelayPayload::new("mc_1", LinkKind::Media),
        });
        sat.send(Message::text(lost.encode().unwrap())).await.unwrap();
        let SignalMessage::Expire { src } = next_signal(&mut sat).await else {
            panic!("expected EXPIRE");
        };
        assert_eq!(src.as_str(), "nobody");

        server.close();
    }

    #[tokio::test]
    async fn test_identity_released_on_disconnect() {
        let server = SignalingServer::bind("127.0.0.1:0").await.unwrap();
        let (mut hub, _) = register(&server, Some("hub")).await;
        hub.close(None).await.unwrap();

        let mut released = false;
        for _ in 0..50 {
            if server.client_count() == 0 {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(released);

        let (_again, reply) = register(&server, Some("hub")).await;
        assert!(matches!(reply, SignalMessage::Open { .. }));
        server.close();
    }
}
