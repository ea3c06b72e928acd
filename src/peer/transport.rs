//! Peer-side connections to a relay
//!
//! The frame loop talks to a [`Transport`] synchronously: `send` queues,
//! `try_recv` never waits. Two implementations exist: an in-process one
//! sharing a [`RoomRegistry`] and a WebSocket one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::relay::{RelayError, RoomRegistry};
use crate::ws::protocol::{ActorId, ClientMsg, ServerMsg};

/// Capacity of per-connection queues
const QUEUE_CAPACITY: usize = 1024;

/// Something that arrived from the relay
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ServerMsg),
    /// The connection is gone; no further messages follow
    Disconnected,
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("send queue full")]
    Full,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to connect: {0}")]
    Connect(String),
}

/// Ordered, non-blocking link to a relay
pub trait Transport: Send {
    fn send(&mut self, msg: ClientMsg) -> Result<(), TransportError>;
    fn try_recv(&mut self) -> Option<TransportEvent>;
    fn is_connected(&self) -> bool;
}

/// In-process relay, same routing as the WebSocket server
#[derive(Clone)]
pub struct LocalRelay {
    registry: Arc<RoomRegistry>,
}

impl LocalRelay {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Open a new connection
    pub fn connect(&self) -> LocalTransport {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        LocalTransport {
            registry: self.registry.clone(),
            tx,
            rx,
            seat: None,
            connected: true,
            disconnect_pending: false,
        }
    }
}

/// One in-process connection
pub struct LocalTransport {
    registry: Arc<RoomRegistry>,
    tx: mpsc::Sender<ServerMsg>,
    rx: mpsc::Receiver<ServerMsg>,
    /// Room and actor id while joined
    seat: Option<(String, ActorId)>,
    connected: bool,
    disconnect_pending: bool,
}

impl LocalTransport {
    /// Drop the connection as if the network went away
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        if let Some((room, actor)) = self.seat.take() {
            self.registry.disconnect(&room, actor);
        }
        self.connected = false;
        self.disconnect_pending = true;
    }

    fn reject(&self, error: RelayError) {
        debug!(error = %error, "local relay rejected message");
        let _ = self.tx.try_send(error.to_server_msg());
    }
}

impl Transport for LocalTransport {
    fn send(&mut self, msg: ClientMsg) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }

        match msg {
            ClientMsg::JoinRoom { room, nickname } => {
                if self.seat.is_some() {
                    self.reject(RelayError::AlreadyInRoom);
                    return Ok(());
                }
                match self.registry.join(&room, &nickname, self.tx.clone()) {
                    Ok(seat) => self.seat = Some(seat),
                    Err(e) => self.reject(e),
                }
            }
            other => {
                let Some((room, actor)) = self.seat.clone() else {
                    self.reject(RelayError::NotInRoom);
                    return Ok(());
                };
                let leaving = matches!(other, ClientMsg::LeaveRoom);
                match self.registry.handle(&room, actor, other) {
                    Ok(()) if leaving => self.seat = None,
                    Ok(()) => {}
                    Err(e) => self.reject(e),
                }
            }
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Option<TransportEvent> {
        if let Ok(msg) = self.rx.try_recv() {
            return Some(TransportEvent::Message(msg));
        }
        if self.disconnect_pending {
            self.disconnect_pending = false;
            return Some(TransportEvent::Disconnected);
        }
        None
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// WebSocket connection to a remote relay
pub struct WsTransport {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<TransportEvent>,
    connected: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WsTransport {
    /// Connect and spawn the reader and writer tasks
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(url = %url, "connected to relay");

        let (mut ws_sink, mut ws_stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(QUEUE_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        // Writer task: frame loop -> WebSocket
        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(text)).await {
                    debug!(error = %e, "relay send failed");
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Reader task: WebSocket -> frame loop
        let reader_connected = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMsg>(&text) {
                        Ok(msg) => match in_tx.try_send(TransportEvent::Message(msg)) {
                            Ok(()) => {}
                            Err(TrySendError::Full(TransportEvent::Message(ServerMsg::Movement {
                                ..
                            }))) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!("inbound queue full, message dropped");
                            }
                            Err(TrySendError::Closed(_)) => break,
                        },
                        Err(e) => warn!(error = %e, "failed to parse relay message"),
                    },
                    Ok(Message::Close(_)) => {
                        info!("relay closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "relay connection error");
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            let _ = in_tx.send(TransportEvent::Disconnected).await;
        });

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
            connected,
            tasks: vec![writer, reader],
        })
    }
}

impl Transport for WsTransport {
    fn send(&mut self, msg: ClientMsg) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let text = serde_json::to_string(&msg)?;
        self.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn try_recv(&mut self) -> Option<TransportEvent> {
        self.inbound.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
