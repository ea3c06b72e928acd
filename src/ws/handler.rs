//! WebSocket upgrade handler for relay connections

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::relay::{RelayError, RoomRegistry};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ActorId, ClientMsg, ServerMsg};

/// Outbound queue depth per connection
const OUTBOUND_CAPACITY: usize = 256;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "New relay connection");

    let (ws_sink, ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_CAPACITY);

    // Spawn writer task: room deliveries -> WebSocket
    let writer_handle = tokio::spawn(write_loop(conn_id, ws_sink, out_rx));

    let limiter = ConnectionRateLimiter::new(state.config.connection_rate_limit);
    let mut session = Session {
        conn_id,
        registry: &state.registry,
        outbound: out_tx,
        seat: None,
    };
    session.read_loop(ws_stream, &limiter).await;
    session.close();

    // The writer ends once every sender is gone; abort covers a stuck socket
    writer_handle.abort();
    info!(conn_id = %conn_id, "Relay connection closed");
}

async fn write_loop(
    conn_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// One connection's place in the relay
struct Session<'a> {
    conn_id: Uuid,
    registry: &'a RoomRegistry,
    outbound: mpsc::Sender<ServerMsg>,
    /// Room and actor id while joined
    seat: Option<(String, ActorId)>,
}

impl Session<'_> {
    async fn read_loop(
        &mut self,
        mut ws_stream: futures::stream::SplitStream<WebSocket>,
        limiter: &ConnectionRateLimiter,
    ) {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !limiter.check() {
                        warn!(conn_id = %self.conn_id, "Rate limited relay message");
                        continue;
                    }
                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(msg) => self.route(msg),
                        Err(e) => {
                            warn!(conn_id = %self.conn_id, error = %e, "Failed to parse client message");
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(conn_id = %self.conn_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(conn_id = %self.conn_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(conn_id = %self.conn_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    fn route(&mut self, msg: ClientMsg) {
        let result = match msg {
            ClientMsg::JoinRoom { room, nickname } => self.join(&room, &nickname),
            other => match self.seat.clone() {
                Some((room, actor)) => {
                    let leaving = matches!(other, ClientMsg::LeaveRoom);
                    let result = self.registry.handle(&room, actor, other);
                    if leaving && result.is_ok() {
                        info!(conn_id = %self.conn_id, room = %room, actor_id = actor, "Left room");
                        self.seat = None;
                    }
                    result
                }
                None => Err(RelayError::NotInRoom),
            },
        };

        if let Err(e) = result {
            debug!(conn_id = %self.conn_id, error = %e, "Relay rejected message");
            if self.outbound.try_send(e.to_server_msg()).is_err() {
                warn!(conn_id = %self.conn_id, "Could not report relay error");
            }
        }
    }

    fn join(&mut self, room: &str, nickname: &str) -> Result<(), RelayError> {
        if self.seat.is_some() {
            return Err(RelayError::AlreadyInRoom);
        }
        let (room, actor_id) = self.registry.join(room, nickname, self.outbound.clone())?;
        info!(conn_id = %self.conn_id, room = %room, actor_id, "Joined room");
        self.seat = Some((room, actor_id));
        Ok(())
    }

    /// Connection gone: free the seat
    fn close(&mut self) {
        if let Some((room, actor)) = self.seat.take() {
            self.registry.disconnect(&room, actor);
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
