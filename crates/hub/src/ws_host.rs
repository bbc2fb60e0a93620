// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The websocket endpoint: accepts connections, frames JSON messages, and
//! owns the per-connection read/write lifecycle.
//!
//! Each accepted socket gets a reader loop (this task) and a writer task fed
//! by an unbounded queue; the queue's sender is what the registry holds and
//! the broadcaster writes to. Transport close or error funnels into
//! [`Hub::handle_disconnect`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use potluck_common::{ClientCommand, ServerEvent};

use crate::dispatch::Hub;
use crate::registry::Outbound;

pub fn mk_router(hub: Arc<Hub>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(hub)
}

/// Bind the listener and serve the hub on it. Returns the bound address
/// (useful when binding port 0) and the server task.
pub async fn bind_and_serve(
    hub: Arc<Hub>,
    listen_address: SocketAddr,
) -> Result<(SocketAddr, JoinHandle<()>), eyre::Error> {
    let listener = TcpListener::bind(listen_address).await?;
    let local_addr = listener.local_addr()?;
    let router = mk_router(hub);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            error!(error = ?e, "Websocket server exited with error");
        }
    });
    Ok((local_addr, handle))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let connection = WsConnection {
            client_id: Uuid::new_v4(),
            peer_addr,
            hub,
        };
        connection.run(socket).await;
    })
}

struct WsConnection {
    /// Fresh per accepted socket; used for registry keys and log
    /// correlation, never as a user or session identifier.
    client_id: Uuid,
    peer_addr: SocketAddr,
    hub: Arc<Hub>,
}

impl WsConnection {
    async fn run(self, socket: WebSocket) {
        info!(client_id = ?self.client_id, peer_addr = ?self.peer_addr, "New connection");
        let (ws_sender, mut ws_receiver) = socket.split();

        let (tx, rx) = unbounded_channel();
        let writer = tokio::spawn(write_loop(self.client_id, ws_sender, rx));

        // First thing on the wire, before any command is read.
        let _ = tx.send(Outbound::Event(ServerEvent::ConnectionEstablished {
            connection_id: self.client_id.to_string(),
        }));

        while let Some(frame) = ws_receiver.next().await {
            let message = match frame {
                Ok(message) => message,
                Err(e) => {
                    debug!(client_id = ?self.client_id, error = ?e, "Read failed, closing connection");
                    break;
                }
            };
            match message {
                Message::Text(text) => self.process_frame(text.as_str(), &tx),
                // A binary frame is not a command we know how to parse.
                Message::Binary(_) => {
                    let _ = tx.send(Outbound::Event(ServerEvent::Error {
                        message: "Invalid message format".to_string(),
                    }));
                }
                Message::Close(_) => {
                    debug!(client_id = ?self.client_id, "Connection closed by peer");
                    break;
                }
                // Axum answers pings on its own.
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        self.hub.handle_disconnect(self.client_id);
        writer.abort();
        info!(client_id = ?self.client_id, "Connection finished");
    }

    fn process_frame(&self, text: &str, tx: &UnboundedSender<Outbound>) {
        match ClientCommand::parse(text) {
            Ok(command) => self.hub.handle_command(self.client_id, tx, command),
            Err(e) => {
                debug!(client_id = ?self.client_id, error = %e, "Rejecting frame");
                let _ = tx.send(Outbound::Event(ServerEvent::Error {
                    message: e.to_string(),
                }));
            }
        }
    }
}

/// Drain the outbound queue onto the socket. Ends when the queue closes or
/// a close is requested; the close frame carries a normal-closure code.
async fn write_loop(
    client_id: Uuid,
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Event(event) => {
                let frame =
                    serde_json::to_string(&event).expect("Unable to serialize event");
                if let Err(e) = ws_sender.send(Message::Text(frame.into())).await {
                    debug!(?client_id, error = ?e, "Write failed, stopping writer");
                    return;
                }
            }
            Outbound::Close { reason } => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.into(),
                }));
                if let Err(e) = ws_sender.send(close).await {
                    warn!(?client_id, error = ?e, "Failed to send close frame");
                }
                return;
            }
        }
    }
}
