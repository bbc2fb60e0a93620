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

//! Async client for the potluck hub.
//!
//! Sends typed [`ClientCommand`]s and routes inbound [`ServerEvent`]s to a
//! subscriber set keyed by [`EventKind`]. Subscribers are unbounded queues;
//! a dropped receiver is pruned on the next delivery. The hub's snapshots
//! are ground truth: a client replaces its local state with them rather
//! than merging, and adopts server-assigned ids.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, warn};

use potluck_common::{ClientCommand, EventKind, ServerEvent};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("Unable to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Whether the connection is still up, and if not, the close frame (code,
/// reason) the server sent, if it sent one at all.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Open,
    Closed(Option<(u16, String)>),
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// Events that arrive before anyone has subscribed are held back this many
// deep, so an early `connection:established` is not lost to a subscriber
// installed a beat later.
const PENDING_LIMIT: usize = 256;

#[derive(Default)]
struct SubscriberTable {
    by_kind: HashMap<EventKind, Vec<UnboundedSender<ServerEvent>>>,
    firehose: Vec<UnboundedSender<ServerEvent>>,
    pending: VecDeque<ServerEvent>,
}

impl SubscriberTable {
    /// Fan an event out to the firehose and to the subscribers for its
    /// kind, pruning any whose receiver is gone. An event nobody is
    /// listening for yet is buffered for the next subscriber.
    fn deliver(&mut self, event: &ServerEvent) {
        self.firehose.retain(|tx| tx.send(event.clone()).is_ok());
        let mut consumed = !self.firehose.is_empty();
        if let Some(subscribers) = self.by_kind.get_mut(&event.kind()) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            consumed |= !subscribers.is_empty();
        }
        if !consumed {
            if self.pending.len() == PENDING_LIMIT {
                self.pending.pop_front();
            }
            self.pending.push_back(event.clone());
        }
    }

    /// Hand buffered events matching `kind` (or all of them, if `None`) to
    /// a fresh subscriber, oldest first.
    fn flush_pending(&mut self, kind: Option<EventKind>, tx: &UnboundedSender<ServerEvent>) {
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for event in self.pending.drain(..) {
            if kind.is_none_or(|k| event.kind() == k) {
                let _ = tx.send(event);
            } else {
                kept.push_back(event);
            }
        }
        self.pending = kept;
    }
}

pub struct HubClient {
    sink: tokio::sync::Mutex<WsSink>,
    subscribers: Arc<Mutex<SubscriberTable>>,
    state_rx: watch::Receiver<ConnectionState>,
    _reader: JoinHandle<()>,
}

impl HubClient {
    /// Connect to a hub endpoint, e.g. `ws://127.0.0.1:8080/ws`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _response) = connect_async(url).await?;
        let (sink, source) = stream.split();

        let subscribers = Arc::new(Mutex::new(SubscriberTable::default()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let reader = tokio::spawn(read_loop(source, subscribers.clone(), state_tx));

        Ok(Self {
            sink: tokio::sync::Mutex::new(sink),
            subscribers,
            state_rx,
            _reader: reader,
        })
    }

    /// Send one command frame.
    pub async fn send(&self, command: &ClientCommand) -> Result<(), ClientError> {
        let frame = serde_json::to_string(command)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(frame)).await?;
        Ok(())
    }

    /// Send a raw text frame, bypassing the typed command encoding. Useful
    /// for exercising the hub's protocol error handling.
    pub async fn send_raw(&self, frame: &str) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(frame.to_string())).await?;
        Ok(())
    }

    /// Subscribe to one event kind. Every matching event from now on is
    /// queued on the returned receiver.
    pub fn subscribe(&self, kind: EventKind) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx) = unbounded_channel();
        let mut table = self.subscribers.lock().unwrap();
        table.flush_pending(Some(kind), &tx);
        table.by_kind.entry(kind).or_default().push(tx);
        rx
    }

    /// Subscribe to every event, in arrival order.
    pub fn subscribe_all(&self) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx) = unbounded_channel();
        let mut table = self.subscribers.lock().unwrap();
        table.flush_pending(None, &tx);
        table.firehose.push(tx);
        rx
    }

    /// Initiate a client-side close.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None)).await?;
        Ok(())
    }

    /// Wait until the connection is closed, returning the server's close
    /// frame (code, reason) if one was received.
    pub async fn wait_closed(&self) -> Option<(u16, String)> {
        let mut rx = self.state_rx.clone();
        loop {
            if let ConnectionState::Closed(frame) = rx.borrow_and_update().clone() {
                return frame;
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

async fn read_loop(
    mut source: WsSource,
    subscribers: Arc<Mutex<SubscriberTable>>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut close_frame = None;
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                Ok(event) => subscribers.lock().unwrap().deliver(&event),
                Err(e) => warn!(error = %e, "Discarding unparseable event frame"),
            },
            Ok(Message::Close(frame)) => {
                close_frame =
                    frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                // The transport winds down after this; fall out on the next
                // poll.
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Client read failed");
                break;
            }
        }
    }
    let _ = state_tx.send(ConnectionState::Closed(close_frame));
}
