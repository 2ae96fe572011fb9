//! WebSocket adapter (spec.md §1, §6, C11): the one production transport
//! around the core. Broadcasts every `EventSink` call to all connected
//! clients and maps the `ingest`/`register`/`disconnect` entry points onto
//! inbound JSON frames.
//!
//! The core (`Dispatcher`) never imports this module — wiring runs the
//! other way, in `main.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::events::{Event, EventSink, PositionUpdate};
use crate::models::{Alert, DeviceId, DeviceState, IngestPayload};
use crate::store::now_ms;

/// `EventSink` that fans every event out over a broadcast channel to
/// whatever WebSocket clients are currently subscribed.
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    /// Build a sink and the paired adapter that serves it. Splitting
    /// construction this way lets `Dispatcher::new` take its sink before
    /// the adapter (which needs the dispatcher) exists.
    pub fn channel(capacity: usize) -> (Self, broadcast::Sender<Event>) {
        let (tx, _rx) = broadcast::channel(capacity);
        (Self { tx: tx.clone() }, tx)
    }
}

impl EventSink for BroadcastSink {
    fn position_update(&self, update: PositionUpdate) {
        let _ = self.tx.send(Event::PositionUpdate(update));
    }

    fn alert(&self, alert: Alert) {
        let _ = self.tx.send(Event::Alert(alert));
    }

    fn device_left(&self, device_id: DeviceId) {
        let _ = self.tx.send(Event::DeviceLeft { device_id });
    }

    fn registered(&self, device_id: DeviceId, message: String) {
        let _ = self.tx.send(Event::Registered { device_id, message });
    }

    fn device_list(&self, devices: Vec<DeviceState>) {
        let _ = self.tx.send(Event::DeviceList { devices });
    }
}

/// Inbound frames a connected client may send (spec.md §6).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum InboundCommand {
    #[serde(rename = "ingest")]
    Ingest(IngestPayload),
    #[serde(rename = "register")]
    Register {
        device_id: DeviceId,
        #[serde(default)]
        is_base_station: bool,
    },
    #[serde(rename = "disconnect")]
    Disconnect { device_id: DeviceId },
    #[serde(rename = "device:list:request")]
    DeviceListRequest,
}

/// Binds a TCP listener, upgrades every connection to a WebSocket, and
/// relays core events to it while forwarding inbound commands into the
/// dispatcher.
pub struct WebSocketAdapter {
    port: u16,
    dispatcher: Arc<Dispatcher>,
    tx: broadcast::Sender<Event>,
}

impl WebSocketAdapter {
    pub fn new(port: u16, dispatcher: Arc<Dispatcher>, tx: broadcast::Sender<Event>) -> Self {
        Self { port, dispatcher, tx }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await.context(format!("failed to bind to {addr}"))?;

        info!("websocket adapter listening on {addr}");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let dispatcher = self.dispatcher.clone();
                    let rx = self.tx.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer_addr, dispatcher, rx).await {
                            warn!("connection error for {peer_addr}: {e}");
                        }
                        debug!("client {peer_addr} disconnected");
                    });
                }
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    mut events_rx: broadcast::Receiver<Event>,
) -> Result<()> {
    let ws_stream = accept_async(stream).await.context("websocket handshake failed")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = serde_json::json!({
        "type": "connection",
        "status": "connected",
        "message": "telemetry fusion backend",
    });
    ws_sender.send(Message::Text(welcome.to_string())).await.context("failed to send welcome frame")?;

    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_inbound(&dispatcher, &text, peer_addr),
                Ok(Message::Close(frame)) => {
                    info!("close frame from {peer_addr}: {frame:?}");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("error receiving from {peer_addr}: {e}");
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            result = events_rx.recv() => {
                match result {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("event serialization error: {e}"),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("client {peer_addr} lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = &mut receive_task => break,
        }
    }

    let _ = ws_sender.send(Message::Close(None)).await;
    Ok(())
}

fn handle_inbound(dispatcher: &Dispatcher, text: &str, peer_addr: SocketAddr) {
    let command: InboundCommand = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            debug!("ignoring unparsable frame from {peer_addr}: {e}");
            return;
        }
    };

    match command {
        InboundCommand::Ingest(payload) => {
            dispatcher.ingest(payload, now_ms());
        }
        InboundCommand::Register { device_id, is_base_station } => {
            dispatcher.register(&device_id, is_base_station, now_ms());
        }
        InboundCommand::Disconnect { device_id } => {
            dispatcher.disconnect(&device_id);
        }
        InboundCommand::DeviceListRequest => {
            dispatcher.broadcast_device_list();
        }
    }
}
