//! WebSocket edge of the Connection Gateway
//!
//! Accepts connections, assigns each a connection id and runs one
//! reader and one writer task per socket. The reader parses JSON text
//! frames into [`ClientEvent`]s and forwards them to the coordinator;
//! the writer drains the per-connection queue the coordinator fills.
//! Unparseable frames are logged and skipped, never fatal. When the
//! socket goes away, for any reason, the coordinator is told exactly
//! once so the session roster stays honest.

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::ClientEvent;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::coordinator::Command;
use crate::session::ConnId;

/// Capacity of each connection's outbound queue. A client that cannot
/// keep up loses events rather than stalling the coordinator.
const OUTBOUND_QUEUE: usize = 64;

/// Listens for WebSocket clients and bridges them to the coordinator.
pub struct Gateway {
    listener: TcpListener,
}

impl Gateway {
    pub async fn bind(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    /// The bound address; handy when binding port 0 in tests.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Each connection gets a fresh id and its own tasks.
    pub async fn run(self, cmd_tx: mpsc::Sender<Command>) {
        let mut next_conn: ConnId = 1;

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let conn = next_conn;
                    next_conn += 1;
                    tokio::spawn(handle_connection(stream, peer, conn, cmd_tx.clone()));
                }
                Err(err) => {
                    warn!("Failed to accept connection: {}", err);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn: ConnId,
    cmd_tx: mpsc::Sender<Command>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!("WebSocket handshake with {} failed: {}", peer, err);
            return;
        }
    };
    info!("Connection {} established from {}", conn, peer);

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    if cmd_tx
        .send(Command::Connected {
            conn,
            sender: out_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if cmd_tx.send(Command::Inbound { conn, event }).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("Bad frame from connection {}: {}", conn, err);
                }
            },
            Ok(Message::Close(_)) => {
                debug!("Connection {} sent close", conn);
                break;
            }
            // Pings are answered by tungstenite itself; binary frames
            // are not part of the protocol.
            Ok(_) => {}
            Err(err) => {
                debug!("Connection {} read error: {}", conn, err);
                break;
            }
        }
    }

    let _ = cmd_tx.send(Command::Disconnected { conn }).await;
    writer.abort();
    info!("Connection {} closed", conn);
}
