// ===============================
// src/broadcaster.rs (snapshot fan-out)
// ===============================
//
// WebSocket push server. Each accepted connection gets its own task holding
// a watch::Receiver of the latest SnapshotEnvelope: the current value is
// delivered immediately on connect (tagged CONNECTED), then every change is
// forwarded. A slow consumer only ever delays itself: the watch channel
// keeps the newest envelope and intermediate frames are skipped, so the
// engine never blocks on a subscriber.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::domain::{BroadcastStatus, SnapshotEnvelope};
use crate::metrics::WS_SUBSCRIBERS;

pub async fn serve(port: u16, snap_rx: watch::Receiver<SnapshotEnvelope>) {
    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, ?e, "broadcast bind failed");
            return;
        }
    };
    info!(%addr, "snapshot broadcast listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(subscriber(stream, peer, snap_rx.clone()));
            }
            Err(e) => warn!(?e, "broadcast accept error"),
        }
    }
}

async fn subscriber(stream: TcpStream, peer: SocketAddr, mut rx: watch::Receiver<SnapshotEnvelope>) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, ?e, "ws handshake failed");
            return;
        }
    };
    info!(%peer, "subscriber connected");
    WS_SUBSCRIBERS.inc();

    // Late joiners get the latest state right away, no history replay.
    let mut hello = rx.borrow_and_update().clone();
    hello.status = BroadcastStatus::Connected;
    if send_envelope(&mut ws, &hello).await.is_err() {
        WS_SUBSCRIBERS.dec();
        return;
    }

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break; // engine gone
                }
                let envelope = rx.borrow_and_update().clone();
                if send_envelope(&mut ws, &envelope).await.is_err() {
                    break;
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(m)) if m.is_close() => break,
                    Some(Ok(_)) => {} // inbound frames are ignored
                    _ => break,
                }
            }
        }
    }

    info!(%peer, "subscriber disconnected");
    WS_SUBSCRIBERS.dec();
}

async fn send_envelope(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    envelope: &SnapshotEnvelope,
) -> Result<(), ()> {
    let txt = match serde_json::to_string(envelope) {
        Ok(t) => t,
        Err(e) => {
            error!(?e, "envelope serialize failed, skipping frame");
            return Ok(());
        }
    };
    ws.send(Message::Text(txt)).await.map_err(|_| ())
}
