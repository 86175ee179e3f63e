//! The refresh WebSocket fabric.
//!
//! Browsers connect to `/events` on the refresh port. A single registry loop owns the client
//! table and processes register, unregister, and broadcast messages; per-client sends are
//! non-blocking so one slow client never stalls a broadcast. On shutdown the loop drains its
//! channels, closes every client, and finishes, which is the `done` signal callers join on.

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use axum_server::Handle;
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;

/// URL path browsers connect to on the refresh port.
pub const EVENTS_PATH: &str = "/events";

/// Per-client outbound queue depth; a client further behind than this skips messages.
const CLIENT_QUEUE: usize = 16;

/// What changed, from the browser's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Show the rebuilding overlay.
    Rebuilding,
    /// Swap the external stylesheet in place.
    Normal,
    /// Swap the inline critical CSS in place.
    Critical,
    /// Full page reload.
    Other,
    /// Call the globally exposed revalidate function, if present.
    Revalidate,
}

/// The broadcast payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadMessage {
    #[serde(rename = "changeType")]
    pub change_type: ChangeType,
    /// Base64 of the fresh critical CSS, for `critical` messages.
    #[serde(rename = "criticalCSS", skip_serializing_if = "Option::is_none")]
    pub critical_css: Option<String>,
    /// URL of the fresh stylesheet, for `normal` messages.
    #[serde(rename = "normalCSSURL", skip_serializing_if = "Option::is_none")]
    pub normal_css_url: Option<String>,
}

impl ReloadMessage {
    pub fn of(change_type: ChangeType) -> Self {
        Self {
            change_type,
            critical_css: None,
            normal_css_url: None,
        }
    }

    pub fn critical(css_base64: String) -> Self {
        Self {
            change_type: ChangeType::Critical,
            critical_css: Some(css_base64),
            normal_css_url: None,
        }
    }

    pub fn normal(url: String) -> Self {
        Self {
            change_type: ChangeType::Normal,
            critical_css: None,
            normal_css_url: Some(url),
        }
    }
}

enum RegistryMessage {
    Register {
        id: usize,
        tx: mpsc::Sender<ReloadMessage>,
    },
    Unregister {
        id: usize,
    },
}

/// Cloneable handle for talking to the fabric.
#[derive(Clone)]
pub struct FabricHandle {
    registry_tx: mpsc::Sender<RegistryMessage>,
    broadcast_tx: mpsc::Sender<ReloadMessage>,
    next_id: Arc<AtomicUsize>,
}

impl FabricHandle {
    /// Broadcast a message to every connected browser.
    pub async fn broadcast(&self, message: ReloadMessage) {
        tracing::debug!(?message, "broadcasting");
        if self.broadcast_tx.send(message).await.is_err() {
            tracing::debug!("fabric loop gone; broadcast dropped");
        }
    }
}

/// Spawn the registry loop and the websocket server. Returns the handle plus both join
/// handles; the loop handle completes only after shutdown draining finished.
pub fn spawn_fabric(
    port: u16,
    shutdown: broadcast::Sender<()>,
) -> (FabricHandle, JoinHandle<()>, JoinHandle<Result<()>>) {
    let (registry_tx, registry_rx) = mpsc::channel(16);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(16);

    let handle = FabricHandle {
        registry_tx,
        broadcast_tx,
        next_id: Arc::new(AtomicUsize::new(0)),
    };

    let loop_handle = tokio::spawn(registry_loop(
        registry_rx,
        broadcast_rx,
        BroadcastStream::new(shutdown.subscribe()),
    ));
    let server_handle = tokio::spawn(serve(port, handle.clone(), shutdown.subscribe()));

    (handle, loop_handle, server_handle)
}

async fn registry_loop(
    mut registry_rx: mpsc::Receiver<RegistryMessage>,
    mut broadcast_rx: mpsc::Receiver<ReloadMessage>,
    mut shutdown: BroadcastStream<()>,
) {
    let mut clients: HashMap<usize, mpsc::Sender<ReloadMessage>> = HashMap::new();

    loop {
        tokio::select! {
            Some(msg) = registry_rx.recv() => match msg {
                RegistryMessage::Register { id, tx } => {
                    tracing::debug!(id, "refresh client connected");
                    clients.insert(id, tx);
                }
                RegistryMessage::Unregister { id } => {
                    tracing::debug!(id, "refresh client disconnected");
                    clients.remove(&id);
                }
            },
            Some(message) = broadcast_rx.recv() => {
                for (id, tx) in &clients {
                    // Non-blocking: a client with a full queue skips this message.
                    if let Err(err) = tx.try_send(message.clone()) {
                        tracing::debug!(id, error = %err, "skipping slow refresh client");
                    }
                }
            },
            _ = shutdown.next() => break, // Any event, even a drop, will trigger shutdown.
        }
    }

    // Drain pending registrations with a bounded default so shutdown never deadlocks.
    while let Ok(msg) = registry_rx.try_recv() {
        if let RegistryMessage::Register { id, .. } = msg {
            tracing::debug!(id, "draining registration during shutdown");
        }
    }
    while broadcast_rx.try_recv().is_ok() {}

    // Dropping the client senders closes each connection's forward loop.
    clients.clear();
    tracing::debug!("websocket fabric has shut down");
}

async fn serve(
    port: u16,
    handle: FabricHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let router = Router::new()
        .route(
            EVENTS_PATH,
            get(
                |ws: WebSocketUpgrade, state: axum::extract::State<FabricHandle>| async move {
                    ws.on_upgrade(|socket| async move { handle_ws(socket, state.0).await })
                },
            ),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(handle);

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    // Build a shutdown signal for the axum server.
    let shutdown_handle = Handle::new();
    let shutdown = {
        let handle = shutdown_handle.clone();
        async move {
            // Any event on this channel, even a drop, should trigger shutdown.
            let _res = shutdown_rx.recv().await;
            tracing::debug!("refresh server is shutting down");
            handle.graceful_shutdown(Some(Duration::from_secs(0)));
        }
    };
    tokio::spawn(shutdown);

    tracing::info!("{}refresh websocket listening at ws://{addr}{EVENTS_PATH}", crate::common::SERVER);

    axum_server::bind(addr)
        .handle(shutdown_handle)
        .serve(router.into_make_service())
        .await
        .context("error from refresh websocket server")
}

async fn handle_ws(mut ws: WebSocket, fabric: FabricHandle) {
    let id = fabric.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel::<ReloadMessage>(CLIENT_QUEUE);

    if fabric
        .registry_tx
        .send(RegistryMessage::Register { id, tx })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            incoming = ws.recv() => {
                match incoming {
                    // The client sends `ping` on connect; nothing to answer.
                    Some(Ok(message)) => tracing::trace!(id, ?message, "client message"),
                    _ => break,
                }
            }
            outgoing = rx.recv() => {
                let Some(message) = outgoing else { break };
                let Ok(text) = serde_json::to_string(&message) else { continue };
                if let Err(err) = ws.send(Message::Text(text.into())).await {
                    tracing::info!(id, "refresh websocket failed to send: {err}");
                    break;
                }
            }
        }
    }

    let _ = fabric
        .registry_tx
        .send(RegistryMessage::Unregister { id })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_field_names_match_the_protocol() {
        let msg = ReloadMessage::critical("Ym9keXt9".into());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["changeType"], "critical");
        assert_eq!(value["criticalCSS"], "Ym9keXt9");
        assert!(value.get("normalCSSURL").is_none());

        let msg = ReloadMessage::normal("/public/vorma_normal_css_abc.css".into());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["changeType"], "normal");
        assert_eq!(value["normalCSSURL"], "/public/vorma_normal_css_abc.css");
    }

    #[tokio::test]
    async fn registry_loop_shuts_down_on_broadcast_drop() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (_registry_tx, registry_rx) = mpsc::channel(1);
        let (_broadcast_tx, broadcast_rx) = mpsc::channel(1);
        let handle = tokio::spawn(registry_loop(
            registry_rx,
            broadcast_rx,
            BroadcastStream::new(shutdown_tx.subscribe()),
        ));
        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop must finish")
            .expect("loop must not panic");
    }

    #[tokio::test]
    async fn broadcasts_reach_registered_clients_and_skip_full_queues() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (registry_tx, registry_rx) = mpsc::channel(4);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(4);
        let loop_handle = tokio::spawn(registry_loop(
            registry_rx,
            broadcast_rx,
            BroadcastStream::new(shutdown_tx.subscribe()),
        ));

        let (client_tx, mut client_rx) = mpsc::channel(1);
        registry_tx
            .send(RegistryMessage::Register { id: 0, tx: client_tx })
            .await
            .unwrap();

        broadcast_tx
            .send(ReloadMessage::of(ChangeType::Rebuilding))
            .await
            .unwrap();
        // queue is full now (depth 1); the second broadcast is skipped, not blocked on
        broadcast_tx
            .send(ReloadMessage::of(ChangeType::Other))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.change_type, ChangeType::Rebuilding);

        drop(shutdown_tx);
        loop_handle.await.unwrap();
        // sender side closed by the drained loop
        assert!(client_rx.recv().await.is_none());
    }
}
