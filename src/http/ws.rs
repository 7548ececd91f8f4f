use super::state::AppState;
use crate::relay::{CloseReason, LifecycleHandler, OutboundFrame, PeerConnection};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument};

/// How long the writer gets to finish the close handshake once reading stops
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// GET / and GET /ws
/// Upgrade to a relay WebSocket
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(state.websocket.max_payload_size)
        .on_upgrade(move |socket| run_ws_session(socket, state))
}

/// Run one peer from upgrade to disconnect.
///
/// Inbound frames are handled in order on this task. Outbound frames go
/// through the connection's queue to a separate writer task, which also
/// sends heartbeat pings and reacts to server shutdown.
pub async fn run_ws_session(socket: WebSocket, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();
    let (connection, send_rx) = PeerConnection::channel();
    let lifecycle = state.lifecycle.clone();

    lifecycle.open(Arc::clone(&connection)).await;

    let last_seen = Arc::new(Mutex::new(Instant::now()));
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        state.websocket.heartbeat_interval(),
        Arc::clone(&last_seen),
        state.shutdown_signal(),
        stop_rx,
    ));

    let reason = tokio::select! {
        reason = read_loop(&lifecycle, &connection, ws_rx, &last_seen) => {
            // The writer owns the sink, so it sends the close reply
            let _ = stop_tx.send(());
            if timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }
            reason
        }
        joined = &mut writer => match joined {
            Ok(reason) => reason,
            Err(e) => CloseReason::TransportError(format!("writer task failed: {}", e)),
        },
    };

    lifecycle.close(&connection, reason).await;
}

#[instrument(skip_all, fields(conn_id = %connection.id()))]
async fn read_loop(
    lifecycle: &LifecycleHandler,
    connection: &PeerConnection,
    mut ws_rx: SplitStream<WebSocket>,
    last_seen: &Mutex<Instant>,
) -> CloseReason {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => return CloseReason::TransportError(e.to_string()),
        };

        *last_seen.lock().await = Instant::now();

        match msg {
            Message::Text(text) => {
                let outcome = lifecycle.handle_frame(connection, &text).await;
                debug!(?outcome, "frame handled");
            }
            Message::Binary(data) => {
                let outcome = lifecycle.handle_binary(connection, &data).await;
                debug!(?outcome, "binary frame handled");
            }
            Message::Close(_) => return CloseReason::ClientClosed,
            // axum answers pings itself; both only count as liveness
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    CloseReason::ClientClosed
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    heartbeat: Option<Duration>,
    last_seen: Arc<Mutex<Instant>>,
    mut shutdown: watch::Receiver<bool>,
    mut stop: oneshot::Receiver<()>,
) -> CloseReason {
    // With the heartbeat disabled the ticker is never polled
    let period = heartbeat.unwrap_or(Duration::from_secs(3600));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            frame = send_rx.recv() => {
                let Some(frame) = frame else {
                    return CloseReason::ClientClosed;
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.to_string())).await {
                    return CloseReason::TransportError(e.to_string());
                }
            }
            _ = ticker.tick(), if heartbeat.is_some() => {
                // Silent for two full intervals: the peer missed a ping
                if last_seen.lock().await.elapsed() > period * 2 {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return CloseReason::HeartbeatTimeout;
                }
                if let Err(e) = ws_tx.send(Message::Ping(Vec::new())).await {
                    return CloseReason::TransportError(e.to_string());
                }
            }
            _ = &mut stop => {
                // Flushes the close reply queued when the peer's Close was read
                let _ = ws_tx.close().await;
                return CloseReason::ClientClosed;
            }
            _ = shutdown.changed() => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                return CloseReason::ServerShutdown;
            }
        }
    }
}
