//! WebSocket glue between viewers and the engine.
//!
//! Each connection gets a transport-assigned id and a bounded outbound
//! queue. The queue is the congestion signal: when `try_send` fails the sink
//! reports `Busy` and the engine blocks the client; once the writer has
//! emptied the queue again a drain acknowledgment unblocks it. The socket
//! task itself never touches engine state; everything goes through
//! `EngineEvent`s.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::engine::{Admission, ClientId, ClientSink, EngineEvent, SinkStatus};
use crate::rest_api::ServerContext;

/// Close code sent on a capacity refusal (1013 "try again later").
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Outbound frames queued per viewer before the transport counts as
/// congested.
const SINK_QUEUE_DEPTH: usize = 8;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug)]
enum SinkFrame {
    Data(Vec<u8>),
    Ping,
}

/// Engine-facing sink handing frames to the connection's writer loop.
struct WsClientSink {
    id: ClientId,
    tx: mpsc::Sender<SinkFrame>,
}

impl ClientSink for WsClientSink {
    fn send_frame(&mut self, frame: &[u8]) -> SinkStatus {
        match self.tx.try_send(SinkFrame::Data(frame.to_vec())) {
            Ok(()) => SinkStatus::Accepted,
            // Full queue means a slow reader; a closed one means the socket
            // task is already gone and the disconnect event will clean up.
            Err(_) => SinkStatus::Busy,
        }
    }

    fn send_ping(&mut self) {
        let _ = self.tx.try_send(SinkFrame::Ping);
    }
}

impl std::fmt::Debug for WsClientSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClientSink").field("id", &self.id).finish()
    }
}

/// WebSocket upgrade handler, mounted at `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<ServerContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(mut socket: WebSocket, ctx: ServerContext) {
    let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let (frame_tx, mut frame_rx) = mpsc::channel(SINK_QUEUE_DEPTH);
    let sink = WsClientSink { id, tx: frame_tx };

    match ctx.engine.connect(id, Box::new(sink)).await {
        Ok(Admission::Accepted) => info!(client = id, "viewer connected"),
        Ok(Admission::Rejected { reason }) => {
            info!(client = id, reason, "viewer refused");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_TRY_AGAIN_LATER,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
        Err(_) => return,
    }
    ctx.engine.send(EngineEvent::ClientReady { id });

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Binary(data))) => {
                        let len = data.len();
                        ctx.engine.send(EngineEvent::InboundMessage {
                            id,
                            bytes: data.to_vec(),
                            fragment_index: 0,
                            fragment_len: len,
                            total_len: len as u64,
                        });
                    }
                    Some(Ok(Message::Text(text))) => {
                        let bytes = text.as_bytes().to_vec();
                        let len = bytes.len();
                        ctx.engine.send(EngineEvent::InboundMessage {
                            id,
                            bytes,
                            fragment_index: 0,
                            fragment_len: len,
                            total_len: len as u64,
                        });
                    }
                    Some(Ok(Message::Pong(_))) => {
                        ctx.engine.send(EngineEvent::LivenessResponse { id });
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Axum answers pings itself.
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(client = id, "viewer closed the socket");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(client = id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                }
            }
            frame = frame_rx.recv() => {
                match frame {
                    Some(SinkFrame::Data(frame)) => {
                        if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
                            break;
                        }
                        if frame_rx.is_empty() {
                            // Queue fully drained: the transport can take
                            // data again.
                            ctx.engine.send(EngineEvent::ClientDrained { id });
                        }
                    }
                    Some(SinkFrame::Ping) => {
                        if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    // The engine dropped the sink (forced removal).
                    None => break,
                }
            }
        }
    }

    info!(client = id, "viewer disconnected");
    ctx.engine.send(EngineEvent::ClientDisconnect { id });
}
