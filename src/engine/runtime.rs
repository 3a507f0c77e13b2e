//! Single-task scheduler for the engine.
//!
//! Transport callbacks never touch the engine directly; they are converted
//! into `EngineEvent` variants and queued onto one channel. `run_engine`
//! owns the `BridgeEngine` and is the only code that calls it, so every
//! mutation happens on one logical thread with run-to-completion semantics:
//! no locks, and no callback can reenter the engine mid-mutation.

use super::clients::{Admission, ClientId, ClientSink};
use super::stats::StatsSnapshot;
use super::{BridgeEngine, SttyError, SttyRequest};
use crate::uart::FrameFormat;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Everything the glue layer can ask of the engine, as tagged variants.
#[derive(Debug)]
pub enum EngineEvent {
    ClientConnect {
        id: ClientId,
        sink: Box<dyn ClientSink>,
        reply: oneshot::Sender<Admission>,
    },
    ClientReady {
        id: ClientId,
    },
    ClientDisconnect {
        id: ClientId,
    },
    ClientDrained {
        id: ClientId,
    },
    LivenessResponse {
        id: ClientId,
    },
    InboundMessage {
        id: ClientId,
        bytes: Vec<u8>,
        fragment_index: u64,
        fragment_len: usize,
        total_len: u64,
    },
    ApplyStty {
        request: SttyRequest,
        reply: oneshot::Sender<Result<(u32, FrameFormat), SttyError>>,
    },
    QueryConfiguration {
        reply: oneshot::Sender<(u32, FrameFormat)>,
    },
    QueryStats {
        reply: oneshot::Sender<StatsSnapshot>,
    },
    StartAutobaud,
}

/// Cheap, cloneable sender half used by HTTP handlers and socket tasks.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

/// Create the event channel and its handle.
pub fn engine_channel() -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EngineHandle { tx }, rx)
}

impl EngineHandle {
    /// Fire-and-forget event. Returns false if the engine task is gone.
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Ask the engine to admit a new client.
    pub async fn connect(
        &self,
        id: ClientId,
        sink: Box<dyn ClientSink>,
    ) -> Result<Admission, crate::error::AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineEvent::ClientConnect { id, sink, reply })
            .map_err(|_| crate::error::AppError::EngineGone)?;
        rx.await.map_err(|_| crate::error::AppError::EngineGone)
    }

    pub async fn configuration(&self) -> Result<(u32, FrameFormat), crate::error::AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineEvent::QueryConfiguration { reply })
            .map_err(|_| crate::error::AppError::EngineGone)?;
        rx.await.map_err(|_| crate::error::AppError::EngineGone)
    }

    pub async fn stats(&self) -> Result<StatsSnapshot, crate::error::AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineEvent::QueryStats { reply })
            .map_err(|_| crate::error::AppError::EngineGone)?;
        rx.await.map_err(|_| crate::error::AppError::EngineGone)
    }

    pub async fn apply_stty(
        &self,
        request: SttyRequest,
    ) -> Result<(u32, FrameFormat), crate::error::AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineEvent::ApplyStty { request, reply })
            .map_err(|_| crate::error::AppError::EngineGone)?;
        let result = rx.await.map_err(|_| crate::error::AppError::EngineGone)?;
        result.map_err(crate::error::AppError::Stty)
    }
}

/// Drive the engine until every handle is dropped.
///
/// One `tokio::select!` loop multiplexes queued events with the periodic
/// tick that polls the UART and advances the engine's timers.
pub async fn run_engine(
    mut engine: BridgeEngine,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    tick_interval: Duration,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => dispatch(&mut engine, event, Instant::now()),
                    None => {
                        info!("engine handles dropped, stopping");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                engine.poll_uart(now);
                engine.tick(now);
            }
        }
    }
}

/// Route one event to the engine. Replies to dead requesters are dropped
/// silently; the requester has already gone away.
fn dispatch(engine: &mut BridgeEngine, event: EngineEvent, now: Instant) {
    match event {
        EngineEvent::ClientConnect { id, sink, reply } => {
            let admission = engine.on_client_connect(id, sink, now);
            let _ = reply.send(admission);
        }
        EngineEvent::ClientReady { id } => engine.on_client_ready(id),
        EngineEvent::ClientDisconnect { id } => engine.on_client_disconnect(id),
        EngineEvent::ClientDrained { id } => engine.on_client_drained(id),
        EngineEvent::LivenessResponse { id } => engine.on_liveness_response(id, now),
        EngineEvent::InboundMessage {
            id,
            bytes,
            fragment_index,
            fragment_len,
            total_len,
        } => {
            if let Err(e) =
                engine.on_inbound_message(id, &bytes, fragment_index, fragment_len, total_len)
            {
                warn!(client = id, error = %e, "inbound configuration request rejected");
            }
        }
        EngineEvent::ApplyStty { request, reply } => {
            let _ = reply.send(engine.apply_stty(&request));
        }
        EngineEvent::QueryConfiguration { reply } => {
            let _ = reply.send(engine.configuration());
        }
        EngineEvent::QueryStats { reply } => {
            let _ = reply.send(engine.stats());
        }
        EngineEvent::StartAutobaud => {
            if let Err(e) = engine.start_autobaud(now) {
                warn!(error = %e, "autobaud start failed");
            }
        }
    }
}
