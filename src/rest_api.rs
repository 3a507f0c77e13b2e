//! HTTP surface for configuration and diagnostics.
//!
//! Thin wrappers around the engine contract: `/stty` reads and writes the
//! UART configuration in its wire shape, `/stats` exposes the transfer
//! counters. All state changes go through the engine's event channel; the
//! handlers themselves hold nothing.

use axum::{
    body::Bytes,
    extract::State,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use crate::engine::{EngineHandle, StatsSnapshot, SttyRequest};
use crate::error::{AppError, AppResult};
use crate::uart::FrameFormat;

/// Shared context for the HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct ServerContext {
    pub engine: EngineHandle,
}

/// Build the application router.
pub fn router(ctx: ServerContext) -> Router {
    Router::new()
        .route("/stty", get(get_stty).post(post_stty))
        .route("/stats", get(get_stats))
        .route("/healthz", get(healthz))
        .route("/ws", get(crate::websocket::ws_handler))
        .with_state(ctx)
}

/// The wire shape of a UART configuration, shared by GET and POST responses.
pub(crate) fn wire_config(baud: u32, format: FrameFormat) -> Value {
    json!({
        "baudrate": baud,
        "bits": format.data_bits.wire_code(),
        "parity": format.parity.wire_code(),
        "stop": format.stop_bits.wire_code(),
    })
}

async fn get_stty(State(ctx): State<ServerContext>) -> AppResult<Json<Value>> {
    let (baud, format) = ctx.engine.configuration().await?;
    Ok(Json(wire_config(baud, format)))
}

/// Apply a configuration change. The whole request is validated before
/// anything is applied; a 400 with the offending field is returned otherwise.
async fn post_stty(State(ctx): State<ServerContext>, body: Bytes) -> AppResult<Json<Value>> {
    let request = SttyRequest::from_json(&body).map_err(AppError::Stty)?;
    let (baud, format) = ctx.engine.apply_stty(request).await?;
    Ok(Json(wire_config(baud, format)))
}

async fn get_stats(State(ctx): State<ServerContext>) -> AppResult<Json<StatsSnapshot>> {
    Ok(Json(ctx.engine.stats().await?))
}

async fn healthz() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}
