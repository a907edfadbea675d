//! REST endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | HTML status page |
//! | `GET` | `/api/status` | Fresh coordinator status |
//! | `POST` | `/api/trigger` | Emit one tick out of band |
//! | `GET` | `/api/triggerNext` | Legacy alias of `/api/trigger` |
//! | `POST` | `/api/start` | Enable emission |
//! | `POST` | `/api/stop` | Halt emission |

use std::fmt::Write as _;

use axum::Json;
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use daws_types::CoordinatorStatus;
use tracing::info;

use crate::error::ObserverError;
use crate::state::AppState;

/// Response body of the trigger endpoints.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TriggerResponse {
    /// Whether the tick was emitted.
    pub ok: bool,
    /// Index of the emitted tick.
    pub tick: u64,
    /// Human-readable message.
    pub message: String,
}

// ---------------------------------------------------------------------------
// GET / -- status page
// ---------------------------------------------------------------------------

/// Serve an HTML page with the latest coordinator status.
///
/// Reads the status last published by the coordinator task, so the page
/// renders even while the task is busy emitting.
pub async fn index(State(state): State<AppState>) -> impl IntoResponse {
    Html(render_page(&state.coordinator.latest()))
}

fn render_page(status: &CoordinatorStatus) -> String {
    let mut rows = String::new();
    for controller in &status.controllers {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            controller.id,
            controller.kind,
            if controller.ready { "ready" } else { "busy" },
            controller.last_seen.format("%H:%M:%S"),
        );
    }
    let last_tick = status
        .last_tick_ms
        .map_or_else(|| String::from("-"), |ms| format!("{ms} ms"));

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>DAWS World</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 900px;
        }}
        h1 {{ color: #58a6ff; }}
        td, th {{ padding: 0.2rem 1rem 0.2rem 0; text-align: left; }}
        .label {{ color: #8b949e; }}
    </style>
</head>
<body>
    <h1>DAWS World</h1>
    <table>
        <tr><td class="label">Phase</td><td>{phase}</td></tr>
        <tr><td class="label">Running</td><td>{running}</td></tr>
        <tr><td class="label">Ticks emitted</td><td>{ticks}</td></tr>
        <tr><td class="label">Simulated time</td><td>{sim_time}</td></tr>
        <tr><td class="label">Real time</td><td>{real_time}</td></tr>
        <tr><td class="label">Last tick</td><td>{last_tick}</td></tr>
        <tr><td class="label">Slow ticks</td><td>{slow}</td></tr>
        <tr><td class="label">Forced ticks</td><td>{forced}</td></tr>
        <tr><td class="label">Evictions</td><td>{evictions}</td></tr>
    </table>
    <h2>Controllers</h2>
    <table>
        <tr><th>Id</th><th>Domain</th><th>State</th><th>Last seen</th></tr>
        {rows}
    </table>
    <p><a href="/api/status">/api/status</a></p>
</body>
</html>"#,
        phase = status.phase,
        running = status.running,
        ticks = status.ticks_emitted,
        sim_time = status.sim_time.to_rfc3339(),
        real_time = status.real_time.to_rfc3339(),
        slow = status.slow_ticks,
        forced = status.forced_ticks,
        evictions = status.evictions,
    )
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Ask the coordinator for a fresh status snapshot.
pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<CoordinatorStatus>, ObserverError> {
    Ok(Json(state.coordinator.status().await?))
}

// ---------------------------------------------------------------------------
// POST /api/trigger, GET /api/triggerNext
// ---------------------------------------------------------------------------

/// Emit one tick without waiting for readiness.
///
/// Refused with `409 Conflict` while emission is stopped or while a
/// required domain has no ready controller.
pub async fn trigger(
    State(state): State<AppState>,
) -> Result<Json<TriggerResponse>, ObserverError> {
    let tick = state.coordinator.trigger().await?;
    info!(tick = tick, "tick forced over HTTP");
    Ok(Json(TriggerResponse {
        ok: true,
        tick,
        message: format!("Tick {tick} emitted"),
    }))
}

// ---------------------------------------------------------------------------
// POST /api/start, POST /api/stop
// ---------------------------------------------------------------------------

/// Enable emission.
pub async fn start(
    State(state): State<AppState>,
) -> Result<Json<CoordinatorStatus>, ObserverError> {
    let status = state.coordinator.start().await?;
    info!("emission started over HTTP");
    Ok(Json(status))
}

/// Halt emission. A tick already in flight completes.
pub async fn stop(
    State(state): State<AppState>,
) -> Result<Json<CoordinatorStatus>, ObserverError> {
    let status = state.coordinator.stop().await?;
    info!("emission stopped over HTTP");
    Ok(Json(status))
}
