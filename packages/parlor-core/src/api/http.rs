//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.
//! The UI is served from elsewhere (GitHub Pages in the original setup), so
//! the API is CORS-open.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::devices::DeviceKind;
use crate::error::{ParlorError, ParlorResult};
use crate::services::{AudioMode, SwitchOutcome};
use crate::webos::WakeReport;
use crate::wol::MacAddr;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct VolumeRequest {
    volume: u8,
}

#[derive(Deserialize)]
struct MuteRequest {
    mute: bool,
}

#[derive(Deserialize, Default)]
struct WakeRequest {
    #[serde(default)]
    mac: Option<String>,
}

#[derive(Deserialize)]
struct AddressRequest {
    ip: String,
    #[serde(default)]
    identifier: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/audio/gaming", post(audio_gaming))
        .route("/audio/normal", post(audio_normal))
        .route("/audio/headphones", post(audio_headphones))
        .route("/audio/status", get(audio_status))
        .route("/volume/up", post(volume_up))
        .route("/volume/down", post(volume_down))
        .route("/volume/set", post(volume_set))
        .route("/volume/mute", post(volume_mute))
        .route("/events", get(events))
        .route("/tv/wake", post(tv_wake))
        .route("/tv/off", post(tv_off))
        .route("/devices/{kind}/address", post(update_address))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness + television link status, in the shape the UI polls.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "tvConnected": state.link.is_connected(),
    }))
}

async fn switch(state: AppState, mode: AudioMode) -> ParlorResult<Json<SwitchOutcome>> {
    Ok(Json(state.audio.switch_mode(mode).await?))
}

/// TV speakers: no soundbar latency while gaming.
async fn audio_gaming(State(state): State<AppState>) -> ParlorResult<Json<SwitchOutcome>> {
    switch(state, AudioMode::TvSpeaker).await
}

/// Soundbar over HDMI ARC: normal viewing.
async fn audio_normal(State(state): State<AppState>) -> ParlorResult<Json<SwitchOutcome>> {
    switch(state, AudioMode::Soundbar).await
}

/// Optical headphone adapter: late-night viewing.
async fn audio_headphones(State(state): State<AppState>) -> ParlorResult<Json<SwitchOutcome>> {
    switch(state, AudioMode::Headphones).await
}

/// The television's own report of the active output.
async fn audio_status(State(state): State<AppState>) -> ParlorResult<impl IntoResponse> {
    let output = state.audio.current_output().await?;
    Ok(Json(json!({ "output": output })))
}

async fn volume_up(State(state): State<AppState>) -> ParlorResult<impl IntoResponse> {
    state.volume.volume_up().await?;
    Ok(Json(json!({ "success": true })))
}

async fn volume_down(State(state): State<AppState>) -> ParlorResult<impl IntoResponse> {
    state.volume.volume_down().await?;
    Ok(Json(json!({ "success": true })))
}

async fn volume_set(
    State(state): State<AppState>,
    Json(request): Json<VolumeRequest>,
) -> ParlorResult<impl IntoResponse> {
    state.volume.set_volume(request.volume).await?;
    Ok(Json(json!({ "success": true })))
}

async fn volume_mute(
    State(state): State<AppState>,
    Json(request): Json<MuteRequest>,
) -> ParlorResult<impl IntoResponse> {
    state.volume.set_mute(request.mute).await?;
    Ok(Json(json!({ "success": true })))
}

/// Live AV state as a `text/event-stream`; one `data: <json>` frame per
/// snapshot. A late joiner immediately receives the last-known state.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (guard, rx) = state.state.subscribe();
    log::info!("[API] SSE subscriber {} connected", guard.id());

    let stream = UnboundedReceiverStream::new(rx).map(move |snapshot| {
        // The guard rides along with the stream; dropping the connection
        // drops it and unregisters the subscriber.
        let _keep = &guard;
        Event::default().json_data(&snapshot)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn tv_wake(
    State(state): State<AppState>,
    request: Option<Json<WakeRequest>>,
) -> ParlorResult<Json<WakeReport>> {
    let mac = request
        .and_then(|Json(r)| r.mac)
        .map(|raw| raw.parse::<MacAddr>())
        .transpose()
        .map_err(|e| ParlorError::InvalidRequest(e.to_string()))?;

    Ok(Json(state.power.wake(mac).await?))
}

async fn tv_off(State(state): State<AppState>) -> ParlorResult<impl IntoResponse> {
    state.power.power_off().await?;
    Ok(Json(json!({ "success": true })))
}

/// Runtime address refresh from the discovery collaborator. An address
/// change invalidates any cached connection handle for that device.
async fn update_address(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<AddressRequest>,
) -> ParlorResult<impl IntoResponse> {
    let kind = DeviceKind::from_route(&kind)
        .ok_or_else(|| ParlorError::InvalidRequest(format!("unknown device kind: {kind}")))?;

    let changed = state
        .registry
        .update_address(kind, request.ip, request.identifier);
    if changed && kind == DeviceKind::Tv {
        state.link.invalidate();
    }

    Ok(Json(json!({ "success": true, "changed": changed })))
}
