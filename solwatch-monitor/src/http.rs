//! REST API for the dashboard frontend.
//!
//! The frontend is a separate static page; this layer translates its HTTP
//! calls into typed session events and reads of the shared state. Data
//! routes require a signed-in session; `/health` and the session routes
//! themselves are exempt so the login page can function.

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::body::Bytes;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::macros::format_description;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::auth::{AuthClient, AuthError};
use crate::bridge::BridgeError;
use crate::config::LivenessConf;
use crate::contracts::ContractRegistry;
use crate::firmware::{FirmwareError, FirmwareManager};
use crate::history::{day_log_csv, format_log_time, HistoryBridge};
use crate::liveness::{classify, DeviceStatus, LivenessState};
use crate::models::{DeviceParameters, FirmwareInfo, TelemetryPacket};
use crate::params::ParamsBridge;
use crate::session::{SessionEvent, SessionMonitor, SessionPhase};
use crate::state::Shared;
use crate::status::{battery_type_label, decode_status};

#[derive(Clone)]
pub struct AppState {
    pub session: Shared<SessionMonitor>,
    pub events: UnboundedSender<SessionEvent>,
    pub liveness: Shared<LivenessState>,
    pub liveness_conf: LivenessConf,
    pub latest: Shared<Option<TelemetryPacket>>,
    pub contracts: ContractRegistry,
    pub history: Arc<HistoryBridge>,
    pub params: Arc<ParamsBridge>,
    pub firmware: Arc<FirmwareManager>,
    pub auth: Arc<AuthClient>,
}

impl AppState {
    /// Session events are fire-and-forget from the HTTP side; a closed
    /// controller channel only happens during shutdown.
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            warn!("session controller gone, dropping {:?}", event);
        }
    }
}

async fn require_session(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Login page needs health + session routes before any sign-in.
    if path.starts_with("/health") || path.starts_with("/session") {
        return Ok(next.run(req).await);
    }
    if !state.session.lock().is_authenticated() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/live", get(get_live))
        .route("/session/login", post(login))
        .route("/session/logout", post(logout))
        .route("/session/activity", post(activity))
        .route("/session/suspend", post(suspend))
        .route("/history/{date}", get(get_day_log))
        .route("/history/{date}/csv", get(get_day_log_csv))
        .route("/params", get(get_params).post(save_params))
        .route("/params/read", post(request_params_read))
        .route("/firmware/info", get(get_firmware_info))
        .route("/firmware/upload", post(upload_firmware))
        .route("/contracts", get(list_contracts))
        .route("/contracts/{name}", get(get_contract))
        .layer(middleware::from_fn_with_state(state.clone(), require_session))
        .with_state(state)
}

// ---- session ----

#[derive(Debug, Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginView {
    user_id: String,
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginView>, (StatusCode, String)> {
    match state.auth.sign_in(&body.email, &body.password).await {
        Ok(user_id) => {
            state.emit(SessionEvent::SignedIn);
            Ok(Json(LoginView { user_id }))
        }
        Err(e @ (AuthError::Rejected | AuthError::MissingCredentials)) => {
            Err((StatusCode::UNAUTHORIZED, e.to_string()))
        }
        Err(e @ AuthError::Unreachable(_)) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

async fn logout(State(state): State<AppState>) -> StatusCode {
    state.emit(SessionEvent::SignedOut);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ActivityBody {
    #[serde(default = "default_foreground")]
    foreground: bool,
}

fn default_foreground() -> bool {
    true
}

async fn activity(State(state): State<AppState>, Json(body): Json<ActivityBody>) -> StatusCode {
    state.emit(SessionEvent::Activity { foreground: body.foreground });
    StatusCode::NO_CONTENT
}

async fn suspend(State(state): State<AppState>) -> StatusCode {
    state.emit(SessionEvent::Suspend);
    StatusCode::NO_CONTENT
}

// ---- live view ----

#[derive(Debug, Serialize)]
struct LiveView {
    session: SessionPhase,
    subscription_active: bool,
    device_status: DeviceStatus,
    packet_age_seconds: u64,
    charge_stage: &'static str,
    packet: Option<TelemetryPacket>,
}

async fn get_live(State(state): State<AppState>) -> Json<LiveView> {
    let (session_phase, subscription_active) = {
        let s = state.session.lock();
        (s.phase(), s.subscription_active())
    };
    let age = state.liveness.lock().age().as_secs();
    let packet = state.latest.lock().clone();
    let stage = decode_status(packet.as_ref().and_then(|p| p.status_code));

    Json(LiveView {
        session: session_phase,
        subscription_active,
        device_status: classify(age, &state.liveness_conf),
        packet_age_seconds: age,
        charge_stage: stage.as_str(),
        packet,
    })
}

// ---- history ----

const DATE_FORMAT: &[time::format_description::FormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

#[derive(Debug, Serialize)]
struct DayLogEntry {
    time: String,
    status: &'static str,
    power_w: f64,
    battery_v: f64,
    soc: f64,
}

fn parse_date(raw: &str) -> Result<time::Date, (StatusCode, String)> {
    time::Date::parse(raw, DATE_FORMAT)
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid date: {raw}")))
}

fn bridge_error(e: BridgeError) -> (StatusCode, String) {
    (e.status_code(), e.to_string())
}

async fn get_day_log(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Vec<DayLogEntry>>, (StatusCode, String)> {
    let day = parse_date(&date)?;
    let records = state.history.fetch_day(day).await.map_err(bridge_error)?;
    let entries = records
        .iter()
        .map(|rec| DayLogEntry {
            time: format_log_time(rec.h_stamp),
            status: decode_status(rec.h_code).as_str(),
            power_w: rec.h_watt,
            battery_v: rec.h_volt,
            soc: rec.h_soc,
        })
        .collect();
    Ok(Json(entries))
}

async fn get_day_log_csv(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let day = parse_date(&date)?;
    let records = state.history.fetch_day(day).await.map_err(bridge_error)?;
    let body = day_log_csv(&records);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"solar_log.csv\""),
        ],
        body,
    )
        .into_response())
}

// ---- parameters ----

#[derive(Debug, Serialize)]
struct ParamsView {
    battery_type: &'static str,
    data: DeviceParameters,
}

async fn get_params(State(state): State<AppState>) -> Result<Json<ParamsView>, StatusCode> {
    match state.params.cached() {
        Some(data) => Ok(Json(ParamsView {
            battery_type: battery_type_label(data.batt_type),
            data,
        })),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn save_params(
    State(state): State<AppState>,
    Json(params): Json<DeviceParameters>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.params.save(&params).await.map_err(bridge_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn request_params_read(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.params.request_read().await.map_err(bridge_error)?;
    Ok(StatusCode::ACCEPTED)
}

// ---- firmware ----

async fn get_firmware_info(
    State(state): State<AppState>,
) -> Result<Json<FirmwareInfo>, StatusCode> {
    state.firmware.info().map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    name: String,
}

async fn upload_firmware(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    image: Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    match state.firmware.upload(&query.name, image.to_vec()).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(e @ FirmwareError::NotABinary) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e @ FirmwareError::StorageUnconfigured) => {
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e @ FirmwareError::Upload(_)) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
        Err(e @ FirmwareError::Bus(_)) => Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
    }
}

// ---- contracts ----

async fn list_contracts(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.contracts.list_contracts())
}

async fn get_contract(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<crate::contracts::Contract>, StatusCode> {
    state
        .contracts
        .get_contract(&name)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
