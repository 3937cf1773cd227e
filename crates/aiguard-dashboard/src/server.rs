//! HTTP server implementation using axum.

use std::net::SocketAddr;
use std::str::FromStr;

use aiguard_core::Symbol;
use aiguard_telemetry::Metrics;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};
use crate::state::DashboardState;
use crate::types::{
    BlacklistEntry, ClearBlacklistResponse, ConnectivityView, HealthResponse, ReadinessView,
};

/// Shared application state for axum handlers.
#[derive(Clone)]
struct AppState {
    dashboard_state: DashboardState,
    config: DashboardConfig,
}

/// Create the axum router.
pub fn create_router(dashboard_state: DashboardState, config: DashboardConfig) -> Router {
    let cors = config.cors;
    let router = Router::new()
        .route("/api/health", get(get_health))
        .route("/api/connectivity", get(get_connectivity))
        .route("/api/readiness", get(get_readiness))
        .route("/api/blacklist", get(get_blacklist))
        .route("/api/blacklist/{symbol}", delete(clear_blacklist))
        .route("/metrics", get(get_metrics))
        .with_state(AppState {
            dashboard_state,
            config,
        });

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if state.config.auth_enabled() && !check_basic_auth(headers, &state.config) {
        return Err(unauthorized_response());
    }
    Ok(())
}

async fn get_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HealthResponse>, Response> {
    authorize(&state, &headers)?;
    Ok(Json(state.dashboard_state.health()))
}

async fn get_connectivity(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConnectivityView>, Response> {
    authorize(&state, &headers)?;
    Ok(Json(
        state
            .dashboard_state
            .connectivity_at(aiguard_core::now_ms()),
    ))
}

async fn get_readiness(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReadinessView>, Response> {
    authorize(&state, &headers)?;
    Ok(Json(
        state.dashboard_state.readiness_at(aiguard_core::now_ms()),
    ))
}

async fn get_blacklist(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<BlacklistEntry>>, Response> {
    authorize(&state, &headers)?;
    Ok(Json(
        state.dashboard_state.blacklist_at(aiguard_core::now_ms()),
    ))
}

/// Manual blacklist override.
async fn clear_blacklist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(raw): Path<String>,
) -> Result<Json<ClearBlacklistResponse>, Response> {
    authorize(&state, &headers)?;

    let symbol = Symbol::from_str(&raw)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;
    let cleared = state.dashboard_state.clear_blacklist(&symbol);
    info!(%symbol, cleared, "Blacklist clear requested from dashboard");

    Ok(Json(ClearBlacklistResponse {
        symbol: symbol.to_string(),
        cleared,
    }))
}

async fn get_metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    match Metrics::gather_text() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Check basic authentication.
fn check_basic_auth(headers: &HeaderMap, config: &DashboardConfig) -> bool {
    let Some(auth_str) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };

    let Some(encoded) = auth_str.strip_prefix("Basic ") else {
        return false;
    };

    let expected = format!("{}:{}", config.username, config.password);
    base64_decode(encoded).is_some_and(|decoded| decoded == expected)
}

/// Minimal base64 decode for the basic auth header.
fn base64_decode(input: &str) -> Option<String> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut result = Vec::with_capacity(input.len() * 3 / 4);
    let mut buf = 0u32;
    let mut bits = 0;

    for c in input.trim_end_matches('=').bytes() {
        let val = ALPHABET.iter().position(|&x| x == c)? as u32;
        buf = (buf << 6) | val;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            result.push(((buf >> bits) & 0xFF) as u8);
        }
    }

    String::from_utf8(result).ok()
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"aiguard\"")],
        "Unauthorized",
    )
        .into_response()
}

/// Run the dashboard HTTP server.
pub async fn run_server(
    dashboard_state: DashboardState,
    config: DashboardConfig,
) -> DashboardResult<()> {
    let port = config.port;
    let app = create_router(dashboard_state, config);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting dashboard server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(DashboardError::Bind)?;
    axum::serve(listener, app)
        .await
        .map_err(DashboardError::Serve)?;

    Ok(())
}
