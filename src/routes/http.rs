// JSON handlers. Every body is `{ success, data?, error? }`.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::AppState;
use crate::collector;
use crate::inventory_repo::VmSearch;
use crate::models::SubnetPrefix;
use crate::scanner;
use crate::version::{NAME, VERSION};

const DEFAULT_RECENT_DAYS: i64 = 7;

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::warn!(error = %e, "request failed");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

fn reply<T: Serialize>(result: anyhow::Result<T>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => internal_error(e),
    }
}

fn parse_prefix(raw: &str) -> Result<SubnetPrefix, Response> {
    SubnetPrefix::from_str(raw).map_err(|e| error_response(&e.to_string(), StatusCode::BAD_REQUEST))
}

/// GET /version
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/hosts
pub(super) async fn list_hosts(State(state): State<AppState>) -> Response {
    reply(state.repo.list_host_overviews().await)
}

/// GET /api/hosts/{address}/vms
pub(super) async fn host_vms(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Response {
    reply(state.repo.vms_for_host(&address).await)
}

#[derive(Debug, Deserialize)]
pub(super) struct VmQuery {
    name: Option<String>,
    ip: Option<String>,
}

/// GET /api/vms?name=&ip=. `ip` wins when both are given.
pub(super) async fn search_vms(
    State(state): State<AppState>,
    Query(q): Query<VmQuery>,
) -> Response {
    let search = match (q.ip.filter(|s| !s.is_empty()), q.name.filter(|s| !s.is_empty())) {
        (Some(ip), _) => VmSearch::Ip(ip),
        (None, Some(name)) => VmSearch::Name(name),
        (None, None) => VmSearch::All,
    };
    reply(state.repo.search_vms(&search).await)
}

#[derive(Debug, Deserialize)]
pub(super) struct RecentQuery {
    days: Option<i64>,
}

/// GET /api/vms/recent?days=N
pub(super) async fn recent_vms(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Response {
    let days = q.days.unwrap_or(DEFAULT_RECENT_DAYS);
    if days <= 0 {
        return error_response("days must be positive", StatusCode::BAD_REQUEST);
    }
    let to = Utc::now();
    let Some(from) = chrono::TimeDelta::try_days(days).and_then(|d| to.checked_sub_signed(d))
    else {
        return error_response("days is out of range", StatusCode::BAD_REQUEST);
    };
    reply(state.repo.vms_created_between(from, to).await)
}

/// GET /api/subnets
pub(super) async fn list_subnets(State(state): State<AppState>) -> Response {
    reply(state.repo.list_subnets().await)
}

#[derive(Debug, Deserialize)]
pub(super) struct AddSubnet {
    prefix: String,
}

/// POST /api/subnets
pub(super) async fn add_subnet(
    State(state): State<AppState>,
    Json(body): Json<AddSubnet>,
) -> Response {
    let prefix = match parse_prefix(&body.prefix) {
        Ok(p) => p,
        Err(r) => return r,
    };
    match state.repo.add_subnet(&prefix).await {
        Ok(true) => (StatusCode::CREATED, ApiResponse::ok(prefix)).into_response(),
        Ok(false) => error_response(
            &format!("subnet {prefix} already exists"),
            StatusCode::CONFLICT,
        ),
        Err(e) => internal_error(e),
    }
}

/// DELETE /api/subnets/{prefix}
pub(super) async fn remove_subnet(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Response {
    let prefix = match parse_prefix(&raw) {
        Ok(p) => p,
        Err(r) => return r,
    };
    match state.repo.remove_subnet(&prefix).await {
        Ok(true) => ApiResponse::ok(prefix).into_response(),
        Ok(false) => error_response("subnet not found", StatusCode::NOT_FOUND),
        Err(e) => internal_error(e),
    }
}

/// GET /api/subnets/{prefix}/scan
pub(super) async fn subnet_entries(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Response {
    match parse_prefix(&raw) {
        Ok(prefix) => reply(state.repo.scan_entries(&prefix).await),
        Err(r) => r,
    }
}

/// POST /api/subnets/{prefix}/scan
pub(super) async fn scan_subnet(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Response {
    let prefix = match parse_prefix(&raw) {
        Ok(p) => p,
        Err(r) => return r,
    };
    reply(
        scanner::scan_subnet(
            &state.repo,
            state.prober.as_ref(),
            &prefix,
            state.config.scanner.max_concurrent_probes,
        )
        .await,
    )
}

/// POST /api/scan
pub(super) async fn scan_all(State(state): State<AppState>) -> Response {
    reply(
        scanner::scan_all_subnets(
            &state.repo,
            state.prober.as_ref(),
            state.config.scanner.max_concurrent_probes,
        )
        .await,
    )
}

/// GET /api/addresses/{ip}
pub(super) async fn inspect_address(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Response {
    if ip.parse::<std::net::Ipv4Addr>().is_err() {
        return error_response("invalid IPv4 address", StatusCode::BAD_REQUEST);
    }
    reply(state.repo.inspect_address(&ip).await)
}

/// POST /api/poll
pub(super) async fn poll_now(State(state): State<AppState>) -> Response {
    reply(
        collector::poll_all_hosts(
            state.repo.clone(),
            state.connector.clone(),
            state.config.collector.max_concurrent_hosts,
        )
        .await,
    )
}
