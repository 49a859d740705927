// HTTP JSON routes: inventory reads, subnet management, on-demand poll and scan

mod http;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::hypervisor::HypervisorConnector;
use crate::inventory_repo::InventoryRepo;
use crate::scanner::Prober;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) repo: Arc<InventoryRepo>,
    pub(crate) connector: Arc<dyn HypervisorConnector>,
    pub(crate) prober: Arc<dyn Prober>,
    pub(crate) config: AppConfig,
}

pub fn app(
    repo: Arc<InventoryRepo>,
    connector: Arc<dyn HypervisorConnector>,
    prober: Arc<dyn Prober>,
    config: AppConfig,
) -> Router {
    let state = AppState {
        repo,
        connector,
        prober,
        config,
    };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/hosts", get(http::list_hosts)) // GET /api/hosts
        .route("/api/hosts/{address}/vms", get(http::host_vms)) // GET /api/hosts/{address}/vms
        .route("/api/vms", get(http::search_vms)) // GET /api/vms?name=&ip=
        .route("/api/vms/recent", get(http::recent_vms)) // GET /api/vms/recent?days=
        .route(
            "/api/subnets",
            get(http::list_subnets).post(http::add_subnet),
        )
        .route("/api/subnets/{prefix}", delete(http::remove_subnet))
        .route(
            "/api/subnets/{prefix}/scan",
            get(http::subnet_entries).post(http::scan_subnet),
        )
        .route("/api/scan", post(http::scan_all)) // POST /api/scan
        .route("/api/addresses/{ip}", get(http::inspect_address)) // GET /api/addresses/{ip}
        .route("/api/poll", post(http::poll_now)) // POST /api/poll
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
