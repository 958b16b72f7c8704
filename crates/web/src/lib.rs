//! The HTTP surface of the boot dispatcher: routing, middleware and the
//! handlers that translate requests into calls on the dispatch core.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    http::StatusCode,
    routing::{get, get_service, post},
    Router,
};
use common::prelude::tracing;
use dispatch::{Dispatcher, EventLog, Mappings, Registry, TemplateStore};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pages;

use handlers::{boot, configs, ui};

/// Shared read-mostly application state: the stores built at startup plus
/// the dispatcher that ties them together.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub mappings: Arc<Mappings>,
    pub templates: Arc<TemplateStore>,
    pub registry: Arc<Registry>,
    pub events: Arc<EventLog>,
    pub pages: Arc<tera::Tera>,
}

pub fn router(state: AppState) -> Router {
    let ui_assets = get_service(ServeDir::new(&config::settings().static_dir)).handle_error(
        |err: std::io::Error| async move {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("couldn't serve asset: {err}"),
            )
        },
    );

    Router::new()
        // operator pages
        .route("/", get(ui::index))
        .route("/events", get(ui::events_page))
        .route("/mappings", get(ui::mappings_page))
        .route("/ajax/servers", get(ui::server_list))
        .route("/ajax/events", get(ui::event_list))
        .route("/ajax/script/params", get(configs::script_params))
        // firmware endpoints
        .route("/start", get(boot::start))
        .route("/poll/1/:mac", get(boot::poll))
        .route("/update/target", post(boot::update_target))
        .route("/ipxemenu", get(configs::menu))
        // dynamic and static configuration
        .route("/configs/*path", get(configs::serve))
        // UI assets
        .nest_service("/static", ui_assets)
        // outermost layer last: headers are set on every response,
        // the env prefix is stripped before routing
        .layer(axum::middleware::from_fn(middleware::log_request))
        .layer(axum::middleware::from_fn(middleware::environment_prefix))
        .layer(axum::middleware::from_fn(middleware::disable_cache))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .with_state(state)
}

/// Binds the configured address and serves until the token is cancelled.
pub async fn serve(state: AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    let settings = config::settings();
    let addr: SocketAddr = (settings.domain.as_str(), settings.port)
        .to_socket_addrs()
        .with_context(|| format!("couldn't resolve {}", settings.base_url()))?
        .next()
        .with_context(|| format!("no address for {}", settings.base_url()))?;

    tracing::info!(%addr, base_url = %settings.base_url(), "listening");
    axum::Server::bind(&addr)
        .serve(router(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("server error")
}
