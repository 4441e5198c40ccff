// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::cache_coordinator::CacheCoordinator;
use crate::application::dashboard_service::DashboardService;
use crate::application::prefetch::PrefetchRegistry;
use crate::application::widget_repository::WidgetRepository;
use crate::infrastructure::config::{load_grid_config, load_server_config, PersistenceBackend};
use crate::infrastructure::memory_cache::MemoryCache;
use crate::infrastructure::memory_repository::MemoryWidgetRepository;
use crate::infrastructure::realtime::RealtimeHub;
use crate::infrastructure::rest_repository::RestWidgetRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    add_widget, commit_layout, delete_widget, health_check, list_widgets, prefetch_dashboard,
    publish_event, resize_widget, stream_dashboard, update_widget_content,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let server_config = load_server_config()?;
    let grid = load_grid_config()?;

    // Realtime fan-out and repository (infrastructure layer)
    let hub = RealtimeHub::new();
    let repository: Arc<dyn WidgetRepository> = match server_config.persistence.backend {
        PersistenceBackend::Memory => Arc::new(MemoryWidgetRepository::new(hub.clone())),
        PersistenceBackend::Rest => Arc::new(RestWidgetRepository::new(
            server_config.rest_base_url()?,
            server_config.persistence.token.clone(),
        )),
    };

    // Cache and services (application layer)
    let cache = CacheCoordinator::new(Arc::new(MemoryCache::new()), server_config.cache_ttl())
        .with_prefetch(PrefetchRegistry::new());
    let dashboards = DashboardService::new(
        repository,
        Arc::new(hub.clone()),
        cache,
        grid,
        server_config.session_settings(),
    );

    let state = Arc::new(AppState { dashboards, hub });

    // Build router (presentation layer)
    // Responses are compressed by hand, so no CompressionLayer here.
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/dashboards/:id/widgets", get(list_widgets).post(add_widget))
        .route("/dashboards/:id/layout", post(commit_layout))
        .route("/dashboards/:id/widgets/:widget/resize", post(resize_widget))
        .route(
            "/dashboards/:id/widgets/:widget",
            delete(delete_widget).patch(update_widget_content),
        )
        .route("/dashboards/:id/stream", get(stream_dashboard))
        .route("/dashboards/:id/prefetch", post(prefetch_dashboard))
        .route("/dashboards/:id/events", post(publish_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = server_config.server.bind_address.parse()?;
    tracing::info!(%addr, "starting widget-grid-sync service");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
