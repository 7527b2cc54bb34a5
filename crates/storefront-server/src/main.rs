use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use storefront_storage::{InMemoryCatalog, MemoryCartBackend};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod metrics;
mod routes;

use config::Config;
use routes::AppState;

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route(
            "/v1/products",
            get(routes::list_products).post(routes::put_product),
        )
        .route("/v1/products/filters", get(routes::filter_options))
        .route(
            "/v1/products/:key",
            get(routes::get_product).delete(routes::delete_product),
        )
        .route(
            "/v1/taxonomy/:kind",
            get(routes::list_terms).post(routes::put_term),
        )
        .route("/v1/taxonomy/:kind/:slug", delete(routes::delete_term))
        .route("/v1/cart/:owner", get(routes::get_cart))
        .route("/v1/cart/:owner/sync", post(routes::sync_cart))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

fn load_catalog(config: &Config) -> InMemoryCatalog {
    let Some(path) = &config.catalog_path else {
        info!("CATALOG_PATH not set, starting with an empty catalog");
        return InMemoryCatalog::new();
    };
    match InMemoryCatalog::load(path) {
        Ok((catalog, skipped)) => {
            if skipped > 0 {
                warn!("skipped {} unreadable catalog lines in {}", skipped, path.display());
            }
            info!("loaded {} products from {}", catalog.len(), path.display());
            catalog
        }
        Err(e) => {
            warn!("catalog load from {} failed: {} - starting empty", path.display(), e);
            InMemoryCatalog::new()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let catalog = load_catalog(&config);
    metrics::CATALOG_PRODUCTS.set(catalog.len() as i64);

    let addr = config.http_addr;
    let state = AppState {
        catalog: Arc::new(catalog),
        carts: Arc::new(MemoryCartBackend::new()),
        config: Arc::new(config),
    };

    let listener = TcpListener::bind(addr).await?;
    info!("http listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
