//! HTTP boundary for the order fulfillment engine.
//!
//! Provides JSON endpoints for orders and payments, with structured logging
//! (tracing) and Prometheus metrics. Callers identify themselves through
//! trusted headers; see [`routes::actor`].

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use fulfillment::{Collaborators, FulfillmentEngine, Stores};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use store::{InMemoryStore, PostgresStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Where orders and payments are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    Memory,
    Postgres,
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: FulfillmentEngine,
    pub storage: Storage,
}

impl AppState {
    pub fn new(engine: FulfillmentEngine, storage: Storage) -> Arc<Self> {
        Arc::new(Self { engine, storage })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/by-number/{number}", get(routes::orders::get_by_number))
        .route("/users/{id}/orders", get(routes::orders::list_for_user))
        .route("/orders/{id}/status", post(routes::orders::transition))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/invoice", get(routes::orders::invoice))
        .route(
            "/orders/{id}/payments",
            post(routes::payments::capture).get(routes::payments::list),
        )
        .route(
            "/orders/{id}/payments/reconcile",
            post(routes::payments::reconcile),
        )
        .route("/orders/{id}/refunds", post(routes::payments::refund))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the engine on PostgreSQL when `DATABASE_URL` is set, in memory otherwise.
pub async fn create_state(config: &Config) -> Result<Arc<AppState>, store::StoreError> {
    let (stores, storage) = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.max_connections).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL storage");
            (Stores::from_store(store), Storage::Postgres)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            (Stores::from_store(InMemoryStore::new()), Storage::Memory)
        }
    };

    let engine = FulfillmentEngine::new(stores, Collaborators::default(), config.engine.clone());
    Ok(AppState::new(engine, storage))
}
