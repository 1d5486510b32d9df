//! Lead pipeline backend.
//!
//! A shared SQLite store for sales leads with a REST surface, a Tantivy
//! full-text index and the client-side synchronization engine that keeps a
//! session's board consistent with the store.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod providers;
pub mod search;
pub mod store;
pub mod sync;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use db::Repository;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub config: Arc<Config>,
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    // Layers run outside-in: PSK first, then owner resolution
    let api_routes = Router::new()
        // Snapshot
        .route("/pipeline", get(api::get_pipeline))
        .route("/revision", get(api::get_revision))
        // Leads
        .route("/leads", get(api::list_leads))
        .route("/leads", post(api::create_lead))
        .route("/leads/batch", put(api::batch_upsert_leads))
        .route("/leads/{id}", get(api::get_lead))
        .route("/leads/{id}", put(api::update_lead))
        .route("/leads/{id}", delete(api::delete_lead))
        .route("/leads/{id}/move", post(api::move_lead))
        // Tags
        .route("/tags", get(api::list_tags))
        .route("/tags", post(api::create_tag))
        .route("/tags/cascade-rename", post(api::cascade_rename))
        .route("/tags/cascade-remove", post(api::cascade_remove))
        .route("/tags/{id}", put(api::update_tag))
        .route("/tags/{id}", delete(api::delete_tag))
        // Board, search, quota
        .route("/board", get(api::get_board))
        .route("/search", get(api::search_leads))
        .route("/quota", get(api::get_quota))
        .layer(middleware::from_fn(auth::owner_layer))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        // Outermost first: requests are traced before CORS handling
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
