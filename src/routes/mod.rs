use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::Config,
    db::MatchStore,
    middleware::{make_span_with_request_id, request_id_middleware},
    realtime::ConnectionHub,
    services::{
        catalog::CatalogProvider,
        notifications::DispatchContext,
        CandidateRanker, LikeService, MatchService, Notifier, NotifierHandle, RetryPolicy,
    },
};

pub mod candidates;
pub mod likes;
pub mod matches;
pub mod rooms;
pub mod ws;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub matches: Arc<MatchService>,
    pub candidates: Arc<CandidateRanker>,
    pub likes: Arc<LikeService>,
    pub hub: Arc<ConnectionHub>,
}

impl AppState {
    /// Wires services over `store` and `catalog` and starts the notification worker
    pub fn new(
        store: Arc<dyn MatchStore>,
        catalog: Arc<dyn CatalogProvider>,
        config: &Config,
    ) -> (Self, NotifierHandle) {
        let hub = Arc::new(ConnectionHub::new());
        let retry = RetryPolicy {
            max_attempts: config.conflict_retry_attempts,
            backoff: config.conflict_retry_backoff(),
        };

        let (notifier, notifier_handle) = Notifier::spawn(DispatchContext {
            store: store.clone(),
            catalog: catalog.clone(),
            presence: hub.clone(),
            timeout: config.notify_timeout(),
        });

        let state = Self {
            matches: Arc::new(MatchService::new(
                store.clone(),
                catalog.clone(),
                notifier,
                retry,
            )),
            candidates: Arc::new(CandidateRanker::new(
                store.clone(),
                catalog,
                config.default_candidate_limit,
                config.max_candidate_limit,
            )),
            likes: Arc::new(LikeService::new(store, retry)),
            hub,
        };

        (state, notifier_handle)
    }
}

/// Creates the application router with all routes
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::connect))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/likes", get(likes::list))
        .route("/likes/:item_id", put(likes::like).delete(likes::unlike))
        .route("/candidates", get(candidates::list))
        .route("/matches", get(matches::active))
        .route("/matches/requests", post(matches::request))
        .route("/matches/accept", post(matches::accept))
        .route("/matches/decline", post(matches::decline))
        .route("/matches/status/:other_user_id", get(matches::status))
        .route("/rooms/:room_id/leave", post(rooms::leave))
        .route("/rooms/:room_id/rejoin", post(rooms::rejoin))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
