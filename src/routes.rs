// src/routes.rs

use axum::{Router, http::Method, routing::get};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{posts, topics, voxspheres},
    state::AppState,
};

/// Assembles the read-only query API.
///
/// * Merges the sub-routers (posts, voxspheres, topics).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (Database Pool, Config).
pub fn create_router(state: AppState) -> Router {
    // Read-only and unauthenticated, so any origin may call it.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let post_routes = Router::new()
        .route("/", get(posts::list_posts))
        .route("/{id}/media", get(posts::post_media));

    let voxsphere_routes = Router::new().route("/top", get(voxspheres::top_voxspheres));

    let topic_routes = Router::new().route("/", get(topics::list_topics));

    Router::new()
        .nest("/api/posts", post_routes)
        .nest("/api/voxspheres", voxsphere_routes)
        .nest("/api/topics", topic_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
