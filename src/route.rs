//! Route definitions for the affiliate link API
//!
//! Maps HTTP routes to their handlers and wires in the application state.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::database::AppState;
use crate::handler::{cancel_post, list_posts, rewrite_message, schedule_post, status};

use crate::middleware::auth_middleware;
use axum::middleware;

/// Creates and configures the Axum application router
///
/// # Route Definitions
///
/// - `GET /` - status snapshot for health checks (public)
/// - `POST /api/rewrite` - immediate link rewrite (and publication)
/// - `GET /api/posts` - list a user's pending posts
/// - `POST /api/posts` - schedule a post
/// - `DELETE /api/posts/{id}` - cancel a pending post
pub fn create_app(state: AppState) -> Router {
    // API routes that require the shared-secret check when configured
    let api_routes = Router::new()
        .route("/rewrite", post(rewrite_message))
        .route("/posts", get(list_posts).post(schedule_post))
        .route("/posts/{id}", delete(cancel_post))
        .layer(middleware::from_fn(auth_middleware));

    Router::new()
        // Public status endpoint surfaced to the platform health check
        .route("/", get(status))
        .nest("/api", api_routes)
        .with_state(state)
}
