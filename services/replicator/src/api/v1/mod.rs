//! API v1 routes.

mod debug;
mod handlers;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(handlers::routes())
        .nest("/debug", debug::routes())
}
