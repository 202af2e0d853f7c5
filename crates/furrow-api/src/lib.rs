pub mod conversations;
pub mod middleware;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use state::{AppState, AppStateInner};

/// Conversation history and inbox routes. Every route requires a bearer JWT.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/unread", get(conversations::unread_total))
        .route("/conversations/{other_id}/messages", get(conversations::get_messages))
        .route("/conversations/{other_id}/read", post(conversations::mark_read))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}
