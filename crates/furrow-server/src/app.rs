use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use furrow_api::middleware::verify_token;
use furrow_api::{AppState, AppStateInner};
use furrow_db::Database;
use furrow_gateway::Relay;
use furrow_gateway::connection;

#[derive(Clone)]
struct ServerState {
    relay: Relay,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    /// Browsers cannot set headers on a WebSocket handshake
    token: Option<String>,
}

/// Full HTTP surface: the gateway upgrade, REST routes and a health probe.
pub fn build_router(db: Arc<Database>, relay: Relay, jwt_secret: String) -> Router {
    let api_state: AppState = Arc::new(AppStateInner {
        db,
        relay: relay.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState { relay, jwt_secret });

    Router::new()
        .route("/health", get(health))
        .merge(furrow_api::router(api_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

/// Authenticate before the upgrade so unauthenticated clients never get a
/// socket.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = match (&bearer, &query.token) {
        (Some(TypedHeader(Authorization(bearer))), _) => bearer.token(),
        (None, Some(token)) => token.as_str(),
        (None, None) => {
            debug!("Gateway upgrade without a token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };
    let claims = verify_token(&state.jwt_secret, token)?;

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.relay, claims.sub)
    }))
}
