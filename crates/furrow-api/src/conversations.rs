use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};

use furrow_db::{Database, DbError};
use furrow_gateway::RelayError;
use furrow_types::api::{Claims, MarkReadResponse, Pagination, UnreadResponse};

use crate::state::AppState;

/// Run a blocking DB call off the async runtime.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> furrow_db::Result<T> + Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(db_status)
}

fn db_status(e: DbError) -> StatusCode {
    if e.is_validation() {
        StatusCode::BAD_REQUEST
    } else {
        error!("Database error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// The caller's inbox, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let summaries = blocking(&state, move |db| db.list_conversations(&claims.sub)).await?;
    Ok(Json(summaries))
}

pub async fn unread_total(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let unread = blocking(&state, move |db| db.total_unread(&claims.sub)).await?;
    Ok(Json(UnreadResponse { unread }))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(other_id): Path<String>,
    Query(page): Query<Pagination>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if other_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let page = blocking(&state, move |db| {
        if !db.user_exists(&other_id)? {
            return Ok(None);
        }
        db.fetch_conversation(&claims.sub, &other_id, page).map(Some)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(page))
}

/// Same batch as the socket `mark-read`, including the `messages-read`
/// event to the other participant.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(other_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let updated = state
        .relay
        .mark_read(&claims.sub, &other_id)
        .await
        .map_err(|e| match e {
            RelayError::Validation(v) => {
                warn!("{} mark-read rejected: {}", claims.sub, v);
                StatusCode::BAD_REQUEST
            }
            other => {
                error!("{} mark-read failed: {}", claims.sub, other);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    Ok(Json(MarkReadResponse { updated }))
}
