//! Map and token endpoints

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{patch, post},
    Json, Router,
};

use super::{identity, ApiResult, AppState};
use crate::store::{GameMap, MapToken, NewMap, NewToken, TokenMove};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/maps", post(create_map))
        .route("/maps/{id}/activate", post(activate_map))
        .route("/maps/{id}/tokens", post(add_token))
        .route("/tokens/{id}", patch(move_token).delete(delete_token))
}

async fn create_map(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(fields): Json<NewMap>,
) -> ApiResult<impl IntoResponse> {
    let map = state
        .coordinator
        .create_map(identity(&headers)?, &fields)
        .await?;
    Ok((StatusCode::CREATED, Json(map)))
}

async fn activate_map(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<GameMap>> {
    let map = state
        .coordinator
        .set_active_map(identity(&headers)?, &id)
        .await?;
    Ok(Json(map))
}

async fn add_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(map_id): Path<String>,
    Json(fields): Json<NewToken>,
) -> ApiResult<impl IntoResponse> {
    let token = state
        .coordinator
        .add_token(identity(&headers)?, &map_id, &fields)
        .await?;
    Ok((StatusCode::CREATED, Json(token)))
}

async fn move_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(to): Json<TokenMove>,
) -> ApiResult<Json<MapToken>> {
    let token = state
        .coordinator
        .move_token(identity(&headers)?, &id, to)
        .await?;
    Ok(Json(token))
}

async fn delete_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .coordinator
        .delete_token(identity(&headers)?, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
