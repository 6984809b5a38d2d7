//! Character endpoints

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};

use super::{identity, ApiResult, AppState};
use crate::store::{Character, CharacterPatch, NewCharacter};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/characters", get(list_characters).post(create_character))
        .route(
            "/characters/{id}",
            patch(update_character).delete(delete_character),
        )
}

async fn list_characters(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Character>>> {
    let characters = state
        .coordinator
        .room_characters(identity(&headers)?)
        .await?;
    Ok(Json(characters))
}

async fn create_character(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(fields): Json<NewCharacter>,
) -> ApiResult<impl IntoResponse> {
    let character = state
        .coordinator
        .create_character(identity(&headers)?, &fields)
        .await?;
    Ok((StatusCode::CREATED, Json(character)))
}

async fn update_character(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<CharacterPatch>,
) -> ApiResult<Json<Character>> {
    let character = state
        .coordinator
        .update_character(identity(&headers)?, &id, &patch)
        .await?;
    Ok(Json(character))
}

async fn delete_character(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .coordinator
        .delete_character(identity(&headers)?, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
