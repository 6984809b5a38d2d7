//! Room and membership endpoints, plus dice rolls over HTTP

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{identity, ApiResult, AppState};
use crate::dice::RollMode;
use crate::protocol::DiceResult;
use crate::store::{Player, Room};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/join", post(join_session))
        .route("/sessions/me", get(whoami))
        .route("/sessions/players", get(list_players))
        .route("/sessions/ready", post(set_ready))
        .route("/sessions/start", post(start_session))
        .route("/sessions/players/{player_id}/movement", post(set_movement))
        .route("/dice/roll", post(roll_dice))
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    gm_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JoinSessionRequest {
    code: String,
    name: String,
}

/// Returned on create and join; the only place a token is ever revealed
#[derive(Debug, Serialize)]
struct SessionTicket {
    session_id: String,
    code: String,
    player_id: String,
    player_name: String,
    is_gm: bool,
    token: String,
}

impl SessionTicket {
    fn new(room: Room, player: Player) -> Self {
        Self {
            session_id: room.id,
            code: room.code,
            player_id: player.id,
            player_name: player.name,
            is_gm: player.is_gm,
            token: player.token,
        }
    }
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (room, gm) = state.coordinator.create_room(req.gm_name.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(SessionTicket::new(room, gm))))
}

async fn join_session(
    State(state): State<AppState>,
    Json(req): Json<JoinSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let (room, player) = state.coordinator.join_room(&req.code, &req.name).await?;
    Ok((StatusCode::CREATED, Json(SessionTicket::new(room, player))))
}

#[derive(Debug, Serialize)]
struct WhoAmI {
    session: Room,
    player: Player,
}

async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<WhoAmI>> {
    let (session, player) = state.coordinator.whoami(identity(&headers)?).await?;
    Ok(Json(WhoAmI { session, player }))
}

async fn list_players(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Player>>> {
    let players = state.coordinator.room_players(identity(&headers)?).await?;
    Ok(Json(players))
}

#[derive(Debug, Deserialize)]
struct ReadyRequest {
    ready: bool,
}

async fn set_ready(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReadyRequest>,
) -> ApiResult<Json<Player>> {
    let player = state
        .coordinator
        .set_ready(identity(&headers)?, req.ready)
        .await?;
    Ok(Json(player))
}

async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Room>> {
    let room = state.coordinator.start_session(identity(&headers)?).await?;
    Ok(Json(room))
}

#[derive(Debug, Deserialize)]
struct MovementRequest {
    allowed: bool,
}

async fn set_movement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(player_id): Path<String>,
    Json(req): Json<MovementRequest>,
) -> ApiResult<Json<Player>> {
    let player = state
        .coordinator
        .set_movement(identity(&headers)?, &player_id, req.allowed)
        .await?;
    Ok(Json(player))
}

#[derive(Debug, Deserialize)]
struct RollRequest {
    dice: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    mode: RollMode,
}

async fn roll_dice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RollRequest>,
) -> ApiResult<Json<DiceResult>> {
    let result = state
        .coordinator
        .roll_dice(identity(&headers)?, &req.dice, req.reason, req.mode)
        .await?;
    Ok(Json(result))
}
