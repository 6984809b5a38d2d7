//! Combat endpoints

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::{identity, ApiResult, AppState};
use crate::combat::InitiativeEntry;
use crate::coordinator::{
    CombatActionOutcome, CombatActionRequest, CombatSnapshot, CombatState, TurnChange,
};
use crate::protocol::InitiativeRolled;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/combat", get(combat_state))
        .route("/combat/start", post(start_combat))
        .route("/combat/end", post(end_combat))
        .route("/combat/next-turn", post(next_turn))
        .route("/combat/initiative", get(initiative_list).post(roll_initiative))
        .route("/combat/npc-initiative", post(roll_npc_initiative))
        .route("/combat/action", post(combat_action))
}

#[derive(Debug, Default, Deserialize)]
struct StartCombatRequest {
    #[serde(default)]
    character_ids: Vec<String>,
}

async fn start_combat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<StartCombatRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let snapshot: CombatSnapshot = state
        .coordinator
        .start_combat(identity(&headers)?, &req.character_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn end_combat(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    state.coordinator.end_combat(identity(&headers)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn combat_state(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<CombatState>> {
    let combat = state.coordinator.combat_state(identity(&headers)?).await?;
    Ok(Json(combat))
}

async fn next_turn(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<TurnChange>> {
    let change = state.coordinator.next_turn(identity(&headers)?).await?;
    Ok(Json(change))
}

async fn initiative_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<InitiativeEntry>>> {
    let entries = state.coordinator.initiative_list(identity(&headers)?).await?;
    Ok(Json(entries))
}

async fn roll_initiative(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<InitiativeRolled>> {
    let rolled = state.coordinator.roll_initiative(identity(&headers)?).await?;
    Ok(Json(rolled))
}

#[derive(Debug, Deserialize)]
struct NpcInitiativeRequest {
    character_id: String,
}

async fn roll_npc_initiative(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NpcInitiativeRequest>,
) -> ApiResult<Json<InitiativeRolled>> {
    let rolled = state
        .coordinator
        .roll_npc_initiative(identity(&headers)?, &req.character_id)
        .await?;
    Ok(Json(rolled))
}

async fn combat_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CombatActionRequest>,
) -> ApiResult<Json<CombatActionOutcome>> {
    let outcome = state
        .coordinator
        .combat_action(identity(&headers)?, &req)
        .await?;
    Ok(Json(outcome))
}
