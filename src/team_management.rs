// team_management.rs

use actix_web::{web, HttpResponse};
use log::debug;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::Identity;
use crate::team_service;

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub email: Option<String>,
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

// POST /teams
// Managers only. The caller becomes the manager and first member.
pub async fn create_team(
    identity: Identity,
    data: web::Data<AppState>,
    team_info: web::Json<CreateTeamRequest>,
) -> Result<HttpResponse, ApiError> {
    debug!("create_team called by {} with payload: {:?}", identity.id, team_info);
    let team = team_service::create_team(data.store.as_ref(), &identity, team_info.name.as_deref()).await?;
    Ok(HttpResponse::Created().json(team))
}

// GET /teams
// Managers see the teams they run, members the teams they belong to.
pub async fn get_user_teams(
    identity: Identity,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let teams = team_service::list_teams(data.store.as_ref(), &identity).await?;
    Ok(HttpResponse::Ok().json(teams))
}

// GET /teams/{team_id}
pub async fn get_team(
    identity: Identity,
    data: web::Data<AppState>,
    team_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let team = team_service::get_team(data.store.as_ref(), &team_id, &identity).await?;
    Ok(HttpResponse::Ok().json(team))
}

// PUT /teams/{team_id}/members
// Adds a registered user, looked up by email, to the team.
pub async fn add_team_member(
    identity: Identity,
    data: web::Data<AppState>,
    team_id: web::Path<String>,
    info: web::Json<AddMemberRequest>,
) -> Result<HttpResponse, ApiError> {
    let team =
        team_service::add_member(data.store.as_ref(), &team_id, info.email.as_deref(), &identity).await?;
    Ok(HttpResponse::Ok().json(team))
}

// DELETE /teams/{team_id}/members/{member_id}
pub async fn remove_team_member(
    identity: Identity,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>, // (team_id, member_id)
) -> Result<HttpResponse, ApiError> {
    let (team_id, member_id) = path.into_inner();
    let team = team_service::remove_member(data.store.as_ref(), &team_id, &member_id, &identity).await?;
    Ok(HttpResponse::Ok().json(team))
}
