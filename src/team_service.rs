//! Team operations: every function takes the resolved caller explicitly and
//! returns the team expanded with member summaries.

use std::collections::HashMap;

use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::auth::normalize_email;
use crate::error::ApiError;
use crate::models::{Identity, Role, Team, TeamView, UserSummary};
use crate::rules;
use crate::store::Store;

pub async fn create_team(
    store: &dyn Store,
    actor: &Identity,
    name: Option<&str>,
) -> Result<TeamView, ApiError> {
    rules::require_role(actor, &[Role::Manager])?;
    let name = name.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ApiError::invalid("Team name is required"));
    }

    let team = Team::new(
        Uuid::new_v4().to_string(),
        name.to_string(),
        actor.id.clone(),
        Utc::now(),
    );
    store.insert_team(&team).await?;
    info!("Team {} created by {}", team.id, actor.id);

    expand_team(store, team).await
}

pub async fn list_teams(store: &dyn Store, actor: &Identity) -> Result<Vec<TeamView>, ApiError> {
    let teams = match actor.role {
        Role::Manager => store.teams_managed_by(&actor.id).await?,
        Role::Member => store.teams_with_member(&actor.id).await?,
    };

    let mut views = Vec::with_capacity(teams.len());
    for team in teams {
        views.push(expand_team(store, team).await?);
    }
    Ok(views)
}

pub async fn get_team(
    store: &dyn Store,
    team_id: &str,
    actor: &Identity,
) -> Result<TeamView, ApiError> {
    let team = load_team(store, team_id).await?;
    rules::ensure_team_visible(&team, actor)?;
    expand_team(store, team).await
}

pub async fn add_member(
    store: &dyn Store,
    team_id: &str,
    email: Option<&str>,
    actor: &Identity,
) -> Result<TeamView, ApiError> {
    rules::require_role(actor, &[Role::Manager])?;
    let team = load_team(store, team_id).await?;
    rules::ensure_team_manager(&team, actor, "add members")?;

    let email = email.map(normalize_email).unwrap_or_default();
    if email.is_empty() {
        return Err(ApiError::invalid("Email is required"));
    }
    let user = store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found with this email"))?;

    rules::ensure_admissible(&team, &user)?;
    let team = store
        .add_member(&team.id, &user.id, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("Team not found"))?;
    info!("User {} added to team {}", user.id, team.id);

    expand_team(store, team).await
}

pub async fn remove_member(
    store: &dyn Store,
    team_id: &str,
    member_id: &str,
    actor: &Identity,
) -> Result<TeamView, ApiError> {
    rules::require_role(actor, &[Role::Manager])?;
    let team = load_team(store, team_id).await?;
    rules::ensure_team_manager(&team, actor, "remove members")?;

    rules::ensure_dismissible(&team, member_id)?;
    let team = store
        .remove_member(&team.id, member_id, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("Team not found"))?;
    info!("User {} removed from team {}", member_id, team.id);

    expand_team(store, team).await
}

pub(crate) async fn load_team(store: &dyn Store, team_id: &str) -> Result<Team, ApiError> {
    store
        .find_team(team_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Team not found"))
}

async fn expand_team(store: &dyn Store, team: Team) -> Result<TeamView, ApiError> {
    let mut ids = team.members.clone();
    if !team.has_member(&team.manager) {
        ids.push(team.manager.clone());
    }
    let users: HashMap<String, UserSummary> = store
        .find_users(&ids)
        .await?
        .iter()
        .map(|u| (u.id.clone(), UserSummary::from(u)))
        .collect();

    Ok(TeamView {
        manager: users.get(&team.manager).cloned(),
        members: team
            .members
            .iter()
            .filter_map(|id| users.get(id).cloned())
            .collect(),
        id: team.id,
        name: team.name,
        created_at: team.created_at,
        updated_at: team.updated_at,
    })
}
