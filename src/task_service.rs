//! Task operations. Field-level permissions come from `rules::TaskCapability`;
//! every mutation is persisted as one whole-document write.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{
    Identity, NewTask, Role, Task, TaskPatch, TaskView, Team, TeamSummary, UserSummary,
};
use crate::rules::{self, BugFlag, TaskCapability};
use crate::store::Store;
use crate::team_service::load_team;

pub async fn create_task(
    store: &dyn Store,
    actor: &Identity,
    fields: NewTask,
) -> Result<TaskView, ApiError> {
    rules::require_role(actor, &[Role::Manager])?;

    let title = fields.title.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(ApiError::invalid("Task title is required"));
    }
    let team_id = match fields.team.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => return Err(ApiError::invalid("Team is required")),
    };

    let team = load_team(store, team_id).await?;
    rules::ensure_team_manager(&team, actor, "create tasks")?;

    let assigned_to = fields.assigned_to.filter(|id| !id.trim().is_empty());
    if let Some(assignee) = &assigned_to {
        rules::ensure_assignable(&team, assignee)?;
    }

    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        content: fields.content.unwrap_or_default(),
        images: fields.images.unwrap_or_default(),
        status: fields.status.unwrap_or_default(),
        priority: fields.priority.unwrap_or_default(),
        assigned_to,
        created_by: actor.id.clone(),
        team: team.id.clone(),
        bug: None,
        created_at: now,
        updated_at: now,
    };
    store.insert_task(&task).await?;
    info!("Task {} created in team {} by {}", task.id, team.id, actor.id);

    expand_one(store, task, Some(&team)).await
}

pub async fn list_tasks(
    store: &dyn Store,
    team_id: Option<&str>,
    actor: &Identity,
) -> Result<Vec<TaskView>, ApiError> {
    let team_id = match team_id.map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => return Err(ApiError::invalid("teamId query parameter is required")),
    };
    let team = load_team(store, team_id).await?;
    let scope = rules::task_scope(&team, actor)?;

    let tasks = store.list_tasks(&scope).await?;
    expand_tasks(store, tasks, Some(&team)).await
}

pub async fn get_task(
    store: &dyn Store,
    task_id: &str,
    actor: &Identity,
) -> Result<TaskView, ApiError> {
    let task = load_task(store, task_id).await?;
    let team = store.find_team(&task.team).await?;
    rules::ensure_task_visible(&task, team.as_ref(), actor)?;
    expand_one(store, task, team.as_ref()).await
}

pub async fn update_task(
    store: &dyn Store,
    task_id: &str,
    patch: TaskPatch,
    actor: &Identity,
) -> Result<TaskView, ApiError> {
    let task = load_task(store, task_id).await?;
    let team = store.find_team(&task.team).await?;
    let capability = TaskCapability::resolve(&task, team.as_ref(), actor);

    if capability == TaskCapability::Manage {
        if let Some(assignee) = patch.new_assignee() {
            let team = team.as_ref().ok_or_else(|| ApiError::not_found("Team not found"))?;
            rules::ensure_assignable(team, assignee)?;
        }
    }

    let update = capability.authorize(patch, Utc::now())?;
    let task = store
        .update_task(&task.id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))?;
    info!("Task {} updated by {} ({:?})", task.id, actor.id, capability);

    expand_one(store, task, team.as_ref()).await
}

pub async fn set_bug(
    store: &dyn Store,
    task_id: &str,
    flag: BugFlag,
    actor: &Identity,
) -> Result<TaskView, ApiError> {
    rules::require_role(actor, &[Role::Manager])?;
    let task = load_task(store, task_id).await?;

    let update = rules::bug_update(flag, actor, Utc::now());
    let task = store
        .update_task(&task.id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))?;
    info!("Task {} bug flag set to {} by {}", task.id, task.is_bugged(), actor.id);

    expand_one(store, task, None).await
}

pub async fn delete_task(store: &dyn Store, task_id: &str, actor: &Identity) -> Result<(), ApiError> {
    rules::require_role(actor, &[Role::Manager])?;
    let task = load_task(store, task_id).await?;
    rules::ensure_task_creator(&task, actor)?;

    if !store.delete_task(&task.id).await? {
        return Err(ApiError::not_found("Task not found"));
    }
    info!("Task {} deleted by {}", task.id, actor.id);
    Ok(())
}

async fn load_task(store: &dyn Store, task_id: &str) -> Result<Task, ApiError> {
    store
        .find_task(task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))
}

async fn expand_one(store: &dyn Store, task: Task, team: Option<&Team>) -> Result<TaskView, ApiError> {
    let mut views = expand_tasks(store, vec![task], team).await?;
    views
        .pop()
        .ok_or_else(|| ApiError::Internal("task expansion returned nothing".into()))
}

/// Replaces user and team references with summaries, one lookup per
/// collection. `team` is reused when the caller already loaded it.
async fn expand_tasks(
    store: &dyn Store,
    tasks: Vec<Task>,
    team: Option<&Team>,
) -> Result<Vec<TaskView>, ApiError> {
    let mut user_ids = HashSet::new();
    for task in &tasks {
        user_ids.insert(task.created_by.clone());
        user_ids.extend(task.assigned_to.clone());
        user_ids.extend(task.bug.as_ref().map(|b| b.reported_by.clone()));
    }
    let user_ids: Vec<String> = user_ids.into_iter().collect();
    let users: HashMap<String, UserSummary> = store
        .find_users(&user_ids)
        .await?
        .iter()
        .map(|u| (u.id.clone(), UserSummary::from(u)))
        .collect();

    let mut teams: HashMap<String, TeamSummary> = HashMap::new();
    if let Some(team) = team {
        teams.insert(team.id.clone(), TeamSummary::from(team));
    }
    for task in &tasks {
        if !teams.contains_key(&task.team) {
            if let Some(found) = store.find_team(&task.team).await? {
                teams.insert(found.id.clone(), TeamSummary::from(&found));
            }
        }
    }

    let lookup = |id: &str| users.get(id).cloned();
    Ok(tasks
        .into_iter()
        .map(|task| {
            let is_bugged = task.is_bugged();
            let (bug_reason, bug_reported_by, bug_reported_at) = match task.bug {
                Some(bug) => (Some(bug.reason), lookup(bug.reported_by.as_str()), Some(bug.reported_at)),
                None => (None, None, None),
            };
            TaskView {
                assigned_to: task.assigned_to.as_deref().and_then(lookup),
                created_by: lookup(task.created_by.as_str()),
                team: teams.get(&task.team).cloned(),
                id: task.id,
                title: task.title,
                content: task.content,
                images: task.images,
                status: task.status,
                priority: task.priority,
                is_bugged,
                bug_reason,
                bug_reported_by,
                bug_reported_at,
                created_at: task.created_at,
                updated_at: task.updated_at,
            }
        })
        .collect())
}
