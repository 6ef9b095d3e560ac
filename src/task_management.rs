// task_management.rs

use actix_web::{web, HttpResponse};
use log::debug;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::{BugFlagRequest, Identity, NewTask, TaskPatch};
use crate::rules::BugFlag;
use crate::task_service;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub team_id: Option<String>,
}

/// CREATE a new task
pub async fn create_task(
    identity: Identity,
    data: web::Data<AppState>,
    payload: web::Json<NewTask>,
) -> Result<HttpResponse, ApiError> {
    debug!("create_task called by {} with payload: {:?}", identity.id, payload);
    let task = task_service::create_task(data.store.as_ref(), &identity, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(task))
}

/// LIST tasks of a team, scoped by the caller's role
pub async fn list_tasks(
    identity: Identity,
    data: web::Data<AppState>,
    query: web::Query<TaskQuery>,
) -> Result<HttpResponse, ApiError> {
    let tasks =
        task_service::list_tasks(data.store.as_ref(), query.team_id.as_deref(), &identity).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// GET a single task
pub async fn get_task(
    identity: Identity,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let task = task_service::get_task(data.store.as_ref(), &task_id, &identity).await?;
    Ok(HttpResponse::Ok().json(task))
}

/// UPDATE an existing task; omitted fields stay as they are
pub async fn update_task(
    identity: Identity,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<TaskPatch>,
) -> Result<HttpResponse, ApiError> {
    let task =
        task_service::update_task(data.store.as_ref(), &task_id, payload.into_inner(), &identity).await?;
    Ok(HttpResponse::Ok().json(task))
}

/// Mark or clear the bug flag
pub async fn set_task_bug(
    identity: Identity,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<BugFlagRequest>,
) -> Result<HttpResponse, ApiError> {
    let BugFlagRequest { is_bugged, bug_reason } = payload.into_inner();
    let flag = BugFlag::from_request(is_bugged, bug_reason);
    let task = task_service::set_bug(data.store.as_ref(), &task_id, flag, &identity).await?;
    Ok(HttpResponse::Ok().json(task))
}

/// DELETE a task
pub async fn delete_task(
    identity: Identity,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    task_service::delete_task(data.store.as_ref(), &task_id, &identity).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Task deleted successfully" })))
}
