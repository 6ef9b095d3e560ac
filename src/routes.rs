// src/routes.rs

use actix_web::{error, web, HttpRequest};

use crate::auth::{login, me, register};
use crate::error::ApiError;
use crate::task_management::{
    create_task, delete_task, get_task, list_tasks, set_task_bug, update_task,
};
use crate::team_management::{
    add_team_member, create_team, get_team, get_user_teams, remove_team_member,
};
use crate::upload::{serve_upload, upload_image};

fn json_error(err: error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::invalid(err.to_string()).into()
}

fn query_error(err: error::QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::invalid(err.to_string()).into()
}

/// Mounts every endpoint. Shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .service(
            web::scope("/auth")
                .route("/register", web::post().to(register))
                .route("/login", web::post().to(login))
                .route("/me", web::get().to(me)),
        )
        // TEAMS
        .service(
            web::scope("/teams")
                .route("", web::post().to(create_team))
                .route("", web::get().to(get_user_teams))
                .service(
                    web::scope("/{team_id}")
                        .route("", web::get().to(get_team))
                        .route("/members", web::put().to(add_team_member))
                        .route("/members/{member_id}", web::delete().to(remove_team_member)),
                ),
        )
        // TASKS
        .service(
            web::scope("/tasks")
                .route("", web::post().to(create_task))
                .route("", web::get().to(list_tasks))
                .route("/{task_id}", web::get().to(get_task))
                .route("/{task_id}", web::put().to(update_task))
                .route("/{task_id}", web::delete().to(delete_task))
                .route("/{task_id}/bug", web::put().to(set_task_bug)),
        )
        // UPLOADS
        .route("/upload", web::post().to(upload_image))
        .route("/uploads/{name}", web::get().to(serve_upload));
}
