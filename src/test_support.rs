//! Shared fixtures for handler and service tests.

use std::sync::Arc;

use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    web, App,
};
use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::create_jwt;
use crate::config::Config;
use crate::memory_store::MemoryStore;
use crate::middleware::Authentication;
use crate::models::{Identity, Role, User};
use crate::routes;
use crate::store::Store;
use crate::upload::LocalMediaStore;

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub config: Config,
    _uploads: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let uploads = tempfile::tempdir().unwrap();
        Self {
            store: Arc::new(MemoryStore::new()),
            config: Config::for_tests(uploads.path().to_path_buf()),
            _uploads: uploads,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            media: Arc::new(LocalMediaStore::new(
                self.config.upload_dir.clone(),
                &self.config.public_base_url,
            )),
            config: self.config.clone(),
        }
    }

    pub fn token_for(&self, identity: &Identity) -> String {
        create_jwt(&identity.id, &self.config.jwt_secret, self.config.jwt_ttl_hours).unwrap()
    }
}

pub fn test_app(
    ctx: &TestContext,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .wrap(Authentication)
        .app_data(web::Data::new(ctx.state()))
        .configure(routes::configure)
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}

/// Inserts a user directly, skipping bcrypt.
pub async fn insert_user(store: &dyn Store, name: &str, email: &str, role: Role) -> Identity {
    let user = User {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.to_string(),
        password: "not-a-real-hash".to_string(),
        role,
        created_at: Utc::now(),
    };
    store.insert_user(&user).await.unwrap();
    Identity::from(&user)
}

pub async fn seed_user(ctx: &TestContext, name: &str, email: &str, role: Role) -> Identity {
    insert_user(ctx.store.as_ref(), name, email, role).await
}
