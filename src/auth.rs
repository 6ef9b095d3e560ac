use std::sync::OnceLock;

use actix_web::{dev::Payload, web, FromRequest, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use futures::future::LocalBoxFuture;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::{Identity, Role, User, UserSummary};

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

/// Outcome of decoding the bearer token, left in request extensions by the
/// authentication middleware.
#[derive(Debug, Clone)]
pub enum Credential {
    Verified(Claims),
    Malformed,
    Expired,
    Invalid,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserSummary,
}

// JWT Creation
pub fn create_jwt(user_id: &str, secret: &str, ttl_hours: i64) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(ttl_hours)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))
}

// JWT Validation
pub fn validate_jwt(token: &str, secret: &str) -> Credential {
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    ) {
        Ok(token_data) => Credential::Verified(token_data.claims),
        Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => Credential::Expired,
        Err(e) => {
            debug!("Token decode error: {}", e);
            Credential::Invalid
        }
    }
}

/// Reads `Authorization: Bearer <token>`. `None` when the header is absent.
pub fn bearer_credential(header: Option<&str>, secret: &str) -> Option<Credential> {
    let header = header?;
    match header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Some(validate_jwt(token.trim(), secret)),
        _ => Some(Credential::Malformed),
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .map_or(false, |re| re.is_match(email))
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::invalid(message)),
    }
}

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let credential = req.extensions().get::<Credential>().cloned();
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            let claims = match credential {
                Some(Credential::Verified(claims)) => claims,
                Some(Credential::Expired) => return Err(ApiError::TokenExpired),
                Some(Credential::Invalid) => {
                    return Err(ApiError::Unauthenticated("Token is not valid".into()))
                }
                Some(Credential::Malformed) | None => {
                    return Err(ApiError::Unauthenticated("No token, authorization denied".into()))
                }
            };
            let state =
                state.ok_or_else(|| ApiError::Internal("application state is not configured".into()))?;
            let user = state
                .store
                .find_user(&claims.sub)
                .await?
                .ok_or_else(|| ApiError::Unauthenticated("User not found".into()))?;
            Ok(Identity::from(&user))
        })
    }
}

// Register Endpoint
pub async fn register(
    data: web::Data<AppState>,
    info: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let info = info.into_inner();
    let name = required(&info.name, "Name is required")?.to_string();
    let email = normalize_email(required(&info.email, "Email is required")?);
    if !is_valid_email(&email) {
        return Err(ApiError::invalid("Please provide a valid email"));
    }
    let password = info.password.unwrap_or_default();
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if data.store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::invalid("User already exists"));
    }

    let cost = data.config.bcrypt_cost;
    let hashed_password = web::block(move || hash(password, cost)).await??;

    let user = User {
        id: Uuid::new_v4().to_string(),
        name,
        email,
        password: hashed_password,
        role: info.role.unwrap_or(Role::Member),
        created_at: Utc::now(),
    };
    data.store.insert_user(&user).await?;
    info!("User {} registered as {}", user.id, user.role);

    let token = create_jwt(&user.id, &data.config.jwt_secret, data.config.jwt_ttl_hours)?;
    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        user: UserSummary::from(&user),
    }))
}

// Login Endpoint
pub async fn login(
    data: web::Data<AppState>,
    info: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let info = info.into_inner();
    let email = normalize_email(required(&info.email, "Email is required")?);
    let password = info.password.unwrap_or_default();

    let user = data
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::Unauthenticated("Invalid credentials".into()))?;

    let stored_hash = user.password.clone();
    let matches = web::block(move || verify(password, &stored_hash).unwrap_or(false)).await?;
    if !matches {
        debug!("Failed login for {}", email);
        return Err(ApiError::Unauthenticated("Invalid credentials".into()));
    }

    let token = create_jwt(&user.id, &data.config.jwt_secret, data.config.jwt_ttl_hours)?;
    info!("User {} logged in", user.id);
    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        user: UserSummary::from(&user),
    }))
}

pub async fn me(identity: Identity) -> HttpResponse {
    HttpResponse::Ok().json(identity)
}
