use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, HttpMessage,
};
use futures::future::{ok, Ready};

use crate::app_state::AppState;
use crate::auth::bearer_credential;

/// Decodes the bearer token of every request and leaves the resulting
/// `Credential` in the request extensions. Rejection is left to the
/// `Identity` extractor so public routes stay reachable with a stale token.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = S::Future;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let header = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .map(|value| value.to_str().unwrap_or_default().to_string());
        let secret = req
            .app_data::<web::Data<AppState>>()
            .map(|state| state.config.jwt_secret.clone());

        if let Some(secret) = secret {
            if let Some(credential) = bearer_credential(header.as_deref(), &secret) {
                req.extensions_mut().insert(credential);
            }
        }

        self.service.call(req)
    }
}
