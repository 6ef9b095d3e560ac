use std::path::PathBuf;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, StoreError};
use crate::models::Identity;

/// Accepted image content types and the extension stored for each.
const IMAGE_TYPES: [(&str, &str); 4] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

pub fn extension_for(content_type: &str) -> Option<&'static str> {
    IMAGE_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}

pub fn content_type_for(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1;
    IMAGE_TYPES
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(mime, _)| *mime)
}

/// Stored names are `<uuid>.<ext>`; anything else never reaches the disk.
fn is_stored_name(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, _)) => Uuid::parse_str(stem).is_ok() && content_type_for(name).is_some(),
        None => false,
    }
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persists an image and returns its stored name.
    async fn put(&self, extension: &str, bytes: Vec<u8>) -> Result<String, StoreError>;
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn public_url(&self, name: &str) -> String;
}

/// Writes images into a directory served back under `/uploads/{name}`.
pub struct LocalMediaStore {
    dir: PathBuf,
    public_base_url: String,
}

impl LocalMediaStore {
    pub fn new(dir: PathBuf, public_base_url: &str) -> Self {
        Self {
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn put(&self, extension: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!("{}.{}", Uuid::new_v4(), extension);
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        Ok(name)
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if !is_stored_name(name) {
            return Ok(None);
        }
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}/uploads/{}", self.public_base_url, name)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

// POST /upload
// Takes the first part of the form that carries a content type.
pub async fn upload_image(
    identity: Identity,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let limit = data.config.max_upload_bytes;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::invalid(format!("Invalid multipart payload: {}", e)))?
    {
        let Some(content_type) = field.content_type().map(|m| m.essence_str().to_string()) else {
            continue;
        };
        let extension = extension_for(&content_type)
            .ok_or_else(|| ApiError::invalid("Only jpg, png, gif, and webp images are allowed"))?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::invalid(format!("Invalid multipart payload: {}", e)))?;
            if bytes.len() + chunk.len() > limit {
                debug!("Upload from {} exceeded {} bytes", identity.id, limit);
                return Err(ApiError::invalid(format!(
                    "Image must be at most {} bytes",
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(ApiError::invalid("No image file provided"));
        }

        let name = data.media.put(extension, bytes).await?;
        info!("User {} uploaded image {}", identity.id, name);
        return Ok(HttpResponse::Ok().json(UploadResponse {
            url: data.media.public_url(&name),
        }));
    }

    Err(ApiError::invalid("No image file provided"))
}

// GET /uploads/{name}
pub async fn serve_upload(
    data: web::Data<AppState>,
    name: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let name = name.into_inner();
    let content_type =
        content_type_for(&name).ok_or_else(|| ApiError::not_found("Image not found"))?;
    let bytes = data
        .media
        .get(&name)
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;
    Ok(HttpResponse::Ok().content_type(content_type).body(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::test_support::{bearer, seed_user, test_app, TestContext};
    use actix_web::{http::StatusCode, test as actix_test};

    const BOUNDARY: &str = "----taskline-boundary";

    fn multipart_body(content_type: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"image\"; filename=\"shot.bin\"\r\n",
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(token: &str, content_type: &str, bytes: &[u8]) -> actix_test::TestRequest {
        actix_test::TestRequest::post()
            .uri("/upload")
            .insert_header(bearer(token))
            .insert_header((
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(content_type, bytes))
    }

    #[test]
    fn maps_allowed_types_to_extensions() {
        assert_eq!(extension_for("image/png"), Some("png"));
        assert_eq!(extension_for("image/svg+xml"), None);
        assert_eq!(content_type_for("abc.webp"), Some("image/webp"));
        assert!(!is_stored_name("../secret.png"));
        assert!(is_stored_name(&format!("{}.gif", Uuid::new_v4())));
    }

    #[actix_web::test]
    async fn stores_image_and_serves_it_back() {
        let ctx = TestContext::new();
        let user = seed_user(&ctx, "Dev", "dev@example.com", Role::Member).await;
        let app = actix_test::init_service(test_app(&ctx)).await;

        let png = b"\x89PNG\r\n\x1a\nfake";
        let req = upload_request(&ctx.token_for(&user), "image/png", png).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: UploadResponse = actix_test::read_body_json(resp).await;
        assert!(body.url.starts_with("http://localhost:8080/uploads/"));
        assert!(body.url.ends_with(".png"));

        let path = body.url.trim_start_matches("http://localhost:8080");
        let req = actix_test::TestRequest::get().uri(path).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "image/png");
        let served = actix_test::read_body(resp).await;
        assert_eq!(served.as_ref(), png);
    }

    #[actix_web::test]
    async fn rejects_wrong_type_oversize_and_anonymous_uploads() {
        let ctx = TestContext::new();
        let user = seed_user(&ctx, "Dev", "dev@example.com", Role::Member).await;
        let token = ctx.token_for(&user);
        let app = actix_test::init_service(test_app(&ctx)).await;

        let req = upload_request(&token, "application/pdf", b"%PDF").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let too_big = vec![0u8; ctx.config.max_upload_bytes + 1];
        let req = upload_request(&token, "image/jpeg", &too_big).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::post()
            .uri("/upload")
            .insert_header((
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body("image/png", b"png"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn unknown_upload_names_are_not_found() {
        let ctx = TestContext::new();
        let app = actix_test::init_service(test_app(&ctx)).await;

        for uri in ["/uploads/nothing.png", "/uploads/readme.txt"] {
            let req = actix_test::TestRequest::get().uri(uri).to_request();
            assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        }
    }
}
