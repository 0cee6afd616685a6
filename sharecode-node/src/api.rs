//! Request routing: `POST /upload`, `GET /download/{code}`, `OPTIONS` anywhere.

use serde::Serialize;
use sharecode_core::{multipart, naming, ShareCode};

use crate::bridge;
use crate::error::ApiError;
use crate::http::{Body, Request, Response};
use crate::storage::{self, UploadDir};
use crate::supervisor::{OfferError, Supervisor};

/// Shared by every request handler.
pub struct AppState {
    pub supervisor: Supervisor,
    pub uploads: UploadDir,
    pub bridge_host: String,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Serialize)]
struct UploadReply<'a> {
    port: ShareCode,
    #[serde(rename = "fileName")]
    file_name: &'a str,
}

pub async fn route(req: Request, state: &AppState) -> Response {
    if req.method.eq_ignore_ascii_case("OPTIONS") {
        return Response::empty(204);
    }
    let result = if req.path == "/upload" || req.path.starts_with("/upload/") {
        upload(req, state).await
    } else if req.path == "/download" || req.path.starts_with("/download/") {
        download(req, state).await
    } else {
        Err(ApiError::NotFound)
    };
    result.unwrap_or_else(ApiError::into_response)
}

async fn upload(req: Request, state: &AppState) -> Result<Response, ApiError> {
    if !req.method.eq_ignore_ascii_case("POST") {
        return Err(ApiError::MethodNotAllowed("METHOD NOT ALLOWED"));
    }
    let content_type = req.header("Content-Type").unwrap_or_default();
    let boundary = match multipart::boundary_from_content_type(content_type) {
        Ok(b) => b,
        Err(multipart::MultipartError::NotMultipart) => {
            return Err(ApiError::BadRequest(
                "Bad request: Content-Type must be multipart/form-data".into(),
            ))
        }
        Err(_) => {
            return Err(ApiError::BadRequest(
                "Bad request: Missing boundary in Content-Type".into(),
            ))
        }
    };
    let parsed = multipart::decode(&req.body, &boundary).map_err(|e| {
        tracing::debug!(error = %e, "multipart decode failed");
        ApiError::BadRequest("Bad Result: Could not parse file content".into())
    })?;

    let slot = state.supervisor.try_reserve().map_err(|_| {
        ApiError::Unavailable("too many outstanding offers, try again later".into())
    })?;

    let name = naming::display_name(&parsed.file_name);
    let path = state
        .uploads
        .store(name, &parsed.content)
        .await
        .map_err(|e| internal(&e))?;
    let announced = naming::sanitize_file_name(name);
    let code = match state.supervisor.offer_and_listen(slot, &path, &announced).await {
        Ok(code) => code,
        Err(e) => {
            storage::discard(&path).await;
            return Err(match e {
                OfferError::PoolFull => {
                    ApiError::Unavailable("too many outstanding offers, try again later".into())
                }
                other => internal(&other),
            });
        }
    };
    tracing::info!(
        code,
        file = %name,
        bytes = parsed.content.len(),
        content_type = %parsed.content_type,
        "upload registered"
    );
    Response::json(
        200,
        &UploadReply {
            port: code,
            file_name: name,
        },
    )
}

async fn download(req: Request, state: &AppState) -> Result<Response, ApiError> {
    if !req.method.eq_ignore_ascii_case("GET") {
        return Err(ApiError::MethodNotAllowed("Method not allowed"));
    }
    let mut parts: Vec<&str> = req.path.split('/').collect();
    while parts.last() == Some(&"") {
        parts.pop();
    }
    if parts.len() < 3 {
        return Err(ApiError::BadRequest(
            "Invalid download URL. Expected format: /download/{port}".into(),
        ));
    }
    let code: ShareCode = parts[2]
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid port number".into()))?;

    // Only dial ports that belong to a live offer.
    let registry = state.supervisor.registry();
    if !registry.range().contains(&code) || registry.lookup(code).is_none() {
        tracing::info!(code, "no file is associated with this code");
        return Err(ApiError::Internal(format!(
            "Error downloading file: no file is associated with code {code}"
        )));
    }

    let d = bridge::fetch(
        &state.bridge_host,
        code,
        state.uploads.path(),
        bridge::HEADER_TIMEOUT,
    )
    .await
        .map_err(|e| {
            tracing::error!(code, error = %e, "error downloading the file");
            ApiError::Internal(format!("Error downloading file: {e}"))
        })?;
    Ok(Response::empty(200)
        .with_header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", d.file_name),
        )
        .with_header("Content-Type", d.content_type)
        .with_body(Body::File {
            file: d.body,
            len: d.length,
        }))
}

fn internal(e: &dyn std::error::Error) -> ApiError {
    tracing::error!(error = %e, "error processing file upload");
    ApiError::Internal(format!("Server error {e}"))
}
