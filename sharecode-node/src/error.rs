//! HTTP-facing errors and their status codes.

use crate::http::Response;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    MethodNotAllowed(&'static str),
    #[error("NOT FOUND")]
    NotFound,
    #[error("Length required: chunked request bodies are not supported")]
    LengthRequired,
    #[error("Payload too large: limit is {0} bytes")]
    PayloadTooLarge(u64),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound => 404,
            ApiError::MethodNotAllowed(_) => 405,
            ApiError::LengthRequired => 411,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::Internal(_) => 500,
            ApiError::Unavailable(_) => 503,
        }
    }

    pub fn into_response(self) -> Response {
        Response::text(self.status(), self.to_string())
    }
}
