use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized")] Unauthorized,
    #[error("Not found")] NotFound,
    #[error("{0}")] BadRequest(String),
    #[error("Payload too large")] PayloadTooLarge,
    #[error("{0}")] Internal(&'static str),
}

impl ApiError {
    /// Map a store failure, logging anything that is not a plain miss.
    pub fn store(context: &'static str) -> impl FnOnce(RepoError) -> ApiError {
        move |e| match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Internal(msg) => {
                log::error!("{context}: {msg}");
                ApiError::Internal(context)
            }
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        ApiError::store("Store unavailable")(e)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string() })
    }
}
