use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use storefront_core::StorefrontError;

#[derive(Debug)]
pub enum ApiError {
    Store(StorefrontError),
    Unauthorized,
}

impl From<StorefrontError> for ApiError {
    fn from(err: StorefrontError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Store(e) => {
                let status = match e {
                    StorefrontError::NotFound(_) => StatusCode::NOT_FOUND,
                    StorefrontError::Conflict(_) => StatusCode::CONFLICT,
                    StorefrontError::Invalid(_) => StatusCode::BAD_REQUEST,
                    StorefrontError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
