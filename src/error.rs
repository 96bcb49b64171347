use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Generation(String),
    #[error("{0}")]
    Transport(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            AppError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "invalid_request_error",
            AppError::Generation(_) => "generation_error",
            AppError::Transport(_) => "transport_error",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ApiError {
            error: ApiErrorDetail {
                message: self.to_string(),
                error_type: self.kind().to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let err = AppError::Validation("both images are required".to_string());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "invalid_request_error");
    }

    #[test]
    fn upstream_errors_map_to_bad_gateway() {
        assert_eq!(
            AppError::Generation("no image returned".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Transport("connection reset".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
