use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use pricewatch_core::error::WatchError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `WatchError`.
///
/// Only request-level failures surface here; job-level failures travel
/// inside `ExtractionOutcome` bodies with status 200.
pub struct ApiError(pub WatchError);

impl From<WatchError> for ApiError {
    fn from(err: WatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WatchError::Generic(_) | WatchError::SerializationError(_) => StatusCode::BAD_REQUEST,
            WatchError::JobTimeout(_) | WatchError::NavigationTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            WatchError::SourceFetchFailed(_) | WatchError::ReportDeliveryFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
