use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::profiles::StoreError;

/// Failures surfaced by the profile and billing endpoints. Every variant maps
/// to a non-2xx status with a `{ "error": ... }` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),
    #[error("No profile found")]
    ProfileNotFound,
    #[error("No Active Subscription Found.")]
    NoActiveSubscription,
    #[error("Subscription Item Not Found.")]
    SubscriptionItemNotFound,
    #[error("{0:#}")]
    Upstream(anyhow::Error),
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) | ApiError::UnknownPlan(_) | ApiError::NoActiveSubscription => {
                StatusCode::BAD_REQUEST
            }
            ApiError::ProfileNotFound | ApiError::Store(StoreError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::SubscriptionItemNotFound => StatusCode::BAD_GATEWAY,
            ApiError::Upstream(_) | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
