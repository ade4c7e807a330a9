//! API error taxonomy. Rate limits and abuse blocks are *not* errors here;
//! they are ordinary pipeline outcomes with user-facing text.

use shuttle_axum::axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input, rejected before any detector runs.
    #[error("invalid field `{field}`: {detail}")]
    Validation { field: &'static str, detail: String },

    /// Backing store failure while reading or replacing a config document.
    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &'static str, detail: impl Into<String>) -> Self {
        Self::Validation {
            field,
            detail: detail.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation { field, detail } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: detail.clone(),
                    field: Some(field),
                },
            ),
            ApiError::Storage(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: e.to_string(),
                    field: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_422() {
        let resp = ApiError::validation("message", "must not be empty").into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn storage_maps_to_500() {
        let resp = ApiError::Storage(anyhow::anyhow!("disk gone")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
