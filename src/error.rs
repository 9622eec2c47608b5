use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::response::{ApiResponse, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not Found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("Missing or invalid fields: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Conflict(String),

    #[error("Only {available} left in stock")]
    OutOfStock { available: i32 },

    #[error("Invalid or expired code")]
    InvalidCode,

    #[error("Too many requests, try again in {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("Upstream service failed, please try again")]
    Upstream(#[source] anyhow::Error),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AppError::Validation(fields.into_iter().map(Into::into).collect())
    }

    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        AppError::Upstream(err.into())
    }

    /// Unique-constraint failures become `Conflict(message)`; anything else stays an ORM error.
    pub fn conflict_on_unique(err: sea_orm::DbErr, message: &str) -> Self {
        match err.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
                AppError::Conflict(message.to_string())
            }
            _ => AppError::OrmError(err),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Validation(_) | AppError::InvalidCode => {
                StatusCode::BAD_REQUEST
            }
            AppError::Conflict(_) | AppError::OutOfStock { .. } => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            AppError::Upstream(cause) => tracing::error!(error = ?cause, "upstream call failed"),
            AppError::DbError(cause) => tracing::error!(error = %cause, "database error"),
            AppError::OrmError(cause) => tracing::error!(error = %cause, "orm error"),
            AppError::Internal(cause) => tracing::error!(error = ?cause, "internal error"),
            _ => {}
        }

        let fields = match &self {
            AppError::Validation(fields) => Some(fields.clone()),
            _ => None,
        };

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
                fields,
            }),
            meta: Some(Meta::empty()),
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let AppError::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_map_to_distinct_statuses() {
        assert_eq!(AppError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn validation_message_lists_fields() {
        let err = AppError::validation(["email", "zip_code"]);
        assert_eq!(err.to_string(), "Missing or invalid fields: email, zip_code");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn out_of_stock_states_remaining_quantity() {
        let err = AppError::OutOfStock { available: 3 };
        assert_eq!(err.to_string(), "Only 3 left in stock");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn upstream_hides_cause_from_message() {
        let err = AppError::upstream(anyhow::anyhow!("stripe returned 500: secret detail"));
        assert!(!err.to_string().contains("secret detail"));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = AppError::RateLimited { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }
}
