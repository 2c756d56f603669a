use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Unauthorized: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Daily session limit reached for tier {tier}")]
    QuotaExceeded {
        tier: String,
        daily_limit: i64,
        used_today: i64,
    },

    #[error("Generator contract violation: {0}")]
    GeneratorContract(String),

    #[error("Provider lookup failed: {0}")]
    ProviderLookup(String),

    #[error("No recommendations could be resolved")]
    EmptyResult,

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, shared by HTTP bodies and stream events
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::QuotaExceeded { .. } => "quota_exceeded",
            AppError::GeneratorContract(_) => "generator_contract",
            AppError::EmptyResult => "empty_result",
            AppError::ExternalApi(_) | AppError::ProviderLookup(_) | AppError::HttpClient(_) => {
                "upstream"
            }
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Quota errors carry a structured body so clients can render limits
        if let AppError::QuotaExceeded {
            tier,
            daily_limit,
            used_today,
        } = &self
        {
            let body = Json(json!({
                "error": "quota_exceeded",
                "tier": tier,
                "daily_limit": daily_limit,
                "used_today": used_today,
            }));
            return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
        }

        let status = match &self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalApi(_) | AppError::ProviderLookup(_) | AppError::HttpClient(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_maps_to_429() {
        let err = AppError::QuotaExceeded {
            tier: "free".to_string(),
            daily_limit: 3,
            used_today: 3,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_auth_maps_to_401() {
        let err = AppError::Auth("missing bearer token".to_string());
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_empty_result_maps_to_500() {
        let err = AppError::EmptyResult;
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_provider_lookup_maps_to_502() {
        let err = AppError::ProviderLookup("search timed out".to_string());
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
