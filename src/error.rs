use crate::models::ApiError;
use crate::store::StoreError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
#[error("{scope}: {message}")]
pub struct ServiceError {
    scope: &'static str,
    message: String,
    detail: Option<String>,
    kind: ServiceErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidInput,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict { field: String },
    PayloadTooLarge,
    TooManyRequests { retry_after_secs: u64 },
    Internal,
}

impl ServiceError {
    fn new(scope: &'static str, message: impl Into<String>, kind: ServiceErrorKind) -> Self {
        Self {
            scope,
            message: message.into(),
            detail: None,
            kind,
        }
    }

    pub fn invalid_input(scope: &'static str, message: impl Into<String>) -> Self {
        Self::new(scope, message, ServiceErrorKind::InvalidInput)
    }

    pub fn unauthorized(scope: &'static str, message: impl Into<String>) -> Self {
        Self::new(scope, message, ServiceErrorKind::Unauthorized)
    }

    pub fn forbidden(scope: &'static str, message: impl Into<String>) -> Self {
        Self::new(scope, message, ServiceErrorKind::Forbidden)
    }

    pub fn not_found(scope: &'static str, message: impl Into<String>) -> Self {
        Self::new(scope, message, ServiceErrorKind::NotFound)
    }

    /// Duplicate unique key. `sku` is reported as `SKU` to match what the
    /// admin UI shows next to the field.
    pub fn conflict(scope: &'static str, field: &str) -> Self {
        let label = if field == "sku" { "SKU" } else { field };
        Self {
            scope,
            message: format!("{label} already exists"),
            detail: Some(format!("Duplicate {}", label.to_lowercase())),
            kind: ServiceErrorKind::Conflict {
                field: field.to_string(),
            },
        }
    }

    /// Conflict on `field` with a message of its own.
    pub fn conflict_on(scope: &'static str, field: &str, message: impl Into<String>) -> Self {
        Self::new(
            scope,
            message,
            ServiceErrorKind::Conflict {
                field: field.to_string(),
            },
        )
    }

    pub fn payload_too_large(scope: &'static str, message: impl Into<String>) -> Self {
        Self::new(scope, message, ServiceErrorKind::PayloadTooLarge)
    }

    pub fn too_many_requests(scope: &'static str, retry_after_secs: u64) -> Self {
        Self::new(
            scope,
            "Too many requests",
            ServiceErrorKind::TooManyRequests { retry_after_secs },
        )
    }

    pub fn internal(scope: &'static str, message: impl Into<String>) -> Self {
        Self::new(scope, message, ServiceErrorKind::Internal)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[cfg(test)]
    pub fn kind(&self) -> &ServiceErrorKind {
        &self.kind
    }

    #[cfg(test)]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[cfg(test)]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ServiceErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ServiceErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ServiceErrorKind::NotFound => StatusCode::NOT_FOUND,
            ServiceErrorKind::Conflict { .. } => StatusCode::CONFLICT,
            ServiceErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceErrorKind::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a store failure onto the request that caused it.
    pub fn from_store(scope: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { field } => Self::conflict(scope, &field),
            StoreError::NotFound => Self::not_found(scope, "Document not found"),
            other => Self::internal(scope, "Database error").with_detail(other.to_string()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                target = "storefront.api",
                scope = self.scope,
                detail = self.detail.as_deref().unwrap_or(""),
                "{}",
                self.message
            );
        } else {
            let field = match &self.kind {
                ServiceErrorKind::Conflict { field } => field.as_str(),
                _ => "",
            };
            debug!(
                target = "storefront.api",
                scope = self.scope,
                status = status.as_u16(),
                field,
                "{}",
                self.message
            );
        }
        // internals stay in the log
        let detail = if status.is_server_error() {
            None
        } else {
            self.detail
        };
        let payload = ApiError::new(self.message, detail);
        let mut response = (status, Json(payload)).into_response();
        if let ServiceErrorKind::TooManyRequests { retry_after_secs } = self.kind {
            response.headers_mut().insert(
                RETRY_AFTER,
                HeaderValue::from_str(&retry_after_secs.max(1).to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("1")),
            );
        }
        response
    }
}
