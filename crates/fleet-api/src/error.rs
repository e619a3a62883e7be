//! Typed errors to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use fleet_hosting::HostingError;
use fleet_monitor::MonitorError;
use fleet_pass::PassError;
use fleet_provision::ProvisionError;
use fleet_state::StateError;

/// Response wrapper for consistent API format.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// An error an HTTP handler can return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = self.status.as_u16(), error = %self.message, "request failed");
        }
        (
            self.status,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(self.message),
            }),
        )
            .into_response()
    }
}

impl From<HostingError> for ApiError {
    fn from(e: HostingError) -> Self {
        // 502: the platform rejected us and will again; 503: try later.
        let status = if e.is_transient() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::BAD_GATEWAY
        };
        Self::new(status, e.to_string())
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::DeploymentNotFound(_) => Self::not_found(e.to_string()),
            StateError::TierConflict { .. } => Self::conflict(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<ProvisionError> for ApiError {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::NotFound(_) => Self::not_found(e.to_string()),
            ProvisionError::InProgress(_)
            | ProvisionError::InvalidTransition { .. }
            | ProvisionError::NoServer(_) => Self::conflict(e.to_string()),
            ProvisionError::Hosting(h) => h.into(),
            ProvisionError::State(s) => s.into(),
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::NoServer(_) => Self::conflict(e.to_string()),
            MonitorError::Hosting(h) => h.into(),
            MonitorError::State(s) => s.into(),
        }
    }
}

impl From<PassError> for ApiError {
    fn from(e: PassError) -> Self {
        match e {
            PassError::AlreadyRunning => Self::conflict(e.to_string()),
            PassError::Hosting(h) => h.into(),
            PassError::State(s) => s.into(),
        }
    }
}
