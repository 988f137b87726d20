use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Failure of an agent-facing control-plane operation.
///
/// `Unauthorized` is surfaced to the calling agent as a rejected call.
/// `NotFound`-style and malformed-input conditions are handled inside the
/// operations (logged, call completes); only repository failures propagate
/// as `Storage`, since no safe continuation exists without storage.
#[derive(Debug, thiserror::Error)]
pub enum AgentCallError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AgentCallError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
}

/// Failure to hand a server-initiated call to an agent connection.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no live connection for node")]
    NoConnection,
    #[error("agent connection closed")]
    ChannelClosed,
    #[error("agent outbound queue is full")]
    Backpressure,
}

/// Application error type for operator HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

pub type ApiResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: msg.into(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "forbidden",
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "conflict",
            message: msg.into(),
        }
    }

    pub fn internal(msg: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: msg.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.code,
        }));
        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(?err, "internal error");
        AppError::internal("internal server error")
    }
}

impl From<AgentCallError> for AppError {
    fn from(err: AgentCallError) -> Self {
        match err {
            AgentCallError::Unauthorized(msg) => AppError::unauthorized(msg),
            AgentCallError::Storage(err) => AppError::from(err),
        }
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::NoConnection => AppError::not_found("no live connection for node"),
            DeliveryError::ChannelClosed => AppError::conflict("agent connection closed"),
            DeliveryError::Backpressure => AppError::conflict("agent outbound queue is full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_call_errors_map_to_http_statuses() {
        let err: AppError = AgentCallError::unauthorized("nope").into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code, "unauthorized");

        let err: AppError = AgentCallError::Storage(anyhow::anyhow!("db gone")).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "internal_error");
        // Internal detail must not leak to the caller.
        assert_eq!(err.message, "internal server error");
    }

    #[test]
    fn delivery_errors_map_to_http_statuses() {
        let err: AppError = DeliveryError::NoConnection.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err: AppError = DeliveryError::Backpressure.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
