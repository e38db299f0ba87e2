//! HTTP-facing error mapping. One `thiserror` enum composing the
//! component-boundary errors from `anpx-core`/`anpx-services`, converted to
//! status codes per `spec.md` §4.12.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No route found")]
    RoutingNotFound { path: String },
    #[error("path is denied by the gateway's filter")]
    Malicious,
    #[error("request body exceeds the configured limit")]
    BodyTooLarge,
    #[error("failed to deliver the request to the selected connection")]
    SendFailed,
    #[error("no response received within the configured deadline")]
    TimedOut,
    #[error("the connection serving this path was lost while awaiting a response")]
    ConnectionLost,
    #[error("the receiver reported an error: {0}")]
    Receiver(String),
    #[error("the gateway is at capacity")]
    Capacity,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::RoutingNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Malicious => StatusCode::FORBIDDEN,
            GatewayError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::SendFailed | GatewayError::ConnectionLost => StatusCode::BAD_GATEWAY,
            GatewayError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Receiver(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Capacity => StatusCode::SERVICE_UNAVAILABLE,
        };
        let path = match &self {
            GatewayError::RoutingNotFound { path } => Some(path.clone()),
            _ => None,
        };
        (status, Json(ErrorBody { error: self.to_string(), path })).into_response()
    }
}

impl From<anpx_services::DispatchError> for GatewayError {
    fn from(err: anpx_services::DispatchError) -> Self {
        match err {
            anpx_services::DispatchError::ConnectionLost => GatewayError::ConnectionLost,
            anpx_services::DispatchError::TimedOut => GatewayError::TimedOut,
            anpx_services::DispatchError::Remote(msg) => GatewayError::Receiver(msg),
        }
    }
}

impl From<anpx_services::CapacityError> for GatewayError {
    fn from(_: anpx_services::CapacityError) -> Self {
        GatewayError::Capacity
    }
}
