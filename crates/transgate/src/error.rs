// Transgate
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Error handling for the transcoding bridge

use crate::status::{GRPC_MESSAGE, GRPC_STATUS, encode_grpc_message, grpc_to_http_status};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::HeaderValue;
use hyper::{Response, StatusCode};
use thiserror::Error;
use tonic::Code;
use tracing::error;

/// Bridge error types following the transcoding error taxonomy
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    #[error("Unprocessable entity: {message}")]
    UnprocessableEntity { message: String },

    #[error("Internal server error: {message}")]
    InternalServerError { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Gateway timeout: {message}")]
    GatewayTimeout { message: String },

    /// A handler violated the call contract (write after close, double
    /// half-close). These are programming errors, not request errors.
    #[error("Illegal call state: {message}")]
    IllegalState { message: String },

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Hyper error: {0}")]
    HyperError(#[from] hyper::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl BridgeError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            BridgeError::NotFound { .. } => StatusCode::NOT_FOUND,
            BridgeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BridgeError::UnprocessableEntity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BridgeError::InternalServerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::IllegalState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::GrpcError(status) => grpc_to_http_status(status.code()),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::BadRequest { .. } => "bad_request",
            BridgeError::Unauthorized { .. } => "unauthorized",
            BridgeError::NotFound { .. } => "not_found",
            BridgeError::PayloadTooLarge { .. } => "payload_too_large",
            BridgeError::UnprocessableEntity { .. } => "unprocessable_entity",
            BridgeError::InternalServerError { .. } => "internal_server_error",
            BridgeError::ServiceUnavailable { .. } => "service_unavailable",
            BridgeError::GatewayTimeout { .. } => "gateway_timeout",
            BridgeError::IllegalState { .. } => "illegal_state",
            BridgeError::GrpcError(_) => "grpc_error",
            BridgeError::SerdeJsonError(_) => "json_error",
            BridgeError::HyperError(_) => "http_error",
            BridgeError::IoError(_) => "io_error",
            BridgeError::HttpError(_) => "http_error",
        }
    }
}

/// Convert BridgeError to an HTTP response.
///
/// Transcoded error responses carry no body; call-level gRPC failures
/// additionally carry `grpc-status` and a percent-encoded `grpc-message`.
impl From<BridgeError> for Response<Full<Bytes>> {
    fn from(err: BridgeError) -> Self {
        let status_code = err.status_code();

        error!("Bridge error: {} - {}", status_code, err);

        let mut builder = Response::builder().status(status_code).header("content-length", "0");

        if let BridgeError::GrpcError(status) = &err {
            builder = builder.header(GRPC_STATUS, (status.code() as i32).to_string());
            if status.code() != Code::Ok && !status.message().is_empty() {
                if let Ok(value) = HeaderValue::from_str(&encode_grpc_message(status.message())) {
                    builder = builder.header(GRPC_MESSAGE, value);
                }
            }
        }

        builder.body(Full::new(Bytes::new())).unwrap_or_else(|e| {
            error!("Failed to build error response: {}", e);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::new()))
                .unwrap()
        })
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<hyper::http::Error> for BridgeError {
    fn from(err: hyper::http::Error) -> Self {
        BridgeError::HttpError(err.to_string())
    }
}
