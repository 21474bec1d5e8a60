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

//! Status code mapping between gRPC and HTTP protocols

use hyper::StatusCode;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use tonic::Code;

/// Header carrying the final gRPC status code of a transcoded call
pub const GRPC_STATUS: &str = "grpc-status";

/// Header carrying the percent-encoded gRPC status message
pub const GRPC_MESSAGE: &str = "grpc-message";

/// HTTP/2 CANCEL reset code, used when the bridge force-terminates a call
pub const HTTP2_CANCEL: u32 = 0x8;

// gRPC percent-encodes everything outside the printable range plus '%'
// itself; non-ASCII bytes are always escaped by the encoder.
const GRPC_MESSAGE_ESCAPE: &AsciiSet = &CONTROLS.add(b'%');

/// Percent-encode a gRPC status message for the `grpc-message` header
pub fn encode_grpc_message(message: &str) -> String {
    utf8_percent_encode(message, GRPC_MESSAGE_ESCAPE).to_string()
}

/// Decode a percent-encoded `grpc-message` header value
pub fn decode_grpc_message(encoded: &str) -> String {
    percent_decode_str(encoded).decode_utf8_lossy().into_owned()
}

/// Map gRPC status code to HTTP status code
pub fn grpc_to_http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::REQUEST_TIMEOUT,
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
    }
}

/// Map an HTTP/2 stream reset code to a gRPC status code.
///
/// Follows the gRPC HTTP/2 transport mapping; unknown codes degrade to
/// `Unknown` rather than crashing the call.
pub fn reset_code_to_grpc(code: u32) -> Code {
    match code {
        // NO_ERROR, PROTOCOL_ERROR, INTERNAL_ERROR, FLOW_CONTROL_ERROR
        0x0 | 0x1 | 0x2 | 0x3 => Code::Internal,
        // REFUSED_STREAM
        0x7 => Code::Unavailable,
        // CANCEL
        0x8 => Code::Cancelled,
        // ENHANCE_YOUR_CALM
        0xb => Code::ResourceExhausted,
        // INADEQUATE_SECURITY
        0xc => Code::PermissionDenied,
        _ => Code::Unknown,
    }
}
