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

//! Per-method message marshalling between payload bytes and typed messages

use crate::error::{BridgeError, BridgeResult};
use hyper::body::Bytes;
use serde_json::Value;
use std::sync::Arc;

/// Decodes an opaque request payload into a typed message.
///
/// Decode failures are client errors: the payload did not satisfy the
/// method's request schema.
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> BridgeResult<Value>;
}

/// Encodes a typed message into an opaque response payload.
///
/// Encode failures are server defects: the handler produced a message
/// incompatible with its declared schema.
pub trait MessageEncoder: Send + Sync {
    fn encode(&self, message: &Value) -> BridgeResult<Bytes>;
}

/// JSON marshaller used by every transcoded method unless the call runtime
/// supplies a specialized pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl MessageDecoder for JsonCodec {
    fn decode(&self, payload: &[u8]) -> BridgeResult<Value> {
        serde_json::from_slice(payload).map_err(|e| BridgeError::UnprocessableEntity {
            message: format!("failed to decode request message: {}", e),
        })
    }
}

impl MessageEncoder for JsonCodec {
    fn encode(&self, message: &Value) -> BridgeResult<Bytes> {
        let buf = serde_json::to_vec(message).map_err(|e| BridgeError::InternalServerError {
            message: format!("failed to encode response message: {}", e),
        })?;
        Ok(Bytes::from(buf))
    }
}

/// The request/response marshaller pair supplied for one gRPC method
#[derive(Clone)]
pub struct MarshallerPair {
    pub request: Arc<dyn MessageDecoder>,
    pub response: Arc<dyn MessageEncoder>,
}

impl MarshallerPair {
    /// The default JSON pair
    pub fn json() -> Self {
        Self {
            request: Arc::new(JsonCodec),
            response: Arc::new(JsonCodec),
        }
    }
}
