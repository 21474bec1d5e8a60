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

//! Transgate HTTP/JSON to gRPC transcoding bridge
//!
//! Accepts plain HTTP requests carrying JSON bodies, matches them against
//! declared URL templates, merges path and query parameters into the
//! request message, and drives the registered gRPC method handler through
//! a call listener contract, translating messages, status and trailers
//! back into the HTTP response.

pub mod auth;
pub mod call;
pub mod codec;
pub mod config;
pub mod error;
pub mod flow;
pub mod merge;
pub mod path;
pub mod route;
pub mod runtime;
pub mod server;
pub mod status;

pub use auth::{AllowAll, AuthHook};
pub use call::{CallResponder, Completion, TranscodedResponse, TranscodingRequest, TranscodingResponse};
pub use codec::{JsonCodec, MarshallerPair, MessageDecoder, MessageEncoder};
pub use config::{BridgeConfig, BridgeMetrics};
pub use error::{BridgeError, BridgeResult};
pub use route::{MethodKind, MethodMetadata, RouteEntry, RouteTable};
pub use runtime::{CallHandler, CallListener, HandlerRegistry};
pub use server::{BridgeServer, TranscodingServer};
