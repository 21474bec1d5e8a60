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

//! The gRPC call-runtime contract the bridge dispatches into

use crate::call::CallResponder;
use crate::route::MethodMetadata;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-call listener the registered handler returns for each started call.
///
/// The bridge delivers request messages, half-close, readiness, and
/// cancellation through this interface, in wire order.
pub trait CallListener: Send {
    /// A decoded request message
    fn on_message(&mut self, message: Value);

    /// The request stream has no more messages
    fn on_half_close(&mut self);

    /// The response side transitioned to ready
    fn on_ready(&mut self);

    /// The call was cancelled by the transport or the bridge
    fn on_cancel(&mut self);

    /// The call completed normally
    fn on_complete(&mut self);
}

/// A registered gRPC method handler.
///
/// `start_call` is invoked once per transcoded request with the method's
/// metadata and the responder the handler writes its response through. The
/// returned listener receives the call's request-side events.
pub trait CallHandler: Send + Sync {
    fn start_call(&self, method: Arc<MethodMetadata>, responder: CallResponder) -> Box<dyn CallListener>;
}

/// Handler registration by full gRPC method name, built once at startup
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CallHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, grpc_method_name: impl Into<String>, handler: Arc<dyn CallHandler>) {
        self.handlers.insert(grpc_method_name.into(), handler);
    }

    pub fn lookup(&self, grpc_method_name: &str) -> Option<Arc<dyn CallHandler>> {
        self.handlers.get(grpc_method_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
