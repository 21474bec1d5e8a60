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

//! Route and method metadata tables built at startup

use crate::codec::{MarshallerPair, MessageDecoder, MessageEncoder};
use crate::path;
use hyper::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Response arity a transcoded method declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Exactly one response message
    Unary,
    /// Zero or more response messages
    ServerStreaming,
}

/// One transcoded gRPC method, created at startup and shared read-only
/// across all requests for that method.
#[derive(Clone)]
pub struct MethodMetadata {
    pub http_verb: Method,
    pub uri_template: String,
    pub grpc_method_name: String,
    pub request_codec: Arc<dyn MessageDecoder>,
    pub response_codec: Arc<dyn MessageEncoder>,
    pub kind: MethodKind,
}

impl MethodMetadata {
    /// Metadata with the default JSON marshaller pair
    pub fn json(http_verb: Method, uri_template: impl Into<String>, grpc_method_name: impl Into<String>, kind: MethodKind) -> Self {
        let marshallers = MarshallerPair::json();
        Self {
            http_verb,
            uri_template: uri_template.into(),
            grpc_method_name: grpc_method_name.into(),
            request_codec: marshallers.request,
            response_codec: marshallers.response,
            kind,
        }
    }
}

impl fmt::Debug for MethodMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodMetadata")
            .field("http_verb", &self.http_verb)
            .field("uri_template", &self.uri_template)
            .field("grpc_method_name", &self.grpc_method_name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// One registered `(path template, HTTP verb) -> gRPC method` binding
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub path_template: String,
    pub http_verb: Method,
    pub grpc_method: String,
}

/// A successful route resolution
#[derive(Debug)]
pub struct RouteMatch {
    pub metadata: Arc<MethodMetadata>,
    pub path_params: HashMap<String, String>,
}

/// The route table consumed by the dispatcher.
///
/// Entries are evaluated by linear scan in registration order and the
/// first entry whose template and verb both match wins; overlapping
/// templates are resolved by registration order, not specificity.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    metadata: HashMap<String, Arc<MethodMetadata>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Register a transcoded method. Registration keeps the route and
    /// metadata tables in sync, so a matched route always resolves
    /// metadata.
    pub fn register(&mut self, metadata: MethodMetadata) {
        self.entries.push(RouteEntry {
            path_template: metadata.uri_template.clone(),
            http_verb: metadata.http_verb.clone(),
            grpc_method: metadata.grpc_method_name.clone(),
        });
        self.metadata.insert(metadata.grpc_method_name.clone(), Arc::new(metadata));
    }

    /// Resolve a concrete path and verb to method metadata plus bound path
    /// parameters. A verb mismatch is indistinguishable from no match.
    pub fn resolve(&self, request_path: &str, verb: &Method) -> Option<RouteMatch> {
        for entry in &self.entries {
            if entry.http_verb == *verb && path::matches(request_path, &entry.path_template) {
                let metadata = self.metadata.get(&entry.grpc_method)?.clone();
                let path_params = path::extract_path_params(&entry.path_template, request_path);
                return Some(RouteMatch { metadata, path_params });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
