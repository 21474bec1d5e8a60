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

//! Call-scoped request adapter over one HTTP exchange

use crate::call::Completion;
use crate::call::state::CallStateMachine;
use crate::error::{BridgeError, BridgeResult};
use crate::flow::read::{MessageSource, ReadEvent, ReadStreamAdapter};
use crate::merge::merge_parameters;
use crate::route::MethodMetadata;
use crate::runtime::CallListener;
use crate::status::reset_code_to_grpc;
use hyper::body::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tonic::Code;
use tracing::debug;

/// The request half of a transcoded call.
///
/// Buffers incoming HTTP body chunks and, at end of body, merges path and
/// query parameters into the (possibly empty) JSON body, pushing the
/// result through the read adapter as the single identity-framed request
/// message followed by half-close. Completion resolves exactly once, on
/// normal end of stream or on failure.
pub struct TranscodingRequest {
    method: Arc<MethodMetadata>,
    state: Arc<Mutex<CallStateMachine>>,
    read: ReadStreamAdapter,
    path_params: HashMap<String, String>,
    query_params: HashMap<String, String>,
    body: Vec<u8>,
    bytes_read: usize,
    completion: Completion,
    failed: bool,
}

impl TranscodingRequest {
    pub fn new(
        method: Arc<MethodMetadata>,
        state: Arc<Mutex<CallStateMachine>>,
        path_params: HashMap<String, String>,
        query_params: HashMap<String, String>,
    ) -> Self {
        Self {
            method,
            state,
            read: ReadStreamAdapter::new(),
            path_params,
            query_params,
            body: Vec::new(),
            bytes_read: 0,
            completion: Completion::new(),
            failed: false,
        }
    }

    /// The single end-of-stream/error completion for this request
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Issue message demand on behalf of the call runtime
    pub fn request_messages(&mut self, n: u64, listener: &mut dyn CallListener) -> BridgeResult<()> {
        let events = self.read.request(n)?;
        self.dispatch_events(events, listener)
    }

    /// Attach the body source; accumulated demand is fetched here
    pub fn attach(&mut self, source: Box<dyn MessageSource>, listener: &mut dyn CallListener) -> BridgeResult<()> {
        let events = self.read.init(source, self.method.request_codec.clone())?;
        self.dispatch_events(events, listener)
    }

    /// Buffer one incoming HTTP body chunk
    pub fn on_data(&mut self, chunk: Bytes) -> BridgeResult<()> {
        if self.failed {
            return Ok(());
        }
        if !self.state.lock().can_send() {
            return Ok(());
        }
        self.bytes_read += chunk.len();
        self.body.extend_from_slice(&chunk);
        Ok(())
    }

    /// End of the HTTP body: merge, decode, deliver, half-close.
    ///
    /// A malformed body aborts the call before any listener event fires.
    pub fn on_end(&mut self, listener: &mut dyn CallListener) -> BridgeResult<()> {
        if self.failed {
            return Ok(());
        }

        let body = if self.bytes_read == 0 { None } else { Some(self.body.as_slice()) };
        let merged = match merge_parameters(&self.path_params, &self.query_params, body) {
            Ok(merged) => merged,
            Err(err) => return Err(self.fail(err)),
        };

        debug!("merged request message for {}: {} path / {} query params", self.method.grpc_method_name, self.path_params.len(), self.query_params.len());

        let payload = match serde_json::to_vec(&merged) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => return Err(self.fail(BridgeError::SerdeJsonError(err))),
        };

        let mut events = match self.read.on_data(payload) {
            Ok(events) => events,
            Err(err) => return Err(self.fail(err)),
        };
        match self.read.on_end() {
            Ok(more) => events.extend(more),
            Err(err) => return Err(self.fail(err)),
        }

        // The body ended normally; the completion resolves before the
        // half-close reaches the listener so a handler cancelling from
        // inside its close path sees the stream as ended.
        self.completion.complete(Ok(()));
        self.dispatch_events(events, listener)
    }

    /// A transport-level stream reset. The numeric code maps to a gRPC
    /// category; a cancellation on a live call fires the listener's
    /// cancel callback.
    pub fn on_reset(&mut self, code: u32, listener: &mut dyn CallListener) {
        let grpc_code = reset_code_to_grpc(code);
        self.failed = true;
        self.completion.complete(Err(format!("transport reset {:#x} mapped to {:?}", code, grpc_code)));

        if grpc_code == Code::Cancelled {
            let was_live = {
                let mut state = self.state.lock();
                let live = !state.is_terminal();
                state.cancel();
                live
            };
            if was_live {
                listener.on_cancel();
            }
        }
    }

    fn fail(&mut self, err: BridgeError) -> BridgeError {
        self.failed = true;
        self.completion.complete(Err(err.to_string()));
        err
    }

    fn dispatch_events(&mut self, events: Vec<ReadEvent>, listener: &mut dyn CallListener) -> BridgeResult<()> {
        for event in events {
            match event {
                ReadEvent::Message(message) => listener.on_message(message),
                ReadEvent::End => {
                    self.state.lock().half_close()?;
                    listener.on_half_close();
                }
            }
        }
        Ok(())
    }
}
