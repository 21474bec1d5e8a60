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

//! Call-scoped response adapter translating gRPC messages, status and
//! trailers back into the HTTP exchange

use crate::call::Completion;
use crate::call::state::CallStateMachine;
use crate::error::{BridgeError, BridgeResult};
use crate::flow::write::{MessageSink, WriteStreamAdapter};
use crate::route::{MethodKind, MethodMetadata};
use crate::status::{GRPC_MESSAGE, GRPC_STATUS, HTTP2_CANCEL, encode_grpc_message, grpc_to_http_status};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use hyper::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tonic::{Code, Status};
use tracing::debug;

/// The buffered HTTP response under construction for one call.
///
/// Transcoded responses carry an explicit content-length, so payload
/// bytes accumulate here until the call closes and the dispatcher flushes
/// the final response.
pub struct ResponseBuffer {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub trailers: HeaderMap,
    pub head_sent: bool,
    pub ended: bool,
    pub resets: Vec<u32>,
    high_water_mark: usize,
}

impl ResponseBuffer {
    fn new(high_water_mark: usize) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            trailers: HeaderMap::new(),
            head_sent: false,
            ended: false,
            resets: Vec::new(),
            high_water_mark,
        }
    }
}

/// Payload sink over the shared response buffer
struct BufferSink {
    buffer: Arc<Mutex<ResponseBuffer>>,
}

impl MessageSink for BufferSink {
    fn write(&mut self, payload: Bytes, end_of_stream: bool) -> BridgeResult<()> {
        let mut buffer = self.buffer.lock();
        buffer.body.extend_from_slice(&payload);
        if end_of_stream {
            buffer.ended = true;
        }
        Ok(())
    }

    fn write_queue_full(&self) -> bool {
        let buffer = self.buffer.lock();
        buffer.body.len() >= buffer.high_water_mark
    }

    fn reset(&mut self, code: u32) {
        self.buffer.lock().resets.push(code);
    }
}

/// The finished HTTP rendition of a transcoded call.
///
/// Headers and trailers stay separate so the trailers-only branch remains
/// observable; the dispatcher merges the trailer block into the header
/// section at flush time because buffered JSON responses cannot carry
/// HTTP trailers.
#[derive(Debug)]
pub struct TranscodedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub trailers: HeaderMap,
    pub reset: Option<u32>,
}

/// The response half of a transcoded call.
pub struct TranscodingResponse {
    method: Arc<MethodMetadata>,
    state: Arc<Mutex<CallStateMachine>>,
    buffer: Arc<Mutex<ResponseBuffer>>,
    write: WriteStreamAdapter,
    status: Status,
    user_headers: HeaderMap,
    headers_sent: bool,
    trailers_sent: bool,
    cancelled: bool,
    messages_sent: u64,
    request_completion: Completion,
    finished: Completion,
}

impl TranscodingResponse {
    pub fn new(
        method: Arc<MethodMetadata>,
        state: Arc<Mutex<CallStateMachine>>,
        request_completion: Completion,
        high_water_mark: usize,
    ) -> BridgeResult<Self> {
        let buffer = Arc::new(Mutex::new(ResponseBuffer::new(high_water_mark)));
        let mut write = WriteStreamAdapter::new();
        write.init(Box::new(BufferSink { buffer: buffer.clone() }), method.response_codec.clone())?;

        Ok(Self {
            method,
            state,
            buffer,
            write,
            status: Status::new(Code::Ok, ""),
            user_headers: HeaderMap::new(),
            headers_sent: false,
            trailers_sent: false,
            cancelled: false,
            messages_sent: 0,
            request_completion,
            finished: Completion::new(),
        })
    }

    /// Completion that resolves when the call fully terminates
    pub fn finished(&self) -> Completion {
        self.finished.clone()
    }

    /// Final gRPC status recorded for the call
    pub fn grpc_status(&self) -> &Status {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        self.write.is_ready()
    }

    /// Initial readiness check after the sink is attached. Returns true
    /// exactly when the listener's ready callback should fire.
    pub fn init_ready(&mut self) -> bool {
        self.write.check_ready()
    }

    /// Drain notification from the sink; same exactly-once contract
    pub fn on_drain(&mut self) -> bool {
        self.write.check_ready()
    }

    /// Set a user header to be sent with the response head
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> BridgeResult<()> {
        if self.headers_sent {
            return Err(BridgeError::IllegalState {
                message: "headers already sent".to_string(),
            });
        }
        self.user_headers.insert(name, value);
        Ok(())
    }

    /// Write one response message
    pub fn write_message(&mut self, message: &Value) -> BridgeResult<()> {
        self.write_internal(message, false)
    }

    /// Write the final response message and close with OK status
    pub fn end_with_message(&mut self, message: &Value) -> BridgeResult<()> {
        self.write_internal(message, true)?;
        self.close(Status::new(Code::Ok, ""), HeaderMap::new())
    }

    fn write_internal(&mut self, message: &Value, end_of_stream: bool) -> BridgeResult<()> {
        self.ensure_writable()?;

        // Encode before the head goes out so an encode failure never
        // leaves half-sent headers behind.
        let payload = self.method.response_codec.encode(message)?;

        if !self.headers_sent {
            self.send_head(StatusCode::OK, None)?;
        }
        self.write.write_raw(payload, end_of_stream)?;
        self.messages_sent += 1;
        Ok(())
    }

    /// Close the call with a final status and trailer metadata.
    ///
    /// `grpc-status` is always set (default 0). `grpc-message` is
    /// percent-encoded and present only for non-OK status. When no
    /// headers were sent yet the trailer block folds into the header
    /// section (trailers-only).
    pub fn close(&mut self, status: Status, trailers: HeaderMap) -> BridgeResult<()> {
        self.ensure_writable()?;
        self.state.lock().begin_completing()?;
        self.status = status;

        // A unary method that promised exactly one message and produced
        // none under OK status is a handler defect, surfaced as 503.
        if self.method.kind == MethodKind::Unary && self.status.code() == Code::Ok && self.messages_sent == 0 {
            debug!("unary method {} closed OK without a response message", self.method.grpc_method_name);
            let mut block = HeaderMap::new();
            block.insert(GRPC_STATUS, HeaderValue::from(Code::Unavailable as i32));
            if let Ok(value) = HeaderValue::from_str(&encode_grpc_message("unary call produced no response message")) {
                block.insert(GRPC_MESSAGE, value);
            }
            self.send_head(StatusCode::SERVICE_UNAVAILABLE, Some(&block))?;
            return self.finish_close();
        }

        let mut block = trailers;
        block.insert(GRPC_STATUS, HeaderValue::from(self.status.code() as i32));
        if self.status.code() == Code::Ok {
            block.remove(GRPC_MESSAGE);
        } else if !self.status.message().is_empty() {
            if let Ok(value) = HeaderValue::from_str(&encode_grpc_message(self.status.message())) {
                block.insert(GRPC_MESSAGE, value);
            }
        }

        if self.headers_sent {
            self.buffer.lock().trailers = block;
        } else {
            // Trailers-only: the status and trailer block travel in the
            // header section, since no response frame was ever written.
            let http_status = grpc_to_http_status(self.status.code());
            self.send_head(http_status, Some(&block))?;
        }

        self.finish_close()
    }

    fn finish_close(&mut self) -> BridgeResult<()> {
        self.buffer.lock().ended = true;
        self.trailers_sent = true;
        self.state.lock().close()?;
        self.finished.complete(Ok(()));
        Ok(())
    }

    /// Cancel the call. Idempotent: at most one transport reset is ever
    /// issued. A call whose request stream ended and whose trailers went
    /// out is already terminating naturally and is left alone.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;

        let request_ended = self.request_completion.is_complete();
        if !request_ended || !self.trailers_sent {
            self.write.reset(HTTP2_CANCEL);
            self.state.lock().cancel();
            self.finished.complete(Err("call cancelled".to_string()));
        }
    }

    /// The transport reset the call from the remote side; converge on the
    /// cancelled terminal state without issuing another reset.
    pub fn on_transport_reset(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.state.lock().cancel();
        self.finished.complete(Err("transport reset".to_string()));
    }

    /// Extract the finished HTTP rendition of this call
    pub fn take_response(&mut self) -> TranscodedResponse {
        let mut buffer = self.buffer.lock();
        TranscodedResponse {
            status: buffer.status,
            headers: std::mem::take(&mut buffer.headers),
            body: Bytes::from(std::mem::take(&mut buffer.body)),
            trailers: std::mem::take(&mut buffer.trailers),
            reset: buffer.resets.first().copied(),
        }
    }

    fn ensure_writable(&self) -> BridgeResult<()> {
        if self.cancelled {
            return Err(BridgeError::IllegalState {
                message: "call already cancelled".to_string(),
            });
        }
        if self.trailers_sent {
            return Err(BridgeError::IllegalState {
                message: "trailers already sent".to_string(),
            });
        }
        if !self.state.lock().can_send() {
            return Err(BridgeError::IllegalState {
                message: "call reached a terminal state".to_string(),
            });
        }
        Ok(())
    }

    /// Headers may be sent at most once; the first response frame or the
    /// trailers-only close triggers them.
    fn send_head(&mut self, status: StatusCode, extra: Option<&HeaderMap>) -> BridgeResult<()> {
        if self.headers_sent {
            return Err(BridgeError::IllegalState {
                message: "headers already sent".to_string(),
            });
        }

        let mut buffer = self.buffer.lock();
        buffer.status = status;
        buffer.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in self.user_headers.iter() {
            buffer.headers.insert(name.clone(), value.clone());
        }
        if let Some(extra) = extra {
            for (name, value) in extra.iter() {
                buffer.headers.insert(name.clone(), value.clone());
            }
        }
        buffer.head_sent = true;
        drop(buffer);

        self.headers_sent = true;
        Ok(())
    }
}

/// Clonable handle a handler writes its response through.
///
/// The handle is constructed with the call and serializes all access to
/// the call's response state, so handler continuations may run from any
/// task.
#[derive(Clone)]
pub struct CallResponder {
    inner: Arc<Mutex<TranscodingResponse>>,
}

impl CallResponder {
    pub(crate) fn new(inner: Arc<Mutex<TranscodingResponse>>) -> Self {
        Self { inner }
    }

    pub fn write(&self, message: &Value) -> BridgeResult<()> {
        self.inner.lock().write_message(message)
    }

    pub fn end(&self, message: &Value) -> BridgeResult<()> {
        self.inner.lock().end_with_message(message)
    }

    pub fn close(&self, status: Status, trailers: HeaderMap) -> BridgeResult<()> {
        self.inner.lock().close(status, trailers)
    }

    pub fn cancel(&self) {
        self.inner.lock().cancel()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().is_ready()
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) -> BridgeResult<()> {
        self.inner.lock().set_header(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;
    use serde_json::json;

    fn response_for(kind: MethodKind, request_completion: Completion) -> TranscodingResponse {
        let metadata = Arc::new(MethodMetadata::json(Method::POST, "/v1/items/{id}", "test.Items/Get", kind));
        let state = Arc::new(Mutex::new(CallStateMachine::new()));
        state.lock().begin_receiving().unwrap();
        TranscodingResponse::new(metadata, state, request_completion, 1024 * 1024).unwrap()
    }

    fn finished_request() -> Completion {
        let completion = Completion::new();
        completion.complete(Ok(()));
        completion
    }

    #[test]
    fn test_first_write_sends_headers_once() {
        let mut response = response_for(MethodKind::ServerStreaming, Completion::new());

        response.write_message(&json!({"n": 1})).unwrap();
        response.write_message(&json!({"n": 2})).unwrap();

        let buffer = response.buffer.lock();
        assert!(buffer.head_sent);
        assert_eq!(buffer.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(buffer.body, br#"{"n":1}{"n":2}"#);
    }

    #[test]
    fn test_default_status_is_ok() {
        let response = response_for(MethodKind::Unary, Completion::new());
        assert_eq!(response.grpc_status().code(), Code::Ok);
    }

    #[test]
    fn test_ok_close_sets_grpc_status_zero_in_trailers() {
        let mut response = response_for(MethodKind::Unary, finished_request());

        response.end_with_message(&json!({"id": "42"})).unwrap();

        let transcoded = response.take_response();
        assert_eq!(transcoded.status, StatusCode::OK);
        assert_eq!(transcoded.trailers.get(GRPC_STATUS).unwrap(), "0");
        assert!(transcoded.trailers.get(GRPC_MESSAGE).is_none());
        assert_eq!(transcoded.body.as_ref(), br#"{"id":"42"}"#);
    }

    #[test]
    fn test_error_close_before_headers_is_trailers_only() {
        let mut response = response_for(MethodKind::ServerStreaming, finished_request());

        response.close(Status::not_found("item missing"), HeaderMap::new()).unwrap();

        let transcoded = response.take_response();
        assert_eq!(transcoded.status, StatusCode::NOT_FOUND);
        // Status travels in the header section, not a trailer block.
        assert_eq!(transcoded.headers.get(GRPC_STATUS).unwrap(), "5");
        assert_eq!(transcoded.headers.get(GRPC_MESSAGE).unwrap(), "item missing");
        assert!(transcoded.trailers.is_empty());
        assert!(transcoded.body.is_empty());
    }

    #[test]
    fn test_grpc_message_is_percent_encoded() {
        let mut response = response_for(MethodKind::ServerStreaming, finished_request());

        response.close(Status::internal("50% failure\n"), HeaderMap::new()).unwrap();

        let transcoded = response.take_response();
        assert_eq!(transcoded.headers.get(GRPC_MESSAGE).unwrap(), "50%25 failure%0A");
    }

    #[test]
    fn test_unary_ok_close_without_message_becomes_503() {
        let mut response = response_for(MethodKind::Unary, finished_request());

        response.close(Status::new(Code::Ok, ""), HeaderMap::new()).unwrap();

        let transcoded = response.take_response();
        assert_eq!(transcoded.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(transcoded.headers.get(GRPC_STATUS).unwrap(), "14");
    }

    #[test]
    fn test_streaming_ok_close_without_message_stays_ok() {
        let mut response = response_for(MethodKind::ServerStreaming, finished_request());

        response.close(Status::new(Code::Ok, ""), HeaderMap::new()).unwrap();

        let transcoded = response.take_response();
        assert_eq!(transcoded.status, StatusCode::OK);
        assert_eq!(transcoded.headers.get(GRPC_STATUS).unwrap(), "0");
    }

    #[test]
    fn test_user_trailers_survive_close() {
        let mut response = response_for(MethodKind::Unary, finished_request());
        response.write_message(&json!({"id": "42"})).unwrap();

        let mut trailers = HeaderMap::new();
        trailers.insert(HeaderName::from_static("x-checksum"), HeaderValue::from_static("abc"));
        response.close(Status::new(Code::Ok, ""), trailers).unwrap();

        let transcoded = response.take_response();
        assert_eq!(transcoded.trailers.get("x-checksum").unwrap(), "abc");
        assert_eq!(transcoded.trailers.get(GRPC_STATUS).unwrap(), "0");
    }

    #[test]
    fn test_cancel_is_idempotent_with_a_single_reset() {
        let mut response = response_for(MethodKind::Unary, Completion::new());

        response.cancel();
        response.cancel();

        assert_eq!(response.buffer.lock().resets.len(), 1);
        let transcoded = response.take_response();
        assert_eq!(transcoded.reset, Some(HTTP2_CANCEL));
    }

    #[test]
    fn test_cancel_after_natural_completion_is_a_no_op() {
        let mut response = response_for(MethodKind::Unary, finished_request());
        response.end_with_message(&json!({"id": "42"})).unwrap();

        response.cancel();

        let transcoded = response.take_response();
        assert_eq!(transcoded.reset, None);
    }

    #[test]
    fn test_write_after_close_is_an_illegal_state() {
        let mut response = response_for(MethodKind::Unary, finished_request());
        response.end_with_message(&json!({"id": "42"})).unwrap();

        let err = response.write_message(&json!({"more": true})).unwrap_err();
        assert!(matches!(err, BridgeError::IllegalState { .. }));
    }

    #[test]
    fn test_write_after_cancel_is_an_illegal_state() {
        let mut response = response_for(MethodKind::Unary, Completion::new());
        response.cancel();

        let err = response.write_message(&json!({"id": "42"})).unwrap_err();
        assert!(matches!(err, BridgeError::IllegalState { .. }));
    }

    #[test]
    fn test_double_close_is_an_illegal_state() {
        let mut response = response_for(MethodKind::ServerStreaming, finished_request());
        response.close(Status::new(Code::Ok, ""), HeaderMap::new()).unwrap();

        let err = response.close(Status::new(Code::Ok, ""), HeaderMap::new()).unwrap_err();
        assert!(matches!(err, BridgeError::IllegalState { .. }));
    }

    #[test]
    fn test_set_header_travels_with_head() {
        let mut response = response_for(MethodKind::Unary, finished_request());
        response.set_header(HeaderName::from_static("x-request-id"), HeaderValue::from_static("abc-123")).unwrap();

        response.end_with_message(&json!({"id": "42"})).unwrap();

        let transcoded = response.take_response();
        assert_eq!(transcoded.headers.get("x-request-id").unwrap(), "abc-123");
    }

    #[test]
    fn test_set_header_after_head_is_rejected() {
        let mut response = response_for(MethodKind::Unary, finished_request());
        response.write_message(&json!({"id": "42"})).unwrap();

        let err = response.set_header(HeaderName::from_static("x-late"), HeaderValue::from_static("no")).unwrap_err();
        assert!(matches!(err, BridgeError::IllegalState { .. }));
    }

    #[test]
    fn test_initial_ready_fires_exactly_once() {
        let mut response = response_for(MethodKind::Unary, Completion::new());

        assert!(response.init_ready());
        assert!(response.is_ready());
        assert!(!response.init_ready());
        assert!(!response.on_drain());
    }
}
