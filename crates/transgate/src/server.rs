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

//! Transcoding dispatch and the HTTP server glue around it

use crate::auth::{AllowAll, AuthHook};
use crate::call::state::CallStateMachine;
use crate::call::{CallResponder, TranscodedResponse, TranscodingRequest, TranscodingResponse};
use crate::config::{BridgeConfig, BridgeMetrics};
use crate::error::{BridgeError, BridgeResult};
use crate::flow::read::MessageSource;
use crate::path::extract_query_params;
use crate::route::RouteTable;
use crate::runtime::HandlerRegistry;
use crate::status::HTTP2_CANCEL;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{CONTENT_LENGTH, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tonic::Status;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The HTTP body stream as seen by the read adapter.
///
/// Payloads arrive exclusively through the push path (`on_data`), so
/// fetch never has anything buffered to return.
struct HttpBodySource;

impl MessageSource for HttpBodySource {
    fn fetch(&mut self, _demand: u64) -> Vec<Bytes> {
        Vec::new()
    }

    fn pause(&mut self) {}
}

/// The transcoding dispatcher.
///
/// Holds the route and handler tables built at startup; every incoming
/// request is matched, transcoded into a call, and driven to completion.
/// Per-call failures never cross calls.
pub struct TranscodingServer {
    routes: RouteTable,
    handlers: HandlerRegistry,
    auth: Arc<dyn AuthHook>,
    config: BridgeConfig,
    metrics: Arc<RwLock<BridgeMetrics>>,
}

impl TranscodingServer {
    pub fn new(routes: RouteTable, handlers: HandlerRegistry, config: BridgeConfig) -> Self {
        info!("transcoding server created with {} routes and {} handlers", routes.len(), handlers.len());
        Self {
            routes,
            handlers,
            auth: Arc::new(AllowAll),
            config,
            metrics: Arc::new(RwLock::new(BridgeMetrics::default())),
        }
    }

    /// Replace the default allow-all authentication hook
    pub fn with_auth_hook(mut self, hook: Arc<dyn AuthHook>) -> Self {
        self.auth = hook;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Snapshot of the dispatch metrics
    pub async fn metrics(&self) -> BridgeMetrics {
        self.metrics.read().await.clone()
    }

    /// Health signal derived from the dispatch error rate
    pub async fn health_check(&self) -> BridgeResult<()> {
        let metrics = self.metrics().await;
        if metrics.total_requests > 100 && metrics.error_rate() > 0.1 {
            return Err(BridgeError::ServiceUnavailable {
                message: format!("bridge error rate too high: {:.2}%", metrics.error_rate() * 100.0),
            });
        }
        Ok(())
    }

    /// Dispatch one HTTP request through the bridge.
    ///
    /// Generic over the body so tests can drive it with `Full<Bytes>`
    /// while production traffic uses hyper's `Incoming`.
    pub async fn dispatch<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + Unpin,
        B::Error: std::fmt::Display,
    {
        let started = Instant::now();
        let request_id = Uuid::new_v4();

        let result = self.transcode(req, &request_id).await;
        let latency = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.write().await.record(result.is_ok(), latency);

        match result {
            Ok(response) => {
                debug!("[{}] transcoded request in {:.2}ms", request_id, latency);
                response
            }
            Err(err) => {
                error!("[{}] transcoding failed: {}", request_id, err);
                Response::from(err)
            }
        }
    }

    async fn transcode<B>(&self, req: Request<B>, request_id: &Uuid) -> BridgeResult<Response<Full<Bytes>>>
    where
        B: Body<Data = Bytes> + Send + Unpin,
        B::Error: std::fmt::Display,
    {
        let path = req.uri().path().to_string();
        let verb = req.method().clone();

        debug!("[{}] {} {}", request_id, verb, path);

        self.auth.authorize(&verb, &path, req.headers()).await?;

        // A verb mismatch on a matching template resolves exactly like an
        // unknown path.
        let Some(found) = self.routes.resolve(&path, &verb) else {
            return Err(BridgeError::NotFound {
                message: format!("no transcoding route for {} {}", verb, path),
            });
        };
        let metadata = found.metadata;

        let handler = self.handlers.lookup(&metadata.grpc_method_name).ok_or_else(|| BridgeError::InternalServerError {
            message: format!("route {} resolved to unregistered method {}", path, metadata.grpc_method_name),
        })?;

        let query_params = extract_query_params(req.uri().query().unwrap_or(""));

        let state = Arc::new(Mutex::new(CallStateMachine::new()));
        let mut request = TranscodingRequest::new(metadata.clone(), state.clone(), found.path_params, query_params);
        let request_completion = request.completion();
        let response = Arc::new(Mutex::new(TranscodingResponse::new(
            metadata.clone(),
            state.clone(),
            request_completion,
            self.config.write_high_water_mark,
        )?));
        let finished = response.lock().finished();
        let responder = CallResponder::new(response.clone());

        let mut listener = handler.start_call(metadata.clone(), responder);
        state.lock().begin_receiving()?;

        // Unary demand convention: one message plus one extra so a second
        // message surfaces as a protocol violation. Demand issued before
        // attach accumulates and is fetched exactly once.
        request.request_messages(2, listener.as_mut())?;
        request.attach(Box::new(HttpBodySource), listener.as_mut())?;
        let ready = response.lock().init_ready();
        if ready {
            listener.on_ready();
        }

        let mut body = req.into_body();
        let mut received = 0usize;
        loop {
            let Some(frame) = body.frame().await else { break };
            match frame {
                Ok(frame) => {
                    if let Ok(chunk) = frame.into_data() {
                        received += chunk.len();
                        if received > self.config.max_body_size {
                            return Err(BridgeError::PayloadTooLarge {
                                message: format!("request body exceeds {} bytes", self.config.max_body_size),
                            });
                        }
                        request.on_data(chunk)?;
                    }
                }
                Err(err) => {
                    warn!("[{}] request stream failed: {}", request_id, err);
                    request.on_reset(HTTP2_CANCEL, listener.as_mut());
                    response.lock().on_transport_reset();
                    return Err(BridgeError::GrpcError(Status::cancelled("client reset the request stream")));
                }
            }
        }

        request.on_end(listener.as_mut())?;

        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        match tokio::time::timeout(timeout, finished.wait()).await {
            Ok(Ok(())) => listener.on_complete(),
            Ok(Err(reason)) => {
                return Err(BridgeError::GrpcError(Status::cancelled(reason)));
            }
            Err(_) => {
                response.lock().cancel();
                listener.on_cancel();
                return Err(BridgeError::GatewayTimeout {
                    message: format!("call did not complete within {}s", self.config.request_timeout_secs),
                });
            }
        }

        let transcoded = response.lock().take_response();
        Ok(flush(transcoded))
    }
}

/// Build the final HTTP response from a finished call.
///
/// Transcoded responses are buffered with an explicit content-length, so
/// the trailer block is delivered in the header section.
fn flush(transcoded: TranscodedResponse) -> Response<Full<Bytes>> {
    let TranscodedResponse {
        status,
        headers,
        body,
        trailers,
        reset: _,
    } = transcoded;

    let content_length = HeaderValue::from(body.len() as u64);

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    for (name, value) in trailers.iter() {
        response.headers_mut().insert(name.clone(), value.clone());
    }
    response.headers_mut().insert(CONTENT_LENGTH, content_length);
    response
}

/// TCP accept loop serving a transcoding server over HTTP/1.1
pub struct BridgeServer {
    server: Arc<TranscodingServer>,
    bind_address: SocketAddr,
}

impl BridgeServer {
    pub fn new(server: TranscodingServer, bind_address: SocketAddr) -> Self {
        Self {
            server: Arc::new(server),
            bind_address,
        }
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Start the server
    pub async fn run(self) -> BridgeResult<()> {
        let listener = TcpListener::bind(self.bind_address).await.map_err(BridgeError::IoError)?;

        info!("transcoding bridge listening on http://{}", self.bind_address);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let server = self.server.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.dispatch(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{MethodKind, MethodMetadata, RouteTable};
    use crate::runtime::{CallHandler, CallListener};
    use crate::status::{GRPC_MESSAGE, GRPC_STATUS};
    use async_trait::async_trait;
    use hyper::{HeaderMap, Method, StatusCode};
    use serde_json::{Value, json};
    use tonic::Code;

    /// Unary handler that echoes the merged request message back
    struct EchoHandler;

    impl CallHandler for EchoHandler {
        fn start_call(&self, _method: Arc<MethodMetadata>, responder: CallResponder) -> Box<dyn CallListener> {
            Box::new(EchoListener { responder, last: None })
        }
    }

    struct EchoListener {
        responder: CallResponder,
        last: Option<Value>,
    }

    impl CallListener for EchoListener {
        fn on_message(&mut self, message: Value) {
            self.last = Some(message);
        }

        fn on_half_close(&mut self) {
            let message = self.last.take().expect("echo handler expects one request message");
            self.responder.end(&message).expect("echo response write");
        }

        fn on_ready(&mut self) {}
        fn on_cancel(&mut self) {}
        fn on_complete(&mut self) {}
    }

    /// Unary handler that closes OK without producing a message
    struct NoReplyHandler;

    impl CallHandler for NoReplyHandler {
        fn start_call(&self, _method: Arc<MethodMetadata>, responder: CallResponder) -> Box<dyn CallListener> {
            Box::new(NoReplyListener { responder })
        }
    }

    struct NoReplyListener {
        responder: CallResponder,
    }

    impl CallListener for NoReplyListener {
        fn on_message(&mut self, _message: Value) {}

        fn on_half_close(&mut self) {
            self.responder.close(Status::new(Code::Ok, ""), HeaderMap::new()).expect("close");
        }

        fn on_ready(&mut self) {}
        fn on_cancel(&mut self) {}
        fn on_complete(&mut self) {}
    }

    /// Handler that fails the call with NOT_FOUND
    struct FailingHandler;

    impl CallHandler for FailingHandler {
        fn start_call(&self, _method: Arc<MethodMetadata>, responder: CallResponder) -> Box<dyn CallListener> {
            Box::new(FailingListener { responder })
        }
    }

    struct FailingListener {
        responder: CallResponder,
    }

    impl CallListener for FailingListener {
        fn on_message(&mut self, _message: Value) {}

        fn on_half_close(&mut self) {
            self.responder.close(Status::not_found("item missing"), HeaderMap::new()).expect("close");
        }

        fn on_ready(&mut self) {}
        fn on_cancel(&mut self) {}
        fn on_complete(&mut self) {}
    }

    struct DenyAll;

    #[async_trait]
    impl AuthHook for DenyAll {
        async fn authorize(&self, _verb: &Method, _path: &str, _headers: &HeaderMap) -> BridgeResult<()> {
            Err(BridgeError::Unauthorized {
                message: "credentials required".to_string(),
            })
        }
    }

    fn echo_server() -> TranscodingServer {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut routes = RouteTable::new();
        routes.register(MethodMetadata::json(Method::POST, "/v1/items/{id}", "test.Items/Update", MethodKind::Unary));
        routes.register(MethodMetadata::json(Method::GET, "/v1/items/{id}", "test.Items/Get", MethodKind::Unary));

        let mut handlers = HandlerRegistry::new();
        handlers.register("test.Items/Update", Arc::new(EchoHandler));
        handlers.register("test.Items/Get", Arc::new(EchoHandler));

        TranscodingServer::new(routes, handlers, BridgeConfig::default())
    }

    fn request(method: Method, uri: &str, body: &'static [u8]) -> Request<Full<Bytes>> {
        Request::builder().method(method).uri(uri).body(Full::new(Bytes::from_static(body))).unwrap()
    }

    async fn body_json(response: Response<Full<Bytes>>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_merges_body_path_and_query_params() {
        let server = echo_server();
        let req = request(Method::POST, "/v1/items/42?filter=red", br#"{"note":"hi"}"#);

        let response = server.dispatch(req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "application/json");
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "0");
        assert!(response.headers().get(CONTENT_LENGTH).is_some());
        assert_eq!(body_json(response).await, json!({"note": "hi", "id": "42", "filter": "red"}));
    }

    #[tokio::test]
    async fn test_get_without_body_merges_path_params_only() {
        let server = echo_server();
        let req = request(Method::GET, "/v1/items/42", b"");

        let response = server.dispatch(req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"id": "42"}));
    }

    #[tokio::test]
    async fn test_query_overrides_path_parameter() {
        let server = echo_server();
        let req = request(Method::GET, "/v1/items/1?id=2", b"");

        let response = server.dispatch(req).await;
        assert_eq!(body_json(response).await, json!({"id": "2"}));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_with_empty_body() {
        let server = echo_server();
        let req = request(Method::GET, "/v2/unknown", b"");

        let response = server.dispatch(req).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_verb_mismatch_is_404() {
        let server = echo_server();
        let req = request(Method::DELETE, "/v1/items/42", b"");

        let response = server.dispatch(req).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_route_without_handler_is_500() {
        let mut routes = RouteTable::new();
        routes.register(MethodMetadata::json(Method::GET, "/v1/orphan", "test.Orphan/Get", MethodKind::Unary));
        let server = TranscodingServer::new(routes, HandlerRegistry::new(), BridgeConfig::default());

        let response = server.dispatch(request(Method::GET, "/v1/orphan", b"")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_malformed_json_body_is_422_with_empty_body() {
        let server = echo_server();
        let req = request(Method::POST, "/v1/items/42", b"{oops");

        let response = server.dispatch(req).await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_unary_handler_without_message_yields_503() {
        let mut routes = RouteTable::new();
        routes.register(MethodMetadata::json(Method::GET, "/v1/empty", "test.Empty/Get", MethodKind::Unary));
        let mut handlers = HandlerRegistry::new();
        handlers.register("test.Empty/Get", Arc::new(NoReplyHandler));
        let server = TranscodingServer::new(routes, handlers, BridgeConfig::default());

        let response = server.dispatch(request(Method::GET, "/v1/empty", b"")).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "14");
    }

    #[tokio::test]
    async fn test_handler_failure_maps_status_and_message() {
        let mut routes = RouteTable::new();
        routes.register(MethodMetadata::json(Method::GET, "/v1/missing", "test.Missing/Get", MethodKind::Unary));
        let mut handlers = HandlerRegistry::new();
        handlers.register("test.Missing/Get", Arc::new(FailingHandler));
        let server = TranscodingServer::new(routes, handlers, BridgeConfig::default());

        let response = server.dispatch(request(Method::GET, "/v1/missing", b"")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(GRPC_STATUS).unwrap(), "5");
        assert_eq!(response.headers().get(GRPC_MESSAGE).unwrap(), "item missing");
    }

    #[tokio::test]
    async fn test_auth_hook_rejects_before_routing() {
        let server = echo_server().with_auth_hook(Arc::new(DenyAll));

        let response = server.dispatch(request(Method::GET, "/v1/items/42", b"")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let mut routes = RouteTable::new();
        routes.register(MethodMetadata::json(Method::POST, "/v1/items/{id}", "test.Items/Update", MethodKind::Unary));
        let mut handlers = HandlerRegistry::new();
        handlers.register("test.Items/Update", Arc::new(EchoHandler));
        let config = BridgeConfig {
            max_body_size: 8,
            ..BridgeConfig::default()
        };
        let server = TranscodingServer::new(routes, handlers, config);

        let response = server.dispatch(request(Method::POST, "/v1/items/42", br#"{"note":"far too large"}"#)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_metrics_record_success_and_failure() {
        let server = echo_server();

        server.dispatch(request(Method::GET, "/v1/items/42", b"")).await;
        server.dispatch(request(Method::GET, "/v2/unknown", b"")).await;

        let metrics = server.metrics().await;
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_health_check_passes_on_fresh_server() {
        let server = echo_server();
        assert!(server.health_check().await.is_ok());
    }
}
