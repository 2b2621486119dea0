//! Mock transports: how intercepted consumer requests reach the
//! dispatcher.
//!
//! The HTTP transport runs a real hyper server so any HTTP client in the
//! consumer's test can talk to the mock; the direct transport hands
//! requests straight to the dispatcher for in-process tests. Selection is
//! driven by the `PACT_USE_MOCKING_SERVER` environment variable or the
//! pact builder.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::{Dispatcher, MockError, MockRequest, MockResponse};
use crate::interaction::Interaction;

/// The transport contract the mock core relies on: register expected
/// calls, receive actual calls, drain what was received.
#[allow(async_fn_in_trait)]
pub trait MockTransport {
    fn register(&self, interaction: Interaction);
    async fn start(&mut self) -> Result<(), MockError>;
    fn stop(&mut self);
    fn base_url(&self) -> String;
    fn received_requests(&self) -> Vec<MockRequest>;
}

/// In-process transport: the test hands requests to the dispatcher itself.
/// The advertised URL mirrors the mock's nominal address so generated
/// pacts look the same either way.
pub struct DirectTransport {
    dispatcher: Arc<Dispatcher>,
    host: String,
    port: u16,
}

impl DirectTransport {
    pub fn new(dispatcher: Arc<Dispatcher>, host: impl Into<String>, port: u16) -> Self {
        DirectTransport {
            dispatcher,
            host: host.into(),
            port,
        }
    }

    pub fn dispatch(&self, request: MockRequest) -> MockResponse {
        self.dispatcher.dispatch(request)
    }
}

impl MockTransport for DirectTransport {
    fn register(&self, interaction: Interaction) {
        self.dispatcher.register(interaction);
    }

    async fn start(&mut self) -> Result<(), MockError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn received_requests(&self) -> Vec<MockRequest> {
        self.dispatcher.received_requests()
    }
}

/// A real HTTP server transport backed by hyper. Each connection is served
/// on its own task; the dispatcher's mutex serialises interaction state.
pub struct HttpMockTransport {
    dispatcher: Arc<Dispatcher>,
    host: String,
    port: u16,
    bound: Option<SocketAddr>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl HttpMockTransport {
    pub fn new(dispatcher: Arc<Dispatcher>, host: impl Into<String>, port: u16) -> Self {
        HttpMockTransport {
            dispatcher,
            host: host.into(),
            port,
            bound: None,
            shutdown_tx: None,
        }
    }

    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound
    }
}

impl MockTransport for HttpMockTransport {
    fn register(&self, interaction: Interaction) {
        self.dispatcher.register(interaction);
    }

    async fn start(&mut self) -> Result<(), MockError> {
        if self.bound.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| MockError::Transport(format!("failed to bind mock server: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| MockError::Transport(format!("failed to read bound address: {e}")))?;
        self.bound = Some(addr);
        info!("mock server listening on {addr}");

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        let dispatcher = Arc::clone(&self.dispatcher);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let dispatcher = Arc::clone(&dispatcher);
                                tokio::spawn(async move {
                                    let io = TokioIo::new(stream);
                                    let service = service_fn(move |req| {
                                        let dispatcher = Arc::clone(&dispatcher);
                                        async move { handle_mock_request(req, dispatcher).await }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("mock connection error: {e}");
                                    }
                                });
                            }
                            Err(e) => {
                                error!("mock server accept error: {e}");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("mock server on {addr} shutting down");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.bound = None;
    }

    fn base_url(&self) -> String {
        match self.bound {
            Some(addr) => format!("http://{}:{}", self.host, addr.port()),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    fn received_requests(&self) -> Vec<MockRequest> {
        self.dispatcher.received_requests()
    }
}

async fn handle_mock_request(
    req: Request<Incoming>,
    dispatcher: Arc<Dispatcher>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let uri = req.uri().clone();
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();
    let body = match req.into_body().collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            if bytes.is_empty() {
                None
            } else {
                Some(bytes.to_vec())
            }
        }
        Err(_) => None,
    };

    let mock_request = MockRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().unwrap_or("").to_string(),
        headers,
        body,
    };
    let mock_response = dispatcher.dispatch(mock_request);
    Ok(build_response(mock_response))
}

fn build_response(response: MockResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let body = Full::new(Bytes::from(response.body.unwrap_or_default()));
    builder.body(body).unwrap_or_else(|e| {
        error!("failed to build mock response: {e}");
        let mut fallback = Response::new(Full::new(Bytes::new()));
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// The transport a session runs with.
pub enum Transport {
    Direct(DirectTransport),
    Http(HttpMockTransport),
}

impl MockTransport for Transport {
    fn register(&self, interaction: Interaction) {
        match self {
            Transport::Direct(t) => t.register(interaction),
            Transport::Http(t) => t.register(interaction),
        }
    }

    async fn start(&mut self) -> Result<(), MockError> {
        match self {
            Transport::Direct(t) => t.start().await,
            Transport::Http(t) => t.start().await,
        }
    }

    fn stop(&mut self) {
        match self {
            Transport::Direct(t) => t.stop(),
            Transport::Http(t) => t.stop(),
        }
    }

    fn base_url(&self) -> String {
        match self {
            Transport::Direct(t) => t.base_url(),
            Transport::Http(t) => t.base_url(),
        }
    }

    fn received_requests(&self) -> Vec<MockRequest> {
        match self {
            Transport::Direct(t) => t.received_requests(),
            Transport::Http(t) => t.received_requests(),
        }
    }
}
