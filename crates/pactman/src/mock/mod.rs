//! Consumer-side mocking: the dispatcher that matches incoming requests
//! against registered interactions, the session that scopes a mock's
//! lifetime, and the teardown verification.

pub mod builder;
pub mod transport;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::interaction::{header_lookup, parse_query_string, value_to_string, Interaction};
use crate::pact_file::{PactFileError, PactWriter};
use crate::rules::engine::{json_content_type, match_request, ActualRequest, Mismatch};

pub use transport::{HttpMockTransport, MockTransport, Transport};

/// A request as received by the mock transport.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// The response the mock returns to the consumer under test.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl MockResponse {
    fn failure(message: &str) -> MockResponse {
        MockResponse {
            status: 500,
            headers: vec![(
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: Some(message.as_bytes().to_vec()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MockError {
    #[error("mock transport: {0}")]
    Transport(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    PactFile(#[from] PactFileError),
}

/// Raised at teardown when interactions went unused or requests mismatched.
#[derive(Debug, Error)]
#[error("{}", self.render())]
pub struct MockVerifyError {
    /// Descriptions of interactions that were registered but never
    /// consumed.
    pub unused: Vec<String>,
    /// Failures recorded while the mock was serving requests.
    pub failures: Vec<String>,
}

impl MockVerifyError {
    fn render(&self) -> String {
        let mut lines = Vec::new();
        for description in &self.unused {
            lines.push(format!("interaction {description:?} was never used"));
        }
        lines.extend(self.failures.iter().cloned());
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InteractionState {
    Registered,
    Consumed,
}

struct RegisteredInteraction {
    interaction: Interaction,
    state: InteractionState,
}

#[derive(Default)]
struct DispatchState {
    interactions: Vec<RegisteredInteraction>,
    failures: Vec<String>,
    received: Vec<MockRequest>,
}

/// Owns the active interactions of the current test and routes incoming
/// mock requests to them.
///
/// The `Registered → Consumed` transition is the only mutable state per
/// request; a single mutex guards it so the HTTP transport can serve
/// requests from its accept task.
pub struct Dispatcher {
    state: Mutex<DispatchState>,
    writer: Option<Arc<PactWriter>>,
}

impl Dispatcher {
    pub fn new(writer: Option<Arc<PactWriter>>) -> Self {
        Dispatcher {
            state: Mutex::new(DispatchState::default()),
            writer,
        }
    }

    /// Register a sealed interaction; it may be consumed exactly once.
    pub fn register(&self, interaction: Interaction) {
        debug!("registering interaction {:?}", interaction.description);
        self.state.lock().interactions.push(RegisteredInteraction {
            interaction,
            state: InteractionState::Registered,
        });
    }

    pub fn received_requests(&self) -> Vec<MockRequest> {
        self.state.lock().received.clone()
    }

    /// Match an incoming request against the registered interactions, in
    /// declaration order. The first fully-matching registered interaction
    /// is consumed and its declared response returned; anything else is a
    /// recorded failure and a 500 to the caller.
    pub fn dispatch(&self, request: MockRequest) -> MockResponse {
        let actual = ActualRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            query: parse_query_string(&request.query),
            headers: request.headers.clone(),
            body: request.body.clone(),
        };
        let mut state = self.state.lock();
        state.received.push(request.clone());

        // score every interaction so the best candidate can be reported
        // when nothing matches
        let mut results: Vec<(usize, Vec<Mismatch>)> = Vec::new();
        for (index, registered) in state.interactions.iter().enumerate() {
            let interaction = &registered.interaction;
            match match_request(&interaction.request, &actual, interaction.spec_version) {
                Ok(mismatches) => results.push((index, mismatches)),
                Err(error) => {
                    let message = format!(
                        "matching aborted for interaction {:?}: {error}",
                        interaction.description
                    );
                    warn!("{message}");
                    state.failures.push(message.clone());
                    return MockResponse::failure(&message);
                }
            }
        }

        let winner = results
            .iter()
            .find(|(index, mismatches)| {
                mismatches.is_empty()
                    && state.interactions[*index].state == InteractionState::Registered
            })
            .map(|(index, _)| *index);
        if let Some(index) = winner {
            state.interactions[index].state = InteractionState::Consumed;
            let interaction = state.interactions[index].interaction.clone();
            debug!("request matched interaction {:?}", interaction.description);
            if let Some(writer) = &self.writer {
                if let Err(error) = writer.write_interaction(&interaction) {
                    let message = format!("failed to record pact: {error}");
                    warn!("{message}");
                    state.failures.push(message.clone());
                    return MockResponse::failure(&message);
                }
            }
            return respond_for_interaction(&interaction);
        }

        if let Some((index, _)) = results.iter().find(|(index, mismatches)| {
            mismatches.is_empty()
                && state.interactions[*index].state == InteractionState::Consumed
        }) {
            let description = &state.interactions[*index].interaction.description;
            let message = format!("duplicate call to interaction {description:?}");
            warn!("{message}");
            state.failures.push(message.clone());
            return MockResponse::failure(&message);
        }

        let mut message = format!(
            "request {} {} did not match any registered interaction",
            request.method, request.path
        );
        if let Some((index, mismatches)) = results.iter().min_by_key(|(_, m)| m.len()) {
            message.push_str(&format!(
                "; closest was {:?}:",
                state.interactions[*index].interaction.description
            ));
            for mismatch in mismatches {
                message.push_str(&format!("\n  {mismatch}"));
            }
        }
        warn!("{message}");
        state.failures.push(message.clone());
        MockResponse::failure(&message)
    }

    /// Teardown check: every registered interaction consumed and no
    /// failures recorded. The interaction list is cleared either way so the
    /// mock can be reused by the next test.
    pub fn verify(&self) -> Result<(), MockVerifyError> {
        let mut state = self.state.lock();
        let unused: Vec<String> = state
            .interactions
            .iter()
            .filter(|registered| registered.state == InteractionState::Registered)
            .map(|registered| registered.interaction.description.clone())
            .collect();
        let failures = std::mem::take(&mut state.failures);
        state.interactions.clear();
        state.received.clear();
        if unused.is_empty() && failures.is_empty() {
            Ok(())
        } else {
            Err(MockVerifyError { unused, failures })
        }
    }
}

/// Build the configured response for a consumed interaction. JSON bodies
/// are serialised and, absent a declared Content-Type, advertised as JSON.
fn respond_for_interaction(interaction: &Interaction) -> MockResponse {
    let response = &interaction.response;
    let mut headers: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value_to_string(value)))
        .collect();
    let mut body = None;
    if let Some(declared) = &response.body {
        match header_lookup(&response.headers, "content-type") {
            Some(content_type) if !json_content_type(&content_type) => {
                body = Some(value_to_string(declared).into_bytes());
            }
            Some(_) => {
                body = Some(render_json(declared));
            }
            None => {
                headers.push((
                    "Content-Type".to_string(),
                    "application/json; charset=UTF-8".to_string(),
                ));
                body = Some(render_json(declared));
            }
        }
    }
    MockResponse {
        status: response.status,
        headers,
        body,
    }
}

fn render_json(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|_| b"null".to_vec())
}

/// A scoped mock: acquired by `Pact::start_mocking`, released on drop on
/// all exit paths. Teardown verification stays explicit because it can
/// fail.
pub struct MockSession {
    dispatcher: Arc<Dispatcher>,
    transport: Transport,
}

impl MockSession {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, transport: Transport) -> Self {
        MockSession {
            dispatcher,
            transport,
        }
    }

    /// The URL the consumer under test should address.
    pub fn base_url(&self) -> String {
        self.transport.base_url()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Dispatch a request directly, bypassing the network transport.
    pub fn dispatch(&self, request: MockRequest) -> MockResponse {
        self.dispatcher.dispatch(request)
    }

    pub fn received_requests(&self) -> Vec<MockRequest> {
        self.transport.received_requests()
    }

    /// Verify every registered interaction was exercised and no request
    /// mismatched.
    pub fn verify(&self) -> Result<(), MockVerifyError> {
        self.dispatcher.verify()
    }

    pub fn stop(&mut self) {
        self.transport.stop();
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.transport.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::builder::{Consumer, Provider, RequestTemplate, ResponseTemplate};
    use super::*;
    use crate::interaction::SpecVersion;
    use serde_json::json;

    fn test_pact() -> builder::Pact {
        Consumer::new("MockTests")
            .has_pact_with(Provider::new("Service"))
            .version(SpecVersion::V3)
            .file_write_mode(crate::pact_file::FileWriteMode::Never)
            .build()
    }

    fn get(path: &str) -> MockRequest {
        MockRequest {
            method: "GET".to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_interaction_consumed_verifies_clean() {
        // invariant 6: k interactions, exactly the k matching requests
        let pact = test_pact();
        for path in ["/a", "/b", "/c"] {
            pact.upon_receiving(format!("a request for {path}"))
                .with_request(RequestTemplate::new("GET", path))
                .will_respond_with(ResponseTemplate::new(200).json_body(json!({"path": path})))
                .unwrap();
        }
        let dispatcher = pact.dispatcher();
        for path in ["/a", "/b", "/c"] {
            let response = dispatcher.dispatch(get(path));
            assert_eq!(response.status, 200);
        }
        dispatcher.verify().unwrap();
    }

    #[test]
    fn test_unused_interaction_fails_teardown() {
        // S6
        let pact = test_pact();
        for path in ["/one", "/two"] {
            pact.upon_receiving(format!("a request for {path}"))
                .with_request(RequestTemplate::new("GET", path))
                .will_respond_with(ResponseTemplate::new(200))
                .unwrap();
        }
        let dispatcher = pact.dispatcher();
        assert_eq!(dispatcher.dispatch(get("/one")).status, 200);
        let error = dispatcher.verify().unwrap_err();
        assert_eq!(error.unused, vec!["a request for /two".to_string()]);
        assert!(error.failures.is_empty());
    }

    #[test]
    fn test_duplicate_call_is_a_failure() {
        let pact = test_pact();
        pact.upon_receiving("a single-use request")
            .with_request(RequestTemplate::new("GET", "/once"))
            .will_respond_with(ResponseTemplate::new(200))
            .unwrap();
        let dispatcher = pact.dispatcher();
        assert_eq!(dispatcher.dispatch(get("/once")).status, 200);
        let response = dispatcher.dispatch(get("/once"));
        assert_eq!(response.status, 500);
        let error = dispatcher.verify().unwrap_err();
        assert!(error.failures[0].contains("duplicate call"));
    }

    #[test]
    fn test_no_matching_interaction_reports_closest_candidate() {
        let pact = test_pact();
        pact.upon_receiving("a request for users")
            .with_request(RequestTemplate::new("GET", "/users"))
            .will_respond_with(ResponseTemplate::new(200))
            .unwrap();
        let dispatcher = pact.dispatcher();
        let response = dispatcher.dispatch(get("/user"));
        assert_eq!(response.status, 500);
        let error = dispatcher.verify().unwrap_err();
        assert!(error.unused.contains(&"a request for users".to_string()));
        assert!(error.failures[0].contains("did not match any registered interaction"));
        assert!(error.failures[0].contains("a request for users"));
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let pact = test_pact();
        pact.upon_receiving("first match wins")
            .with_request(RequestTemplate::new("GET", "/same"))
            .will_respond_with(ResponseTemplate::new(200).json_body(json!({"which": "first"})))
            .unwrap();
        pact.upon_receiving("second registration")
            .with_request(RequestTemplate::new("GET", "/same"))
            .will_respond_with(ResponseTemplate::new(200).json_body(json!({"which": "second"})))
            .unwrap();
        let dispatcher = pact.dispatcher();
        let response = dispatcher.dispatch(get("/same"));
        let body: Value = serde_json::from_slice(&response.body.unwrap()).unwrap();
        assert_eq!(body, json!({"which": "first"}));
        // the second registration is now the only registered one
        let response = dispatcher.dispatch(get("/same"));
        let body: Value = serde_json::from_slice(&response.body.unwrap()).unwrap();
        assert_eq!(body, json!({"which": "second"}));
        dispatcher.verify().unwrap();
    }

    #[test]
    fn test_json_response_gets_default_content_type() {
        let pact = test_pact();
        pact.upon_receiving("a json request")
            .with_request(RequestTemplate::new("GET", "/json"))
            .will_respond_with(ResponseTemplate::new(200).json_body(json!({"ok": true})))
            .unwrap();
        let response = pact.dispatcher().dispatch(get("/json"));
        let content_type = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .unwrap();
        assert!(content_type.starts_with("application/json"));
        pact.dispatcher().verify().unwrap();
    }

    #[test]
    fn test_verify_clears_state_for_reuse() {
        let pact = test_pact();
        pact.upon_receiving("a request")
            .with_request(RequestTemplate::new("GET", "/x"))
            .will_respond_with(ResponseTemplate::new(200))
            .unwrap();
        assert!(pact.dispatcher().verify().is_err());
        // second verify starts from a clean slate
        pact.dispatcher().verify().unwrap();
    }
}
