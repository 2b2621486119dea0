//! The consumer-facing DSL: declare a pact between a consumer and a
//! provider, build interactions with `given` / `upon_receiving` /
//! `with_request` / `will_respond_with`, and run the mock.
//!
//! ```no_run
//! use pactman::mock::builder::{Consumer, Provider, RequestTemplate, ResponseTemplate};
//! use pactman::matchers::like;
//! use serde_json::json;
//!
//! let pact = Consumer::new("web-ui")
//!     .has_pact_with(Provider::new("user-service"))
//!     .build();
//! pact.given("UserA exists")
//!     .upon_receiving("a request for UserA")
//!     .with_request(RequestTemplate::new("GET", "/users/UserA"))
//!     .will_respond_with(ResponseTemplate::new(200).body(like(json!({"name": "UserA"}))))
//!     .unwrap();
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::transport::{DirectTransport, HttpMockTransport, Transport};
use super::{Dispatcher, MockError, MockSession, MockTransport};
use crate::config;
use crate::error::CompileError;
use crate::interaction::{
    ExpectedRequest, ExpectedResponse, Interaction, ProviderState, SpecVersion,
};
use crate::matchers::Matcher;
use crate::pact_file::{FileWriteMode, PactWriter};
use crate::rules::compile::{compile_body, compile_headers, compile_path, compile_query};
use crate::rules::MatchingRules;

/// The default nominal port, used when no real server is bound.
const DEFAULT_MOCK_PORT: u16 = 1234;

#[derive(Debug, Error)]
pub enum PactError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("upon_receiving must name the interaction before will_respond_with")]
    MissingDescription,
    #[error("with_request must be called before will_respond_with")]
    MissingRequest,
    #[error("pact version {0} only allows a single provider state without params")]
    StatesRequireV3(SpecVersion),
    #[error(transparent)]
    Mock(#[from] MockError),
}

/// The service making requests.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub name: String,
}

impl Consumer {
    pub fn new(name: impl Into<String>) -> Self {
        Consumer { name: name.into() }
    }

    /// Start declaring a contract between this consumer and a provider.
    pub fn has_pact_with(self, provider: Provider) -> PactBuilder {
        PactBuilder {
            consumer: self.name,
            provider: provider.name,
            version: SpecVersion::V2,
            pact_dir: PathBuf::from("."),
            file_write_mode: FileWriteMode::Overwrite,
            host: "localhost".to_string(),
            port: 0,
            use_server: config::use_mocking_server(),
        }
    }
}

/// The service being mocked and later verified.
#[derive(Debug, Clone)]
pub struct Provider {
    pub name: String,
}

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Provider { name: name.into() }
    }
}

/// Configuration collected before the pact is frozen.
pub struct PactBuilder {
    consumer: String,
    provider: String,
    version: SpecVersion,
    pact_dir: PathBuf,
    file_write_mode: FileWriteMode,
    host: String,
    port: u16,
    use_server: bool,
}

impl PactBuilder {
    /// Pact specification version to declare interactions for. Defaults to
    /// 2.0.0.
    pub fn version(mut self, version: SpecVersion) -> Self {
        self.version = version;
        self
    }

    /// Directory the pact file is written to. Defaults to the current
    /// directory.
    pub fn pact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pact_dir = dir.into();
        self
    }

    pub fn file_write_mode(mut self, mode: FileWriteMode) -> Self {
        self.file_write_mode = mode;
        self
    }

    pub fn host_name(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Port for the HTTP mock server; 0 lets the OS pick one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Run a real HTTP server instead of the in-process transport.
    pub fn use_mock_server(mut self, yes: bool) -> Self {
        self.use_server = yes;
        self
    }

    pub fn build(self) -> Pact {
        let writer = Arc::new(PactWriter::new(
            &self.pact_dir,
            &self.consumer,
            &self.provider,
            self.file_write_mode,
        ));
        Pact {
            dispatcher: Arc::new(Dispatcher::new(Some(Arc::clone(&writer)))),
            writer,
            consumer: self.consumer,
            provider: self.provider,
            version: self.version,
            host: self.host,
            port: self.port,
            use_server: self.use_server,
        }
    }
}

/// A frozen contract declaration. Interactions are registered through it
/// and the mock session is acquired from it.
pub struct Pact {
    consumer: String,
    provider: String,
    version: SpecVersion,
    host: String,
    port: u16,
    use_server: bool,
    dispatcher: Arc<Dispatcher>,
    writer: Arc<PactWriter>,
}

impl Pact {
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn version(&self) -> SpecVersion {
        self.version
    }

    /// Where the pact file for this contract lands.
    pub fn pact_file_path(&self) -> PathBuf {
        self.writer.path().to_path_buf()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Begin an interaction with a primary provider state.
    pub fn given(&self, state: impl Into<String>) -> InteractionBuilder {
        self.interaction().given(state)
    }

    /// Begin an interaction with a primary provider state carrying params
    /// (pact v3).
    pub fn given_with_params(
        &self,
        state: impl Into<String>,
        params: Value,
    ) -> InteractionBuilder {
        self.interaction().given_with_params(state, params)
    }

    /// Begin an interaction without a provider state.
    pub fn upon_receiving(&self, description: impl Into<String>) -> InteractionBuilder {
        self.interaction().upon_receiving(description)
    }

    fn interaction(&self) -> InteractionBuilder {
        InteractionBuilder {
            dispatcher: Arc::clone(&self.dispatcher),
            version: self.version,
            description: None,
            states: Vec::new(),
            request: None,
        }
    }

    /// Acquire the mock transport. Released on drop of the session on all
    /// exit paths.
    pub async fn start_mocking(&self) -> Result<MockSession, MockError> {
        let mut transport = if self.use_server {
            Transport::Http(HttpMockTransport::new(
                self.dispatcher(),
                self.host.clone(),
                self.port,
            ))
        } else {
            let port = if self.port == 0 {
                DEFAULT_MOCK_PORT
            } else {
                self.port
            };
            Transport::Direct(DirectTransport::new(
                self.dispatcher(),
                self.host.clone(),
                port,
            ))
        };
        transport.start().await?;
        Ok(MockSession::new(self.dispatcher(), transport))
    }

    /// Verify every registered interaction was exercised.
    pub fn verify(&self) -> Result<(), super::MockVerifyError> {
        self.dispatcher.verify()
    }
}

/// Declares the request half of an interaction. Every part may carry
/// matchers.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: String,
    path: Matcher,
    query: Vec<(String, Matcher)>,
    headers: Vec<(String, Matcher)>,
    body: Option<Matcher>,
}

impl RequestTemplate {
    pub fn new(method: impl Into<String>, path: impl Into<Matcher>) -> Self {
        RequestTemplate {
            method: method.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<Matcher>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Matcher>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Matcher>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Declares the response half of an interaction.
#[derive(Debug, Clone)]
pub struct ResponseTemplate {
    status: u16,
    headers: Vec<(String, Matcher)>,
    body: Option<Matcher>,
}

impl ResponseTemplate {
    pub fn new(status: u16) -> Self {
        ResponseTemplate {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Matcher>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Matcher>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Shorthand for a plain JSON body without matchers.
    pub fn json_body(self, value: Value) -> Self {
        self.body(Matcher::from(value))
    }
}

/// Builds one interaction. `will_respond_with` seals it and hands it to
/// the dispatcher; calling it again produces a further, distinct
/// interaction.
pub struct InteractionBuilder {
    dispatcher: Arc<Dispatcher>,
    version: SpecVersion,
    description: Option<String>,
    states: Vec<ProviderState>,
    request: Option<RequestTemplate>,
}

impl InteractionBuilder {
    /// Set or replace the primary provider state.
    pub fn given(mut self, state: impl Into<String>) -> Self {
        let state = ProviderState::named(state);
        if self.states.is_empty() {
            self.states.push(state);
        } else {
            self.states[0] = state;
        }
        self
    }

    /// Set or replace the primary provider state with params (pact v3).
    pub fn given_with_params(mut self, state: impl Into<String>, params: Value) -> Self {
        let state = ProviderState::with_params(state, value_params(params));
        if self.states.is_empty() {
            self.states.push(state);
        } else {
            self.states[0] = state;
        }
        self
    }

    /// Append an additional provider state (pact v3).
    pub fn and_given(mut self, state: impl Into<String>) -> Self {
        self.states.push(ProviderState::named(state));
        self
    }

    /// Append an additional provider state with params (pact v3).
    pub fn and_given_with_params(mut self, state: impl Into<String>, params: Value) -> Self {
        self.states.push(ProviderState::with_params(state, value_params(params)));
        self
    }

    /// Name the interaction. Descriptions must be unique within a pact.
    pub fn upon_receiving(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_request(mut self, request: RequestTemplate) -> Self {
        self.request = Some(request);
        self
    }

    /// Seal the interaction with its response and register it with the
    /// mock dispatcher.
    pub fn will_respond_with(
        &mut self,
        response: ResponseTemplate,
    ) -> Result<Interaction, PactError> {
        let description = self
            .description
            .clone()
            .ok_or(PactError::MissingDescription)?;
        let request = self.request.clone().ok_or(PactError::MissingRequest)?;

        if self.version < SpecVersion::V3
            && (self.states.len() > 1 || self.states.iter().any(|s| !s.params.is_empty()))
        {
            return Err(PactError::StatesRequireV3(self.version));
        }

        let (path_example, path_rules) = compile_path(&request.path, self.version)?;
        let (query_example, query_rules) = compile_query(&request.query, self.version)?;
        let (header_example, header_rules) = compile_headers(&request.headers, self.version)?;
        let mut request_rules = MatchingRules {
            path: path_rules,
            query: query_rules,
            header: header_rules,
            body: Vec::new(),
        };
        let request_body = match &request.body {
            Some(matcher) => {
                let compiled = compile_body(matcher, self.version)?;
                request_rules.body = compiled.entries;
                Some(compiled.example)
            }
            None => None,
        };

        let (response_headers, response_header_rules) =
            compile_headers(&response.headers, self.version)?;
        let mut response_rules = MatchingRules {
            header: response_header_rules,
            ..Default::default()
        };
        let response_body = match &response.body {
            Some(matcher) => {
                let compiled = compile_body(matcher, self.version)?;
                response_rules.body = compiled.entries;
                Some(compiled.example)
            }
            None => None,
        };

        // v1.1 pacts carry no matchingRules; the mock matches literally,
        // as the original did
        if self.version == SpecVersion::V1_1 {
            request_rules = MatchingRules::default();
            response_rules = MatchingRules::default();
        }

        let interaction = Interaction {
            description,
            provider_states: self.states.clone(),
            request: ExpectedRequest {
                method: request.method.to_uppercase(),
                path: path_example,
                query: query_example,
                headers: header_example,
                body: request_body,
                rules: request_rules,
            },
            response: ExpectedResponse {
                status: response.status,
                headers: response_headers,
                body: response_body,
                rules: response_rules,
            },
            spec_version: self.version,
        };
        debug!("sealed interaction {:?}", interaction.description);
        self.dispatcher.register(interaction.clone());
        Ok(interaction)
    }
}

fn value_params(params: Value) -> Map<String, Value> {
    match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => Map::from_iter([("value".to_string(), other)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{each_like_min, like, term};
    use crate::rules::RuleSpec;
    use serde_json::json;

    fn pact(version: SpecVersion) -> Pact {
        Consumer::new("BuilderTests")
            .has_pact_with(Provider::new("Service"))
            .version(version)
            .file_write_mode(FileWriteMode::Never)
            .build()
    }

    #[test]
    fn test_full_builder_chain_produces_sealed_interaction() {
        let pact = pact(SpecVersion::V3);
        let interaction = pact
            .given("there are three comments")
            .upon_receiving("a request for the most recent 2 comments")
            .with_request(
                RequestTemplate::new("get", "/comment")
                    .query("limit", "2")
                    .header("Accept", "application/json"),
            )
            .will_respond_with(ResponseTemplate::new(200).body(Matcher::object([(
                "comments",
                each_like_min(Matcher::object([("name", like("bob"))]), 2),
            )])))
            .unwrap();
        assert_eq!(interaction.request.method, "GET");
        assert_eq!(interaction.provider_states[0].name, "there are three comments");
        assert_eq!(
            interaction.response.body,
            Some(json!({"comments": [{"name": "bob"}, {"name": "bob"}]}))
        );
        assert!(!interaction.response.rules.body.is_empty());
    }

    #[test]
    fn test_given_replaces_and_and_given_appends() {
        let pact = pact(SpecVersion::V3);
        let interaction = pact
            .given("a user exists")
            .given("another user exists")
            .and_given_with_params("the nozzle is operating", json!({"speed": 3}))
            .upon_receiving("a request")
            .with_request(RequestTemplate::new("GET", "/x"))
            .will_respond_with(ResponseTemplate::new(200))
            .unwrap();
        assert_eq!(interaction.provider_states.len(), 2);
        assert_eq!(interaction.provider_states[0].name, "another user exists");
        assert_eq!(interaction.provider_states[1].name, "the nozzle is operating");
        assert_eq!(
            interaction.provider_states[1].params.get("speed"),
            Some(&json!(3))
        );
    }

    #[test]
    fn test_multiple_states_rejected_before_v3() {
        let pact = pact(SpecVersion::V2);
        let result = pact
            .given("one")
            .and_given("two")
            .upon_receiving("a request")
            .with_request(RequestTemplate::new("GET", "/x"))
            .will_respond_with(ResponseTemplate::new(200));
        assert!(matches!(result, Err(PactError::StatesRequireV3(_))));
    }

    #[test]
    fn test_state_params_rejected_before_v3() {
        let pact = pact(SpecVersion::V2);
        let result = pact
            .given_with_params("a user exists", json!({"name": "Mary"}))
            .upon_receiving("a request")
            .with_request(RequestTemplate::new("GET", "/x"))
            .will_respond_with(ResponseTemplate::new(200));
        assert!(matches!(result, Err(PactError::StatesRequireV3(_))));
    }

    #[test]
    fn test_builder_can_be_finalised_twice() {
        let pact = pact(SpecVersion::V3);
        let mut builder = pact
            .upon_receiving("first")
            .with_request(RequestTemplate::new("GET", "/x"));
        builder.will_respond_with(ResponseTemplate::new(200)).unwrap();
        builder = builder.upon_receiving("second");
        builder.will_respond_with(ResponseTemplate::new(404)).unwrap();
        // both interactions are registered and unused
        let error = pact.verify().unwrap_err();
        assert_eq!(error.unused.len(), 2);
    }

    #[test]
    fn test_description_is_required() {
        let pact = pact(SpecVersion::V3);
        let mut builder = pact
            .given("a state")
            .with_request(RequestTemplate::new("GET", "/x"));
        assert!(matches!(
            builder.will_respond_with(ResponseTemplate::new(200)),
            Err(PactError::MissingDescription)
        ));
    }

    #[test]
    fn test_v1_interactions_drop_rules() {
        let pact = pact(SpecVersion::V1_1);
        let interaction = pact
            .upon_receiving("a v1 request")
            .with_request(RequestTemplate::new("GET", term("/users/\\d+", "/users/1")))
            .will_respond_with(ResponseTemplate::new(200).body(like(json!({"a": 1}))))
            .unwrap();
        assert!(interaction.request.rules.is_empty());
        assert!(interaction.response.rules.is_empty());
        assert_eq!(interaction.request.path, "/users/1");
    }

    #[test]
    fn test_term_in_path_registers_rule() {
        let pact = pact(SpecVersion::V2);
        let interaction = pact
            .upon_receiving("a templated path")
            .with_request(RequestTemplate::new("GET", term(r"/users/\w+", "/users/UserA")))
            .will_respond_with(ResponseTemplate::new(200))
            .unwrap();
        assert_eq!(interaction.request.path, "/users/UserA");
        assert_eq!(
            interaction.request.rules.path[0].specs,
            vec![RuleSpec::Regex(r"/users/\w+".to_string())]
        );
    }
}
