//! The interaction model: expected requests and responses, provider states,
//! and the pact document that aggregates interactions.
//!
//! Pact JSON differs between specification versions (query as string vs.
//! object, `providerState` vs. `providerStates`, flat vs. per-section
//! `matchingRules`), so documents are assembled and parsed through
//! `serde_json::Value` rather than a single derived shape.

use std::fmt;

use serde_json::{json, Map, Value};

use crate::error::PactFormatError;
use crate::rules::MatchingRules;

/// Supported pact specification versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpecVersion {
    V1_1,
    V2,
    V3,
}

impl SpecVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecVersion::V1_1 => "1.1.0",
            SpecVersion::V2 => "2.0.0",
            SpecVersion::V3 => "3.0.0",
        }
    }

    pub fn major(self) -> u8 {
        match self {
            SpecVersion::V1_1 => 1,
            SpecVersion::V2 => 2,
            SpecVersion::V3 => 3,
        }
    }

    /// Parse a version string such as `"2.0.0"`. Only 1.1, 2.x and 3.x are
    /// supported.
    pub fn parse(version: &str) -> Result<Self, PactFormatError> {
        let mut parts = version.split('.');
        let major = parts.next().and_then(|p| p.parse::<u8>().ok());
        let minor = parts.next().and_then(|p| p.parse::<u8>().ok()).unwrap_or(0);
        match (major, minor) {
            (Some(1), 1) => Ok(SpecVersion::V1_1),
            (Some(2), _) => Ok(SpecVersion::V2),
            (Some(3), _) => Ok(SpecVersion::V3),
            _ => Err(PactFormatError::UnsupportedVersion(version.to_string())),
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named precondition the provider must satisfy before an interaction is
/// replayed. Params are only representable from pact v3.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderState {
    pub name: String,
    pub params: Map<String, Value>,
}

impl ProviderState {
    pub fn named(name: impl Into<String>) -> Self {
        ProviderState {
            name: name.into(),
            params: Map::new(),
        }
    }

    pub fn with_params(name: impl Into<String>, params: Map<String, Value>) -> Self {
        ProviderState {
            name: name.into(),
            params,
        }
    }
}

/// The request half of an interaction. Headers map case-insensitive names
/// to strings; query maps names to ordered lists of string values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpectedRequest {
    pub method: String,
    pub path: String,
    pub query: Map<String, Value>,
    pub headers: Map<String, Value>,
    pub body: Option<Value>,
    pub rules: MatchingRules,
}

/// The response half of an interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedResponse {
    pub status: u16,
    pub headers: Map<String, Value>,
    pub body: Option<Value>,
    pub rules: MatchingRules,
}

impl Default for ExpectedResponse {
    fn default() -> Self {
        ExpectedResponse {
            status: 200,
            headers: Map::new(),
            body: None,
            rules: MatchingRules::default(),
        }
    }
}

/// A single sealed interaction: description, provider state(s), request and
/// response, tagged with the spec version it was declared for.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub description: String,
    pub provider_states: Vec<ProviderState>,
    pub request: ExpectedRequest,
    pub response: ExpectedResponse,
    pub spec_version: SpecVersion,
}

impl Interaction {
    /// Serialise for inclusion in a pact document of this interaction's
    /// spec version.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("description".to_string(), json!(self.description));
        if !self.provider_states.is_empty() {
            if self.spec_version >= SpecVersion::V3 {
                let states: Vec<Value> = self
                    .provider_states
                    .iter()
                    .map(|s| json!({"name": s.name, "params": s.params}))
                    .collect();
                out.insert("providerStates".to_string(), Value::Array(states));
            } else {
                // earlier versions carry a single state string
                out.insert(
                    "providerState".to_string(),
                    json!(self.provider_states[0].name),
                );
            }
        }
        out.insert("request".to_string(), self.request_to_json());
        out.insert("response".to_string(), self.response_to_json());
        Value::Object(out)
    }

    fn request_to_json(&self) -> Value {
        let request = &self.request;
        let mut out = Map::new();
        out.insert("method".to_string(), json!(request.method));
        out.insert("path".to_string(), json!(request.path));
        if !request.query.is_empty() {
            if self.spec_version >= SpecVersion::V3 {
                out.insert("query".to_string(), Value::Object(request.query.clone()));
            } else {
                out.insert(
                    "query".to_string(),
                    json!(encode_query_string(&request.query)),
                );
            }
        }
        if !request.headers.is_empty() {
            out.insert("headers".to_string(), Value::Object(request.headers.clone()));
        }
        if let Some(body) = &request.body {
            out.insert("body".to_string(), body.clone());
        }
        if let Some(rules) = self.rules_to_json(&request.rules) {
            out.insert("matchingRules".to_string(), rules);
        }
        Value::Object(out)
    }

    fn response_to_json(&self) -> Value {
        let response = &self.response;
        let mut out = Map::new();
        out.insert("status".to_string(), json!(response.status));
        if !response.headers.is_empty() {
            out.insert(
                "headers".to_string(),
                Value::Object(response.headers.clone()),
            );
        }
        if let Some(body) = &response.body {
            out.insert("body".to_string(), body.clone());
        }
        if let Some(rules) = self.rules_to_json(&response.rules) {
            out.insert("matchingRules".to_string(), rules);
        }
        Value::Object(out)
    }

    fn rules_to_json(&self, rules: &MatchingRules) -> Option<Value> {
        match self.spec_version {
            // v1.1 has no matchingRules; the rules still apply in-process
            SpecVersion::V1_1 => None,
            SpecVersion::V2 => rules.to_v2_json(),
            SpecVersion::V3 => rules.to_v3_json(),
        }
    }

    /// Parse one interaction of a pact document of the given version.
    pub fn from_json(value: &Value, version: SpecVersion) -> Result<Self, PactFormatError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PactFormatError::malformed("interaction is not an object"))?;
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| PactFormatError::malformed("interaction has no description"))?
            .to_string();

        let mut provider_states = Vec::new();
        if let Some(state) = obj.get("providerState").and_then(Value::as_str) {
            provider_states.push(ProviderState::named(state));
        } else if let Some(states) = obj.get("providerStates").and_then(Value::as_array) {
            for state in states {
                let name = state
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PactFormatError::malformed("provider state has no name"))?;
                let params = state
                    .get("params")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                provider_states.push(ProviderState::with_params(name, params));
            }
        }

        let request = obj
            .get("request")
            .ok_or_else(|| PactFormatError::malformed("interaction has no request"))?;
        let response = obj
            .get("response")
            .ok_or_else(|| PactFormatError::malformed("interaction has no response"))?;

        Ok(Interaction {
            description,
            provider_states,
            request: parse_request(request, version)?,
            response: parse_response(response, version)?,
            spec_version: version,
        })
    }
}

fn parse_rules(obj: &Map<String, Value>, version: SpecVersion) -> Result<MatchingRules, PactFormatError> {
    match obj.get("matchingRules") {
        // v1 pacts carry no rules; ignore any present
        Some(_) if version == SpecVersion::V1_1 => Ok(MatchingRules::default()),
        Some(rules) if version == SpecVersion::V2 => MatchingRules::from_v2_json(rules),
        Some(rules) => MatchingRules::from_v3_json(rules),
        None => Ok(MatchingRules::default()),
    }
}

fn parse_request(value: &Value, version: SpecVersion) -> Result<ExpectedRequest, PactFormatError> {
    let obj = value
        .as_object()
        .ok_or_else(|| PactFormatError::malformed("request is not an object"))?;
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| PactFormatError::malformed("request has no method"))?
        .to_uppercase();
    let path = obj
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| PactFormatError::malformed("request has no path"))?
        .to_string();
    let query = match obj.get("query") {
        None => Map::new(),
        Some(Value::String(s)) => parse_query_string(s),
        Some(Value::Object(map)) => normalise_query_object(map),
        Some(other) => {
            return Err(PactFormatError::malformed(format!(
                "request query is neither string nor object: {other}"
            )))
        }
    };
    Ok(ExpectedRequest {
        method,
        path,
        query,
        headers: parse_headers(obj)?,
        body: obj.get("body").cloned(),
        rules: parse_rules(obj, version)?,
    })
}

fn parse_response(value: &Value, version: SpecVersion) -> Result<ExpectedResponse, PactFormatError> {
    let obj = value
        .as_object()
        .ok_or_else(|| PactFormatError::malformed("response is not an object"))?;
    let status = obj
        .get("status")
        .and_then(Value::as_u64)
        .ok_or_else(|| PactFormatError::malformed("response has no status"))? as u16;
    Ok(ExpectedResponse {
        status,
        headers: parse_headers(obj)?,
        body: obj.get("body").cloned(),
        rules: parse_rules(obj, version)?,
    })
}

/// Query objects may use bare strings for single values; normalise every
/// value to a list.
fn normalise_query_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in map {
        match value {
            Value::Array(_) => {
                out.insert(name.clone(), value.clone());
            }
            other => {
                out.insert(name.clone(), Value::Array(vec![other.clone()]));
            }
        }
    }
    out
}

fn parse_headers(obj: &Map<String, Value>) -> Result<Map<String, Value>, PactFormatError> {
    match obj.get("headers") {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(PactFormatError::malformed(format!(
            "headers is not an object: {other}"
        ))),
    }
}

/// A pact: the agreed interactions between one consumer and one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PactDocument {
    pub consumer: String,
    pub provider: String,
    pub spec_version: SpecVersion,
    pub interactions: Vec<Interaction>,
}

impl PactDocument {
    pub fn new(
        consumer: impl Into<String>,
        provider: impl Into<String>,
        spec_version: SpecVersion,
    ) -> Self {
        PactDocument {
            consumer: consumer.into(),
            provider: provider.into(),
            spec_version,
            interactions: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "consumer": {"name": self.consumer},
            "provider": {"name": self.provider},
            "interactions": self
                .interactions
                .iter()
                .map(Interaction::to_json)
                .collect::<Vec<Value>>(),
            "metadata": {"pactSpecification": {"version": self.spec_version.as_str()}},
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, PactFormatError> {
        let consumer = pacticipant_name(value, "consumer")?;
        let provider = pacticipant_name(value, "provider")?;
        let metadata = value
            .get("metadata")
            .ok_or_else(|| PactFormatError::malformed("pact has no metadata"))?;
        // the Ruby implementation writes the non-compliant key
        // "pact-specification", accept both
        let version = metadata
            .get("pactSpecification")
            .or_else(|| metadata.get("pact-specification"))
            .and_then(|spec| spec.get("version"))
            .and_then(Value::as_str)
            .ok_or_else(|| PactFormatError::malformed("pact metadata has no spec version"))?;
        let spec_version = SpecVersion::parse(version)?;
        let interactions = value
            .get("interactions")
            .and_then(Value::as_array)
            .ok_or_else(|| PactFormatError::malformed("pact has no interactions"))?
            .iter()
            .map(|i| Interaction::from_json(i, spec_version))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PactDocument {
            consumer,
            provider,
            spec_version,
            interactions,
        })
    }
}

fn pacticipant_name(value: &Value, role: &str) -> Result<String, PactFormatError> {
    value
        .get(role)
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PactFormatError::malformed(format!("pact has no {role} name")))
}

/// Parse a raw query string into an ordered name → values mapping. Names
/// may repeat; values are URL-decoded.
pub fn parse_query_string(query: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = urlencoding::decode(name)
            .map(|n| n.to_string())
            .unwrap_or_else(|_| name.to_string());
        let value = urlencoding::decode(value)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| value.to_string());
        let entry = out.entry(name).or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = entry {
            values.push(Value::String(value));
        }
    }
    out
}

/// Encode a query mapping as a v2 query string, preserving declaration
/// order.
pub fn encode_query_string(query: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();
    for (name, values) in query {
        match values {
            Value::Array(items) => {
                for item in items {
                    pairs.push(format!(
                        "{}={}",
                        urlencoding::encode(name),
                        urlencoding::encode(&value_to_string(item))
                    ));
                }
            }
            other => pairs.push(format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(&value_to_string(other))
            )),
        }
    }
    pairs.join("&")
}

/// Render a JSON leaf the way it appears in an HTTP message (strings
/// unquoted, everything else in JSON notation).
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Case-insensitive header lookup, returning the value as a string.
pub fn header_lookup<'a>(headers: &'a Map<String, Value>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| value_to_string(v))
}
