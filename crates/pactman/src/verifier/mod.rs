//! Provider-side verification: replay each interaction of a pact against a
//! live provider, drive provider-state setup in between, and judge the
//! responses with the rule engine.

pub mod broker;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::interaction::{
    encode_query_string, header_lookup, value_to_string, Interaction, PactDocument,
};
use crate::rules::engine::{json_content_type, match_response, ActualResponse, Mismatch};
use state::{ProviderStateSetter, StateOutcome};

/// How one replayed interaction fared.
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionOutcome {
    Pass,
    Fail(Vec<Mismatch>),
    /// The provider does not know a required state.
    SkippedStateMissing(String),
    /// The state setter failed.
    SkippedStateError(String),
}

impl InteractionOutcome {
    /// Skipped interactions do not fail a verification run.
    pub fn acceptable(&self) -> bool {
        !matches!(self, InteractionOutcome::Fail(_))
    }
}

/// The verdict for one interaction, with the bodies kept for reporting.
#[derive(Debug, Clone)]
pub struct InteractionResult {
    pub consumer: String,
    pub description: String,
    pub outcome: InteractionOutcome,
    pub expected_body: Option<String>,
    pub actual_body: Option<String>,
}

/// Results of verifying one or more pacts.
#[derive(Debug, Default)]
pub struct VerifySummary {
    pub results: Vec<InteractionResult>,
}

impl VerifySummary {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.outcome.acceptable())
    }

    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == InteractionOutcome::Pass)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, InteractionOutcome::Fail(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results.len() - self.passed() - self.failed()
    }
}

#[derive(Debug, Error)]
pub enum VerifierError {
    /// The contract's rules are defective; this aborts the run rather than
    /// failing a single interaction.
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
}

/// Replays pact interactions against a provider. Interactions within one
/// pact are verified strictly sequentially so provider states hold for
/// exactly one request.
pub struct Verifier {
    provider_url: String,
    client: reqwest::Client,
    custom_headers: Vec<(String, String)>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Verifier {
    pub fn new(provider_url: impl Into<String>) -> Result<Self, VerifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(VerifierError::Client)?;
        Ok(Verifier {
            provider_url: provider_url.into(),
            client,
            custom_headers: Vec::new(),
            cancel: None,
        })
    }

    /// Headers added to every request to the provider.
    pub fn with_custom_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.custom_headers = headers;
        self
    }

    /// Cancellation flag, honoured at interaction boundaries only, never
    /// mid-request, so provider state is not left half-configured.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    /// Verify every interaction of a pact, in declared order.
    pub async fn verify_pact<S: ProviderStateSetter>(
        &self,
        pact: &PactDocument,
        setter: &S,
    ) -> Result<Vec<InteractionResult>, VerifierError> {
        let mut results = Vec::new();
        for interaction in &pact.interactions {
            if let Some(cancel) = &self.cancel {
                if cancel.load(Ordering::Relaxed) {
                    info!("verification cancelled before {:?}", interaction.description);
                    break;
                }
            }
            info!(
                "verifying {:?} against {}",
                interaction.description, self.provider_url
            );
            let result = self.verify_interaction(pact, interaction, setter).await?;
            results.push(result);
        }
        Ok(results)
    }

    async fn verify_interaction<S: ProviderStateSetter>(
        &self,
        pact: &PactDocument,
        interaction: &Interaction,
        setter: &S,
    ) -> Result<InteractionResult, VerifierError> {
        let mut result = InteractionResult {
            consumer: pact.consumer.clone(),
            description: interaction.description.clone(),
            outcome: InteractionOutcome::Pass,
            expected_body: interaction
                .response
                .body
                .as_ref()
                .map(|b| serde_json::to_string_pretty(b).unwrap_or_else(|_| b.to_string())),
            actual_body: None,
        };

        for state in &interaction.provider_states {
            match setter.apply(&state.name, &state.params).await {
                StateOutcome::Applied => {}
                StateOutcome::Missing => {
                    warn!("unable to configure provider state {:?}", state.name);
                    result.outcome = InteractionOutcome::SkippedStateMissing(state.name.clone());
                    return Ok(result);
                }
                StateOutcome::Error(message) => {
                    warn!("provider state setup failed: {message}");
                    result.outcome = InteractionOutcome::SkippedStateError(message);
                    return Ok(result);
                }
            }
        }

        let response = match self.issue_request(interaction).await {
            Ok(response) => response,
            Err(reason) => {
                result.outcome = InteractionOutcome::Fail(vec![Mismatch {
                    path: "$".to_string(),
                    reason,
                }]);
                return Ok(result);
            }
        };

        result.actual_body = response.body.as_ref().map(|bytes| {
            match serde_json::from_slice::<serde_json::Value>(bytes) {
                Ok(value) => serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| value.to_string()),
                Err(_) => String::from_utf8_lossy(bytes).to_string(),
            }
        });

        let mismatches = match_response(&interaction.response, &response, pact.spec_version)?;
        result.outcome = if mismatches.is_empty() {
            InteractionOutcome::Pass
        } else {
            InteractionOutcome::Fail(mismatches)
        };
        Ok(result)
    }

    /// Issue the interaction's request to the provider and capture the
    /// response. Transport errors fail this interaction only.
    async fn issue_request(&self, interaction: &Interaction) -> Result<ActualResponse, String> {
        let request = &interaction.request;
        let mut url = format!(
            "{}{}",
            self.provider_url.trim_end_matches('/'),
            request.path
        );
        if !request.query.is_empty() {
            url.push('?');
            url.push_str(&encode_query_string(&request.query));
        }
        debug!("{} {}", request.method, url);

        let mut builder = match request.method.as_str() {
            "GET" => self.client.get(&url),
            "HEAD" => self.client.head(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            other => {
                return Err(format!("request method {other} not implemented in verifier"));
            }
        };

        let mut has_content_type = false;
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            builder = builder.header(name.as_str(), value_to_string(value));
        }
        for (name, value) in &self.custom_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            let content_type = header_lookup(&request.headers, "content-type")
                .unwrap_or_else(|| "application/json".to_string());
            if json_content_type(&content_type) {
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| format!("could not serialise request body: {e}"))?;
                builder = builder.body(bytes);
                if !has_content_type {
                    builder = builder.header("Content-Type", "application/json");
                }
            } else {
                builder = builder.body(value_to_string(body));
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| format!("request to provider failed: {e}"))?;
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or("").to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read provider response: {e}"))?;
        Ok(ActualResponse {
            status,
            headers,
            body: if body.is_empty() {
                None
            } else {
                Some(body.to_vec())
            },
        })
    }
}
