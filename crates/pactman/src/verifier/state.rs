//! Provider-state setup: the callback invoked before each interaction is
//! replayed, so the provider holds the data the interaction assumes.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Result of applying one provider state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOutcome {
    /// The provider configured the state.
    Applied,
    /// The provider does not recognise the state; the interaction is
    /// skipped with a warning.
    Missing,
    /// The setter itself failed; the interaction is skipped.
    Error(String),
}

/// A provider-state setter. The verifier invokes `apply` once per state of
/// each interaction, in declared order.
#[allow(async_fn_in_trait)]
pub trait ProviderStateSetter {
    async fn apply(&self, name: &str, params: &Map<String, Value>) -> StateOutcome;
}

/// Posts state setup to the provider's setup URL as
/// `{"provider": ..., "consumer": ..., "state": ..., "params": ...}`.
/// A non-200 answer means the provider does not know the state.
pub struct HttpStateSetter {
    pub setup_url: String,
    pub provider: String,
    pub consumer: String,
    pub custom_headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl HttpStateSetter {
    pub fn new(
        setup_url: impl Into<String>,
        provider: impl Into<String>,
        consumer: impl Into<String>,
        custom_headers: Vec<(String, String)>,
        client: reqwest::Client,
    ) -> Self {
        HttpStateSetter {
            setup_url: setup_url.into(),
            provider: provider.into(),
            consumer: consumer.into(),
            custom_headers,
            client,
        }
    }
}

impl ProviderStateSetter for HttpStateSetter {
    async fn apply(&self, name: &str, params: &Map<String, Value>) -> StateOutcome {
        debug!("setting up provider state {name:?}");
        let payload = json!({
            "provider": self.provider,
            "consumer": self.consumer,
            "state": name,
            "params": params,
        });
        let mut request = self.client.post(&self.setup_url).json(&payload);
        for (header, value) in &self.custom_headers {
            request = request.header(header.as_str(), value.as_str());
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("provider state {name:?} applied");
                StateOutcome::Applied
            }
            Ok(response) => {
                warn!(
                    "provider state setup for {name:?} answered HTTP {}",
                    response.status()
                );
                StateOutcome::Missing
            }
            Err(error) => StateOutcome::Error(format!(
                "unable to configure provider state {name:?} at {}: {error}",
                self.setup_url
            )),
        }
    }
}

/// Wraps a plain function as a state setter, for library use and tests.
pub struct CallbackStateSetter<F>
where
    F: Fn(&str, &Map<String, Value>) -> StateOutcome + Send + Sync,
{
    callback: F,
}

impl<F> CallbackStateSetter<F>
where
    F: Fn(&str, &Map<String, Value>) -> StateOutcome + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        CallbackStateSetter { callback }
    }
}

impl<F> ProviderStateSetter for CallbackStateSetter<F>
where
    F: Fn(&str, &Map<String, Value>) -> StateOutcome + Send + Sync,
{
    async fn apply(&self, name: &str, params: &Map<String, Value>) -> StateOutcome {
        (self.callback)(name, params)
    }
}

/// Applies nothing, for providers without state setup.
pub struct NoopStateSetter;

impl ProviderStateSetter for NoopStateSetter {
    async fn apply(&self, name: &str, _params: &Map<String, Value>) -> StateOutcome {
        debug!("no state setter configured, assuming {name:?} holds");
        StateOutcome::Applied
    }
}
