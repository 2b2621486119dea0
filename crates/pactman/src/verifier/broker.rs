//! Pact broker access: fetch the pacts registered for a provider and
//! publish verification results back.
//!
//! The broker speaks HAL; this client walks only the links the verifier
//! needs: the provider latest-pacts listing and each pact's
//! `pb:publish-verification-results` link.

use std::path::Path;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::PactFormatError;
use crate::interaction::PactDocument;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("broker answered {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("broker response was not understood: {0}")]
    Malformed(String),
    #[error(transparent)]
    Format(#[from] PactFormatError),
    #[error("pact carries no publish-verification-results link")]
    NoPublishLink,
}

/// A pact document plus the broker link its results are published to.
#[derive(Debug, Clone)]
pub struct BrokerPact {
    pub document: PactDocument,
    pub publish_url: Option<String>,
}

impl BrokerPact {
    /// Wrap a pact JSON value, picking up its publish link if present.
    pub fn from_value(value: &Value) -> Result<Self, PactFormatError> {
        Ok(BrokerPact {
            document: PactDocument::from_json(value)?,
            publish_url: publish_link(value),
        })
    }

    /// Load a local pact file; local pacts have no publish link.
    pub fn load_file(path: &Path) -> Result<Self, PactFormatError> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;
        BrokerPact::from_value(&value)
    }
}

fn publish_link(value: &Value) -> Option<String> {
    value
        .get("_links")
        .and_then(|links| links.get("pb:publish-verification-results"))
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A source of pacts and a sink for verification results.
#[allow(async_fn_in_trait)]
pub trait BrokerClient {
    async fn pacts_for(
        &self,
        provider: &str,
        consumer: Option<&str>,
    ) -> Result<Vec<BrokerPact>, BrokerError>;

    async fn publish_result(
        &self,
        pact: &BrokerPact,
        passed: bool,
        provider_version: &str,
    ) -> Result<(), BrokerError>;
}

/// HTTP client for a real pact broker.
pub struct HttpBrokerClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBrokerClient {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        HttpBrokerClient {
            base_url: base_url.into(),
            client,
        }
    }

    /// The listing URL for a provider's latest pacts. The base URL may be
    /// a template containing `{}`, or the broker root.
    fn latest_pacts_url(&self, provider: &str) -> String {
        if self.base_url.contains("{}") {
            self.base_url.replace("{}", provider)
        } else {
            format!(
                "{}/pacts/provider/{}/latest",
                self.base_url.trim_end_matches('/'),
                provider
            )
        }
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, BrokerError> {
        debug!("fetching {url}");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BrokerError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

impl BrokerClient for HttpBrokerClient {
    async fn pacts_for(
        &self,
        provider: &str,
        consumer: Option<&str>,
    ) -> Result<Vec<BrokerPact>, BrokerError> {
        let index_url = self.latest_pacts_url(provider);
        let index = self.fetch_json(&index_url).await?;
        let links = index
            .get("_links")
            .and_then(|links| links.get("pb:pacts").or_else(|| links.get("pacts")))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                BrokerError::Malformed(format!("no pact links in listing at {index_url}"))
            })?;

        let mut pacts = Vec::new();
        for link in links {
            let Some(href) = link.get("href").and_then(Value::as_str) else {
                return Err(BrokerError::Malformed(
                    "pact link carries no href".to_string(),
                ));
            };
            let value = self.fetch_json(href).await?;
            let pact = BrokerPact::from_value(&value)?;
            if let Some(consumer) = consumer {
                if pact.document.consumer != consumer {
                    continue;
                }
            }
            pacts.push(pact);
        }
        info!(
            "fetched {} pact(s) for provider {provider} from {index_url}",
            pacts.len()
        );
        Ok(pacts)
    }

    async fn publish_result(
        &self,
        pact: &BrokerPact,
        passed: bool,
        provider_version: &str,
    ) -> Result<(), BrokerError> {
        let url = pact.publish_url.as_ref().ok_or(BrokerError::NoPublishLink)?;
        let payload = json!({
            "success": passed,
            "providerApplicationVersion": provider_version,
        });
        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(BrokerError::Status {
                url: url.clone(),
                status: response.status().as_u16(),
            });
        }
        info!(
            "published verification result for {} (success={passed})",
            pact.document.consumer
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_pacts_url_from_root() {
        let client = HttpBrokerClient::new("http://broker.example", reqwest::Client::new());
        assert_eq!(
            client.latest_pacts_url("user-service"),
            "http://broker.example/pacts/provider/user-service/latest"
        );
    }

    #[test]
    fn test_latest_pacts_url_from_template() {
        let client = HttpBrokerClient::new(
            "http://broker.example/pacts/provider/{}/latest",
            reqwest::Client::new(),
        );
        assert_eq!(
            client.latest_pacts_url("user-service"),
            "http://broker.example/pacts/provider/user-service/latest"
        );
    }

    #[test]
    fn test_publish_link_extraction() {
        let value = serde_json::json!({
            "consumer": {"name": "C"},
            "provider": {"name": "P"},
            "interactions": [],
            "metadata": {"pactSpecification": {"version": "3.0.0"}},
            "_links": {
                "pb:publish-verification-results": {
                    "href": "http://broker.example/publish/123"
                }
            }
        });
        let pact = BrokerPact::from_value(&value).unwrap();
        assert_eq!(
            pact.publish_url.as_deref(),
            Some("http://broker.example/publish/123")
        );
    }
}
