//! Environment configuration.
//!
//! Three variables are honoured:
//! - `PACT_BROKER_URL`: default broker for the verifier CLI
//! - `PROVIDER_EXTRA_HEADER`: a `Name: value` header added to provider
//!   and state-setup requests
//! - `PACT_USE_MOCKING_SERVER`: `yes` runs the consumer mock as a real
//!   HTTP server instead of the in-process transport

use std::env;

pub const PACT_BROKER_URL: &str = "PACT_BROKER_URL";
pub const PROVIDER_EXTRA_HEADER: &str = "PROVIDER_EXTRA_HEADER";
pub const PACT_USE_MOCKING_SERVER: &str = "PACT_USE_MOCKING_SERVER";

pub fn broker_url_from_env() -> Option<String> {
    env::var(PACT_BROKER_URL).ok().filter(|v| !v.is_empty())
}

pub fn extra_header_from_env() -> Option<(String, String)> {
    env::var(PROVIDER_EXTRA_HEADER)
        .ok()
        .as_deref()
        .and_then(parse_header_arg)
}

pub fn use_mocking_server() -> bool {
    env::var(PACT_USE_MOCKING_SERVER)
        .map(|v| v == "yes")
        .unwrap_or(false)
}

/// Parse a `Name: value` header argument.
pub fn parse_header_arg(arg: &str) -> Option<(String, String)> {
    let (name, value) = arg.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
