//! Error types shared across the crate.
//!
//! Module-specific failures (mock dispatch, pact files, broker access) live
//! next to their modules; the types here are the ones several layers share.

use thiserror::Error;

use crate::interaction::SpecVersion;

/// A pact document could not be read or does not conform to the schema.
#[derive(Debug, Error)]
pub enum PactFormatError {
    #[error("malformed pact JSON: {0}")]
    Malformed(String),
    #[error("invalid matching rules: {0}")]
    BadRules(String),
    #[error("unsupported pact specification version {0:?}")]
    UnsupportedVersion(String),
    #[error("failed to read pact file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse pact JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PactFormatError {
    pub fn malformed(message: impl Into<String>) -> Self {
        PactFormatError::Malformed(message.into())
    }

    pub fn bad_rules(message: impl Into<String>) -> Self {
        PactFormatError::BadRules(message.into())
    }
}

/// A matcher expression could not be compiled into rules.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A matcher was used in a context its spec version does not permit.
    #[error("{matcher} cannot be used in pact version {version}")]
    SpecViolation {
        matcher: &'static str,
        version: SpecVersion,
    },
    /// A matcher was nested illegally, e.g. `Equals` wrapping another
    /// matcher.
    #[error("{0}")]
    IllegalNesting(String),
    #[error("EachLike minimum must be greater than or equal to 1")]
    InvalidMinimum,
    #[error("invalid regex {pattern:?}: {source}")]
    BadRegex {
        pattern: String,
        source: regex::Error,
    },
}

/// The rule engine itself failed (as opposed to reporting mismatches).
/// These indicate a defective contract or a bug and abort the run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid regex in matching rules {pattern:?}: {source}")]
    BadRegex {
        pattern: String,
        source: regex::Error,
    },
}
