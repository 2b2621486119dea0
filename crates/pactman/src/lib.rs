//! Consumer-driven contract testing per the Pact specification
//! (versions 1.1, 2 and 3).
//!
//! Two cooperating roles share one matching engine:
//!
//! - **Consumer side**: declare interactions through the builder DSL in
//!   [`mock::builder`], run the consumer's test against the mock, and emit
//!   a pact file describing the agreed interactions.
//! - **Provider side**: load pact files (or fetch them from a broker),
//!   replay each interaction against a running provider with [`verifier`],
//!   and compare the observed responses under the pact matching rules.
//!
//! The [`rules`] module holds the shared core: the compiler that turns
//! matcher sentinels into path-addressed rules, and the engine that judges
//! actual messages against expected ones.

pub mod config;
pub mod error;
pub mod headers;
pub mod interaction;
pub mod matchers;
pub mod mock;
pub mod pact_file;
pub mod rules;
pub mod verifier;

pub use interaction::{Interaction, PactDocument, ProviderState, SpecVersion};
pub use matchers::{each_like, each_like_min, equals, includes, like, term, Matcher};
pub use mock::builder::{Consumer, Pact, Provider, RequestTemplate, ResponseTemplate};
pub use mock::{MockRequest, MockResponse, MockSession};
pub use pact_file::FileWriteMode;
pub use rules::engine::Mismatch;
