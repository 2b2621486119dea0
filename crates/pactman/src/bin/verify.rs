//! `pactman-verifier`: verify pact contracts against a running provider.
//!
//! Usage:
//!   pactman-verifier <provider-name> <provider-url> <provider-setup-url>
//!
//! Pacts come from a broker (`-b`, or `PACT_BROKER_URL`) or a local file
//! (`-l`). Exit code 0 means every interaction passed or was skipped, 1
//! means at least one verification failure, 2 means an operational error.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use similar::{ChangeTag, TextDiff};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use pactman::config;
use pactman::verifier::broker::{BrokerClient, BrokerPact, HttpBrokerClient};
use pactman::verifier::state::HttpStateSetter;
use pactman::verifier::{InteractionOutcome, InteractionResult, Verifier, VerifySummary};

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Verify pact contracts
#[derive(Parser, Debug)]
#[command(name = "pactman-verifier")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the provider being verified
    provider_name: String,

    /// URL of the provider service
    provider_url: String,

    /// URL of the provider's state setup endpoint
    provider_setup_url: String,

    /// Pact broker URL; may also be given via PACT_BROKER_URL
    #[arg(short = 'b', long)]
    broker_url: Option<String>,

    /// Path to a local pact file instead of the broker
    #[arg(short = 'l', long)]
    local_pact: Option<PathBuf>,

    /// Header added to state setup and verification requests, as
    /// 'Name: value' (repeatable)
    #[arg(long = "custom-provider-header")]
    custom_provider_header: Vec<String>,

    /// Verify only pacts of this consumer
    #[arg(long)]
    consumer_name: Option<String>,

    /// Publish verification results to the broker
    #[arg(long)]
    publish_results: bool,

    /// Provider application version, required to publish results
    #[arg(long)]
    provider_version: Option<String>,

    /// Output more information about the verification
    #[arg(short, long)]
    verbose: bool,
}

const EXIT_OK: i32 = 0;
const EXIT_VERIFICATION_FAILED: i32 = 1;
const EXIT_OPERATIONAL_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let mut custom_headers = Vec::new();
    for header in &args.custom_provider_header {
        match config::parse_header_arg(header) {
            Some(parsed) => custom_headers.push(parsed),
            None => {
                eprintln!("{RED}Invalid --custom-provider-header {header:?}, expected 'Name: value'{RESET}");
                return EXIT_OPERATIONAL_ERROR;
            }
        }
    }
    if let Some(extra) = config::extra_header_from_env() {
        custom_headers.push(extra);
    }

    if args.publish_results && args.provider_version.is_none() {
        eprintln!("{RED}Provider version is required to publish results to the broker{RESET}");
        return EXIT_OPERATIONAL_ERROR;
    }

    let (pacts, broker_client) = match gather_pacts(&args).await {
        Ok(gathered) => gathered,
        Err(e) => {
            eprintln!("{RED}{e:#}{RESET}");
            return EXIT_OPERATIONAL_ERROR;
        }
    };
    if pacts.is_empty() {
        eprintln!("{YELLOW}No pacts found for provider {}{RESET}", args.provider_name);
        return EXIT_OK;
    }

    let verifier = match Verifier::new(&args.provider_url) {
        Ok(verifier) => verifier.with_custom_headers(custom_headers.clone()),
        Err(e) => {
            eprintln!("{RED}{e}{RESET}");
            return EXIT_OPERATIONAL_ERROR;
        }
    };

    let mut summary = VerifySummary::default();
    for pact in &pacts {
        println!("{BOLD}Consumer: {}{RESET}", pact.document.consumer);
        let setter = HttpStateSetter::new(
            &args.provider_setup_url,
            &args.provider_name,
            &pact.document.consumer,
            custom_headers.clone(),
            verifier.client(),
        );
        let results = match verifier.verify_pact(&pact.document, &setter).await {
            Ok(results) => results,
            Err(e) => {
                eprintln!("{RED}Verification aborted: {e}{RESET}");
                return EXIT_OPERATIONAL_ERROR;
            }
        };
        let passed = results.iter().all(|r| r.outcome.acceptable());
        for result in &results {
            print_result(result, args.verbose);
        }
        summary.results.extend(results);

        if args.publish_results {
            if let Some(code) = publish(&args, broker_client.as_ref(), pact, passed).await {
                return code;
            }
        }
        println!();
    }

    print_summary(&summary);
    if summary.all_passed() {
        EXIT_OK
    } else {
        EXIT_VERIFICATION_FAILED
    }
}

/// Collect the pacts to verify, from a local file or from the broker.
/// Broker-sourced runs keep the client around for result publication.
async fn gather_pacts(args: &Args) -> Result<(Vec<BrokerPact>, Option<HttpBrokerClient>)> {
    if let Some(path) = &args.local_pact {
        let pact = BrokerPact::load_file(path)
            .with_context(|| format!("failed to load pact file {}", path.display()))?;
        if let Some(consumer) = &args.consumer_name {
            if &pact.document.consumer != consumer {
                return Ok((Vec::new(), None));
            }
        }
        return Ok((vec![pact], None));
    }
    let broker_url = args
        .broker_url
        .clone()
        .or_else(config::broker_url_from_env)
        .context("no pact source: pass --broker-url (or set PACT_BROKER_URL), or --local-pact")?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;
    let broker = HttpBrokerClient::new(broker_url, client);
    let pacts = broker
        .pacts_for(&args.provider_name, args.consumer_name.as_deref())
        .await
        .context("failed to fetch pacts from broker")?;
    Ok((pacts, Some(broker)))
}

async fn publish(
    args: &Args,
    broker: Option<&HttpBrokerClient>,
    pact: &BrokerPact,
    passed: bool,
) -> Option<i32> {
    let Some(broker) = broker else {
        eprintln!("{YELLOW}Cannot publish results for a local pact file{RESET}");
        return None;
    };
    let Some(version) = args.provider_version.as_deref() else {
        return None;
    };
    if let Err(e) = broker.publish_result(pact, passed, version).await {
        eprintln!("{RED}Failed to publish verification results: {e}{RESET}");
        return Some(EXIT_OPERATIONAL_ERROR);
    }
    None
}

fn print_result(result: &InteractionResult, verbose: bool) {
    match &result.outcome {
        InteractionOutcome::Pass => {
            println!("Request: {:?} ... {GREEN}PASSED{RESET}", result.description);
        }
        InteractionOutcome::SkippedStateMissing(state) => {
            println!(
                "Request: {:?} ... {YELLOW}SKIPPED{RESET} (provider state {state:?} missing)",
                result.description
            );
        }
        InteractionOutcome::SkippedStateError(message) => {
            println!(
                "Request: {:?} ... {YELLOW}SKIPPED{RESET} (state setup error: {message})",
                result.description
            );
        }
        InteractionOutcome::Fail(mismatches) => {
            println!("Request: {:?} ... {RED}FAILED{RESET}", result.description);
            for mismatch in mismatches {
                println!("  {YELLOW}{}{RESET} {}", mismatch.path, mismatch.reason);
            }
            let body_failed = mismatches.iter().any(|m| m.path.starts_with("$.body"));
            if verbose && body_failed {
                if let (Some(expected), Some(actual)) =
                    (&result.expected_body, &result.actual_body)
                {
                    print_diff(expected, actual);
                }
            }
        }
    }
}

/// Print a unified diff between expected and actual body
fn print_diff(expected: &str, actual: &str) {
    println!("  {DIM}Diff ({GREEN}-expected{DIM}, {RED}+actual{DIM}):{RESET}");
    let diff = TextDiff::from_lines(expected, actual);
    for change in diff.iter_all_changes() {
        let (sign, color) = match change.tag() {
            ChangeTag::Delete => ("-", GREEN),
            ChangeTag::Insert => ("+", RED),
            ChangeTag::Equal => (" ", DIM),
        };
        println!(
            "  {color}{sign} {}{RESET}",
            change.value().trim_end_matches('\n')
        );
    }
}

fn print_summary(summary: &VerifySummary) {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{BOLD}Verification Summary{RESET}");
    println!("  {GREEN}Passed:  {}{RESET}", summary.passed());
    println!("  {RED}Failed:  {}{RESET}", summary.failed());
    println!("  {YELLOW}Skipped: {}{RESET}", summary.skipped());
    if summary.all_passed() {
        println!("{GREEN}All interactions verified!{RESET}");
    } else {
        println!("{RED}{} interaction(s) failed verification.{RESET}", summary.failed());
    }
}
