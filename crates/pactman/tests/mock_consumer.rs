//! End-to-end consumer-side run: declare interactions, exercise them over
//! the real HTTP mock transport, and check the emitted pact file.

use pactman::matchers::{like, term, Matcher};
use pactman::pact_file::load_pact_file;
use pactman::{Consumer, Provider, RequestTemplate, ResponseTemplate, SpecVersion};
use serde_json::json;

fn zoo_pact(dir: &std::path::Path) -> pactman::Pact {
    Consumer::new("Zoo App")
        .has_pact_with(Provider::new("Animal Service"))
        .version(SpecVersion::V3)
        .pact_dir(dir)
        .use_mock_server(true)
        .build()
}

#[tokio::test]
async fn consumer_run_produces_pact_file() {
    let dir = tempfile::tempdir().unwrap();
    let pact = zoo_pact(dir.path());

    pact.given("an alligator named Mary exists")
        .upon_receiving("a request for an alligator")
        .with_request(
            RequestTemplate::new("GET", "/alligators/Mary").header("Accept", "application/json"),
        )
        .will_respond_with(
            ResponseTemplate::new(200)
                .header("Content-Type", "application/json")
                .body(Matcher::object([
                    ("name", like("Mary")),
                    ("dob", term(r"\d{4}-\d{2}-\d{2}", "1999-02-03")),
                ])),
        )
        .unwrap();

    let session = pact.start_mocking().await.unwrap();
    let url = format!("{}/alligators/Mary", session.base_url());
    let response = reqwest::Client::new()
        .get(&url)
        .header("Accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("application/json"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"name": "Mary", "dob": "1999-02-03"}));

    session.verify().unwrap();

    let path = pact.pact_file_path();
    assert!(path
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .eq("zoo_app-animal_service.json"));
    let document = load_pact_file(&path).unwrap();
    assert_eq!(document.consumer, "Zoo App");
    assert_eq!(document.provider, "Animal Service");
    assert_eq!(document.spec_version, SpecVersion::V3);
    assert_eq!(document.interactions.len(), 1);
    let interaction = &document.interactions[0];
    assert_eq!(
        interaction.provider_states[0].name,
        "an alligator named Mary exists"
    );
    assert!(!interaction.response.rules.body.is_empty());
}

#[tokio::test]
async fn mismatching_request_gets_500_and_fails_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let pact = zoo_pact(dir.path());

    pact.upon_receiving("a request for all alligators")
        .with_request(RequestTemplate::new("GET", "/alligators"))
        .will_respond_with(ResponseTemplate::new(200).json_body(json!([])))
        .unwrap();

    let session = pact.start_mocking().await.unwrap();
    let url = format!("{}/crocodiles", session.base_url());
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status().as_u16(), 500);
    let text = response.text().await.unwrap();
    assert!(text.contains("did not match any registered interaction"));

    let error = session.verify().unwrap_err();
    assert_eq!(error.unused, vec!["a request for all alligators".to_string()]);
    assert!(!error.failures.is_empty());

    // the failed session must not write a pact file
    assert!(!pact.pact_file_path().exists());
}

#[tokio::test]
async fn query_and_body_matching_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let pact = zoo_pact(dir.path());

    pact.upon_receiving("a search for alligators")
        .with_request(
            RequestTemplate::new("POST", "/search")
                .query("species", "alligator")
                .header("Content-Type", "application/json")
                .body(like(json!({"max_results": 10}))),
        )
        .will_respond_with(ResponseTemplate::new(200).json_body(json!({"results": []})))
        .unwrap();

    let session = pact.start_mocking().await.unwrap();
    let url = format!("{}/search?species=alligator", session.base_url());
    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({"max_results": 25}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let requests = session.received_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/search");

    session.verify().unwrap();

    // the pact file records the example, not the actual call
    let document = load_pact_file(&pact.pact_file_path()).unwrap();
    assert_eq!(
        document.interactions[0].request.body,
        Some(json!({"max_results": 10}))
    );
}
