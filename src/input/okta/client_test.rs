//! HTTP-level tests for the Okta client

use super::client::*;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpOktaClient {
    HttpOktaClient::new(
        format!("{}/api/v1", server.uri()),
        "test-token".to_string(),
        Duration::from_secs(5),
    )
}

fn record(uuid: &str, published: &str) -> serde_json::Value {
    json!({
        "uuid": uuid,
        "published": published,
        "eventType": "user.session.start",
        "severity": "INFO"
    })
}

fn first_request() -> PageRequest {
    PageRequest::First {
        since: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        limit: 1000,
    }
}

#[tokio::test]
async fn test_first_page_sends_auth_since_and_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/logs"))
        .and(header("authorization", "SSWS test-token"))
        .and(header("accept", "application/json"))
        .and(query_param("since", "2024-03-01T12:00:00Z"))
        .and(query_param("limit", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            record("a", "2024-03-01T12:00:01.000Z"),
            record("b", "2024-03-01T12:00:02.000Z"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let page = client_for(&server)
        .fetch_page(&first_request())
        .await
        .unwrap();

    assert_eq!(page.events.len(), 2);
    assert_eq!(page.events[0].uuid, "a");
    assert_eq!(page.skipped, 0);
    assert!(page.next.is_none());
}

#[tokio::test]
async fn test_next_link_is_extracted_and_followed() {
    let server = MockServer::start().await;
    let next_url = format!("{}/api/v1/logs?after=cursor-2", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/v1/logs"))
        .and(query_param("after", "cursor-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([record(
            "c",
            "2024-03-01T12:00:03.000Z"
        )])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/logs"))
        .and(query_param("limit", "1000"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    format!(
                        "<{}/api/v1/logs?limit=1000>; rel=\"self\", <{}>; rel=\"next\"",
                        server.uri(),
                        next_url
                    )
                    .as_str(),
                )
                .set_body_json(json!([record("a", "2024-03-01T12:00:01.000Z")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let first = client.fetch_page(&first_request()).await.unwrap();
    assert_eq!(first.next.as_deref(), Some(next_url.as_str()));

    let second = client
        .fetch_page(&PageRequest::Next(next_url.clone()))
        .await
        .unwrap();
    assert_eq!(second.events[0].uuid, "c");
}

#[tokio::test]
async fn test_next_link_to_another_origin_is_refused() {
    let okta = MockServer::start().await;
    let elsewhere = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&elsewhere)
        .await;

    let err = client_for(&okta)
        .fetch_page(&PageRequest::Next(format!(
            "{}/api/v1/logs?after=cursor-2",
            elsewhere.uri()
        )))
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    match err {
        OktaError::ForeignLink(url) => assert!(url.starts_with(&elsewhere.uri())),
        other => panic!("expected ForeignLink, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_records_are_skipped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            record("a", "2024-03-01T12:00:01.000Z"),
            "not an object",
            { "uuid": "no-published" },
        ])))
        .mount(&server)
        .await;

    let page = client_for(&server)
        .fetch_page(&first_request())
        .await
        .unwrap();

    assert_eq!(page.events.len(), 1);
    assert_eq!(page.skipped, 2);
}

#[tokio::test]
async fn test_rate_limit_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_page(&first_request())
        .await
        .unwrap_err();

    assert!(matches!(err, OktaError::Retryable { status: 429 }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_page(&first_request())
        .await
        .unwrap_err();
    assert!(matches!(err, OktaError::Retryable { status: 503 }));
}

#[tokio::test]
async fn test_unauthorized_is_an_api_error_with_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string(r#"{"errorCode":"E0000011"}"#),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_page(&first_request())
        .await
        .unwrap_err();

    match err {
        OktaError::Api { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("E0000011"));
        }
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_array_body_is_a_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"not": "an array"})))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_page(&first_request())
        .await
        .unwrap_err();
    assert!(matches!(err, OktaError::Parse(_)));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = HttpOktaClient::new(
        format!("{}/api/v1", server.uri()),
        "test-token".to_string(),
        Duration::from_millis(50),
    );
    let err = client.fetch_page(&first_request()).await.unwrap_err();
    assert!(matches!(err, OktaError::Timeout(_)));
}

#[test]
fn test_parse_next_link() {
    let header = r#"<https://acme.okta.com/api/v1/logs?limit=20>; rel="self", <https://acme.okta.com/api/v1/logs?after=123>; rel="next""#;
    assert_eq!(
        parse_next_link(header).as_deref(),
        Some("https://acme.okta.com/api/v1/logs?after=123")
    );
}

#[test]
fn test_parse_next_link_without_next() {
    let header = r#"<https://acme.okta.com/api/v1/logs?limit=20>; rel="self""#;
    assert!(parse_next_link(header).is_none());
    assert!(parse_next_link("garbage").is_none());
    assert!(parse_next_link("").is_none());
}

#[test]
fn test_parse_next_link_unquoted_rel() {
    assert_eq!(
        parse_next_link("<https://x/logs?after=1>; rel=next").as_deref(),
        Some("https://x/logs?after=1")
    );
}

#[test]
fn test_logs_url_ignores_trailing_slash() {
    let client = HttpOktaClient::new(
        "https://acme.okta.com/api/v1/".to_string(),
        "t".to_string(),
        Duration::from_secs(1),
    );
    assert_eq!(client.logs_url(), "https://acme.okta.com/api/v1/logs");
}
