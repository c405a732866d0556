use std::net::TcpListener;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use httpmock::prelude::*;
use serde_json::json;

use mascp_gator::domain::TransportMode;
use mascp_gator::error::GatorError;
use mascp_gator::transport::{
    DEFAULT_TIMEOUT, HttpMethod, HttpTransport, RawPayload, ResponseFormat, Transport,
    TransportRequest, classify_response,
};

/// Accepts TCP connections (through the backlog) but never answers.
fn silent_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/slow", listener.local_addr().unwrap());
    (listener, url)
}

#[test]
fn zero_status_mentions_the_condition() {
    let err = classify_response(0, "", ResponseFormat::Json).unwrap_err();
    assert_matches!(err, GatorError::ZeroStatus(_));
    assert!(err.to_string().contains("Zero return status"));
    assert!(err.is_transport());
}

#[test]
fn non_success_status_carries_the_body() {
    let err = classify_response(500, "Internal error", ResponseFormat::Json).unwrap_err();
    assert_matches!(&err, GatorError::Status { status: 500, body } if body == "Internal error");
    assert!(err.to_string().contains("Internal error"));

    // only 200 counts as success
    assert_matches!(
        classify_response(204, "", ResponseFormat::Json),
        Err(GatorError::Status { status: 204, .. })
    );
}

#[test]
fn success_is_parsed_per_format() {
    assert_eq!(
        classify_response(200, r#"{"data": [1]}"#, ResponseFormat::Json).unwrap(),
        Some(RawPayload::Json(json!({"data": [1]})))
    );
    assert_eq!(
        classify_response(200, "plain", ResponseFormat::Text).unwrap(),
        Some(RawPayload::Text("plain".to_string()))
    );
    let xml = classify_response(200, "<gene id=\"1\"/>", ResponseFormat::Xml)
        .unwrap()
        .unwrap();
    assert_matches!(xml, RawPayload::Xml(doc) if doc.root_name() == "gene");
}

#[tokio::test]
async fn missing_url_short_circuits_without_network() {
    let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
    let request = TransportRequest::new(HttpMethod::Get, Some(String::new())).param("agi", "x");
    assert_eq!(transport.perform(&request).await, Ok(None));

    let request = TransportRequest::get("https://example.org/").without_endpoint();
    assert_eq!(transport.perform(&request).await, Ok(None));
}

#[tokio::test]
async fn get_parameters_merge_with_existing_query() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api")
                .query_param("format", "json")
                .query_param("agi", "AT1G01010")
                .query_param("service", "tair");
            then.status(200).json_body(json!({"name": "ARV1"}));
        })
        .await;

    let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
    let request = TransportRequest::get(server.url("/api?format=json"))
        .param("agi", "AT1G01010")
        .param("service", "tair");
    let payload = transport.perform(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(payload, Some(RawPayload::Json(json!({"name": "ARV1"}))));
}

#[tokio::test]
async fn post_parameters_are_form_encoded() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/submit")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("agi=at1g01010&note=ms+data");
            then.status(200).body("accepted");
        })
        .await;

    let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
    let request = TransportRequest::post(server.url("/submit"))
        .param("agi", "at1g01010")
        .param("note", "ms data")
        .with_format(ResponseFormat::Text);
    let payload = transport.perform(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(payload, Some(RawPayload::Text("accepted".to_string())));
}

#[tokio::test]
async fn server_error_body_is_reported() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/broken");
            then.status(500).body("Internal error");
        })
        .await;

    let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
    let err = transport
        .perform(&TransportRequest::get(server.url("/broken")))
        .await
        .unwrap_err();
    assert_matches!(err, GatorError::Status { status: 500, body } if body == "Internal error");
}

#[tokio::test]
async fn sync_mode_uses_the_same_contract() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/legacy").query_param("agi", "at1g01010");
            then.status(200).body("<entry id=\"1\"/>");
        })
        .await;

    let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
    let request = TransportRequest::get(server.url("/legacy"))
        .param("agi", "at1g01010")
        .with_format(ResponseFormat::Xml)
        .with_mode(TransportMode::Sync);
    let payload = transport.perform(&request).await.unwrap().unwrap();

    mock.assert_async().await;
    assert_matches!(payload, RawPayload::Xml(doc) if doc.root_name() == "entry");
}

#[tokio::test]
async fn refused_connection_is_zero_status() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
    let err = transport
        .perform(&TransportRequest::get(format!("http://{addr}/")))
        .await
        .unwrap_err();
    assert_matches!(err, GatorError::ZeroStatus(_));
    assert!(err.to_string().contains("Zero return status"));
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow");
            then.status(200)
                .delay(Duration::from_secs(2))
                .json_body(json!({}));
        })
        .await;

    let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
    let request =
        TransportRequest::get(server.url("/slow")).with_timeout(Duration::from_millis(200));
    let err = transport.perform(&request).await.unwrap_err();
    assert_eq!(err, GatorError::Timeout(200));
}

#[tokio::test]
async fn silent_server_times_out_in_async_mode() {
    let (_listener, url) = silent_listener();
    let transport = HttpTransport::new(Duration::from_millis(300)).unwrap();

    let started = Instant::now();
    let err = transport
        .perform(&TransportRequest::get(url))
        .await
        .unwrap_err();
    assert_eq!(err, GatorError::Timeout(300));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn silent_server_times_out_in_sync_mode_without_retrying() {
    let (_listener, url) = silent_listener();
    let transport = HttpTransport::new(Duration::from_millis(300)).unwrap();

    let started = Instant::now();
    let request = TransportRequest::get(url).with_mode(TransportMode::Sync);
    let err = transport.perform(&request).await.unwrap_err();
    assert_eq!(err, GatorError::Timeout(300));
    assert!(started.elapsed() < Duration::from_secs(2));
}
