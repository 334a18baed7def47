use ingest_core::transport::{Method, Transport};
use ingest_elastic::{ElasticConfig, ElasticTransport};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(endpoint: String) -> ElasticConfig {
    ElasticConfig {
        endpoint,
        username: None,
        password: None,
        api_key: Some("test-key".to_string()),
        cloud_id: None,
        timeout: Duration::from_secs(5),
        max_retries: 3,
    }
}

#[tokio::test]
async fn get_request_parses_json_body_and_carries_api_key_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .and(header("authorization", "ApiKey test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "green" })))
        .mount(&server)
        .await;

    let transport = ElasticTransport::new(config_for(server.uri())).unwrap();
    let response = transport
        .request(Method::Get, "_cluster/health", None)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body.unwrap()["status"], serde_json::json!("green"));
}

#[tokio::test]
async fn bulk_raw_body_is_sent_as_ndjson_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("content-type", "application/x-ndjson"))
        .and(body_string_contains("\"index\""))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "took": 1, "errors": false, "items": [] })),
        )
        .mount(&server)
        .await;

    let transport = ElasticTransport::new(config_for(server.uri())).unwrap();
    let raw = "{\"index\":{\"_index\":\"logs-1\"}}\n{\"field\":\"value\"}\n".to_string();
    let response = transport
        .request_raw(Method::Post, "_bulk", raw, "application/x-ndjson")
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body.unwrap()["errors"], serde_json::json!(false));
}

#[tokio::test]
async fn head_request_carries_no_body() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/widgets"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let transport = ElasticTransport::new(config_for(server.uri())).unwrap();
    let response = transport.request(Method::Head, "widgets", None).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body.is_none());
}

#[tokio::test]
async fn not_found_status_is_reported_without_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing-index"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": { "type": "index_not_found_exception" }
        })))
        .mount(&server)
        .await;

    let transport = ElasticTransport::new(config_for(server.uri())).unwrap();
    let response = transport
        .request(Method::Get, "missing-index", None)
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert!(response.body.unwrap().get("error").is_some());
}
