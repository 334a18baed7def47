//! A `reqwest`-backed `Transport`, carrying the auth-header logic from
//! `ElasticClient::request_sync` (`llm/search-elastic/src/client.rs`)
//! into an async implementation of `ingest_core::transport::Transport`.

use async_trait::async_trait;
use base64::Engine as _;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use url::Url;

use ingest_core::error::{IngestError, IngestResult};
use ingest_core::transport::{Method as IngestMethod, Transport, TransportResponse};

use crate::config::ElasticConfig;

pub struct ElasticTransport {
    config: ElasticConfig,
    http_client: Client,
    base_url: Url,
}

impl ElasticTransport {
    pub fn new(config: ElasticConfig) -> IngestResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| IngestError::internal(format!("failed to build http client: {err}")))?;

        let base_url = Url::parse(&config.endpoint)
            .map_err(|err| IngestError::internal(format!("invalid endpoint url: {err}")))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    fn authorize(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.config.api_key {
            request = request.header(AUTHORIZATION, format!("ApiKey {api_key}"));
        } else if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            let auth = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            request = request.header(AUTHORIZATION, format!("Basic {auth}"));
        }
        request
    }

    fn method(method: IngestMethod) -> reqwest::Method {
        match method {
            IngestMethod::Get => reqwest::Method::GET,
            IngestMethod::Put => reqwest::Method::PUT,
            IngestMethod::Post => reqwest::Method::POST,
            IngestMethod::Delete => reqwest::Method::DELETE,
            IngestMethod::Head => reqwest::Method::HEAD,
        }
    }

    async fn send(
        &self,
        method: IngestMethod,
        path: &str,
        json_body: Option<Value>,
        raw_body: Option<(String, &str)>,
    ) -> IngestResult<TransportResponse> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| IngestError::internal(format!("failed to build url for {path}: {err}")))?;

        let mut request = self.http_client.request(Self::method(method), url);
        request = self.authorize(request);

        if let Some((body, content_type)) = raw_body {
            request = request.header(CONTENT_TYPE, content_type).body(body);
        } else if let Some(body) = json_body {
            request = request.json(&body);
        }

        debug!("{} {}", method.as_str(), path);

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();

        if method == IngestMethod::Head {
            return Ok(TransportResponse {
                status,
                body: None,
                raw: None,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|err| IngestError::NetworkTransient(err.to_string()))?;
        if text.is_empty() {
            return Ok(TransportResponse {
                status,
                body: None,
                raw: None,
            });
        }

        let body = serde_json::from_str::<Value>(&text).ok();
        if body.is_none() {
            warn!("non-json response body from {path} (status {status})");
        }
        Ok(TransportResponse {
            status,
            body,
            raw: Some(text),
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> IngestError {
    if err.is_timeout() || err.is_connect() {
        IngestError::NetworkTransient(err.to_string())
    } else {
        IngestError::NetworkFatal(err.to_string())
    }
}

#[async_trait]
impl Transport for ElasticTransport {
    async fn request(
        &self,
        method: IngestMethod,
        path: &str,
        body: Option<Value>,
    ) -> IngestResult<TransportResponse> {
        self.send(method, path, body, None).await
    }

    async fn request_raw(
        &self,
        method: IngestMethod,
        path: &str,
        raw_body: String,
        content_type: &str,
    ) -> IngestResult<TransportResponse> {
        self.send(method, path, None, Some((raw_body, content_type))).await
    }
}
