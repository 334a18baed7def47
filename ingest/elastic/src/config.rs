//! Connection configuration for the Elasticsearch transport, following
//! `ElasticConfig::from_env` (`llm/search-elastic/src/client.rs`) and the
//! buffer tunables from `SearchConfig::from_env` (`llm/search/src/config.rs`).

use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::Engine as _;

use ingest_core::buffer::BufferOptions;

/// Connection and auth settings for one Elasticsearch cluster.
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub cloud_id: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl ElasticConfig {
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("ELASTICSEARCH_ENDPOINT")
            .or_else(|_| std::env::var("INGEST_ELASTIC_ENDPOINT"))
            .unwrap_or_else(|_| "http://localhost:9200".to_string());

        let username = std::env::var("ELASTICSEARCH_USERNAME")
            .or_else(|_| std::env::var("ELASTIC_USERNAME"))
            .ok();
        let password = std::env::var("ELASTICSEARCH_PASSWORD")
            .or_else(|_| std::env::var("ELASTIC_PASSWORD"))
            .ok();
        let api_key = std::env::var("ELASTICSEARCH_API_KEY")
            .or_else(|_| std::env::var("ELASTIC_API_KEY"))
            .ok();
        let cloud_id = std::env::var("ELASTIC_CLOUD_ID").ok();

        let timeout = std::env::var("INGEST_ELASTIC_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .map_err(|_| anyhow!("invalid INGEST_ELASTIC_TIMEOUT_SECONDS value"))?;
        let max_retries = std::env::var("INGEST_ELASTIC_MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .map_err(|_| anyhow!("invalid INGEST_ELASTIC_MAX_RETRIES value"))?;

        let final_endpoint = match &cloud_id {
            Some(cloud_id) => parse_cloud_id(cloud_id)?,
            None => endpoint,
        };

        Ok(Self {
            endpoint: final_endpoint,
            username,
            password,
            api_key,
            cloud_id,
            timeout: Duration::from_secs(timeout),
            max_retries,
        })
    }
}

fn parse_cloud_id(cloud_id: &str) -> Result<String> {
    let parts: Vec<&str> = cloud_id.split(':').collect();
    if parts.len() != 2 {
        return Err(anyhow!("invalid cloud_id format"));
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(parts[1])
        .map_err(|_| anyhow!("failed to decode cloud_id"))?;
    let decoded_str = String::from_utf8(decoded).map_err(|_| anyhow!("invalid utf-8 in cloud_id"))?;
    let endpoint_parts: Vec<&str> = decoded_str.split('$').collect();
    if endpoint_parts.is_empty() || endpoint_parts[0].is_empty() {
        return Err(anyhow!("invalid cloud_id content"));
    }
    Ok(format!("https://{}", endpoint_parts[0]))
}

/// The buffer/channel tunables, loaded the same way as
/// `ElasticConfig`: environment variables with documented defaults.
#[derive(Debug, Clone)]
pub struct ChannelEnvConfig {
    pub inbound_max_size: usize,
    pub outbound_max_size: usize,
    pub outbound_max_lifetime: Duration,
    pub export_max_concurrency: usize,
    pub export_max_retries: u32,
}

impl ChannelEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            inbound_max_size: env_parse("INGEST_INBOUND_MAX_SIZE", 10_000)?,
            outbound_max_size: env_parse("INGEST_OUTBOUND_MAX_SIZE", 500)?,
            outbound_max_lifetime: Duration::from_millis(env_parse(
                "INGEST_OUTBOUND_MAX_LIFETIME_MS",
                5_000,
            )?),
            export_max_concurrency: env_parse("INGEST_EXPORT_MAX_CONCURRENCY", 4)?,
            export_max_retries: env_parse("INGEST_EXPORT_MAX_RETRIES", 3)?,
        })
    }

    pub fn into_buffer_options(self) -> BufferOptions {
        BufferOptions {
            inbound_max_size: self.inbound_max_size,
            outbound_max_size: self.outbound_max_size,
            outbound_max_lifetime: self.outbound_max_lifetime,
            export_max_concurrency: self.export_max_concurrency,
            export_max_retries: self.export_max_retries,
            ..BufferOptions::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow!("invalid {name} value: {value}")),
        Err(_) => Ok(default),
    }
}

/// Namespace resolution for data-stream names: first non-empty of `DOTNET_ENVIRONMENT`,
/// `ASPNETCORE_ENVIRONMENT`, `ENVIRONMENT`; else `"development"`.
pub fn resolve_namespace() -> String {
    ["DOTNET_ENVIRONMENT", "ASPNETCORE_ENVIRONMENT", "ENVIRONMENT"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "development".to_string())
}

/// `"{type}-{dataset}-{namespace}"`.
pub fn data_stream_name(kind: &str, dataset: &str, namespace: Option<&str>) -> String {
    let namespace = namespace
        .map(str::to_string)
        .unwrap_or_else(resolve_namespace);
    format!("{kind}-{dataset}-{namespace}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_stream_name_follows_type_dataset_namespace_shape() {
        assert_eq!(
            data_stream_name("logs", "nginx", Some("prod")),
            "logs-nginx-prod"
        );
    }

    #[test]
    fn cloud_id_parsing_rejects_malformed_input() {
        assert!(parse_cloud_id("not-a-cloud-id").is_err());
    }

    #[test]
    fn cloud_id_parsing_decodes_base64_segment() {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode("us-east-1.aws.found.io$abc$def");
        let cloud_id = format!("deployment:{encoded}");
        assert_eq!(
            parse_cloud_id(&cloud_id).unwrap(),
            "https://us-east-1.aws.found.io"
        );
    }
}
