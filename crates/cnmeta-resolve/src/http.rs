use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cnmeta_core::{HttpConfig, HttpMethod, Page, RequestSpec};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{ResolveError, Result};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// Network access used by providers and the translator sync.
///
/// Implementations follow redirects; the returned page carries the final URL.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_document(&self, request: &RequestSpec) -> Result<Page>;

    async fn fetch_raw(&self, url: &str) -> Result<String>;
}

// ─── HttpTransport ────────────────────────────────────────────────────────────

/// `reqwest`-backed transport that spaces requests by a minimum interval.
/// Failures are returned as-is; nothing is retried.
pub struct HttpTransport {
    client: reqwest::Client,
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn send(&self, request: &RequestSpec) -> Result<reqwest::Response> {
        self.wait_for_rate_limit().await;
        debug!("{} {}", request.method(), request.url());

        let headers = to_header_map(request)?;
        let builder = match request.method() {
            HttpMethod::Get => self.client.get(request.url()),
            HttpMethod::Post => {
                let mut builder = self.client.post(request.url()).body(request.body().to_string());
                if !headers.contains_key(CONTENT_TYPE) {
                    builder = builder.header(CONTENT_TYPE, FORM_CONTENT_TYPE);
                }
                builder
            }
        };

        let resp = builder.headers(headers).send().await?;
        if !resp.status().is_success() {
            return Err(ResolveError::Status {
                url: request.url().to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_document(&self, request: &RequestSpec) -> Result<Page> {
        let resp = self.send(request).await?;
        let final_url = resp.url().to_string();
        let html = resp.text().await?;
        Ok(Page::new(final_url, html))
    }

    async fn fetch_raw(&self, url: &str) -> Result<String> {
        let resp = self.send(&RequestSpec::get(url)).await?;
        Ok(resp.text().await?)
    }
}

fn to_header_map(request: &RequestSpec) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in request.headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ResolveError::Parse(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ResolveError::Parse(format!("invalid header value for {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

// ─── Form encoding ────────────────────────────────────────────────────────────

/// Encode a JSON object as an `application/x-www-form-urlencoded` body.
///
/// Arrays are joined with commas, nested objects are serialized as compact
/// JSON, and scalars are written as their plain text.
pub fn encode_form(fields: &Value) -> String {
    let Some(map) = fields.as_object() else {
        return String::new();
    };
    map.iter()
        .map(|(key, value)| {
            let text = match value {
                Value::Array(items) => items
                    .iter()
                    .map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(","),
                Value::Object(_) => value.to_string(),
                other => scalar_text(other),
            };
            format!(
                "{}={}",
                encode_uri_component(key),
                encode_uri_component(&text)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Percent-encode like ECMAScript `encodeURIComponent`, which also leaves
/// `!*'()` untouched.
pub fn encode_uri_component(input: &str) -> String {
    urlencoding::encode(input)
        .replace("%21", "!")
        .replace("%2A", "*")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
}
