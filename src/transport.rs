use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::TransportMode;
use crate::error::GatorError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Xml,
    Text,
}

/// A single HTTP request as planned by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: Option<String>,
    pub params: Vec<(String, String)>,
    pub format: ResponseFormat,
    pub mode: TransportMode,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn new(method: HttpMethod, url: Option<String>) -> Self {
        Self {
            method,
            url,
            params: Vec::new(),
            format: ResponseFormat::Json,
            mode: TransportMode::Async,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, Some(url.into()))
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, Some(url.into()))
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Drops the endpoint so the request completes immediately with no data.
    pub fn without_endpoint(mut self) -> Self {
        self.url = None;
        self
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// A parsed, well-formed XML response. Kept as source text; never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    source: String,
    root: String,
}

impl XmlDocument {
    pub fn parse(source: &str) -> Result<Self, GatorError> {
        let mut reader = Reader::from_str(source);
        let mut root = None;
        loop {
            match reader.read_event() {
                Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => {
                    if root.is_none() {
                        root = Some(String::from_utf8_lossy(tag.name().as_ref()).into_owned());
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(GatorError::Parse(err.to_string())),
            }
        }
        let root =
            root.ok_or_else(|| GatorError::Parse("XML document has no root element".to_string()))?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn root_name(&self) -> &str {
        &self.root
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Json(Value),
    Xml(XmlDocument),
    Text(String),
}

impl RawPayload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RawPayload::Json(value) => Some(value),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one request. `Ok(None)` means the request had no endpoint and
    /// nothing was sent.
    async fn perform(&self, request: &TransportRequest) -> Result<Option<RawPayload>, GatorError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpTransport {
    pub fn new(default_timeout: Duration) -> Result<Self, GatorError> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers()?)
            .build()
            .map_err(|err| GatorError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            default_timeout,
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    async fn perform_async(
        &self,
        url: &str,
        request: &TransportRequest,
    ) -> Result<Option<RawPayload>, GatorError> {
        let builder = match request.method {
            HttpMethod::Get => self.client.get(request_url(url, &request.params)?),
            HttpMethod::Post => self.client.post(url).form(&request.params),
        };
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let exchange = async {
            let response = builder
                .timeout(timeout)
                .send()
                .await
                .map_err(|err| map_request_error(&err, timeout))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|err| map_request_error(&err, timeout))?;
            Ok::<_, GatorError>((status, body))
        };
        let (status, body) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| GatorError::Timeout(timeout.as_millis() as u64))??;
        tracing::debug!(url, status, "response received");
        classify_response(status, &body, request.format)
    }

    async fn perform_sync(
        &self,
        url: &str,
        request: &TransportRequest,
    ) -> Result<Option<RawPayload>, GatorError> {
        let url = url.to_string();
        let format = request.format;
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let request = request.clone();
        let exchange =
            tokio::task::spawn_blocking(move || blocking_exchange(&url, &request, timeout));
        let (status, body) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| GatorError::Timeout(timeout.as_millis() as u64))?
            .map_err(|err| GatorError::Transport(err.to_string()))??;
        classify_response(status, &body, format)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, request: &TransportRequest) -> Result<Option<RawPayload>, GatorError> {
        let Some(url) = request.endpoint() else {
            return Ok(None);
        };
        tracing::debug!(url, method = ?request.method, mode = ?request.mode, "sending request");
        match request.mode {
            TransportMode::Async => self.perform_async(url, request).await,
            TransportMode::Sync => self.perform_sync(url, request).await,
        }
    }
}

fn default_headers() -> Result<HeaderMap, GatorError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("mascp-gator/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| GatorError::Transport(err.to_string()))?,
    );
    Ok(headers)
}

/// Blocking exchange for services that cannot run on the async client. Runs
/// on the blocking pool; the client is built and dropped on that thread.
fn blocking_exchange(
    url: &str,
    request: &TransportRequest,
    timeout: Duration,
) -> Result<(u16, String), GatorError> {
    let client = reqwest::blocking::Client::builder()
        .default_headers(default_headers()?)
        .timeout(timeout)
        .build()
        .map_err(|err| GatorError::Transport(err.to_string()))?;
    let target = match request.method {
        HttpMethod::Get => request_url(url, &request.params)?,
        HttpMethod::Post => url.to_string(),
    };
    let response = send_with_retries(timeout, || match request.method {
        HttpMethod::Get => client.get(&target),
        HttpMethod::Post => client.post(&target).form(&request.params),
    })?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .map_err(|err| map_request_error(&err, timeout))?;
    Ok((status, body))
}

fn send_with_retries<F>(
    timeout: Duration,
    mut make_req: F,
) -> Result<reqwest::blocking::Response, GatorError>
where
    F: FnMut() -> reqwest::blocking::RequestBuilder,
{
    const MAX_RETRIES: usize = 3;
    const BASE_DELAY_MS: u64 = 200;
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    tracing::debug!(status, attempt, "retrying request");
                    std::thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    tracing::debug!(error = %err, attempt, "retrying request");
                    std::thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Err(map_request_error(&err, timeout));
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Timeouts are final: the caller's timeout bounds the whole exchange.
fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() && !err.is_timeout()
}

fn map_request_error(err: &reqwest::Error, timeout: Duration) -> GatorError {
    if err.is_timeout() {
        GatorError::Timeout(timeout.as_millis() as u64)
    } else if err.is_connect() {
        GatorError::ZeroStatus(err.to_string())
    } else {
        GatorError::Transport(err.to_string())
    }
}

/// Appends GET parameters to `url`, merging with any query string already
/// present and never leaving a dangling `?`.
pub fn request_url(url: &str, params: &[(String, String)]) -> Result<String, GatorError> {
    let mut parsed =
        Url::parse(url).map_err(|err| GatorError::Transport(format!("invalid url {url}: {err}")))?;
    if !params.is_empty() {
        parsed
            .query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    if parsed.query() == Some("") {
        parsed.set_query(None);
    }
    Ok(parsed.to_string())
}

/// Maps a completed exchange onto the transport contract.
pub fn classify_response(
    status: u16,
    body: &str,
    format: ResponseFormat,
) -> Result<Option<RawPayload>, GatorError> {
    match status {
        0 => Err(GatorError::ZeroStatus(if body.is_empty() {
            "no response".to_string()
        } else {
            body.to_string()
        })),
        200 => parse_body(body, format).map(Some),
        status => Err(GatorError::Status {
            status,
            body: body.to_string(),
        }),
    }
}

fn parse_body(body: &str, format: ResponseFormat) -> Result<RawPayload, GatorError> {
    match format {
        ResponseFormat::Json => match serde_json::from_str::<Value>(body) {
            Ok(value) => Ok(RawPayload::Json(value)),
            // Truncated or empty bodies count as an empty success.
            Err(err) if err.is_eof() => Ok(RawPayload::Json(Value::Object(Map::new()))),
            Err(err) => Err(GatorError::Parse(err.to_string())),
        },
        ResponseFormat::Xml => XmlDocument::parse(body).map(RawPayload::Xml),
        ResponseFormat::Text => Ok(RawPayload::Text(body.to_string())),
    }
}
