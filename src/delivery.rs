//! Outbound HTTP delivery of query results.
//!
//! A delivery decrypts the tenant's secret, builds a Basic auth header and
//! sends the serialized rows to the tenant's endpoint. Any HTTP completion,
//! whatever its status, is a completed delivery; only transport failures and
//! the pre-flight checks (decryption, method) are failures.
//!
//! The plaintext secret never leaves this module. What is returned for the
//! audit record carries a redacted Authorization header, and response data is
//! scrubbed of the `username:secret` pair and its base64 form before it is
//! handed back. The bare secret is not scrubbed: a short secret would match
//! arbitrary bytes of an unrelated response.

use crate::crypto::EncryptionService;
use crate::error::{ForwarderError, Result};
use crate::persistence::TenantConfig;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Authorization header value recorded in place of the real credential.
pub const REDACTED_AUTHORIZATION: &str = "Basic ***";

const REDACTED: &str = "***";
const JSON_CONTENT_TYPE: &str = "application/json";

/// HTTP methods a tenant endpoint may be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
}

impl HttpMethod {
    /// Parses a configured method name, ignoring case.
    pub fn parse(method: &str) -> Result<Self> {
        match method.trim().to_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            _ => Err(ForwarderError::unsupported_method(method)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

/// The request as it is recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestMeta {
    pub method: String,
    pub url: String,
    pub headers: Map<String, Value>,
    pub body: String,
}

impl RequestMeta {
    /// Builds the recorded form of a request. The Authorization header is
    /// always the redacted placeholder.
    pub fn new(method: &str, url: &str, body: String) -> Self {
        let mut headers = Map::new();
        headers.insert(
            "Authorization".to_string(),
            Value::String(REDACTED_AUTHORIZATION.to_string()),
        );
        headers.insert(
            "Content-Type".to_string(),
            Value::String(JSON_CONTENT_TYPE.to_string()),
        );

        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers,
            body,
        }
    }
}

/// A response received from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMeta {
    pub status: u16,
    /// Header names are lowercase; repeated headers are joined with ", ".
    pub headers: Map<String, Value>,
    pub body: String,
}

impl ResponseMeta {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// How a delivery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "detail")]
pub enum DeliveryOutcome {
    /// The endpoint answered, with any status code.
    Completed(ResponseMeta),
    /// Nothing was received: decryption, method validation or transport failed.
    Failed(String),
}

/// One delivery attempt: what was sent and what came back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub request: RequestMeta,
    pub outcome: DeliveryOutcome,
}

impl Delivery {
    pub fn response(&self) -> Option<&ResponseMeta> {
        match &self.outcome {
            DeliveryOutcome::Completed(response) => Some(response),
            DeliveryOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            DeliveryOutcome::Completed(_) => None,
            DeliveryOutcome::Failed(error) => Some(error),
        }
    }
}

/// The forms of the credential that are scrubbed from response data.
struct Credentials {
    pair: Zeroizing<String>,
    encoded: Zeroizing<String>,
}

impl Credentials {
    fn new(username: &str, secret: Zeroizing<String>) -> Self {
        let pair = Zeroizing::new(format!("{username}:{}", secret.as_str()));
        let encoded = Zeroizing::new(BASE64.encode(pair.as_bytes()));
        Self { pair, encoded }
    }

    fn header_value(&self) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Basic {}", self.encoded.as_str()))
            .map_err(|e| ForwarderError::internal(format!("Invalid Authorization header: {e}")))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Replaces every occurrence of the encoded and plain pair.
    fn redact(&self, text: &str) -> String {
        text.replace(self.encoded.as_str(), REDACTED)
            .replace(self.pair.as_str(), REDACTED)
    }
}

/// HTTP client used for deliveries.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: Client,
}

impl DeliveryClient {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ForwarderError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client })
    }

    /// Sends `body` to the tenant's endpoint.
    ///
    /// Never fails: every problem is captured in the returned outcome.
    pub async fn deliver(
        &self,
        config: &TenantConfig,
        body: &str,
        encryption: &EncryptionService,
    ) -> Delivery {
        let request = RequestMeta::new(
            &config.api_request_type,
            &config.api_endpoint,
            body.to_string(),
        );

        let outcome = match self.send(config, body, encryption).await {
            Ok(response) => {
                info!("Endpoint answered with HTTP {}", response.status);
                DeliveryOutcome::Completed(response)
            }
            Err(e) => {
                warn!("Delivery failed: {}", e);
                DeliveryOutcome::Failed(e.to_string())
            }
        };

        Delivery { request, outcome }
    }

    async fn send(
        &self,
        config: &TenantConfig,
        body: &str,
        encryption: &EncryptionService,
    ) -> Result<ResponseMeta> {
        let secret = Zeroizing::new(encryption.decrypt(&config.api_password)?);
        let credentials = Credentials::new(&config.api_username, secret);
        let authorization = credentials.header_value()?;

        let method = HttpMethod::parse(&config.api_request_type)?;

        info!(
            "Sending {} bytes to {} ({})",
            body.len(),
            config.api_endpoint,
            method
        );

        let response = self
            .client
            .request(method.into(), &config.api_endpoint)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| ForwarderError::connection(credentials.redact(&describe_error(&e))))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers(), &credentials);
        let text = response
            .text()
            .await
            .map_err(|e| ForwarderError::connection(credentials.redact(&describe_error(&e))))?;

        debug!("Received {} response bytes", text.len());

        Ok(ResponseMeta {
            status,
            headers,
            body: credentials.redact(&text),
        })
    }
}

/// Flattens response headers into a JSON object.
fn collect_headers(headers: &HeaderMap, credentials: &Credentials) -> Map<String, Value> {
    let mut map = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(
            name.as_str().to_string(),
            Value::String(credentials.redact(&joined)),
        );
    }
    map
}

/// reqwest's own message is terse; append the underlying causes.
fn describe_error(error: &reqwest::Error) -> String {
    let mut message = if error.is_timeout() {
        format!("Request timed out: {error}")
    } else {
        error.to_string()
    };

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}
