/*
[INPUT]:  HTTP configuration (base URL, timeouts, credentials, request signer)
[OUTPUT]: Configured reqwest client ready for API calls
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing client behavior
*/

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::error::{PerpxError, Result as HttpResult};
use super::signature::{
    HEADER_REQUEST_ID, HEADER_REQUEST_SIGNATURE, HEADER_REQUEST_TIMESTAMP, HEADER_REQUEST_VERSION,
    RequestSigner,
};
use crate::auth::Ed25519Signer;

const DEFAULT_BASE_URL: &str = "https://api.perpx.exchange";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Credentials for authenticated requests
#[derive(Debug, Clone)]
pub struct Credentials {
    pub jwt_token: String,
}

/// Main HTTP client for the Perpx API
#[derive(Debug)]
pub struct PerpxClient {
    http_client: Client,
    base_url: Url,
    credentials: Option<Credentials>,
    request_signer: Option<RequestSigner>,
}

impl PerpxClient {
    /// Create a new client with default configuration
    pub fn new() -> HttpResult<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> HttpResult<Self> {
        Self::with_config_and_base_url(config, DEFAULT_BASE_URL)
    }

    /// Create a new client with a custom base URL (useful for tests).
    pub fn with_config_and_base_url(config: ClientConfig, base_url: &str) -> HttpResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
            credentials: None,
            request_signer: None,
        })
    }

    /// Set credentials and request signer in one call.
    pub fn set_credentials_and_signer(&mut self, credentials: Credentials, signer: Ed25519Signer) {
        self.credentials = Some(credentials);
        self.request_signer = Some(RequestSigner::new(signer));
    }

    /// Get credentials if set
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Verify that the configured session is usable before trading.
    ///
    /// An expired JWT surfaces here as `TokenExpired` instead of failing the
    /// first order placement.
    pub async fn ensure_session(&self) -> HttpResult<()> {
        self.query_balance().await.map(|_| ())
    }

    pub(crate) fn require_credentials(&self) -> HttpResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| PerpxError::Config("credentials not set".to_string()))
    }

    pub(crate) fn require_request_signer(&self) -> HttpResult<&RequestSigner> {
        self.request_signer
            .as_ref()
            .ok_or_else(|| PerpxError::Config("request signer not set".to_string()))
    }

    pub(crate) fn request(&self, method: Method, endpoint: &str) -> HttpResult<RequestBuilder> {
        let url = self.base_url.join(endpoint)?;
        Ok(self.http_client.request(method, url))
    }

    pub(crate) fn request_with_jwt(
        &self,
        method: Method,
        endpoint: &str,
    ) -> HttpResult<RequestBuilder> {
        let credentials = self.require_credentials()?;
        let builder = self.request(method, endpoint)?;
        Ok(builder.header(AUTHORIZATION, format!("Bearer {}", credentials.jwt_token)))
    }

    /// Build a signed POST: JWT auth plus body-signature headers over `payload`.
    pub(crate) fn post_signed(&self, endpoint: &str, payload: String) -> HttpResult<RequestBuilder> {
        let signer = self.require_request_signer()?;
        let timestamp = unix_timestamp();
        let signature = signer.sign_payload(&payload, timestamp);

        let builder = self
            .request_with_jwt(Method::POST, endpoint)?
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_REQUEST_VERSION, signature.version)
            .header(HEADER_REQUEST_ID, signature.request_id)
            .header(HEADER_REQUEST_TIMESTAMP, signature.timestamp.to_string())
            .header(HEADER_REQUEST_SIGNATURE, signature.signature)
            .body(payload);

        Ok(builder)
    }

    /// Send a request and decode the JSON body, mapping error statuses.
    ///
    /// No transport-level retry here: callers operate on a control-loop
    /// cadence and re-issue on the next cycle.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> HttpResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(serde_json::from_str::<T>(&body)?);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PerpxError::TokenExpired);
        }

        let message = match serde_json::from_str::<JsonValue>(&body) {
            Ok(JsonValue::Object(map)) => map
                .get("message")
                .and_then(|value| value.as_str())
                .map(|s| s.to_string())
                .unwrap_or(body),
            _ => body,
        };

        if status == reqwest::StatusCode::FORBIDDEN
            && message.to_ascii_lowercase().contains("signature")
        {
            return Err(PerpxError::InvalidSignature);
        }

        Err(PerpxError::api_error(status, message))
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
