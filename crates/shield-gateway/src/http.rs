use crate::{
    CredentialStore, Gateway, GatewayError, GatewayErrorKind, LoginResponse, LogoutResponse,
};
use async_trait::async_trait;
use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use shield_core::{Assessment, Evidence};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.browseshield.dev/v1";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Only HTTPS backends are accepted, except for loopback development servers.
pub fn validate_base_url(raw: &str) -> Result<Url, GatewayError> {
    let parsed = Url::parse(raw).map_err(|_| {
        GatewayError::new(
            GatewayErrorKind::Config,
            format!("Invalid API base URL: {raw}"),
        )
    })?;
    if parsed.scheme() == "https" {
        return Ok(parsed);
    }
    match parsed.host_str() {
        Some("localhost") | Some("127.0.0.1") => Ok(parsed),
        _ => Err(GatewayError::new(
            GatewayErrorKind::Config,
            "API base URL must use HTTPS (non-localhost)",
        )),
    }
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    credentials: CredentialStore,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig, credentials: CredentialStore) -> Result<Self, GatewayError> {
        let base = validate_base_url(&config.base_url)?;
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if matches!(base.host_str(), Some("localhost") | Some("127.0.0.1")) {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|err| {
                GatewayError::new(
                    GatewayErrorKind::Config,
                    format!("failed to build http client: {err}"),
                )
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = self.credentials.token().await? {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| GatewayError::network(format!("request to {path} failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(status, &body);
            debug!(
                event = "gateway_http_error",
                method = %method,
                path,
                status = status.as_u16(),
                message = %message
            );
            return Err(GatewayError::http(status.as_u16(), message));
        }

        response.json::<T>().await.map_err(|err| {
            GatewayError::new(
                GatewayErrorKind::InvalidResponse,
                format!("invalid response from {path}: {err}"),
            )
        })
    }
}

/// Prefers the backend's own `message`, then `error`, then the reason phrase.
fn error_message(status: StatusCode, body: &str) -> String {
    let from_body = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["message", "error"].iter().find_map(|key| {
            value
                .get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
    });
    from_body.unwrap_or_else(|| {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    })
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn is_authenticated(&self) -> bool {
        self.credentials.has_token().await
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, GatewayError> {
        let data: LoginResponse = self
            .request(
                Method::POST,
                "/auth/login",
                Some(json!({ "email": email, "password": password })),
            )
            .await?;
        self.credentials.save(&data.access_token).await?;
        Ok(data)
    }

    async fn logout(&self) -> Result<LogoutResponse, GatewayError> {
        let result = self
            .request::<LogoutResponse>(Method::POST, "/auth/logout", None)
            .await;
        if let Err(err) = self.credentials.clear().await {
            warn!(event = "credential_clear_failed", error = %err);
            if result.is_ok() {
                return Err(err.into());
            }
        }
        result
    }

    async fn assess_url(
        &self,
        url: &str,
        evidence: &Evidence,
    ) -> Result<Assessment, GatewayError> {
        let assessment: Assessment = self
            .request(
                Method::POST,
                "/assess",
                Some(json!({ "url": url, "scan_data": evidence })),
            )
            .await?;
        assessment.validate().map_err(|err| {
            GatewayError::new(GatewayErrorKind::InvalidResponse, err.to_string())
        })?;
        Ok(assessment)
    }
}
