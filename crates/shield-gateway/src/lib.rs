use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shield_core::{Assessment, Evidence};
use std::fmt;
use thiserror::Error;

pub mod credentials;
pub mod http;
pub mod stub;

pub use credentials::{CredentialError, CredentialStore};
pub use http::{validate_base_url, GatewayConfig, HttpGateway, DEFAULT_API_BASE};
pub use shield_core::protocol::User;
pub use stub::StubGateway;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    Authentication,
    Network,
    Http,
    InvalidResponse,
    Config,
    Storage,
}

impl GatewayErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::Http => "http",
            Self::InvalidResponse => "invalid_response",
            Self::Config => "config",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a gateway call. `message` is meant for the user; `status` is the
/// HTTP status when the backend answered at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        let kind = if status == 401 || status == 403 {
            GatewayErrorKind::Authentication
        } else {
            GatewayErrorKind::Http
        };
        Self {
            kind,
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Network, message)
    }
}

impl From<CredentialError> for GatewayError {
    fn from(value: CredentialError) -> Self {
        GatewayError::new(GatewayErrorKind::Storage, value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogoutResponse {
    #[serde(default)]
    pub message: String,
}

/// Authentication and risk-assessment backend consumed by the orchestrator.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Resolves from the locally persisted credential; never fails.
    async fn is_authenticated(&self) -> bool;

    /// Persists the access token on success.
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, GatewayError>;

    /// Clears the persisted credential even when the remote call fails.
    async fn logout(&self) -> Result<LogoutResponse, GatewayError>;

    async fn assess_url(&self, url: &str, evidence: &Evidence)
        -> Result<Assessment, GatewayError>;
}
