use crate::{CredentialStore, Gateway, GatewayError, LoginResponse, LogoutResponse, User};
use async_trait::async_trait;
use chrono::Utc;
use shield_core::{Assessment, Evidence, Safety};
use tracing::debug;

pub const STUB_ACCESS_TOKEN: &str = "stub-token-abc123";
const STUB_REFRESH_TOKEN: &str = "stub-refresh-xyz";

/// Offline gateway serving canned responses. Credentials are still persisted
/// so that the authenticated/unauthenticated split behaves like production.
#[derive(Debug, Clone)]
pub struct StubGateway {
    credentials: CredentialStore,
}

impl StubGateway {
    pub fn new(credentials: CredentialStore) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Gateway for StubGateway {
    async fn is_authenticated(&self) -> bool {
        self.credentials.has_token().await
    }

    async fn login(&self, email: &str, _password: &str) -> Result<LoginResponse, GatewayError> {
        self.credentials.save(STUB_ACCESS_TOKEN).await?;
        debug!(event = "stub_login", email);
        Ok(LoginResponse {
            access_token: STUB_ACCESS_TOKEN.to_string(),
            refresh_token: Some(STUB_REFRESH_TOKEN.to_string()),
            expires_in: Some(3600),
            user: User {
                id: "user-1".to_string(),
                email: email.to_string(),
                name: Some("Test User".to_string()),
            },
        })
    }

    async fn logout(&self) -> Result<LogoutResponse, GatewayError> {
        self.credentials.clear().await?;
        Ok(LogoutResponse {
            message: "Logged out".to_string(),
        })
    }

    async fn assess_url(
        &self,
        url: &str,
        _evidence: &Evidence,
    ) -> Result<Assessment, GatewayError> {
        debug!(event = "stub_assess", url);
        Ok(Assessment {
            safety: Safety::Suspicious,
            confidence: 72,
            reasons: vec![
                "Page contains a login form".to_string(),
                "Multiple external links detected".to_string(),
            ],
            assessed_at: Utc::now(),
        })
    }
}
