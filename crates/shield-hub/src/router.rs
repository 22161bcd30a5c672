use crate::orchestrator::Orchestrator;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use shield_core::protocol::{
    AuthStateReply, ExtensionMessage, LoginReply, LogoutReply, Reply, ScanReply,
};
use shield_core::TabId;
use shield_gateway::Gateway;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Who sent a message. Content scripts carry their tab; the popup does not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SenderContext {
    pub tab_id: Option<TabId>,
}

impl SenderContext {
    pub fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id: Some(tab_id),
        }
    }
}

/// How the caller should treat its reply channel.
pub enum Dispatch {
    NoReply,
    Immediate(Reply),
    /// Keep the channel open; the reply arrives when the future settles.
    Deferred(BoxFuture<'static, Reply>),
}

impl Dispatch {
    pub async fn resolve(self) -> Option<Reply> {
        match self {
            Dispatch::NoReply => None,
            Dispatch::Immediate(reply) => Some(reply),
            Dispatch::Deferred(pending) => Some(pending.await),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Dispatch::Deferred(_))
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::NoReply => f.write_str("NoReply"),
            Dispatch::Immediate(reply) => f.debug_tuple("Immediate").field(reply).finish(),
            Dispatch::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

pub struct Router<G: Gateway> {
    orchestrator: Arc<Orchestrator<G>>,
}

impl<G: Gateway> Router<G> {
    pub fn new(orchestrator: Arc<Orchestrator<G>>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<G>> {
        &self.orchestrator
    }

    pub async fn dispatch(&self, message: Value, sender: SenderContext) -> Dispatch {
        let message = match ExtensionMessage::parse(message) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(event = "router_unknown_message");
                return Dispatch::NoReply;
            }
            Err(err) if err.is_malformed() => {
                warn!(event = "router_malformed_message", error = %err);
                return Dispatch::NoReply;
            }
            Err(err) => {
                debug!(event = "router_unknown_message", error = %err);
                return Dispatch::NoReply;
            }
        };
        debug!(
            event = "router_dispatch",
            kind = message.kind().as_str(),
            sender_tab = sender.tab_id.unwrap_or(-1)
        );

        match message {
            ExtensionMessage::PageScan { data } => {
                let Some(tab_id) = sender.tab_id else {
                    debug!(event = "page_scan_without_tab");
                    return Dispatch::NoReply;
                };
                if let Err(err) = data.validate() {
                    warn!(event = "page_scan_invalid", tab_id, error = %err);
                    return Dispatch::NoReply;
                }
                drop(self.orchestrator.handle_page_scan(tab_id, data).await);
                Dispatch::NoReply
            }
            ExtensionMessage::GetScan { tab_id } => {
                let data = self.orchestrator.snapshot(tab_id).await;
                Dispatch::Immediate(Reply::Scan(ScanReply { data }))
            }
            ExtensionMessage::GetAuthState => {
                let gateway = Arc::clone(self.orchestrator.gateway());
                Dispatch::Deferred(
                    async move {
                        let authenticated = gateway.is_authenticated().await;
                        Reply::AuthState(AuthStateReply { authenticated })
                    }
                    .boxed(),
                )
            }
            ExtensionMessage::Login { email, password } => {
                let gateway = Arc::clone(self.orchestrator.gateway());
                Dispatch::Deferred(
                    async move {
                        match gateway.login(&email, &password).await {
                            Ok(response) => {
                                info!(event = "login_succeeded", user_id = %response.user.id);
                                Reply::Login(LoginReply::ok(response.user))
                            }
                            Err(err) => {
                                warn!(event = "login_failed", kind = %err.kind, error = %err);
                                Reply::Login(LoginReply::failed(err.to_string()))
                            }
                        }
                    }
                    .boxed(),
                )
            }
            ExtensionMessage::Logout => {
                let gateway = Arc::clone(self.orchestrator.gateway());
                Dispatch::Deferred(
                    async move {
                        match gateway.logout().await {
                            Ok(_) => {
                                info!(event = "logout_succeeded");
                                Reply::Logout(LogoutReply::ok())
                            }
                            Err(err) => {
                                warn!(event = "logout_failed", kind = %err.kind, error = %err);
                                Reply::Logout(LogoutReply::failed(err.to_string()))
                            }
                        }
                    }
                    .boxed(),
                )
            }
        }
    }
}
