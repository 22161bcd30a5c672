#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use shield_core::{Assessment, Evidence, Safety, ScanReport};
use shield_gateway::{Gateway, GatewayError, LoginResponse, LogoutResponse, User};
use shield_hub::{Orchestrator, OrchestratorConfig, Router, SenderContext};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::oneshot;

pub const ACCEPTED_PASSWORD: &str = "correct-horse";

type AssessResult = Result<Assessment, GatewayError>;

/// Gateway double whose assessments can be held open per URL until the test
/// releases them.
pub struct ScriptedGateway {
    authenticated: AtomicBool,
    fail_logout: AtomicBool,
    gates: Mutex<HashMap<String, oneshot::Receiver<AssessResult>>>,
    assess_calls: AtomicUsize,
    assessed: Mutex<Vec<(String, Evidence)>>,
}

impl ScriptedGateway {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated: AtomicBool::new(authenticated),
            fail_logout: AtomicBool::new(false),
            gates: Mutex::new(HashMap::new()),
            assess_calls: AtomicUsize::new(0),
            assessed: Mutex::new(Vec::new()),
        }
    }

    /// The next assessment of `url` waits for the returned sender.
    pub fn hold(&self, url: &str) -> oneshot::Sender<AssessResult> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(url.to_string(), rx);
        tx
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    pub fn fail_next_logout(&self) {
        self.fail_logout.store(true, Ordering::SeqCst);
    }

    pub fn assess_calls(&self) -> usize {
        self.assess_calls.load(Ordering::SeqCst)
    }

    pub fn assessed_urls(&self) -> Vec<String> {
        self.assessed
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Every `(url, evidence)` pair the pipeline handed to `assess_url`.
    pub fn assessed(&self) -> Vec<(String, Evidence)> {
        self.assessed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, GatewayError> {
        if password != ACCEPTED_PASSWORD {
            return Err(GatewayError::http(401, "Invalid credentials"));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(LoginResponse {
            access_token: "scripted-token".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
            user: User {
                id: "user-7".to_string(),
                email: email.to_string(),
                name: Some("Scripted".to_string()),
            },
        })
    }

    async fn logout(&self) -> Result<LogoutResponse, GatewayError> {
        self.authenticated.store(false, Ordering::SeqCst);
        if self.fail_logout.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::network("backend unreachable"));
        }
        Ok(LogoutResponse {
            message: "Logged out".to_string(),
        })
    }

    async fn assess_url(&self, url: &str, evidence: &Evidence) -> AssessResult {
        self.assess_calls.fetch_add(1, Ordering::SeqCst);
        self.assessed
            .lock()
            .unwrap()
            .push((url.to_string(), evidence.clone()));
        let gate = self.gates.lock().unwrap().remove(url);
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(GatewayError::network("gate dropped"))),
            None => Ok(safe_assessment()),
        }
    }
}

pub fn safe_assessment() -> Assessment {
    Assessment {
        safety: Safety::Safe,
        confidence: 95,
        reasons: vec!["ok".to_string()],
        assessed_at: Utc.with_ymd_and_hms(2026, 2, 7, 21, 0, 0).unwrap(),
    }
}

pub fn unsafe_assessment() -> Assessment {
    Assessment {
        safety: Safety::Unsafe,
        confidence: 88,
        reasons: vec!["Password field on insecure page".to_string()],
        assessed_at: Utc.with_ymd_and_hms(2026, 2, 7, 21, 5, 0).unwrap(),
    }
}

pub fn scan_json(url: &str) -> Value {
    json!({
        "url": url,
        "forms": [],
        "links": {"total": 5, "external": 1},
        "meta": {"isHttps": true, "title": "X"}
    })
}

pub fn scan(url: &str) -> ScanReport {
    serde_json::from_value(scan_json(url)).unwrap()
}

pub struct Harness {
    pub gateway: Arc<ScriptedGateway>,
    pub orchestrator: Arc<Orchestrator<ScriptedGateway>>,
    pub router: Router<ScriptedGateway>,
}

impl Harness {
    pub fn new(authenticated: bool) -> Self {
        Self::with_config(authenticated, OrchestratorConfig::default())
    }

    pub fn with_config(authenticated: bool, config: OrchestratorConfig) -> Self {
        let gateway = Arc::new(ScriptedGateway::new(authenticated));
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&gateway), config));
        let router = Router::new(Arc::clone(&orchestrator));
        Self {
            gateway,
            orchestrator,
            router,
        }
    }

    /// Sends a message the way the popup would and returns the reply JSON.
    pub async fn send(&self, message: Value) -> Option<Value> {
        self.router
            .dispatch(message, SenderContext::default())
            .await
            .resolve()
            .await
            .map(|reply| reply.to_value().unwrap())
    }

    pub async fn get_scan(&self, tab_id: i64) -> Value {
        self.send(json!({"type": "GET_SCAN", "tabId": tab_id}))
            .await
            .expect("GET_SCAN always replies")
    }
}
