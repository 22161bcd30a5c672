use shield_core::{Assessment, Evidence, ScanReport, TabId, TabRecord};
use shield_gateway::{Gateway, GatewayError, GatewayErrorKind};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default)]
pub struct OrchestratorConfig {
    /// Upper bound for a single assessment call. `None` waits indefinitely.
    pub assess_timeout: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabEvent {
    Removed(TabId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    Unauthenticated,
    Assessed,
    Failed,
    /// The record was replaced or evicted while the pipeline was suspended.
    Stale,
}

impl PipelineOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Assessed => "assessed",
            Self::Failed => "failed",
            Self::Stale => "stale",
        }
    }
}

/// Handle on the pipeline launched for one scan. Dropping it detaches the
/// pipeline; it still runs to completion.
#[derive(Debug)]
pub struct PipelineTicket {
    pub tab_id: TabId,
    pub generation: u64,
    handle: JoinHandle<PipelineOutcome>,
}

impl PipelineTicket {
    pub async fn settled(self) -> PipelineOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    event = "pipeline_join_error",
                    tab_id = self.tab_id,
                    generation = self.generation,
                    error = %err
                );
                PipelineOutcome::Stale
            }
        }
    }
}

struct TabEntry {
    generation: u64,
    record: TabRecord,
}

pub struct Orchestrator<G: Gateway> {
    gateway: Arc<G>,
    config: OrchestratorConfig,
    generation: AtomicU64,
    tabs: RwLock<HashMap<TabId, TabEntry>>,
}

impl<G: Gateway> Orchestrator<G> {
    pub fn new(gateway: Arc<G>, config: OrchestratorConfig) -> Self {
        Self {
            gateway,
            config,
            generation: AtomicU64::new(0),
            tabs: RwLock::new(HashMap::new()),
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replaces the tab's record with a fresh loading record and launches the
    /// assessment pipeline for it. The record is in place before this returns.
    pub async fn handle_page_scan(
        self: &Arc<Self>,
        tab_id: TabId,
        report: ScanReport,
    ) -> PipelineTicket {
        let url = report.url.clone();
        let evidence = report.evidence();
        // Allocated under the lock so generation order matches insertion order.
        let (generation, replaced) = {
            let mut tabs = self.tabs.write().await;
            let generation = self.next_generation();
            let replaced = tabs
                .insert(
                    tab_id,
                    TabEntry {
                        generation,
                        record: TabRecord::pending(report),
                    },
                )
                .map(|previous| previous.generation);
            (generation, replaced)
        };

        info!(
            event = "page_scan_received",
            tab_id,
            generation,
            url = %url,
            superseded = replaced.unwrap_or_default()
        );

        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            orchestrator
                .run_pipeline(tab_id, generation, url, evidence)
                .await
        });
        PipelineTicket {
            tab_id,
            generation,
            handle,
        }
    }

    async fn run_pipeline(
        &self,
        tab_id: TabId,
        generation: u64,
        url: String,
        evidence: Evidence,
    ) -> PipelineOutcome {
        if !self.gateway.is_authenticated().await {
            return self
                .commit(tab_id, generation, PipelineOutcome::Unauthenticated, |record| {
                    record.settle_unauthenticated()
                })
                .await;
        }

        match self.assess(&url, &evidence).await {
            Ok(assessment) => {
                self.commit(tab_id, generation, PipelineOutcome::Assessed, move |record| {
                    record.settle_assessed(assessment)
                })
                .await
            }
            Err(err) => {
                debug!(
                    event = "assessment_failed",
                    tab_id,
                    generation,
                    kind = %err.kind,
                    status = err.status.unwrap_or_default(),
                    error = %err
                );
                let message = err.to_string();
                self.commit(tab_id, generation, PipelineOutcome::Failed, move |record| {
                    record.settle_failed(message)
                })
                .await
            }
        }
    }

    async fn assess(&self, url: &str, evidence: &Evidence) -> Result<Assessment, GatewayError> {
        let call = self.gateway.assess_url(url, evidence);
        let assessment = match self.config.assess_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(GatewayError::network(format!(
                        "assessment timed out after {}ms",
                        limit.as_millis()
                    )))
                }
            },
            None => call.await?,
        };
        assessment.validate().map_err(|err| {
            GatewayError::new(GatewayErrorKind::InvalidResponse, err.to_string())
        })?;
        Ok(assessment)
    }

    /// Applies `settle` only if the store still holds the record this pipeline
    /// was launched for.
    async fn commit<F>(
        &self,
        tab_id: TabId,
        generation: u64,
        outcome: PipelineOutcome,
        settle: F,
    ) -> PipelineOutcome
    where
        F: FnOnce(&mut TabRecord),
    {
        let mut tabs = self.tabs.write().await;
        let Some(entry) = tabs
            .get_mut(&tab_id)
            .filter(|entry| entry.generation == generation)
        else {
            debug!(
                event = "pipeline_stale_result",
                tab_id,
                generation,
                dropped = outcome.as_str()
            );
            return PipelineOutcome::Stale;
        };

        settle(&mut entry.record);
        debug_assert!(
            entry.record.check_invariants().is_ok(),
            "tab record invariant violated: {:?}",
            entry.record.check_invariants()
        );
        info!(
            event = "pipeline_settled",
            tab_id,
            generation,
            phase = entry.record.phase().as_str()
        );
        outcome
    }

    pub async fn snapshot(&self, tab_id: TabId) -> Option<TabRecord> {
        self.tabs
            .read()
            .await
            .get(&tab_id)
            .map(|entry| entry.record.clone())
    }

    pub async fn tab_count(&self) -> usize {
        self.tabs.read().await.len()
    }

    /// Evicts the tab's record unconditionally. Any pipeline still running
    /// for it will find its generation gone and drop its result.
    pub async fn handle_tab_removed(&self, tab_id: TabId) -> bool {
        let removed = self.tabs.write().await.remove(&tab_id);
        match removed {
            Some(entry) => {
                info!(
                    event = "tab_evicted",
                    tab_id,
                    generation = entry.generation,
                    in_flight = entry.record.loading
                );
                true
            }
            None => {
                debug!(event = "tab_evict_unknown", tab_id);
                false
            }
        }
    }

    pub fn spawn_tab_monitor(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TabEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = events.recv() => {
                        match event {
                            Some(TabEvent::Removed(tab_id)) => {
                                self.handle_tab_removed(tab_id).await;
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!(event = "tab_monitor_stop");
        })
    }
}
