/// Backend Selector - per-kind active backend with healthcheck failover
///
/// Responsibilities:
/// - Hold the per-kind backend lists, fixed at startup
/// - Expose the currently selected backend via a wait-free atomic read
/// - Probe the active backend every tick and rotate to the next healthy one
///
/// The active index is the only mutable state. It is written solely by the
/// health loop and read atomically on every inbound request; a request
/// observes either the old or the new index, never a torn value.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendKind};
use crate::error::ProxyError;
use crate::metrics;

pub const HEALTHCHECK_INTERVAL: Duration = Duration::from_secs(5);
const HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Capability contract for backend probes; tests substitute scripted doubles.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, backend: &Backend) -> bool;
}

/// Probes Ethereum nodes with `eth_syncing`: a node is fit to serve traffic
/// only when it reports `result: false` (not syncing). Bitcoin backends have
/// no probe defined and are left in rotation as-is.
pub struct EthSyncProbe {
    client: reqwest::Client,
}

impl EthSyncProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HEALTHCHECK_TIMEOUT)
                .build()
                .expect("failed to build healthcheck HTTP client"),
        }
    }
}

impl Default for EthSyncProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for EthSyncProbe {
    async fn check(&self, backend: &Backend) -> bool {
        if backend.kind != BackendKind::Ethereum {
            return true;
        }

        let id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "eth_syncing",
            "params": [],
            "id": id,
        });

        let res = match self
            .client
            .post(&backend.url)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                warn!(name = %backend.name, url = %backend.url, err = %e, "healthcheck request failed");
                return false;
            }
        };

        if res.status() != reqwest::StatusCode::OK {
            warn!(name = %backend.name, url = %backend.url, status = %res.status(), "backend returned non-200 response");
            return false;
        }

        let decoded: Value = match res.json().await {
            Ok(v) => v,
            Err(_) => {
                warn!(name = %backend.name, url = %backend.url, "backend returned invalid JSON");
                return false;
            }
        };

        match decoded.get("result") {
            Some(Value::Bool(false)) => true,
            _ => {
                warn!(name = %backend.name, url = %backend.url, "backend is either completing initial sync or has fallen behind");
                false
            }
        }
    }
}

pub struct BackendSelector {
    eth_backends: Vec<Backend>,
    btc_backends: Vec<Backend>,
    curr_eth: AtomicI32,
    curr_btc: AtomicI32,
    checker: Arc<dyn HealthCheck>,
}

impl BackendSelector {
    /// Partition the catalog by kind and select the initial index per kind:
    /// the first entry flagged main, or index 0. Kinds with no backends get
    /// index -1. A fully empty catalog is a startup error.
    pub fn new(backends: Vec<Backend>, checker: Arc<dyn HealthCheck>) -> Result<Self, ProxyError> {
        if backends.is_empty() {
            return Err(ProxyError::EmptyCatalog);
        }

        let (eth_backends, btc_backends): (Vec<Backend>, Vec<Backend>) = backends
            .into_iter()
            .partition(|b| b.kind == BackendKind::Ethereum);

        fn initial_index(list: &[Backend]) -> i32 {
            if list.is_empty() {
                return -1;
            }
            list.iter().position(|b| b.is_main).unwrap_or(0) as i32
        }

        let curr_eth = AtomicI32::new(initial_index(&eth_backends));
        let curr_btc = AtomicI32::new(initial_index(&btc_backends));

        Ok(Self {
            eth_backends,
            btc_backends,
            curr_eth,
            curr_btc,
            checker,
        })
    }

    fn list(&self, kind: BackendKind) -> &[Backend] {
        match kind {
            BackendKind::Ethereum => &self.eth_backends,
            BackendKind::Bitcoin => &self.btc_backends,
        }
    }

    fn index(&self, kind: BackendKind) -> &AtomicI32 {
        match kind {
            BackendKind::Ethereum => &self.curr_eth,
            BackendKind::Bitcoin => &self.curr_btc,
        }
    }

    /// Current backend for `kind`, or an error while the kind is degraded.
    pub fn backend_for(&self, kind: BackendKind) -> Result<Backend, ProxyError> {
        let idx = self.index(kind).load(Ordering::Acquire);
        if idx < 0 {
            return Err(ProxyError::NoBackends);
        }
        Ok(self.list(kind)[idx as usize].clone())
    }

    /// One healthcheck tick: both kinds probed concurrently and joined.
    pub async fn run_checks_once(&self) {
        tokio::join!(
            self.check_kind(BackendKind::Ethereum),
            self.check_kind(BackendKind::Bitcoin),
        );
    }

    /// Probe the active backend for `kind`; on failure rotate circularly
    /// through the list at most once around. All unhealthy leaves the kind
    /// degraded (-1) until a later tick finds a healthy entry again.
    async fn check_kind(&self, kind: BackendKind) {
        let list = self.list(kind);
        if list.is_empty() {
            return;
        }

        let cell = self.index(kind);
        let prev = cell.load(Ordering::Acquire);
        let mut idx = prev.max(0) as usize;

        for _ in 0..list.len() {
            let backend = &list[idx];
            debug!(%kind, name = %backend.name, url = %backend.url, "performing healthcheck");
            if self.checker.check(backend).await {
                if prev != idx as i32 {
                    metrics::HEALTHCHECK_FAILOVERS
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    info!(%kind, name = %backend.name, "switched active backend");
                }
                cell.store(idx as i32, Ordering::Release);
                return;
            }
            warn!(%kind, name = %backend.name, url = %backend.url, "backend is unhealthy, trying another");
            idx = (idx + 1) % list.len();
        }

        error!(%kind, "no healthy backends");
        if prev != -1 {
            metrics::HEALTHCHECK_FAILOVERS
                .with_label_values(&[kind.as_str()])
                .inc();
        }
        cell.store(-1, Ordering::Release);
    }

    /// Background health loop: tick every 5 seconds until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(HEALTHCHECK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => self.run_checks_once().await,
                _ = shutdown.changed() => {
                    info!("backend selector stopped");
                    return;
                }
            }
        }
    }
}
