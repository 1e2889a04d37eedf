/// Finalization Tracker
///
/// Polls the active Ethereum backend for the chain tip and answers whether a
/// block is buried deeply enough to be treated as immutable. Only responses
/// about finalized blocks are eligible for caching; everything newer can
/// still be reorganized away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::BackendKind;
use crate::metrics;
use crate::rpc::{hex_to_u64, JsonRpcResponse};
use crate::selector::BackendSelector;

/// Blocks below `tip - FINALITY_DEPTH` are considered final. Twelve
/// confirmations is the conventional soft-finality depth for Ethereum
/// mainnet.
pub const FINALITY_DEPTH: u64 = 12;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const RPC_TIMEOUT: Duration = Duration::from_secs(1);

const BLOCK_NUMBER_REQUEST: &str =
    r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":0}"#;

pub struct FinalizationTracker {
    block_height: AtomicU64,
    selector: Arc<BackendSelector>,
    client: reqwest::Client,
}

impl FinalizationTracker {
    pub fn new(selector: Arc<BackendSelector>) -> Self {
        Self {
            block_height: AtomicU64::new(0),
            selector,
            client: reqwest::Client::builder()
                .timeout(RPC_TIMEOUT)
                .build()
                .expect("failed to build block height HTTP client"),
        }
    }

    pub fn height(&self) -> u64 {
        self.block_height.load(Ordering::Acquire)
    }

    pub fn set_height(&self, height: u64) {
        self.block_height.store(height, Ordering::Release);
        metrics::BLOCK_HEIGHT.set(height as i64);
    }

    /// A block is finalized when the observed tip is at least
    /// `FINALITY_DEPTH` blocks past it. A block number ahead of the cached
    /// tip (clock skew, stale poll) is never finalized.
    pub fn is_finalized(&self, block_number: u64) -> bool {
        match self.height().checked_sub(block_number) {
            Some(depth) => depth >= FINALITY_DEPTH,
            None => false,
        }
    }

    /// Hex-tagged variant; unparseable input declines to cache.
    pub fn is_finalized_hex(&self, block_number: &str) -> bool {
        match hex_to_u64(block_number) {
            Ok(n) => self.is_finalized(n),
            Err(_) => false,
        }
    }

    /// Fetch `eth_blockNumber` from the active backend and store the result.
    /// Any failure leaves the previous height in place.
    pub async fn update_block_height(&self) {
        let backend = match self.selector.backend_for(BackendKind::Ethereum) {
            Ok(b) => b,
            Err(e) => {
                warn!(err = %e, "no backend available for block height poll");
                return;
            }
        };

        let res = match self
            .client
            .post(&backend.url)
            .header(CONTENT_TYPE, "application/json")
            .body(BLOCK_NUMBER_REQUEST)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                warn!(err = %e, url = %backend.url, "failed to fetch block height");
                return;
            }
        };

        let parsed: JsonRpcResponse = match res.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(err = %e, "failed to decode block height response");
                return;
            }
        };

        let height_hex: String = match serde_json::from_str(parsed.result.get()) {
            Ok(s) => s,
            Err(e) => {
                warn!(err = %e, "block height result is not a hex string");
                return;
            }
        };

        match hex_to_u64(&height_hex) {
            Ok(height) => {
                debug!(from = self.height(), to = height, "updated block height cache");
                self.set_height(height);
            }
            Err(e) => warn!(err = %e, height = %height_hex, "invalid block height"),
        }
    }

    /// Background poll loop: refresh immediately, then every 5 seconds until
    /// shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.update_block_height().await;
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // first tick fires immediately and was just done
        loop {
            tokio::select! {
                _ = tick.tick() => self.update_block_height().await,
                _ = shutdown.changed() => {
                    info!("finalization tracker stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::selector::HealthCheck;
    use async_trait::async_trait;

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthCheck for AlwaysHealthy {
        async fn check(&self, _backend: &Backend) -> bool {
            true
        }
    }

    fn tracker_at(height: u64) -> FinalizationTracker {
        let backend = Backend {
            url: "http://127.0.0.1:0".into(),
            name: "test".into(),
            is_main: true,
            kind: BackendKind::Ethereum,
        };
        let selector =
            Arc::new(BackendSelector::new(vec![backend], Arc::new(AlwaysHealthy)).unwrap());
        let tracker = FinalizationTracker::new(selector);
        tracker.set_height(height);
        tracker
    }

    #[test]
    fn test_finality_boundary() {
        let tracker = tracker_at(1000);
        assert!(tracker.is_finalized(988)); // exactly FINALITY_DEPTH behind
        assert!(tracker.is_finalized(1));
        assert!(!tracker.is_finalized(989));
        assert!(!tracker.is_finalized(1000));
    }

    #[test]
    fn test_block_ahead_of_tip_never_underflows() {
        let tracker = tracker_at(100);
        assert!(!tracker.is_finalized(101));
        assert!(!tracker.is_finalized(u64::MAX));

        let empty = tracker_at(0);
        assert!(!empty.is_finalized(1));
    }

    #[test]
    fn test_is_finalized_hex() {
        let tracker = tracker_at(1000);
        assert!(tracker.is_finalized_hex("0x1"));
        assert!(!tracker.is_finalized_hex("0x3e5")); // 997
        assert!(!tracker.is_finalized_hex("latest"));
        assert!(!tracker.is_finalized_hex(""));
    }
}
