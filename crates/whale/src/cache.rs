//! TTL cache of per-wallet performance windows.
//!
//! Refreshes are funneled through a dedup queue and run one at a time
//! with a fixed pause between updates, keeping the data API bucket calm.
//! Two invariants hold everywhere:
//!
//! - **No pollution**: a refresh that yields zero rows never overwrites a
//!   non-empty entry, and `updated_at` does not advance.
//! - **Null, not zero**: when the fetch was size-capped and the oldest
//!   returned row does not reach the window boundary, that window's
//!   metric is `None`; "data unavailable" stays distinguishable from
//!   "no activity".

use crate::metrics::{classify_window, rows_in_window, MetricWindow, WindowMetrics};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use polytrade_core::now_ms;
use polytrade_exchange::models::ActivityRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Pause between serialized cache updates.
const INTER_UPDATE_PAUSE: Duration = Duration::from_millis(1_500);

/// Activity source the cache refreshes from.
#[async_trait]
pub trait ActivityFetcher: Send + Sync {
    /// Fetches up to `max_rows` of a wallet's activity, newest first.
    async fn fetch_activity(
        &self,
        address: &str,
        max_rows: usize,
    ) -> anyhow::Result<Vec<ActivityRecord>>;

    /// Unrealized PnL from open positions, USD.
    async fn unrealized_pnl(&self, address: &str) -> anyhow::Result<Decimal>;
}

/// One wallet's cached windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletCacheEntry {
    pub address: String,
    pub updated_at_ms: i64,
    /// `None` for a window means the data was unavailable, not zero.
    pub windows: HashMap<MetricWindow, Option<WindowMetrics>>,
}

impl WalletCacheEntry {
    /// Whether any window carries real observations.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.windows.values().flatten().any(|m| {
            m.trade_count > 0 || m.volume > Decimal::ZERO || m.pnl != Decimal::ZERO
        })
    }
}

/// Shared wallet cache with a serialized refresh queue.
#[derive(Clone)]
pub struct WalletCache {
    entries: Arc<RwLock<HashMap<String, WalletCacheEntry>>>,
    queue: Arc<Mutex<VecDeque<String>>>,
    pending: Arc<Mutex<HashSet<String>>>,
    ttl_ms: i64,
    max_rows: usize,
    store: polytrade_core::JsonStore,
}

impl WalletCache {
    /// Creates an in-memory cache with the given entry TTL and fetch cap.
    #[must_use]
    pub fn new(ttl_hours: i64, max_rows: usize) -> Self {
        Self::with_store(ttl_hours, max_rows, polytrade_core::JsonStore::in_memory())
            .expect("in-memory store never fails to load")
    }

    /// Creates a cache persisting its entries through `store`.
    pub fn with_store(
        ttl_hours: i64,
        max_rows: usize,
        store: polytrade_core::JsonStore,
    ) -> anyhow::Result<Self> {
        let entries: HashMap<String, WalletCacheEntry> = store.load()?;
        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            pending: Arc::new(Mutex::new(HashSet::new())),
            ttl_ms: ttl_hours * 3_600_000,
            max_rows,
            store,
        })
    }

    /// Entry for an address, fresh or stale.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<WalletCacheEntry> {
        self.entries.read().get(&address.to_lowercase()).cloned()
    }

    /// Entry only when inside the TTL.
    #[must_use]
    pub fn get_fresh(&self, address: &str) -> Option<WalletCacheEntry> {
        let entry = self.get(address)?;
        (now_ms() - entry.updated_at_ms <= self.ttl_ms).then_some(entry)
    }

    /// Entries for many addresses (the bulk endpoint).
    #[must_use]
    pub fn bulk(&self, addresses: &[String]) -> Vec<WalletCacheEntry> {
        let entries = self.entries.read();
        addresses
            .iter()
            .filter_map(|a| entries.get(&a.to_lowercase()).cloned())
            .collect()
    }

    /// Number of cached wallets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no wallet is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Queues a refresh. Returns false when the address is already
    /// pending (dedup).
    pub fn enqueue_refresh(&self, address: &str) -> bool {
        let key = address.to_lowercase();
        let mut pending = self.pending.lock();
        if !pending.insert(key.clone()) {
            return false;
        }
        self.queue.lock().push_back(key);
        true
    }

    /// Pending queue depth.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the serialized refresh worker until `shutdown` flips true.
    pub async fn run_worker(
        self,
        fetcher: Arc<dyn ActivityFetcher>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("wallet cache worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = {
                let mut queue = self.queue.lock();
                queue.pop_front()
            };
            match next {
                Some(address) => {
                    if let Err(e) = self.refresh_now(fetcher.as_ref(), &address).await {
                        warn!(address, error = %e, "cache refresh failed");
                    }
                    self.pending.lock().remove(&address);
                    tokio::select! {
                        _ = tokio::time::sleep(INTER_UPDATE_PAUSE) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        info!("wallet cache worker stopped");
    }

    /// Refreshes one wallet immediately. Returns true when the entry was
    /// replaced.
    pub async fn refresh_now(
        &self,
        fetcher: &dyn ActivityFetcher,
        address: &str,
    ) -> anyhow::Result<bool> {
        let key = address.to_lowercase();
        let rows = fetcher.fetch_activity(&key, self.max_rows).await?;

        if rows.is_empty() {
            let keep = self.get(&key).is_some_and(|e| e.has_data());
            if keep {
                // No pollution: a transient empty fetch never wipes data.
                warn!(address = %key, "empty fetch; keeping prior cache entry");
                return Ok(false);
            }
        }

        let unrealized = fetcher.unrealized_pnl(&key).await.unwrap_or(Decimal::ZERO);
        let now = now_ms();
        let capped = rows.len() >= self.max_rows;
        let oldest_ts = rows.iter().map(|r| r.timestamp).min();

        let mut windows = HashMap::new();
        for &window in MetricWindow::all() {
            let incomplete = capped
                && match (window.duration_ms(), oldest_ts) {
                    // Capped fetch whose oldest row is newer than the
                    // boundary: the window is missing history.
                    (Some(len), Some(oldest)) => oldest > now - len,
                    // All-time can never be complete from a capped fetch.
                    (None, Some(_)) => true,
                    _ => false,
                };
            let metric = if incomplete {
                None
            } else {
                Some(classify_window(
                    &rows_in_window(&rows, window, now),
                    window,
                    unrealized,
                ))
            };
            windows.insert(window, metric);
        }

        debug!(address = %key, rows = rows.len(), capped, "cache entry refreshed");
        {
            let mut entries = self.entries.write();
            entries.insert(
                key.clone(),
                WalletCacheEntry {
                    address: key,
                    updated_at_ms: now,
                    windows,
                },
            );
            if let Err(e) = self.store.save(&*entries) {
                warn!(error = %e, "wallet cache save failed");
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polytrade_exchange::models::Side;
    use rust_decimal_macros::dec;

    struct StubFetcher {
        rows: Vec<ActivityRecord>,
    }

    #[async_trait]
    impl ActivityFetcher for StubFetcher {
        async fn fetch_activity(
            &self,
            _address: &str,
            _max_rows: usize,
        ) -> anyhow::Result<Vec<ActivityRecord>> {
            Ok(self.rows.clone())
        }
        async fn unrealized_pnl(&self, _address: &str) -> anyhow::Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    fn trade(usdc: Decimal, ts: i64) -> ActivityRecord {
        ActivityRecord {
            transaction_hash: None,
            activity_type: "TRADE".into(),
            side: Some(Side::Buy),
            size: None,
            price: None,
            usdc_size: Some(usdc),
            condition_id: "m1".into(),
            asset: String::new(),
            outcome: None,
            title: None,
            slug: None,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn refresh_populates_all_windows() {
        let cache = WalletCache::new(24, 1_000);
        let fetcher = StubFetcher {
            rows: vec![trade(dec!(10), now_ms() - 1_000)],
        };
        assert!(cache.refresh_now(&fetcher, "0xAbC").await.unwrap());

        let entry = cache.get("0xabc").expect("lowercased key");
        assert_eq!(entry.windows.len(), 4);
        let day = entry.windows[&MetricWindow::H24].as_ref().unwrap();
        assert_eq!(day.volume, dec!(10));
        assert!(entry.has_data());
    }

    #[tokio::test]
    async fn empty_fetch_keeps_prior_entry() {
        let cache = WalletCache::new(24, 1_000);
        let full = StubFetcher {
            rows: vec![trade(dec!(10), now_ms() - 1_000)],
        };
        cache.refresh_now(&full, "0xabc").await.unwrap();
        let before = cache.get("0xabc").unwrap();

        let empty = StubFetcher { rows: vec![] };
        let replaced = cache.refresh_now(&empty, "0xabc").await.unwrap();
        assert!(!replaced);

        let after = cache.get("0xabc").unwrap();
        assert_eq!(after.updated_at_ms, before.updated_at_ms);
        assert!(after.has_data());
    }

    #[tokio::test]
    async fn empty_fetch_on_unknown_wallet_caches_empty_entry() {
        let cache = WalletCache::new(24, 1_000);
        let empty = StubFetcher { rows: vec![] };
        assert!(cache.refresh_now(&empty, "0xnew").await.unwrap());
        let entry = cache.get("0xnew").unwrap();
        assert!(!entry.has_data());
    }

    #[tokio::test]
    async fn capped_fetch_nulls_truncated_windows() {
        // max_rows = 2 and both rows are recent: the 24h window is fully
        // covered only if the oldest row predates its boundary, which it
        // does not; so every window is incomplete except none.
        let cache = WalletCache::new(24, 2);
        let now = now_ms();
        let fetcher = StubFetcher {
            rows: vec![trade(dec!(10), now - 1_000), trade(dec!(5), now - 2_000)],
        };
        cache.refresh_now(&fetcher, "0xabc").await.unwrap();

        let entry = cache.get("0xabc").unwrap();
        // Oldest row (2s ago) is newer than every boundary: all nulled.
        assert!(entry.windows[&MetricWindow::H24].is_none());
        assert!(entry.windows[&MetricWindow::All].is_none());
    }

    #[tokio::test]
    async fn capped_fetch_keeps_windows_it_fully_covers() {
        let cache = WalletCache::new(24, 2);
        let now = now_ms();
        let fetcher = StubFetcher {
            rows: vec![
                trade(dec!(10), now - 1_000),
                // Oldest row is 8 days old: 24h/7d windows are complete.
                trade(dec!(5), now - 8 * 24 * 3_600_000),
            ],
        };
        cache.refresh_now(&fetcher, "0xabc").await.unwrap();

        let entry = cache.get("0xabc").unwrap();
        assert!(entry.windows[&MetricWindow::H24].is_some());
        assert!(entry.windows[&MetricWindow::D7].is_some());
        // 30d boundary predates the oldest row: nulled.
        assert!(entry.windows[&MetricWindow::D30].is_none());
        assert!(entry.windows[&MetricWindow::All].is_none());
    }

    #[test]
    fn enqueue_dedupes_pending_addresses() {
        let cache = WalletCache::new(24, 1_000);
        assert!(cache.enqueue_refresh("0xAbC"));
        assert!(!cache.enqueue_refresh("0xabc"));
        assert_eq!(cache.pending_count(), 1);
    }

    #[tokio::test]
    async fn ttl_gates_get_fresh() {
        let cache = WalletCache::new(0, 1_000); // zero-hour TTL
        let fetcher = StubFetcher {
            rows: vec![trade(dec!(10), now_ms())],
        };
        cache.refresh_now(&fetcher, "0xabc").await.unwrap();
        assert!(cache.get("0xabc").is_some());
        // With ttl 0 the entry is immediately stale (updated_at == now is
        // allowed, so nudge by sleeping a tick).
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get_fresh("0xabc").is_none());
    }
}
