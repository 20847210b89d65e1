//! The follow-activity polling runner.
//!
//! Polls the target wallet's activity feed, normalizes fresh rows into
//! [`FollowEvent`]s, and feeds them through the suggestion builder. Two
//! bounded rings (events and suggestions) back the HTTP layer's
//! "before timestamp T" queries. Events at or before the runner's start
//! time are ignored, so a restart never replays history.

use crate::events::FollowEvent;
use crate::suggestion::{Suggestion, SuggestionBuilder, SuggestionFilters};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use polytrade_core::now_ms;
use polytrade_exchange::gateway::HttpGateway;
use polytrade_exchange::models::ActivityRecord;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Floor for the poll interval.
const MIN_POLL_MS: u64 = 500;

/// Activity feed the runner polls.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Most recent activity rows for a wallet, newest first.
    async fn recent_activity(
        &self,
        address: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ActivityRecord>>;
}

#[async_trait]
impl ActivitySource for HttpGateway {
    async fn recent_activity(
        &self,
        address: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ActivityRecord>> {
        Ok(self
            .user_activity(
                address,
                limit,
                0,
                polytrade_exchange::gateway::ActivityQueryMode::Auto,
            )
            .await?)
    }
}

/// Runner tuning.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub poll_ms: u64,
    pub poll_limit: usize,
    pub ring_capacity: usize,
    pub filters: SuggestionFilters,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_ms: 2_000,
            poll_limit: 100,
            ring_capacity: 1_000,
            filters: SuggestionFilters::default(),
        }
    }
}

/// Runner status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatus {
    pub running: bool,
    pub target: String,
    pub started_at_ms: i64,
    pub events_seen: usize,
    pub suggestions_built: usize,
    pub last_seen_transaction_hash: Option<String>,
}

/// One follow runner bound to a target wallet.
#[derive(Clone)]
pub struct FollowRunner {
    runner_id: String,
    target: String,
    config: RunnerConfig,
    builder: Arc<Mutex<SuggestionBuilder>>,
    events: Arc<Mutex<VecDeque<FollowEvent>>>,
    suggestions: Arc<Mutex<VecDeque<Suggestion>>>,
    seen: Arc<Mutex<HashSet<String>>>,
    last_seen_hash: Arc<Mutex<Option<String>>>,
    started_at_ms: i64,
    running: Arc<RwLock<bool>>,
    /// Executable suggestions flow out here (to the auto-trader).
    executable_tx: Arc<Mutex<Option<mpsc::Sender<Suggestion>>>>,
}

impl FollowRunner {
    /// Creates a runner; the start time gates event eligibility.
    #[must_use]
    pub fn new(runner_id: impl Into<String>, target: impl Into<String>, config: RunnerConfig) -> Self {
        let runner_id = runner_id.into();
        let builder = SuggestionBuilder::new(runner_id.clone(), config.filters.clone());
        Self {
            runner_id,
            target: target.into().to_lowercase(),
            config,
            builder: Arc::new(Mutex::new(builder)),
            events: Arc::new(Mutex::new(VecDeque::new())),
            suggestions: Arc::new(Mutex::new(VecDeque::new())),
            seen: Arc::new(Mutex::new(HashSet::new())),
            last_seen_hash: Arc::new(Mutex::new(None)),
            started_at_ms: now_ms(),
            running: Arc::new(RwLock::new(false)),
            executable_tx: Arc::new(Mutex::new(None)),
        }
    }

    /// The runner id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.runner_id
    }

    /// Wires the executable-suggestion sink.
    pub fn set_suggestion_sink(&self, tx: mpsc::Sender<Suggestion>) {
        *self.executable_tx.lock() = Some(tx);
    }

    /// Replaces the suggestion filters.
    pub fn set_filters(&self, filters: SuggestionFilters) {
        self.builder.lock().set_filters(filters);
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> RunnerStatus {
        RunnerStatus {
            running: *self.running.read(),
            target: self.target.clone(),
            started_at_ms: self.started_at_ms,
            events_seen: self.events.lock().len(),
            suggestions_built: self.suggestions.lock().len(),
            last_seen_transaction_hash: self.last_seen_hash.lock().clone(),
        }
    }

    /// Events with `timestamp < before_ms`, newest first, up to `limit`.
    #[must_use]
    pub fn events_before(&self, before_ms: i64, limit: usize) -> Vec<FollowEvent> {
        let events = self.events.lock();
        let mut out: Vec<FollowEvent> = events
            .iter()
            .filter(|e| e.timestamp < before_ms)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(limit);
        out
    }

    /// Suggestions with `created_at_ms < before_ms`, newest first.
    #[must_use]
    pub fn suggestions_before(&self, before_ms: i64, limit: usize) -> Vec<Suggestion> {
        let suggestions = self.suggestions.lock();
        let mut out: Vec<Suggestion> = suggestions
            .iter()
            .filter(|s| s.created_at_ms < before_ms)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        out.truncate(limit);
        out
    }

    /// Runs the poll loop until `shutdown` flips true. The current poll
    /// finishes before exit.
    pub async fn run(self, source: Arc<dyn ActivitySource>, mut shutdown: watch::Receiver<bool>) {
        *self.running.write() = true;
        let interval = Duration::from_millis(self.config.poll_ms.max(MIN_POLL_MS));
        info!(target = %self.target, poll_ms = interval.as_millis() as u64, "follow runner started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once(source.as_ref()).await {
                Ok(fresh) if fresh > 0 => debug!(fresh, "processed events"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "poll failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        *self.running.write() = false;
        info!(target = %self.target, "follow runner stopped");
    }

    /// One poll: fetch, gate, dedupe, build. Returns fresh event count.
    pub async fn poll_once(&self, source: &dyn ActivitySource) -> anyhow::Result<usize> {
        let rows = source
            .recent_activity(&self.target, self.config.poll_limit)
            .await?;

        // Rows arrive newest-first; process oldest-first so rings and the
        // last-seen marker advance chronologically.
        let mut fresh = 0usize;
        for row in rows.iter().rev() {
            let Some(event) = FollowEvent::from_activity(row) else {
                continue;
            };
            // Events at or before start never replay.
            if event.timestamp <= self.started_at_ms {
                continue;
            }
            if !self.seen.lock().insert(event.transaction_hash.clone()) {
                continue;
            }
            fresh += 1;
            *self.last_seen_hash.lock() = Some(event.transaction_hash.clone());
            self.push_event(event.clone());

            let built = self.builder.lock().build(&event, now_ms());
            if let Some(suggestion) = built {
                let executable = suggestion.is_executable();
                self.push_suggestion(suggestion.clone());
                if executable {
                    let tx = self.executable_tx.lock().clone();
                    if let Some(tx) = tx {
                        if tx.send(suggestion).await.is_err() {
                            warn!("suggestion sink closed");
                        }
                    }
                }
            }
        }

        self.trim_seen();
        Ok(fresh)
    }

    fn push_event(&self, event: FollowEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.config.ring_capacity {
            events.pop_front();
        }
    }

    fn push_suggestion(&self, suggestion: Suggestion) {
        let mut suggestions = self.suggestions.lock();
        // The deterministic id makes replays idempotent.
        if suggestions.iter().any(|s| s.id == suggestion.id) {
            return;
        }
        suggestions.push_back(suggestion);
        while suggestions.len() > self.config.ring_capacity {
            suggestions.pop_front();
        }
    }

    fn trim_seen(&self) {
        let mut seen = self.seen.lock();
        // Loose bound; precision does not matter, only boundedness.
        if seen.len() > self.config.ring_capacity * 4 {
            let keep: HashSet<String> = self
                .events
                .lock()
                .iter()
                .map(|e| e.transaction_hash.clone())
                .collect();
            *seen = keep;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polytrade_exchange::models::Side;
    use rust_decimal_macros::dec;

    struct StubSource {
        rows: Mutex<Vec<ActivityRecord>>,
    }

    #[async_trait]
    impl ActivitySource for StubSource {
        async fn recent_activity(
            &self,
            _address: &str,
            _limit: usize,
        ) -> anyhow::Result<Vec<ActivityRecord>> {
            Ok(self.rows.lock().clone())
        }
    }

    fn trade_row(hash: &str, ts: i64, usdc: rust_decimal::Decimal) -> ActivityRecord {
        ActivityRecord {
            transaction_hash: Some(hash.into()),
            activity_type: "TRADE".into(),
            side: Some(Side::Buy),
            size: Some(usdc / dec!(0.5)),
            price: Some(dec!(0.5)),
            usdc_size: Some(usdc),
            condition_id: "0xc".into(),
            asset: "123".into(),
            outcome: Some("Yes".into()),
            title: Some("title".into()),
            slug: Some("slug".into()),
            timestamp: ts,
        }
    }

    fn runner() -> FollowRunner {
        FollowRunner::new("r1", "0xTarget", RunnerConfig::default())
    }

    #[tokio::test]
    async fn fresh_events_enter_rings_and_sink() {
        let r = runner();
        let (tx, mut rx) = mpsc::channel(8);
        r.set_suggestion_sink(tx);

        let future_ts = now_ms() + 10_000;
        let source = StubSource {
            rows: Mutex::new(vec![trade_row("0x1", future_ts, dec!(100))]),
        };
        let fresh = r.poll_once(&source).await.unwrap();

        assert_eq!(fresh, 1);
        assert_eq!(r.status().events_seen, 1);
        assert_eq!(r.status().suggestions_built, 1);
        assert_eq!(
            r.status().last_seen_transaction_hash.as_deref(),
            Some("0x1")
        );
        let s = rx.try_recv().unwrap();
        assert!(s.is_executable());
    }

    #[tokio::test]
    async fn history_before_start_is_ignored() {
        let r = runner();
        let source = StubSource {
            rows: Mutex::new(vec![trade_row("0xold", r.started_at_ms - 1_000, dec!(100))]),
        };
        let fresh = r.poll_once(&source).await.unwrap();
        assert_eq!(fresh, 0);
        assert_eq!(r.status().events_seen, 0);
    }

    #[tokio::test]
    async fn duplicate_hashes_are_processed_once() {
        let r = runner();
        let future_ts = now_ms() + 10_000;
        let source = StubSource {
            rows: Mutex::new(vec![trade_row("0x1", future_ts, dec!(100))]),
        };

        assert_eq!(r.poll_once(&source).await.unwrap(), 1);
        // Same page again.
        assert_eq!(r.poll_once(&source).await.unwrap(), 0);
        assert_eq!(r.status().events_seen, 1);
        assert_eq!(r.status().suggestions_built, 1);
    }

    #[tokio::test]
    async fn suggestion_ring_never_holds_duplicate_ids() {
        let r = runner();
        let future_ts = now_ms() + 10_000;
        let event_row = trade_row("0x1", future_ts, dec!(100));
        let source = StubSource {
            rows: Mutex::new(vec![event_row.clone()]),
        };
        r.poll_once(&source).await.unwrap();

        // Force a replay by clearing the seen set (simulating a restart of
        // the dedupe state while the ring survives).
        r.seen.lock().clear();
        r.poll_once(&source).await.unwrap();

        let ids: Vec<String> = r
            .suggestions_before(i64::MAX, 100)
            .iter()
            .map(|s| s.id.clone())
            .collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[tokio::test]
    async fn before_queries_filter_and_sort() {
        let r = runner();
        let base = now_ms() + 10_000;
        let source = StubSource {
            rows: Mutex::new(vec![
                trade_row("0x3", base + 3_000, dec!(10)),
                trade_row("0x2", base + 2_000, dec!(10)),
                trade_row("0x1", base + 1_000, dec!(10)),
            ]),
        };
        r.poll_once(&source).await.unwrap();

        let all = r.events_before(i64::MAX, 10);
        assert_eq!(all.len(), 3);
        assert!(all[0].timestamp > all[2].timestamp);

        let some = r.events_before(base + 2_500, 10);
        assert_eq!(some.len(), 2);

        let limited = r.events_before(i64::MAX, 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].transaction_hash, "0x3");
    }
}
