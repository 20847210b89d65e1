//! The auto-trader: turning suggestions into orders.
//!
//! Two consumption modes (queued behind human approval, or immediate) and
//! two execution styles: `copy` places a single order at the source
//! event's price nudged by a buffer, `sweep` walks the book level by
//! level under a price cap, an order-count cap, and a per-event USDC cap.
//! Paper mode runs the identical walk against cached book levels and
//! records what would have happened, with a stop-reason on every report.

use crate::suggestion::Suggestion;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use polytrade_core::{now_ms, JsonStore};
use polytrade_exchange::models::Side;
use polytrade_exchange::price_cache::PriceCache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Paper history entries kept on disk.
const PAPER_HISTORY_CAP: usize = 500;

/// Consumption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeMode {
    /// Suggestions wait for `execute_pending`.
    Queue,
    /// Suggestions execute on arrival.
    Auto,
}

/// Execution style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStyle {
    Copy,
    Sweep,
}

/// Why an execution stopped where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SweepStopReason {
    CapReached,
    SizeExhausted,
    PriceCapHit,
    InsufficientDepth,
    QuotaHit,
}

/// Auto-trader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTraderConfig {
    pub mode: TradeMode,
    pub style: ExecStyle,
    /// Cents added (buy) or subtracted (sell) from the copied price.
    pub price_buffer_cents: u32,
    /// Sweep refuses levels beyond this price, cents.
    pub sweep_price_cap_cents: u32,
    pub sweep_max_orders_per_event: usize,
    pub sweep_max_usdc_per_event: Decimal,
    /// Spacing between orders within one sweep.
    pub sweep_min_interval_ms: u64,
    pub allow_condition_ids: HashSet<String>,
    pub deny_condition_ids: HashSet<String>,
    pub max_orders_per_hour: u32,
    /// Fill against cached books instead of placing real orders.
    pub paper: bool,
}

impl Default for AutoTraderConfig {
    fn default() -> Self {
        Self {
            mode: TradeMode::Queue,
            style: ExecStyle::Copy,
            price_buffer_cents: 1,
            sweep_price_cap_cents: 99,
            sweep_max_orders_per_event: 4,
            sweep_max_usdc_per_event: Decimal::from(50),
            sweep_min_interval_ms: 200,
            allow_condition_ids: HashSet::new(),
            deny_condition_ids: HashSet::new(),
            max_orders_per_hour: 20,
            paper: true,
        }
    }
}

/// One order the trader decided to place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub usdc: Decimal,
    /// USDC actually filled (paper: simulated).
    pub filled_usdc: Decimal,
}

/// Record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub suggestion_id: String,
    pub condition_id: String,
    pub orders: Vec<PlacedOrder>,
    pub total_usdc: Decimal,
    pub stop_reason: Option<SweepStopReason>,
    pub paper: bool,
    pub executed_at_ms: i64,
}

/// Live order placement seam.
#[async_trait]
pub trait OrderSink: Send + Sync {
    /// Places one order, returning the filled USDC.
    async fn place(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        usdc: Decimal,
    ) -> anyhow::Result<Decimal>;
}

/// Live sink placing GTC limit orders through the trading client.
pub struct ClobOrderSink {
    trading: polytrade_exchange::trading::TradingClient,
}

impl ClobOrderSink {
    /// Wraps a trading client.
    #[must_use]
    pub fn new(trading: polytrade_exchange::trading::TradingClient) -> Self {
        Self { trading }
    }
}

#[async_trait]
impl OrderSink for ClobOrderSink {
    async fn place(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        usdc: Decimal,
    ) -> anyhow::Result<Decimal> {
        let size = usdc / price;
        let order = self
            .trading
            .create_order(
                token_id,
                side,
                price,
                size,
                polytrade_exchange::trading::LimitOrderType::Gtc,
                None,
            )
            .await?;
        Ok(order.filled_size * order.price)
    }
}

/// Sink used when no wallet is configured: every call refuses.
pub struct RejectingSink;

#[async_trait]
impl OrderSink for RejectingSink {
    async fn place(
        &self,
        _token_id: &str,
        _side: Side,
        _price: Decimal,
        _usdc: Decimal,
    ) -> anyhow::Result<Decimal> {
        anyhow::bail!("trading disabled: no wallet configured")
    }
}

/// Aggregate paper statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaperSummary {
    pub executions: usize,
    pub orders: usize,
    pub total_filled_usdc: Decimal,
    pub stop_reasons: std::collections::HashMap<String, usize>,
}

/// The auto-trader.
pub struct AutoTrader {
    config: RwLock<AutoTraderConfig>,
    books: PriceCache,
    sink: Arc<dyn OrderSink>,
    pending: Mutex<VecDeque<Suggestion>>,
    history: Mutex<VecDeque<ExecutionReport>>,
    order_times_ms: Mutex<VecDeque<i64>>,
    paper_store: JsonStore,
}

impl AutoTrader {
    /// Creates a trader. `paper_store` persists the paper history.
    pub fn new(
        config: AutoTraderConfig,
        books: PriceCache,
        sink: Arc<dyn OrderSink>,
        paper_store: JsonStore,
    ) -> anyhow::Result<Self> {
        let history: Vec<ExecutionReport> = paper_store.load()?;
        Ok(Self {
            config: RwLock::new(config),
            books,
            sink,
            pending: Mutex::new(VecDeque::new()),
            history: Mutex::new(history.into_iter().collect()),
            order_times_ms: Mutex::new(VecDeque::new()),
            paper_store,
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> AutoTraderConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration.
    pub fn set_config(&self, config: AutoTraderConfig) {
        *self.config.write() = config;
    }

    /// Pending (queued) suggestions.
    #[must_use]
    pub fn pending(&self) -> Vec<Suggestion> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Execution history, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<ExecutionReport> {
        self.history.lock().iter().rev().cloned().collect()
    }

    /// Paper summary across the stored history.
    #[must_use]
    pub fn paper_summary(&self) -> PaperSummary {
        let history = self.history.lock();
        let mut summary = PaperSummary::default();
        for report in history.iter().filter(|r| r.paper) {
            summary.executions += 1;
            summary.orders += report.orders.len();
            summary.total_filled_usdc += report
                .orders
                .iter()
                .map(|o| o.filled_usdc)
                .sum::<Decimal>();
            if let Some(reason) = report.stop_reason {
                *summary
                    .stop_reasons
                    .entry(format!("{reason:?}"))
                    .or_default() += 1;
            }
        }
        summary
    }

    /// Entry point for new suggestions from the runner.
    pub async fn handle(&self, suggestion: Suggestion) -> Option<ExecutionReport> {
        if !self.passes_lists(&suggestion) {
            debug!(id = %suggestion.id, "suggestion blocked by allow/deny lists");
            return None;
        }
        let mode = self.config.read().mode;
        match mode {
            TradeMode::Queue => {
                self.pending.lock().push_back(suggestion);
                None
            }
            TradeMode::Auto => Some(self.execute(&suggestion).await),
        }
    }

    /// Executes a queued suggestion by id.
    pub async fn execute_pending(&self, id: &str) -> Option<ExecutionReport> {
        let suggestion = {
            let mut pending = self.pending.lock();
            let idx = pending.iter().position(|s| s.id == id)?;
            pending.remove(idx)
        }?;
        Some(self.execute(&suggestion).await)
    }

    fn passes_lists(&self, suggestion: &Suggestion) -> bool {
        let config = self.config.read();
        let condition = &suggestion.event.condition_id;
        if config.deny_condition_ids.contains(condition) {
            return false;
        }
        if !config.allow_condition_ids.is_empty()
            && !config.allow_condition_ids.contains(condition)
        {
            return false;
        }
        true
    }

    fn orders_in_last_hour(&self, now: i64) -> u32 {
        let mut times = self.order_times_ms.lock();
        while let Some(front) = times.front() {
            if now - front > 3_600_000 {
                times.pop_front();
            } else {
                break;
            }
        }
        times.len() as u32
    }

    /// Runs one execution and records the report.
    pub async fn execute(&self, suggestion: &Suggestion) -> ExecutionReport {
        let config = self.config.read().clone();
        let now = now_ms();

        let mut report = ExecutionReport {
            suggestion_id: suggestion.id.clone(),
            condition_id: suggestion.event.condition_id.clone(),
            orders: Vec::new(),
            total_usdc: Decimal::ZERO,
            stop_reason: None,
            paper: config.paper,
            executed_at_ms: now,
        };

        if self.orders_in_last_hour(now) >= config.max_orders_per_hour {
            report.stop_reason = Some(SweepStopReason::QuotaHit);
            self.record(report.clone());
            return report;
        }

        match config.style {
            ExecStyle::Copy => self.execute_copy(suggestion, &config, &mut report).await,
            ExecStyle::Sweep => self.execute_sweep(suggestion, &config, &mut report).await,
        }

        report.total_usdc = report.orders.iter().map(|o| o.filled_usdc).sum();
        info!(
            suggestion = %suggestion.id,
            orders = report.orders.len(),
            total = %report.total_usdc,
            stop = ?report.stop_reason,
            paper = report.paper,
            "execution finished"
        );
        self.record(report.clone());
        report
    }

    async fn execute_copy(
        &self,
        suggestion: &Suggestion,
        config: &AutoTraderConfig,
        report: &mut ExecutionReport,
    ) {
        let event = &suggestion.event;
        let side = event.side.unwrap_or(Side::Buy);
        let buffer = Decimal::from(config.price_buffer_cents) / Decimal::from(100);
        let price = match side {
            Side::Buy => event.price + buffer,
            Side::Sell => event.price - buffer,
        }
        .clamp(Decimal::new(1, 2), Decimal::new(99, 2));

        let filled = self
            .fill(config, &event.asset, side, price, suggestion.suggested_usdc)
            .await;
        match filled {
            Ok(filled_usdc) => {
                if filled_usdc < suggestion.suggested_usdc {
                    report.stop_reason = Some(SweepStopReason::InsufficientDepth);
                }
                self.note_order(report, &event.asset, side, price, suggestion.suggested_usdc, filled_usdc);
            }
            Err(e) => {
                warn!(error = %e, "copy order failed");
                report.stop_reason = Some(SweepStopReason::InsufficientDepth);
            }
        }
    }

    async fn execute_sweep(
        &self,
        suggestion: &Suggestion,
        config: &AutoTraderConfig,
        report: &mut ExecutionReport,
    ) {
        let event = &suggestion.event;
        let side = event.side.unwrap_or(Side::Buy);
        let price_cap = Decimal::from(config.sweep_price_cap_cents) / Decimal::from(100);

        let Some(book) = self.books.book(&event.asset) else {
            report.stop_reason = Some(SweepStopReason::InsufficientDepth);
            return;
        };
        let levels: Vec<(Decimal, Decimal)> = match side {
            Side::Buy => book.asks.iter().map(|l| (l.price, l.price * l.size)).collect(),
            Side::Sell => book.bids.iter().map(|l| (l.price, l.price * l.size)).collect(),
        };

        let mut budget = config.sweep_max_usdc_per_event;
        let mut event_remaining = suggestion.suggested_usdc;
        let mut first = true;

        for (price, level_usd) in levels {
            // Price cap is checked before the budget so a cap-priced level
            // reports as priceCapHit even when the budget also just ran out.
            let beyond_cap = match side {
                Side::Buy => price > price_cap,
                Side::Sell => price < Decimal::ONE - price_cap,
            };
            if beyond_cap {
                report.stop_reason = Some(SweepStopReason::PriceCapHit);
                return;
            }
            if report.orders.len() >= config.sweep_max_orders_per_event
                || budget <= Decimal::ZERO
            {
                report.stop_reason = Some(SweepStopReason::CapReached);
                return;
            }
            if self.orders_in_last_hour(now_ms()) >= config.max_orders_per_hour {
                report.stop_reason = Some(SweepStopReason::QuotaHit);
                return;
            }

            if !first {
                tokio::time::sleep(Duration::from_millis(config.sweep_min_interval_ms)).await;
            }
            first = false;

            let take = level_usd.min(budget).min(event_remaining);
            if take <= Decimal::ZERO {
                break;
            }
            match self.fill(config, &event.asset, side, price, take).await {
                Ok(filled_usdc) => {
                    self.note_order(report, &event.asset, side, price, take, filled_usdc);
                    budget -= take;
                    event_remaining -= take;
                }
                Err(e) => {
                    warn!(error = %e, "sweep order failed");
                    report.stop_reason = Some(SweepStopReason::InsufficientDepth);
                    return;
                }
            }

            if event_remaining <= Decimal::ZERO {
                report.stop_reason = Some(SweepStopReason::SizeExhausted);
                return;
            }
        }

        // Book ran out with budget and size remaining.
        if report.stop_reason.is_none()
            && budget > Decimal::ZERO
            && event_remaining > Decimal::ZERO
        {
            report.stop_reason = Some(SweepStopReason::InsufficientDepth);
        }
    }

    /// Fills one order: against the sink when live, against the cached
    /// book ("touch" rule: the level must cross the limit) when paper.
    async fn fill(
        &self,
        config: &AutoTraderConfig,
        token_id: &str,
        side: Side,
        price: Decimal,
        usdc: Decimal,
    ) -> anyhow::Result<Decimal> {
        if !config.paper {
            return self.sink.place(token_id, side, price, usdc).await;
        }
        let Some(book) = self.books.book(token_id) else {
            return Ok(Decimal::ZERO);
        };
        let filled = match side {
            Side::Buy => book
                .asks
                .iter()
                .filter(|l| l.price <= price)
                .map(|l| l.price * l.size)
                .sum::<Decimal>(),
            Side::Sell => book
                .bids
                .iter()
                .filter(|l| l.price >= price)
                .map(|l| l.price * l.size)
                .sum::<Decimal>(),
        };
        Ok(filled.min(usdc))
    }

    fn note_order(
        &self,
        report: &mut ExecutionReport,
        token_id: &str,
        side: Side,
        price: Decimal,
        usdc: Decimal,
        filled_usdc: Decimal,
    ) {
        self.order_times_ms.lock().push_back(now_ms());
        report.orders.push(PlacedOrder {
            token_id: token_id.to_string(),
            side,
            price,
            usdc,
            filled_usdc,
        });
    }

    fn record(&self, report: ExecutionReport) {
        let mut history = self.history.lock();
        history.push_back(report);
        while history.len() > PAPER_HISTORY_CAP {
            history.pop_front();
        }
        let snapshot: Vec<ExecutionReport> = history.iter().cloned().collect();
        drop(history);
        if let Err(e) = self.paper_store.save(&snapshot) {
            warn!(error = %e, "paper history save failed");
        }
    }
}
