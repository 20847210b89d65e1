//! The strategy seam and the action executor it feeds.

use async_trait::async_trait;
use polytrade_exchange::models::Side;
use polytrade_exchange::price_cache::PriceCache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Events the session loop merges for the strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A subscribed asset's book changed.
    BookUpdate { asset_id: String },
    /// The periodic tick fired.
    Tick,
}

/// Signals a strategy may emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "signal")]
pub enum StrategySignal {
    /// Ask the rebalancer to act (subject to its cooldown).
    Rebalance,
    PlaceOrder {
        token_id: String,
        side: Side,
        price: Decimal,
        size: Decimal,
    },
    CancelOrder {
        order_id: String,
    },
}

/// Read-only context handed to the strategy on every event.
pub struct StrategyContext<'a> {
    pub books: &'a PriceCache,
    pub yes_asset_id: &'a str,
    pub no_asset_id: &'a str,
    /// True while a high-priority rebalance is pausing quotes.
    pub quotes_paused: bool,
}

/// A trading strategy driven by the session loop.
pub trait Strategy: Send {
    /// Reacts to one merged event with zero or more signals.
    fn on_event(&mut self, event: &SessionEvent, ctx: &StrategyContext<'_>) -> Vec<StrategySignal>;

    /// Display name.
    fn name(&self) -> &str;
}

/// Where serialized actions land: order placement and rebalancing.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Places a limit order, returning its id.
    async fn place_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> anyhow::Result<String>;

    /// Cancels an order by id.
    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()>;

    /// Runs a rebalance pass for the market. Returns true when an action
    /// was actually taken.
    async fn rebalance(&self, condition_id: &str) -> anyhow::Result<bool>;

    /// Free collateral, for the session's balance snapshots.
    async fn free_collateral(&self) -> anyhow::Result<Decimal>;
}

/// A minimal two-sided quoting strategy: keeps one bid and one ask a
/// fixed distance inside the current spread, and asks for a rebalance on
/// every tick (the rebalancer's cooldown does the actual pacing).
pub struct SpreadQuoter {
    half_spread: Decimal,
    size: Decimal,
    open_orders: Vec<String>,
}

impl SpreadQuoter {
    /// Creates a quoter with the given half-spread and quote size.
    #[must_use]
    pub fn new(half_spread: Decimal, size: Decimal) -> Self {
        Self {
            half_spread,
            size,
            open_orders: Vec::new(),
        }
    }

    /// Records an order id the session placed for us.
    pub fn track_order(&mut self, order_id: String) {
        self.open_orders.push(order_id);
    }
}

impl Strategy for SpreadQuoter {
    fn on_event(&mut self, event: &SessionEvent, ctx: &StrategyContext<'_>) -> Vec<StrategySignal> {
        match event {
            SessionEvent::Tick => vec![StrategySignal::Rebalance],
            SessionEvent::BookUpdate { asset_id } if asset_id == ctx.yes_asset_id => {
                if ctx.quotes_paused {
                    return Vec::new();
                }
                let Some(book) = ctx.books.book(ctx.yes_asset_id) else {
                    return Vec::new();
                };
                let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) else {
                    return Vec::new();
                };
                let mid = (bid + ask) / Decimal::TWO;

                let mut signals: Vec<StrategySignal> = self
                    .open_orders
                    .drain(..)
                    .map(|order_id| StrategySignal::CancelOrder { order_id })
                    .collect();
                signals.push(StrategySignal::PlaceOrder {
                    token_id: ctx.yes_asset_id.to_string(),
                    side: Side::Buy,
                    price: mid - self.half_spread,
                    size: self.size,
                });
                signals.push(StrategySignal::PlaceOrder {
                    token_id: ctx.yes_asset_id.to_string(),
                    side: Side::Sell,
                    price: mid + self.half_spread,
                    size: self.size,
                });
                signals
            }
            SessionEvent::BookUpdate { .. } => Vec::new(),
        }
    }

    fn name(&self) -> &str {
        "spread_quoter"
    }
}
