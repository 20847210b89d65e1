//! Opportunity and execution records.

use crate::pricing::{ArbType, EffectivePrices};
use chrono::{DateTime, Utc};
use polytrade_core::ErrorKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The slice of market metadata the engine carries around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRef {
    pub condition_id: String,
    pub question: String,
    pub yes_asset_id: String,
    pub no_asset_id: String,
    pub neg_risk: bool,
}

impl MarketRef {
    /// Builds a reference from a gateway market; `None` when the YES/NO
    /// pair is missing or degenerate.
    #[must_use]
    pub fn from_market(market: &polytrade_exchange::models::Market) -> Option<Self> {
        if !market.has_valid_pair() {
            return None;
        }
        Some(Self {
            condition_id: market.condition_id.clone(),
            question: market.question.clone(),
            yes_asset_id: market.yes_token()?.asset_id.clone(),
            no_asset_id: market.no_token()?.asset_id.clone(),
            neg_risk: market.is_neg_risk,
        })
    }
}

/// A cached opportunity. Evicted when a scan cycle fails to re-find it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbOpportunity {
    pub market: MarketRef,
    pub arb_type: ArbType,
    /// Profit per $1 pair before gas.
    pub profit_rate: Decimal,
    pub prices: EffectivePrices,
    /// Final size after every cap and the safety factor, USD.
    pub recommended_size: Decimal,
    /// Depth-limited size cap, USD.
    pub max_orderbook_size: Decimal,
    /// Balance-limited size cap, USD.
    pub max_balance_size: Decimal,
    /// Detection wall-clock, ms.
    pub detected_at_ms: i64,
    /// `fetched_at_ms` of the older of the two books that produced this.
    pub book_fetched_at_ms: i64,
}

impl ArbOpportunity {
    /// Age of the underlying book data at `now_ms`.
    #[must_use]
    pub fn book_age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.book_fetched_at_ms
    }
}

/// Terminal state of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ExecutionStatus {
    /// Both legs and settlement completed.
    Completed,
    /// One leg filled, the other did not; rebalancer owns the cleanup.
    Imbalanced { filled_leg: String },
    /// Aborted before any order went out.
    Aborted { reason_kind: ErrorKind, reason: String },
    /// Split succeeded but a sell leg failed; tokens remain until rebalance.
    PartialShort { reason: String },
}

/// Per-execution accounting record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub condition_id: String,
    pub arb_type: ArbType,
    pub status: ExecutionStatus,
    /// Size attempted, USD.
    pub size: Decimal,
    /// Sum of buy-leg costs, USD.
    pub buy_cost: Decimal,
    /// Sum of sell-leg proceeds, USD.
    pub sell_proceeds: Decimal,
    /// USDC recovered through merge, USD.
    pub merged_recovered: Decimal,
    /// Gas spent across settlement calls, USD equivalent.
    pub gas_cost: Decimal,
    /// `sell_proceeds + merged_recovered - buy_cost - gas_cost`.
    pub realized_profit: Decimal,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Recomputes the profit identity; used by tests and the history view.
    #[must_use]
    pub fn profit_identity_holds(&self) -> bool {
        self.realized_profit
            == self.sell_proceeds + self.merged_recovered - self.buy_cost - self.gas_cost
    }
}
