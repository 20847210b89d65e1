//! Atomic two-leg execution.
//!
//! Long: buy both legs with FOK market orders, then merge the paired
//! tokens for $1 each. Short: split collateral first (must succeed), then
//! sell both legs. Every attempt produces an [`ExecutionRecord`] with the
//! full cost accounting; nothing is silently skipped; aborts carry the
//! classified reason.

use crate::pricing::ArbType;
use crate::types::{ArbOpportunity, ExecutionRecord, ExecutionStatus};
use async_trait::async_trait;
use chrono::Utc;
use polytrade_core::{now_ms, ErrorKind};
use polytrade_exchange::models::Side;
use polytrade_exchange::trading::{MarketOrderType, TradingClient, TradingError};
use polytrade_onchain::settlement::{SettlementClient, SettlementError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from leg or settlement calls.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order leg failed: {0}")]
    Leg(String),

    #[error("settlement failed: {0}")]
    Settlement(String),
}

impl From<TradingError> for ExecutionError {
    fn from(e: TradingError) -> Self {
        Self::Leg(e.to_string())
    }
}

impl From<SettlementError> for ExecutionError {
    fn from(e: SettlementError) -> Self {
        Self::Settlement(e.to_string())
    }
}

/// Result of one order leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegFill {
    /// Shares bought or sold.
    pub shares: Decimal,
    /// USDC paid (buy) or received (sell).
    pub usdc: Decimal,
}

/// The execution seam: order legs plus settlement calls.
///
/// The live implementation wires the trading and settlement clients; tests
/// and paper mode substitute their own.
#[async_trait]
pub trait LegExecutor: Send + Sync {
    /// Market-buys `usdc` worth of a token. Returns the fill.
    async fn market_buy(&self, token_id: &str, usdc: Decimal) -> Result<LegFill, ExecutionError>;

    /// Market-sells `shares` of a token. Returns the fill.
    async fn market_sell(&self, token_id: &str, shares: Decimal)
        -> Result<LegFill, ExecutionError>;

    /// Merges `amount` pairs; returns gas cost in USD.
    async fn merge(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<Decimal, ExecutionError>;

    /// Splits `amount` USDC; returns gas cost in USD.
    async fn split(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<Decimal, ExecutionError>;
}

#[async_trait]
impl<T: LegExecutor + ?Sized> LegExecutor for std::sync::Arc<T> {
    async fn market_buy(&self, token_id: &str, usdc: Decimal) -> Result<LegFill, ExecutionError> {
        (**self).market_buy(token_id, usdc).await
    }
    async fn market_sell(
        &self,
        token_id: &str,
        shares: Decimal,
    ) -> Result<LegFill, ExecutionError> {
        (**self).market_sell(token_id, shares).await
    }
    async fn merge(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<Decimal, ExecutionError> {
        (**self).merge(condition_id, amount, neg_risk).await
    }
    async fn split(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<Decimal, ExecutionError> {
        (**self).split(condition_id, amount, neg_risk).await
    }
}

/// Live seam over the real clients.
pub struct LiveLegExecutor {
    trading: TradingClient,
    settlement: SettlementClient,
    /// Flat per-transaction gas estimate, USD.
    gas_per_tx: Decimal,
}

impl LiveLegExecutor {
    /// Wires the live clients.
    #[must_use]
    pub fn new(trading: TradingClient, settlement: SettlementClient, gas_per_tx: Decimal) -> Self {
        Self {
            trading,
            settlement,
            gas_per_tx,
        }
    }
}

#[async_trait]
impl LegExecutor for LiveLegExecutor {
    async fn market_buy(&self, token_id: &str, usdc: Decimal) -> Result<LegFill, ExecutionError> {
        let order = self
            .trading
            .create_market_order(token_id, Side::Buy, usdc, MarketOrderType::Fok)
            .await?;
        Ok(LegFill {
            shares: order.filled_size,
            usdc: order.filled_size * order.price,
        })
    }

    async fn market_sell(
        &self,
        token_id: &str,
        shares: Decimal,
    ) -> Result<LegFill, ExecutionError> {
        let order = self
            .trading
            .create_market_order(token_id, Side::Sell, shares, MarketOrderType::Fok)
            .await?;
        Ok(LegFill {
            shares: order.filled_size,
            usdc: order.filled_size * order.price,
        })
    }

    async fn merge(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<Decimal, ExecutionError> {
        self.settlement
            .merge_by_token_ids(condition_id, amount, neg_risk)
            .await?;
        Ok(self.gas_per_tx)
    }

    async fn split(
        &self,
        condition_id: &str,
        amount: Decimal,
        neg_risk: bool,
    ) -> Result<Decimal, ExecutionError> {
        self.settlement.split(condition_id, amount, neg_risk).await?;
        Ok(self.gas_per_tx)
    }
}

/// Seam used when no wallet is configured: every call refuses.
pub struct DisabledLegExecutor;

#[async_trait]
impl LegExecutor for DisabledLegExecutor {
    async fn market_buy(&self, _token_id: &str, _usdc: Decimal) -> Result<LegFill, ExecutionError> {
        Err(ExecutionError::Leg("trading disabled: no wallet configured".into()))
    }
    async fn market_sell(
        &self,
        _token_id: &str,
        _shares: Decimal,
    ) -> Result<LegFill, ExecutionError> {
        Err(ExecutionError::Leg("trading disabled: no wallet configured".into()))
    }
    async fn merge(
        &self,
        _condition_id: &str,
        _amount: Decimal,
        _neg_risk: bool,
    ) -> Result<Decimal, ExecutionError> {
        Err(ExecutionError::Settlement("settlement disabled: no wallet configured".into()))
    }
    async fn split(
        &self,
        _condition_id: &str,
        _amount: Decimal,
        _neg_risk: bool,
    ) -> Result<Decimal, ExecutionError> {
        Err(ExecutionError::Settlement("settlement disabled: no wallet configured".into()))
    }
}

/// Executor tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Book snapshot TTL at execution time, ms.
    pub book_ttl_ms: i64,
    /// Smallest order the executor will send, USD.
    pub min_trade_size: Decimal,
    /// Hard cap per execution, USD.
    pub max_trade_size: Decimal,
    /// Fraction of the computed size actually sent.
    pub size_safety_factor: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            book_ttl_ms: 2_000,
            min_trade_size: Decimal::from(5),
            max_trade_size: Decimal::from(100),
            size_safety_factor: Decimal::new(8, 1),
        }
    }
}

/// Atomic multi-leg executor.
pub struct ArbExecutor<L: LegExecutor> {
    legs: L,
    config: ExecutorConfig,
}

impl<L: LegExecutor> ArbExecutor<L> {
    /// Creates an executor over a leg seam.
    #[must_use]
    pub fn new(legs: L, config: ExecutorConfig) -> Self {
        Self { legs, config }
    }

    /// The underlying leg seam (the rebalancer shares it).
    #[must_use]
    pub fn legs(&self) -> &L {
        &self.legs
    }

    /// Size after every cap and the safety factor.
    #[must_use]
    pub fn select_size(&self, opp: &ArbOpportunity) -> Decimal {
        opp.max_orderbook_size
            .min(opp.max_balance_size)
            .min(self.config.max_trade_size)
            * self.config.size_safety_factor
    }

    /// Runs one execution attempt; always returns a full record.
    pub async fn execute(&self, opp: &ArbOpportunity) -> ExecutionRecord {
        let started_at = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        // Stale books abort before anything goes out.
        let age = opp.book_age_ms(now_ms());
        if age > self.config.book_ttl_ms {
            warn!(
                condition_id = %opp.market.condition_id,
                age_ms = age,
                "aborting on stale book"
            );
            return self.aborted(
                id,
                opp,
                started_at,
                ErrorKind::StaleBook,
                format!("book is {age}ms old, ttl {}ms", self.config.book_ttl_ms),
            );
        }

        let size = self.select_size(opp);
        if size < self.config.min_trade_size {
            return self.aborted(
                id,
                opp,
                started_at,
                ErrorKind::Validation,
                format!("size {size} below minimum {}", self.config.min_trade_size),
            );
        }

        match opp.arb_type {
            ArbType::Long => self.execute_long(id, opp, size, started_at).await,
            ArbType::Short => self.execute_short(id, opp, size, started_at).await,
        }
    }

    async fn execute_long(
        &self,
        id: String,
        opp: &ArbOpportunity,
        size: Decimal,
        started_at: chrono::DateTime<Utc>,
    ) -> ExecutionRecord {
        let market = &opp.market;
        let yes_budget = size * opp.prices.eff_buy_yes;
        let no_budget = size * opp.prices.eff_buy_no;

        // Legs go out back-to-back; signing keeps them serial.
        let yes_fill = match self.legs.market_buy(&market.yes_asset_id, yes_budget).await {
            Ok(fill) => fill,
            Err(e) => {
                return self.aborted(
                    id,
                    opp,
                    started_at,
                    ErrorKind::Other,
                    format!("YES leg failed before any fill: {e}"),
                );
            }
        };
        let no_fill = match self.legs.market_buy(&market.no_asset_id, no_budget).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(condition_id = %market.condition_id, error = %e, "NO leg failed after YES fill");
                return ExecutionRecord {
                    id,
                    condition_id: market.condition_id.clone(),
                    arb_type: ArbType::Long,
                    status: ExecutionStatus::Imbalanced {
                        filled_leg: "yes".to_string(),
                    },
                    size,
                    buy_cost: yes_fill.usdc,
                    sell_proceeds: Decimal::ZERO,
                    merged_recovered: Decimal::ZERO,
                    gas_cost: Decimal::ZERO,
                    realized_profit: -yes_fill.usdc,
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        };

        let pairs = yes_fill.shares.min(no_fill.shares);
        let buy_cost = yes_fill.usdc + no_fill.usdc;
        let (merged, gas) = if pairs > Decimal::ZERO {
            match self
                .legs
                .merge(&market.condition_id, pairs, market.neg_risk)
                .await
            {
                Ok(gas) => (pairs, gas),
                Err(e) => {
                    warn!(condition_id = %market.condition_id, error = %e, "merge failed after fills");
                    return ExecutionRecord {
                        id,
                        condition_id: market.condition_id.clone(),
                        arb_type: ArbType::Long,
                        status: ExecutionStatus::Imbalanced {
                            filled_leg: "both-unmerged".to_string(),
                        },
                        size,
                        buy_cost,
                        sell_proceeds: Decimal::ZERO,
                        merged_recovered: Decimal::ZERO,
                        gas_cost: Decimal::ZERO,
                        realized_profit: -buy_cost,
                        started_at,
                        finished_at: Utc::now(),
                    };
                }
            }
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        let realized = merged - buy_cost - gas;
        info!(
            condition_id = %market.condition_id,
            %pairs,
            profit = %realized,
            "long arb executed"
        );
        ExecutionRecord {
            id,
            condition_id: market.condition_id.clone(),
            arb_type: ArbType::Long,
            status: ExecutionStatus::Completed,
            size,
            buy_cost,
            sell_proceeds: Decimal::ZERO,
            merged_recovered: merged,
            gas_cost: gas,
            realized_profit: realized,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn execute_short(
        &self,
        id: String,
        opp: &ArbOpportunity,
        size: Decimal,
        started_at: chrono::DateTime<Utc>,
    ) -> ExecutionRecord {
        let market = &opp.market;

        // Split must succeed before any sell goes out.
        let split_gas = match self
            .legs
            .split(&market.condition_id, size, market.neg_risk)
            .await
        {
            Ok(gas) => gas,
            Err(e) => {
                return self.aborted(
                    id,
                    opp,
                    started_at,
                    ErrorKind::OnChainRevert,
                    format!("split failed: {e}"),
                );
            }
        };

        let mut sell_proceeds = Decimal::ZERO;
        let mut failure: Option<String> = None;

        for (leg, token) in [
            ("yes", &market.yes_asset_id),
            ("no", &market.no_asset_id),
        ] {
            match self.legs.market_sell(token, size).await {
                Ok(fill) => sell_proceeds += fill.usdc,
                Err(e) => {
                    // Leftover tokens stay until a later rebalance; this is
                    // reported, not retried.
                    warn!(leg, error = %e, "sell leg failed after split");
                    failure = Some(format!("{leg} sell failed: {e}"));
                    break;
                }
            }
        }

        let buy_cost = size; // the split consumed `size` USDC
        let realized = sell_proceeds - buy_cost - split_gas;
        let status = match failure {
            None => ExecutionStatus::Completed,
            Some(reason) => ExecutionStatus::PartialShort { reason },
        };
        if status == ExecutionStatus::Completed {
            info!(
                condition_id = %market.condition_id,
                %size,
                profit = %realized,
                "short arb executed"
            );
        }
        ExecutionRecord {
            id,
            condition_id: market.condition_id.clone(),
            arb_type: ArbType::Short,
            status,
            size,
            buy_cost,
            sell_proceeds,
            merged_recovered: Decimal::ZERO,
            gas_cost: split_gas,
            realized_profit: realized,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn aborted(
        &self,
        id: String,
        opp: &ArbOpportunity,
        started_at: chrono::DateTime<Utc>,
        kind: ErrorKind,
        reason: String,
    ) -> ExecutionRecord {
        ExecutionRecord {
            id,
            condition_id: opp.market.condition_id.clone(),
            arb_type: opp.arb_type,
            status: ExecutionStatus::Aborted {
                reason_kind: kind,
                reason,
            },
            size: Decimal::ZERO,
            buy_cost: Decimal::ZERO,
            sell_proceeds: Decimal::ZERO,
            merged_recovered: Decimal::ZERO,
            gas_cost: Decimal::ZERO,
            realized_profit: Decimal::ZERO,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::effective_prices_from_quotes;
    use crate::types::MarketRef;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct MockLegs {
        calls: Mutex<Vec<String>>,
        fail_no_buy: bool,
        fail_split: bool,
        fail_no_sell: bool,
        fail_merge: bool,
    }

    #[async_trait]
    impl LegExecutor for MockLegs {
        async fn market_buy(
            &self,
            token_id: &str,
            usdc: Decimal,
        ) -> Result<LegFill, ExecutionError> {
            self.calls.lock().push(format!("buy:{token_id}"));
            if token_id == "no" && self.fail_no_buy {
                return Err(ExecutionError::Leg("FOK kill".into()));
            }
            // Fill exactly at the implied price.
            let price = if token_id == "yes" { dec!(0.48) } else { dec!(0.50) };
            Ok(LegFill {
                shares: usdc / price,
                usdc,
            })
        }

        async fn market_sell(
            &self,
            token_id: &str,
            shares: Decimal,
        ) -> Result<LegFill, ExecutionError> {
            self.calls.lock().push(format!("sell:{token_id}"));
            if token_id == "no" && self.fail_no_sell {
                return Err(ExecutionError::Leg("no liquidity".into()));
            }
            let price = if token_id == "yes" { dec!(0.52) } else { dec!(0.50) };
            Ok(LegFill {
                shares,
                usdc: shares * price,
            })
        }

        async fn merge(
            &self,
            condition_id: &str,
            amount: Decimal,
            _neg_risk: bool,
        ) -> Result<Decimal, ExecutionError> {
            self.calls.lock().push(format!("merge:{condition_id}:{amount}"));
            if self.fail_merge {
                return Err(ExecutionError::Settlement("revert".into()));
            }
            Ok(dec!(0.02))
        }

        async fn split(
            &self,
            condition_id: &str,
            amount: Decimal,
            _neg_risk: bool,
        ) -> Result<Decimal, ExecutionError> {
            self.calls.lock().push(format!("split:{condition_id}:{amount}"));
            if self.fail_split {
                return Err(ExecutionError::Settlement("not approved".into()));
            }
            Ok(dec!(0.02))
        }
    }

    fn long_opp(book_fetched_at_ms: i64) -> ArbOpportunity {
        ArbOpportunity {
            market: MarketRef {
                condition_id: "0xc".into(),
                question: "q?".into(),
                yes_asset_id: "yes".into(),
                no_asset_id: "no".into(),
                neg_risk: false,
            },
            arb_type: ArbType::Long,
            profit_rate: dec!(0.02),
            prices: effective_prices_from_quotes(dec!(0.48), dec!(0.47), dec!(0.50), dec!(0.49)),
            recommended_size: dec!(10),
            max_orderbook_size: dec!(100),
            max_balance_size: dec!(12.5),
            detected_at_ms: now_ms(),
            book_fetched_at_ms,
        }
    }

    fn short_opp() -> ArbOpportunity {
        ArbOpportunity {
            arb_type: ArbType::Short,
            prices: effective_prices_from_quotes(dec!(0.53), dec!(0.52), dec!(0.51), dec!(0.50)),
            ..long_opp(now_ms())
        }
    }

    fn executor(legs: MockLegs) -> ArbExecutor<MockLegs> {
        ArbExecutor::new(legs, ExecutorConfig::default())
    }

    #[test]
    fn size_selection_applies_caps_and_safety() {
        let ex = executor(MockLegs::default());
        // min(100, 12.5, 100) * 0.8 = 10
        assert_eq!(ex.select_size(&long_opp(now_ms())), dec!(10.0));
    }

    #[tokio::test]
    async fn long_executes_both_legs_then_merges() {
        let ex = executor(MockLegs::default());
        let record = ex.execute(&long_opp(now_ms())).await;

        assert_eq!(record.status, ExecutionStatus::Completed);
        // Buys: 10*0.48 + 10*0.50 = 9.8; merge recovers 10 pairs.
        assert_eq!(record.buy_cost, dec!(9.8));
        assert_eq!(record.merged_recovered, dec!(10.0));
        assert_eq!(record.gas_cost, dec!(0.02));
        assert_eq!(record.realized_profit, dec!(0.18));
        assert!(record.profit_identity_holds());

        let calls = ex.legs.calls.lock().clone();
        assert_eq!(calls[0], "buy:yes");
        assert_eq!(calls[1], "buy:no");
        assert!(calls[2].starts_with("merge:0xc"));
    }

    #[tokio::test]
    async fn stale_book_aborts_before_any_leg() {
        let ex = executor(MockLegs::default());
        let record = ex.execute(&long_opp(now_ms() - 2_500)).await;

        match &record.status {
            ExecutionStatus::Aborted { reason_kind, .. } => {
                assert_eq!(*reason_kind, ErrorKind::StaleBook);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(ex.legs.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn below_minimum_size_aborts() {
        let legs = MockLegs::default();
        let ex = ArbExecutor::new(
            legs,
            ExecutorConfig {
                min_trade_size: dec!(50),
                ..ExecutorConfig::default()
            },
        );
        let record = ex.execute(&long_opp(now_ms())).await;
        assert!(matches!(
            record.status,
            ExecutionStatus::Aborted {
                reason_kind: ErrorKind::Validation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_second_leg_is_imbalanced() {
        let ex = executor(MockLegs {
            fail_no_buy: true,
            ..MockLegs::default()
        });
        let record = ex.execute(&long_opp(now_ms())).await;

        assert!(matches!(
            &record.status,
            ExecutionStatus::Imbalanced { filled_leg } if filled_leg == "yes"
        ));
        // No merge attempted.
        let calls = ex.legs.calls.lock().clone();
        assert!(!calls.iter().any(|c| c.starts_with("merge")));
    }

    #[tokio::test]
    async fn failed_merge_reports_unmerged_pairs() {
        let ex = executor(MockLegs {
            fail_merge: true,
            ..MockLegs::default()
        });
        let record = ex.execute(&long_opp(now_ms())).await;
        assert!(matches!(
            &record.status,
            ExecutionStatus::Imbalanced { filled_leg } if filled_leg == "both-unmerged"
        ));
    }

    #[tokio::test]
    async fn short_splits_before_selling() {
        let ex = executor(MockLegs::default());
        let record = ex.execute(&short_opp()).await;

        assert_eq!(record.status, ExecutionStatus::Completed);
        let calls = ex.legs.calls.lock().clone();
        assert!(calls[0].starts_with("split:0xc"));
        assert_eq!(calls[1], "sell:yes");
        assert_eq!(calls[2], "sell:no");
        // Proceeds 10*0.52 + 10*0.50 = 10.2; cost 10; gas 0.02.
        assert_eq!(record.realized_profit, dec!(0.18));
        assert!(record.profit_identity_holds());
    }

    #[tokio::test]
    async fn failed_split_aborts_without_sells() {
        let ex = executor(MockLegs {
            fail_split: true,
            ..MockLegs::default()
        });
        let record = ex.execute(&short_opp()).await;

        assert!(matches!(
            record.status,
            ExecutionStatus::Aborted {
                reason_kind: ErrorKind::OnChainRevert,
                ..
            }
        ));
        let calls = ex.legs.calls.lock().clone();
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn failed_sell_after_split_is_partial() {
        let ex = executor(MockLegs {
            fail_no_sell: true,
            ..MockLegs::default()
        });
        let record = ex.execute(&short_opp()).await;
        assert!(matches!(record.status, ExecutionStatus::PartialShort { .. }));
        // YES sold, NO tokens remain.
        assert_eq!(record.sell_proceeds, dec!(5.2));
    }
}
