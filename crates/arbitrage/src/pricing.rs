//! Mirrored effective prices and the arbitrage predicate.
//!
//! On a binary market, buying YES at P and selling NO at 1-P are the same
//! trade, so the cheapest way to acquire YES exposure is
//! `min(yesAsk, 1 - noBid)` and symmetrically for the other three legs.
//! Top-of-book comparisons that ignore the mirror double-count the same
//! resting order on both legs and report phantom arbitrage; everything
//! downstream prices off these effective values instead.

use polytrade_exchange::orderbook::NormalizedBook;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The four effective prices plus the two aggregate legs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectivePrices {
    pub eff_buy_yes: Decimal,
    pub eff_buy_no: Decimal,
    pub eff_sell_yes: Decimal,
    pub eff_sell_no: Decimal,
    /// `eff_buy_yes + eff_buy_no`: cost of acquiring one full pair.
    pub long_cost: Decimal,
    /// `eff_sell_yes + eff_sell_no`: proceeds of shedding one full pair.
    pub short_revenue: Decimal,
}

/// Computes effective prices from the four top-of-book quotes.
#[must_use]
pub fn effective_prices_from_quotes(
    yes_ask: Decimal,
    yes_bid: Decimal,
    no_ask: Decimal,
    no_bid: Decimal,
) -> EffectivePrices {
    let eff_buy_yes = yes_ask.min(Decimal::ONE - no_bid);
    let eff_buy_no = no_ask.min(Decimal::ONE - yes_bid);
    let eff_sell_yes = yes_bid.max(Decimal::ONE - no_ask);
    let eff_sell_no = no_bid.max(Decimal::ONE - yes_ask);

    EffectivePrices {
        eff_buy_yes,
        eff_buy_no,
        eff_sell_yes,
        eff_sell_no,
        long_cost: eff_buy_yes + eff_buy_no,
        short_revenue: eff_sell_yes + eff_sell_no,
    }
}

/// Computes effective prices from two normalized books. Returns `None`
/// unless all four top-of-book quotes are present.
#[must_use]
pub fn effective_prices(yes: &NormalizedBook, no: &NormalizedBook) -> Option<EffectivePrices> {
    Some(effective_prices_from_quotes(
        yes.best_ask()?,
        yes.best_bid()?,
        no.best_ask()?,
        no.best_bid()?,
    ))
}

/// Direction of a detected opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbType {
    /// Buy both legs below $1, merge on-chain.
    Long,
    /// Split collateral, sell both legs above $1.
    Short,
}

/// A positive arbitrage verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbSignal {
    pub arb_type: ArbType,
    /// Profit per $1 pair before gas.
    pub profit_rate: Decimal,
    /// Human-readable execution plan.
    pub action: &'static str,
    pub prices: EffectivePrices,
}

/// Evaluates the predicate at threshold `epsilon`.
///
/// When both directions qualify (possible only through mirror
/// inefficiency), long wins: it needs no prior inventory.
#[must_use]
pub fn check_arbitrage(
    yes_ask: Decimal,
    no_ask: Decimal,
    yes_bid: Decimal,
    no_bid: Decimal,
    epsilon: Decimal,
) -> Option<ArbSignal> {
    let prices = effective_prices_from_quotes(yes_ask, yes_bid, no_ask, no_bid);

    if prices.long_cost < Decimal::ONE - epsilon {
        return Some(ArbSignal {
            arb_type: ArbType::Long,
            profit_rate: Decimal::ONE - prices.long_cost,
            action: "buy YES + buy NO, merge",
            prices,
        });
    }
    if prices.short_revenue > Decimal::ONE + epsilon {
        return Some(ArbSignal {
            arb_type: ArbType::Short,
            profit_rate: prices.short_revenue - Decimal::ONE,
            action: "split 1 USDC, sell both",
            prices,
        });
    }
    None
}

/// Book-level convenience wrapper around [`check_arbitrage`].
#[must_use]
pub fn check_books(
    yes: &NormalizedBook,
    no: &NormalizedBook,
    epsilon: Decimal,
) -> Option<ArbSignal> {
    let yes_ask = yes.best_ask()?;
    let yes_bid = yes.best_bid()?;
    let no_ask = no.best_ask()?;
    let no_bid = no.best_bid()?;
    check_arbitrage(yes_ask, no_ask, yes_bid, no_bid, epsilon)
}
