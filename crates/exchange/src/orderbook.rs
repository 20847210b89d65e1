//! Order book normalization.
//!
//! Raw depth arrives unsorted, with string-encoded prices and occasional
//! garbage rows. Normalization drops non-finite and non-positive entries,
//! sorts each side, truncates to the top N levels, and precomputes the
//! running USD totals the sizing logic needs.

use crate::models::{RawLevel, RawOrderbook};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Levels kept per side after normalization.
pub const DEFAULT_DEPTH: usize = 25;

/// One normalized depth level with the cumulative USD value at this level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
    /// Running `sum(price * size)` from the top of this side down to here.
    pub cum_usd: Decimal,
}

/// A normalized order book snapshot for one asset.
///
/// `bids` descend, `asks` ascend; both are capped at [`DEFAULT_DEPTH`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedBook {
    pub asset_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Local fetch time, milliseconds since epoch.
    pub fetched_at_ms: i64,
}

impl NormalizedBook {
    /// Normalizes a raw book, stamping it with `fetched_at_ms`.
    #[must_use]
    pub fn from_raw(raw: &RawOrderbook, fetched_at_ms: i64) -> Self {
        Self::from_raw_with_depth(raw, fetched_at_ms, DEFAULT_DEPTH)
    }

    /// Normalizes a raw book keeping at most `depth` levels per side.
    #[must_use]
    pub fn from_raw_with_depth(raw: &RawOrderbook, fetched_at_ms: i64, depth: usize) -> Self {
        let mut bids = clean_levels(&raw.bids);
        let mut asks = clean_levels(&raw.asks);

        // Bids best-first (descending), asks best-first (ascending).
        bids.sort_by(|a, b| b.0.cmp(&a.0));
        asks.sort_by(|a, b| a.0.cmp(&b.0));
        bids.truncate(depth);
        asks.truncate(depth);

        Self {
            asset_id: raw.asset_id.clone(),
            bids: accumulate(bids),
            asks: accumulate(asks),
            fetched_at_ms,
        }
    }

    /// Best bid price, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// `best_ask - best_bid`, when both sides exist.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Total USD resting on the ask side (all kept levels).
    #[must_use]
    pub fn ask_depth_usd(&self) -> Decimal {
        self.asks.last().map_or(Decimal::ZERO, |l| l.cum_usd)
    }

    /// Total USD resting on the bid side (all kept levels).
    #[must_use]
    pub fn bid_depth_usd(&self) -> Decimal {
        self.bids.last().map_or(Decimal::ZERO, |l| l.cum_usd)
    }

    /// Age of the snapshot relative to `now_ms`.
    #[must_use]
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.fetched_at_ms
    }

    /// True when the snapshot is older than `ttl_ms` at `now_ms`.
    #[must_use]
    pub fn is_stale(&self, now_ms: i64, ttl_ms: i64) -> bool {
        self.age_ms(now_ms) > ttl_ms
    }

    /// Applies a single-level delta (size 0 removes the level), keeping
    /// order and cumulative totals intact.
    pub fn apply_delta(&mut self, is_bid: bool, price: Decimal, size: Decimal) {
        if price <= Decimal::ZERO || price > Decimal::ONE {
            return;
        }
        let side: Vec<(Decimal, Decimal)> = {
            let levels = if is_bid { &self.bids } else { &self.asks };
            let mut pairs: Vec<(Decimal, Decimal)> = levels
                .iter()
                .filter(|l| l.price != price)
                .map(|l| (l.price, l.size))
                .collect();
            if size > Decimal::ZERO {
                pairs.push((price, size));
            }
            if is_bid {
                pairs.sort_by(|a, b| b.0.cmp(&a.0));
            } else {
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
            }
            pairs.truncate(DEFAULT_DEPTH);
            pairs
        };
        let rebuilt = accumulate(side);
        if is_bid {
            self.bids = rebuilt;
        } else {
            self.asks = rebuilt;
        }
    }
}

fn clean_levels(levels: &[RawLevel]) -> Vec<(Decimal, Decimal)> {
    levels
        .iter()
        .filter(|l| {
            l.price > Decimal::ZERO && l.price <= Decimal::ONE && l.size > Decimal::ZERO
        })
        .map(|l| (l.price, l.size))
        .collect()
}

fn accumulate(pairs: Vec<(Decimal, Decimal)>) -> Vec<BookLevel> {
    let mut cum = Decimal::ZERO;
    pairs
        .into_iter()
        .map(|(price, size)| {
            cum += price * size;
            BookLevel {
                price,
                size,
                cum_usd: cum,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> RawOrderbook {
        RawOrderbook {
            asset_id: "a1".into(),
            bids: bids
                .into_iter()
                .map(|(price, size)| RawLevel { price, size })
                .collect(),
            asks: asks
                .into_iter()
                .map(|(price, size)| RawLevel { price, size })
                .collect(),
            timestamp: None,
            hash: None,
        }
    }

    #[test]
    fn sorts_and_accumulates() {
        let book = NormalizedBook::from_raw(
            &raw(
                vec![(dec!(0.45), dec!(10)), (dec!(0.48), dec!(5))],
                vec![(dec!(0.55), dec!(4)), (dec!(0.52), dec!(8))],
            ),
            0,
        );
        assert_eq!(book.best_bid(), Some(dec!(0.48)));
        assert_eq!(book.best_ask(), Some(dec!(0.52)));
        assert_eq!(book.spread(), Some(dec!(0.04)));
        // cum_usd: 0.48*5 = 2.4, then + 0.45*10 = 6.9
        assert_eq!(book.bids[1].cum_usd, dec!(6.9));
        assert_eq!(book.ask_depth_usd(), dec!(0.52) * dec!(8) + dec!(0.55) * dec!(4));
    }

    #[test]
    fn drops_garbage_rows() {
        let book = NormalizedBook::from_raw(
            &raw(
                vec![
                    (dec!(0), dec!(10)),
                    (dec!(-0.2), dec!(10)),
                    (dec!(0.5), dec!(0)),
                    (dec!(1.5), dec!(10)),
                    (dec!(0.4), dec!(10)),
                ],
                vec![],
            ),
            0,
        );
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.best_bid(), Some(dec!(0.4)));
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.spread(), None);
    }

    #[test]
    fn normalization_is_idempotent_on_equal_input() {
        let input = raw(
            vec![(dec!(0.45), dec!(10)), (dec!(0.48), dec!(5))],
            vec![(dec!(0.52), dec!(8))],
        );
        let a = NormalizedBook::from_raw(&input, 1);
        let b = NormalizedBook::from_raw(&input, 1);
        assert_eq!(a.bids, b.bids);
        assert_eq!(a.asks, b.asks);
    }

    #[test]
    fn truncates_to_depth() {
        let levels: Vec<(Decimal, Decimal)> = (1..=30)
            .map(|i| (Decimal::from(i) / Decimal::from(100), dec!(1)))
            .collect();
        let book = NormalizedBook::from_raw(&raw(levels, vec![]), 0);
        assert_eq!(book.bids.len(), DEFAULT_DEPTH);
        // Best 25 of 30 bids: prices 0.30 down to 0.06.
        assert_eq!(book.best_bid(), Some(dec!(0.30)));
        assert_eq!(book.bids.last().unwrap().price, dec!(0.06));
    }

    #[test]
    fn staleness_uses_ttl() {
        let book = NormalizedBook::from_raw(&raw(vec![], vec![]), 1_000);
        assert!(!book.is_stale(2_900, 2_000));
        assert!(book.is_stale(3_100, 2_000));
    }

    #[test]
    fn delta_updates_and_removes_levels() {
        let mut book = NormalizedBook::from_raw(
            &raw(vec![(dec!(0.48), dec!(5))], vec![(dec!(0.52), dec!(8))]),
            0,
        );

        // New better bid.
        book.apply_delta(true, dec!(0.49), dec!(3));
        assert_eq!(book.best_bid(), Some(dec!(0.49)));
        assert_eq!(book.bids[1].cum_usd, dec!(0.49) * dec!(3) + dec!(0.48) * dec!(5));

        // Remove the ask.
        book.apply_delta(false, dec!(0.52), dec!(0));
        assert!(book.asks.is_empty());

        // Out-of-range price is ignored.
        book.apply_delta(false, dec!(1.2), dec!(5));
        assert!(book.asks.is_empty());
    }
}
