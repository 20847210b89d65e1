//! The filter chain turning follow events into suggestions.
//!
//! Filters run in order: event type and side, then keyword allow/deny on
//! the market title and slug, then ratio scaling, then the rolling daily
//! quota. Type/side/keyword rejections produce nothing; a quota rejection
//! still produces a (non-executable) suggestion so the UI can show what
//! was skipped and why. Quota accounting only ever counts executable
//! suggestions.

use crate::events::{FollowEvent, FollowEventType};
use polytrade_exchange::models::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// One day in milliseconds; the quota window.
const DAY_MS: i64 = 24 * 3_600_000;

/// Why a suggestion was withheld from execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    QuotaExceeded,
}

/// An executable (or quota-dropped) copy suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Deterministic id: reprocessing the same event cannot double-create.
    pub id: String,
    pub runner_id: String,
    pub event: FollowEvent,
    pub suggested_usdc: Decimal,
    pub created_at_ms: i64,
    /// `None` means executable; otherwise why it was withheld.
    pub drop_reason: Option<DropReason>,
}

impl Suggestion {
    /// Whether the auto-trader may act on this suggestion.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.drop_reason.is_none()
    }
}

/// Filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionFilters {
    pub types: HashSet<FollowEventType>,
    pub sides: HashSet<Side>,
    /// Title/slug must contain one of these (empty = everything passes).
    pub include_keywords: Vec<String>,
    /// Title/slug must contain none of these.
    pub exclude_keywords: Vec<String>,
    /// Copy ratio in (0, 1].
    pub ratio: Decimal,
    pub max_usdc_per_order: Decimal,
    pub max_usdc_per_day: Decimal,
}

impl Default for SuggestionFilters {
    fn default() -> Self {
        Self {
            types: HashSet::from([FollowEventType::Trade]),
            sides: HashSet::from([Side::Buy, Side::Sell]),
            include_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            ratio: Decimal::new(1, 1),
            max_usdc_per_order: Decimal::from(50),
            max_usdc_per_day: Decimal::from(500),
        }
    }
}

/// Stateful suggestion builder with the rolling daily quota.
#[derive(Debug)]
pub struct SuggestionBuilder {
    runner_id: String,
    filters: SuggestionFilters,
    /// (timestamp_ms, usdc) of accepted suggestions in the last day.
    accepted: VecDeque<(i64, Decimal)>,
}

impl SuggestionBuilder {
    /// Creates a builder for one runner.
    #[must_use]
    pub fn new(runner_id: impl Into<String>, filters: SuggestionFilters) -> Self {
        Self {
            runner_id: runner_id.into(),
            filters,
            accepted: VecDeque::new(),
        }
    }

    /// Replaces the filters (config update path).
    pub fn set_filters(&mut self, filters: SuggestionFilters) {
        self.filters = filters;
    }

    /// Current filters.
    #[must_use]
    pub fn filters(&self) -> &SuggestionFilters {
        &self.filters
    }

    /// Sum of accepted suggestions in the trailing day at `now_ms`.
    #[must_use]
    pub fn daily_spend(&mut self, now_ms: i64) -> Decimal {
        self.prune(now_ms);
        self.accepted.iter().map(|(_, usdc)| *usdc).sum()
    }

    /// Runs the filter chain. `None` means the event was filtered out
    /// entirely; a suggestion with a `drop_reason` means it was built but
    /// must not execute.
    pub fn build(&mut self, event: &FollowEvent, now_ms: i64) -> Option<Suggestion> {
        // 1. Type and side.
        if !self.filters.types.contains(&event.event_type) {
            return None;
        }
        if let Some(side) = event.side {
            if !self.filters.sides.contains(&side) {
                return None;
            }
        } else if event.event_type == FollowEventType::Trade {
            return None;
        }

        // 2. Keywords against title and slug.
        let haystack = format!(
            "{} {}",
            event.title.as_deref().unwrap_or(""),
            event.slug.as_deref().unwrap_or("")
        )
        .to_lowercase();
        if !self.filters.include_keywords.is_empty()
            && !self
                .filters
                .include_keywords
                .iter()
                .any(|kw| haystack.contains(&kw.to_lowercase()))
        {
            return None;
        }
        if self
            .filters
            .exclude_keywords
            .iter()
            .any(|kw| haystack.contains(&kw.to_lowercase()))
        {
            return None;
        }

        // 3. Scaling.
        let suggested_usdc = (event.notional_usdc() * self.filters.ratio)
            .min(self.filters.max_usdc_per_order);
        if suggested_usdc <= Decimal::ZERO {
            return None;
        }

        // 4. Daily quota. Exceeding it still records the suggestion, but
        // never its spend.
        let spend = self.daily_spend(now_ms);
        let drop_reason = if spend + suggested_usdc > self.filters.max_usdc_per_day {
            debug!(
                runner = %self.runner_id,
                %spend,
                %suggested_usdc,
                "daily quota exceeded"
            );
            Some(DropReason::QuotaExceeded)
        } else {
            self.accepted.push_back((now_ms, suggested_usdc));
            None
        };

        Some(Suggestion {
            id: suggestion_id(&self.runner_id, &event.transaction_hash),
            runner_id: self.runner_id.clone(),
            event: event.clone(),
            suggested_usdc,
            created_at_ms: now_ms,
            drop_reason,
        })
    }

    fn prune(&mut self, now_ms: i64) {
        while let Some((ts, _)) = self.accepted.front() {
            if now_ms - ts > DAY_MS {
                self.accepted.pop_front();
            } else {
                break;
            }
        }
    }
}

/// `sha256(runner_id:transaction_hash)`, truncated for readability.
#[must_use]
pub fn suggestion_id(runner_id: &str, transaction_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(runner_id.as_bytes());
    hasher.update(b":");
    hasher.update(transaction_hash.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(usdc: Decimal, hash: &str) -> FollowEvent {
        FollowEvent {
            event_type: FollowEventType::Trade,
            side: Some(Side::Buy),
            size: usdc / dec!(0.5),
            price: dec!(0.5),
            usdc_size: Some(usdc),
            asset: "123".into(),
            condition_id: "0xc".into(),
            outcome: Some("Yes".into()),
            title: Some("Will bitcoin hit 100k?".into()),
            slug: Some("btc-100k".into()),
            timestamp: 0,
            transaction_hash: hash.into(),
        }
    }

    fn builder() -> SuggestionBuilder {
        SuggestionBuilder::new("runner-1", SuggestionFilters::default())
    }

    #[test]
    fn id_is_deterministic_per_event() {
        let mut b1 = builder();
        let mut b2 = builder();
        let s1 = b1.build(&event(dec!(100), "0xdead"), 0).unwrap();
        let s2 = b2.build(&event(dec!(100), "0xdead"), 0).unwrap();
        assert_eq!(s1.id, s2.id);

        let other = b1.build(&event(dec!(100), "0xbeef"), 0).unwrap();
        assert_ne!(s1.id, other.id);
    }

    #[test]
    fn id_varies_by_runner() {
        assert_ne!(
            suggestion_id("runner-1", "0xdead"),
            suggestion_id("runner-2", "0xdead")
        );
    }

    #[test]
    fn ratio_and_per_order_cap_apply() {
        let mut b = builder();
        // 100 * 0.1 = 10.
        let s = b.build(&event(dec!(100), "0x1"), 0).unwrap();
        assert_eq!(s.suggested_usdc, dec!(10.0));
        // 10_000 * 0.1 = 1_000, capped at 50.
        let s = b.build(&event(dec!(10_000), "0x2"), 0).unwrap();
        assert_eq!(s.suggested_usdc, dec!(50));
    }

    #[test]
    fn type_and_side_filters_drop_silently() {
        let mut filters = SuggestionFilters::default();
        filters.sides = HashSet::from([Side::Buy]);
        let mut b = SuggestionBuilder::new("r", filters);

        let mut sell = event(dec!(100), "0x1");
        sell.side = Some(Side::Sell);
        assert!(b.build(&sell, 0).is_none());

        let mut split = event(dec!(100), "0x2");
        split.event_type = FollowEventType::Split;
        assert!(b.build(&split, 0).is_none());
    }

    #[test]
    fn keyword_allow_and_deny_lists() {
        let mut filters = SuggestionFilters::default();
        filters.include_keywords = vec!["bitcoin".into()];
        filters.exclude_keywords = vec!["ethereum".into()];
        let mut b = SuggestionBuilder::new("r", filters);

        assert!(b.build(&event(dec!(100), "0x1"), 0).is_some());

        let mut eth = event(dec!(100), "0x2");
        eth.title = Some("Will ethereum flip bitcoin?".into());
        assert!(b.build(&eth, 0).is_none());

        let mut other = event(dec!(100), "0x3");
        other.title = Some("Will it rain?".into());
        other.slug = Some("rain".into());
        assert!(b.build(&other, 0).is_none());
    }

    #[test]
    fn quota_boundary_marks_but_does_not_count() {
        let mut filters = SuggestionFilters::default();
        filters.ratio = Decimal::ONE;
        filters.max_usdc_per_order = dec!(1_000);
        filters.max_usdc_per_day = dec!(100);
        let mut b = SuggestionBuilder::new("r", filters);

        // Accumulate $92 of accepted suggestions.
        b.build(&event(dec!(92), "0x1"), 0).unwrap();
        assert_eq!(b.daily_spend(0), dec!(92));

        // Incoming $20 suggestion exceeds the quota.
        let s = b.build(&event(dec!(20), "0x2"), 1_000).unwrap();
        assert_eq!(s.drop_reason, Some(DropReason::QuotaExceeded));
        assert!(!s.is_executable());
        // The $20 was not added to the running sum.
        assert_eq!(b.daily_spend(1_000), dec!(92));

        // A smaller one that fits still goes through.
        let s = b.build(&event(dec!(8), "0x3"), 2_000).unwrap();
        assert!(s.is_executable());
        assert_eq!(b.daily_spend(2_000), dec!(100));
    }

    #[test]
    fn quota_window_rolls_off_after_a_day() {
        let mut filters = SuggestionFilters::default();
        filters.ratio = Decimal::ONE;
        filters.max_usdc_per_order = dec!(1_000);
        filters.max_usdc_per_day = dec!(100);
        let mut b = SuggestionBuilder::new("r", filters);

        b.build(&event(dec!(100), "0x1"), 0).unwrap();
        // Same day: blocked.
        let s = b.build(&event(dec!(50), "0x2"), 1_000).unwrap();
        assert!(!s.is_executable());
        // 25h later: the window rolled off.
        let s = b.build(&event(dec!(50), "0x3"), 25 * 3_600_000).unwrap();
        assert!(s.is_executable());
    }
}
