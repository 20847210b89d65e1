//! USDC-to-token ratio upkeep.
//!
//! The rebalancer watches the split between free collateral and paired
//! token inventory and proposes the smaller corrective action (merge pairs
//! back to USDC, or split USDC into pairs). A cooldown gates consecutive
//! actions, and the cooldown escalates threefold after a run of
//! back-to-back rebalances; the upstream design note documents the
//! feedback loop this prevents.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Escalation multiplier once consecutive rebalances exceed the limit.
const ESCALATION_FACTOR: i64 = 3;

/// Rebalancer tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RebalancerConfig {
    /// Target `usdc / (usdc + token_value)` ratio.
    pub target_ratio: Decimal,
    /// Tolerated deviation before acting.
    pub tolerance: Decimal,
    /// Base cooldown between completed rebalances, ms.
    pub cooldown_ms: i64,
    /// Consecutive rebalances before the cooldown escalates.
    pub max_consecutive: u32,
    /// Priority assigned to proposed actions (0-100).
    pub priority: u8,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            target_ratio: Decimal::new(5, 1),
            tolerance: Decimal::new(15, 2),
            cooldown_ms: 60_000,
            max_consecutive: 3,
            priority: 50,
        }
    }
}

/// A proposed corrective action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "amount")]
pub enum RebalanceAction {
    /// Merge this many paired tokens back into USDC.
    Merge(Decimal),
    /// Split this much USDC into pairs.
    Split(Decimal),
}

/// Stateful per-market rebalancer.
#[derive(Debug, Clone)]
pub struct Rebalancer {
    config: RebalancerConfig,
    last_completed_ms: Option<i64>,
    consecutive: u32,
}

impl Rebalancer {
    /// Creates a rebalancer with the given tuning.
    #[must_use]
    pub fn new(config: RebalancerConfig) -> Self {
        Self {
            config,
            last_completed_ms: None,
            consecutive: 0,
        }
    }

    /// The cooldown currently in force, ms.
    #[must_use]
    pub fn effective_cooldown_ms(&self) -> i64 {
        if self.consecutive >= self.config.max_consecutive {
            self.config.cooldown_ms * ESCALATION_FACTOR
        } else {
            self.config.cooldown_ms
        }
    }

    /// Whether the cooldown has elapsed at `now_ms`.
    #[must_use]
    pub fn cooldown_elapsed(&self, now_ms: i64) -> bool {
        match self.last_completed_ms {
            None => true,
            Some(last) => now_ms - last >= self.effective_cooldown_ms(),
        }
    }

    /// Priority of proposed actions.
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.config.priority
    }

    /// Decides whether to act given the current balances.
    ///
    /// `usdc` is free collateral; `token_value` is the USD value of paired
    /// inventory. Returns `None` inside tolerance or during cooldown.
    #[must_use]
    pub fn decide(&self, usdc: Decimal, token_value: Decimal, now_ms: i64) -> Option<RebalanceAction> {
        if !self.cooldown_elapsed(now_ms) {
            return None;
        }
        let total = usdc + token_value;
        if total <= Decimal::ZERO {
            return None;
        }
        let ratio = usdc / total;
        let deviation = ratio - self.config.target_ratio;
        if deviation.abs() <= self.config.tolerance {
            return None;
        }

        // Amount that moves the ratio back to target; issue the smaller of
        // the exact correction and what the wallet actually holds.
        let target_usdc = total * self.config.target_ratio;
        if deviation < Decimal::ZERO {
            // Too little USDC: merge pairs.
            let needed = target_usdc - usdc;
            let amount = needed.min(token_value);
            debug!(%ratio, %amount, "proposing merge");
            (amount > Decimal::ZERO).then_some(RebalanceAction::Merge(amount))
        } else {
            // Too much USDC: split into pairs.
            let excess = usdc - target_usdc;
            let amount = excess.min(usdc);
            debug!(%ratio, %amount, "proposing split");
            (amount > Decimal::ZERO).then_some(RebalanceAction::Split(amount))
        }
    }

    /// Records a completed rebalance at `now_ms`.
    pub fn record_completed(&mut self, now_ms: i64) {
        self.last_completed_ms = Some(now_ms);
        self.consecutive += 1;
    }

    /// Records unrelated activity, resetting the consecutive counter.
    pub fn record_other_activity(&mut self) {
        self.consecutive = 0;
    }

    /// Consecutive rebalances without other activity.
    #[must_use]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rebalancer() -> Rebalancer {
        Rebalancer::new(RebalancerConfig::default())
    }

    #[test]
    fn within_tolerance_does_nothing() {
        let r = rebalancer();
        // Ratio 0.6, deviation 0.1 <= 0.15 tolerance.
        assert_eq!(r.decide(dec!(60), dec!(40), 0), None);
    }

    #[test]
    fn low_usdc_proposes_merge_toward_target() {
        let r = rebalancer();
        // Ratio 0.2: need 0.5. total=100, target_usdc=50, merge 30.
        assert_eq!(
            r.decide(dec!(20), dec!(80), 0),
            Some(RebalanceAction::Merge(dec!(30)))
        );
    }

    #[test]
    fn high_usdc_proposes_split_of_excess() {
        let r = rebalancer();
        // Ratio 0.9: total=100, target 50, split 40.
        assert_eq!(
            r.decide(dec!(90), dec!(10), 0),
            Some(RebalanceAction::Split(dec!(40)))
        );
    }

    #[test]
    fn merge_is_capped_by_inventory() {
        let r = rebalancer();
        // Extreme: all value in USDC terms tiny. needed > token_value.
        let action = r.decide(dec!(0), dec!(10), 0).unwrap();
        assert_eq!(action, RebalanceAction::Merge(dec!(5)));
    }

    #[test]
    fn cooldown_blocks_consecutive_actions() {
        let mut r = rebalancer();
        assert!(r.decide(dec!(20), dec!(80), 0).is_some());
        r.record_completed(0);

        // 59s later: still cooling down.
        assert_eq!(r.decide(dec!(20), dec!(80), 59_000), None);
        // 60s: allowed again.
        assert!(r.decide(dec!(20), dec!(80), 60_000).is_some());
    }

    #[test]
    fn cooldown_escalates_after_consecutive_run() {
        let mut r = rebalancer();
        for i in 0..3 {
            r.record_completed(i * 60_000);
        }
        assert_eq!(r.consecutive(), 3);
        assert_eq!(r.effective_cooldown_ms(), 180_000);

        // Base cooldown elapsed but escalated one has not.
        let last = 2 * 60_000;
        assert_eq!(r.decide(dec!(20), dec!(80), last + 61_000), None);
        assert!(r.decide(dec!(20), dec!(80), last + 180_000).is_some());
    }

    #[test]
    fn other_activity_resets_escalation() {
        let mut r = rebalancer();
        for i in 0..3 {
            r.record_completed(i * 60_000);
        }
        r.record_other_activity();
        assert_eq!(r.consecutive(), 0);
        assert_eq!(r.effective_cooldown_ms(), 60_000);
    }

    #[test]
    fn zero_total_is_a_no_op() {
        let r = rebalancer();
        assert_eq!(r.decide(dec!(0), dec!(0), 0), None);
    }
}
