//! Normalized follow events.
//!
//! Raw activity rows become [`FollowEvent`]s with a guaranteed dedupe key:
//! the upstream transaction hash when present, otherwise a synthetic
//! fingerprint built purely from the event's own fields; two identical
//! rows always produce the same fingerprint.

use polytrade_exchange::models::{ActivityRecord, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Activity categories the runner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FollowEventType {
    Trade,
    Split,
    Merge,
    Redeem,
    Conversion,
    Yield,
}

impl FollowEventType {
    /// Parses the upstream type string, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TRADE" => Some(Self::Trade),
            "SPLIT" => Some(Self::Split),
            "MERGE" => Some(Self::Merge),
            "REDEEM" => Some(Self::Redeem),
            "CONVERSION" => Some(Self::Conversion),
            "YIELD" => Some(Self::Yield),
            _ => None,
        }
    }
}

/// One normalized activity event from the followed wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowEvent {
    pub event_type: FollowEventType,
    pub side: Option<Side>,
    pub size: Decimal,
    pub price: Decimal,
    pub usdc_size: Option<Decimal>,
    pub asset: String,
    pub condition_id: String,
    pub outcome: Option<String>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub timestamp: i64,
    /// Upstream hash, or a synthetic fingerprint when absent.
    pub transaction_hash: String,
}

impl FollowEvent {
    /// Normalizes a raw activity row; `None` when the type is unknown.
    #[must_use]
    pub fn from_activity(row: &ActivityRecord) -> Option<Self> {
        let event_type = FollowEventType::parse(&row.activity_type)?;
        let size = row.size.unwrap_or(Decimal::ZERO);
        let price = row.price.unwrap_or(Decimal::ZERO);
        let transaction_hash = match &row.transaction_hash {
            Some(hash) if !hash.is_empty() => hash.clone(),
            _ => synthetic_fingerprint(row.timestamp, &row.condition_id, &row.asset, row.side, size, price),
        };
        Some(Self {
            event_type,
            side: row.side,
            size,
            price,
            usdc_size: row.usdc_size,
            asset: row.asset.clone(),
            condition_id: row.condition_id.clone(),
            outcome: row.outcome.clone(),
            title: row.title.clone(),
            slug: row.slug.clone(),
            timestamp: row.timestamp,
            transaction_hash,
        })
    }

    /// USDC notional: explicit when present, `price * size` otherwise.
    #[must_use]
    pub fn notional_usdc(&self) -> Decimal {
        self.usdc_size.unwrap_or(self.price * self.size)
    }
}

/// Deterministic stand-in for a missing transaction hash.
#[must_use]
pub fn synthetic_fingerprint(
    timestamp: i64,
    condition_id: &str,
    asset: &str,
    side: Option<Side>,
    size: Decimal,
    price: Decimal,
) -> String {
    let side = side.map_or("NONE", Side::as_str);
    format!("synthetic:{timestamp}:{condition_id}:{asset}:{side}:{size}:{price}")
}
