//! Rate records, snapshots and the changes produced when applying them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Unique key of a stored rate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RatePair {
    pub base_currency: String,
    pub target_currency: String,
}

impl RatePair {
    pub fn new(base: &str, target: &str) -> Self {
        RatePair {
            base_currency: base.to_uppercase(),
            target_currency: target.to_uppercase(),
        }
    }
}

impl Display for RatePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base_currency, self.target_currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub base_currency: String,
    pub target_currency: String,
    pub rate: f64,
    pub last_updated: DateTime<Utc>,
}

impl RateRecord {
    pub fn new(pair: &RatePair, rate: f64, last_updated: DateTime<Utc>) -> Self {
        RateRecord {
            base_currency: pair.base_currency.clone(),
            target_currency: pair.target_currency.clone(),
            rate,
            last_updated,
        }
    }

    pub fn pair(&self) -> RatePair {
        RatePair {
            base_currency: self.base_currency.clone(),
            target_currency: self.target_currency.clone(),
        }
    }

    /// Copy of this record carrying `rate`, stamped no earlier than the current stamp.
    pub fn with_rate(&self, rate: f64, now: DateTime<Utc>) -> Self {
        RateRecord {
            rate,
            last_updated: next_stamp(self.last_updated, now),
            ..self.clone()
        }
    }
}

/// Strictly later than `previous` even when the clock has not advanced.
pub fn next_stamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

/// A stored rate must be a positive, finite number.
pub fn is_valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    Live,
    Fallback,
}

impl Display for SnapshotOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SnapshotOrigin::Live => "live",
                SnapshotOrigin::Fallback => "fallback",
            }
        )
    }
}

/// Rates for one base currency as reported by a source at `fetched_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub base_currency: String,
    pub rates: BTreeMap<String, f64>,
    pub fetched_at: DateTime<Utc>,
    pub origin: SnapshotOrigin,
}

impl RateSnapshot {
    /// Target codes are uppercased; a later duplicate overrides an earlier one.
    pub fn live(base: &str, rates: BTreeMap<String, f64>) -> Self {
        RateSnapshot {
            base_currency: base.to_uppercase(),
            rates: rates
                .into_iter()
                .map(|(target, rate)| (target.to_uppercase(), rate))
                .collect(),
            fetched_at: Utc::now(),
            origin: SnapshotOrigin::Live,
        }
    }

    /// Fixed table served while the upstream source is unreachable.
    pub fn fallback() -> Self {
        let rates = [("USD", 1.08), ("GBP", 0.86), ("JPY", 161.5), ("RUB", 100.5)]
            .into_iter()
            .map(|(target, rate)| (target.to_string(), rate))
            .collect();
        RateSnapshot {
            base_currency: "EUR".to_string(),
            rates,
            fetched_at: Utc::now(),
            origin: SnapshotOrigin::Fallback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ChangeAction::Created => "created",
                ChangeAction::Updated => "updated",
                ChangeAction::Deleted => "deleted",
            }
        )
    }
}

/// A single record-level change. `created` has only `after`, `deleted` only
/// `before`, `updated` both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateChange {
    pub action: ChangeAction,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub before: Option<RateRecord>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub after: Option<RateRecord>,
}

impl RateChange {
    pub fn created(after: RateRecord) -> Self {
        RateChange {
            action: ChangeAction::Created,
            before: None,
            after: Some(after),
        }
    }

    pub fn updated(before: RateRecord, after: RateRecord) -> Self {
        RateChange {
            action: ChangeAction::Updated,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn deleted(before: RateRecord) -> Self {
        RateChange {
            action: ChangeAction::Deleted,
            before: Some(before),
            after: None,
        }
    }

    /// The record as it stands after the change, or as it was before a delete.
    pub fn record(&self) -> Option<&RateRecord> {
        self.after.as_ref().or(self.before.as_ref())
    }

    pub fn pair(&self) -> Option<RatePair> {
        self.record().map(RateRecord::pair)
    }
}

pub type Changeset = Vec<RateChange>;
