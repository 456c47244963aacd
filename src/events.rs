//! Wire envelopes for live connections and the message bus.
//!
//! Live clients receive `{"type": ..., "data": ..., "timestamp": ...}`; bus
//! consumers receive `{"action": ..., "data": ..., "timestamp": ...}`.

use crate::core::rate::{ChangeAction, RateChange, RatePair, RateRecord};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Full store snapshot sent once when a connection registers.
    Initial(Vec<RateRecord>),
    RatesList(Vec<RateRecord>),
    CurrencyUpdate(RateChange),
    Pong,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEnvelope {
    #[serde(flatten)]
    pub event: LiveEvent,
    pub timestamp: DateTime<Utc>,
}

impl LiveEvent {
    pub fn to_json(&self) -> Result<String> {
        let envelope = LiveEnvelope {
            event: self.clone(),
            timestamp: Utc::now(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum BusEvent {
    Created(RateRecord),
    Updated(RateRecord),
    Deleted(RatePair),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    #[serde(flatten)]
    pub event: BusEvent,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    pub fn from_change(change: &RateChange) -> Option<Self> {
        match change.action {
            ChangeAction::Created => change.after.clone().map(BusEvent::Created),
            ChangeAction::Updated => change.after.clone().map(BusEvent::Updated),
            ChangeAction::Deleted => change.pair().map(BusEvent::Deleted),
        }
    }

    pub fn action(&self) -> ChangeAction {
        match self {
            BusEvent::Created(_) => ChangeAction::Created,
            BusEvent::Updated(_) => ChangeAction::Updated,
            BusEvent::Deleted(_) => ChangeAction::Deleted,
        }
    }

    pub fn pair(&self) -> RatePair {
        match self {
            BusEvent::Created(record) | BusEvent::Updated(record) => record.pair(),
            BusEvent::Deleted(pair) => pair.clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let envelope = BusEnvelope {
            event: self.clone(),
            timestamp: Utc::now(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record() -> RateRecord {
        RateRecord::new(&RatePair::new("USD", "EUR"), 0.9, Utc::now())
    }

    #[test]
    fn test_live_envelope_shape() {
        let json: Value =
            serde_json::from_str(&LiveEvent::Initial(vec![record()]).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "initial");
        assert_eq!(json["data"][0]["target_currency"], "EUR");
        assert!(json["timestamp"].is_string());

        let json: Value = serde_json::from_str(&LiveEvent::Pong.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json.get("data").is_none());

        let json: Value =
            serde_json::from_str(&LiveEvent::Error("Invalid JSON format".into()).to_json().unwrap())
                .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"], "Invalid JSON format");
    }

    #[test]
    fn test_currency_update_carries_change() {
        let change = RateChange::updated(record(), record().with_rate(0.95, Utc::now()));
        let json: Value =
            serde_json::from_str(&LiveEvent::CurrencyUpdate(change).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "currency_update");
        assert_eq!(json["data"]["action"], "updated");
        assert_eq!(json["data"]["before"]["rate"], 0.9);
        assert_eq!(json["data"]["after"]["rate"], 0.95);
    }

    #[test]
    fn test_bus_envelope_shape() {
        let created = BusEvent::from_change(&RateChange::created(record())).unwrap();
        let json: Value = serde_json::from_slice(&created.to_bytes().unwrap()).unwrap();
        assert_eq!(json["action"], "created");
        assert_eq!(json["data"]["rate"], 0.9);
        assert!(json["timestamp"].is_string());

        let deleted = BusEvent::from_change(&RateChange::deleted(record())).unwrap();
        assert_eq!(deleted.action(), ChangeAction::Deleted);
        let json: Value = serde_json::from_slice(&deleted.to_bytes().unwrap()).unwrap();
        assert_eq!(json["action"], "deleted");
        assert_eq!(json["data"]["base_currency"], "USD");
        assert!(json["data"].get("rate").is_none());
    }

    #[test]
    fn test_bus_envelope_round_trips() {
        let event = BusEvent::Updated(record());
        let envelope: BusEnvelope = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(envelope.event, event);
    }
}
