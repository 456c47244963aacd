//! Client-to-server messages on a live session.

use crate::core::store::RateStore;
use crate::events::LiveEvent;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    GetRates,
}

/// Reply for one inbound text frame, if it warrants one. Malformed JSON gets
/// an error event; well-formed messages of an unknown type are ignored.
pub async fn respond(text: &str, store: &dyn RateStore) -> Option<LiveEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Invalid JSON from client");
            return Some(LiveEvent::Error("Invalid JSON format".to_string()));
        }
    };

    let message = match serde_json::from_value::<ClientMessage>(value) {
        Ok(message) => message,
        Err(_) => {
            debug!("Ignoring unsupported client message: {text}");
            return None;
        }
    };

    match message {
        ClientMessage::Ping => Some(LiveEvent::Pong),
        ClientMessage::GetRates => match store.list_all().await {
            Ok(rates) => Some(LiveEvent::RatesList(rates)),
            Err(e) => {
                warn!(error = %e, "Failed to load rates for client");
                Some(LiveEvent::Error("Failed to load rates".to_string()))
            }
        },
    }
}
