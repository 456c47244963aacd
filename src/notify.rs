//! Post-commit notification step shared by reconciliation ticks and manual
//! mutations. It is only ever called after a store commit succeeded, and it
//! has no error path back into the caller.

use crate::bus::MessageBusPublisher;
use crate::core::rate::RateChange;
use crate::core::store::RateStore;
use crate::events::{BusEvent, LiveEvent};
use crate::hub::BroadcastHub;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn RateStore>,
    hub: Arc<BroadcastHub>,
    publisher: Arc<MessageBusPublisher>,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn RateStore>,
        hub: Arc<BroadcastHub>,
        publisher: Arc<MessageBusPublisher>,
    ) -> Self {
        Notifier {
            store,
            hub,
            publisher,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn publisher(&self) -> &Arc<MessageBusPublisher> {
        &self.publisher
    }

    /// One live broadcast per change followed by the full rate list, then the
    /// bus events are queued. Bus delivery happens in the background.
    pub async fn notify(&self, changes: &[RateChange]) {
        if changes.is_empty() {
            return;
        }

        for change in changes {
            self.hub
                .broadcast(&LiveEvent::CurrencyUpdate(change.clone()))
                .await;
        }
        match self.store.list_all().await {
            Ok(rates) => {
                self.hub.broadcast(&LiveEvent::RatesList(rates)).await;
            }
            Err(e) => warn!(error = %e, "Failed to load rates list for broadcast"),
        }

        self.publisher
            .enqueue(changes.iter().filter_map(BusEvent::from_change).collect());
        debug!("Notified {} changes", changes.len());
    }
}
