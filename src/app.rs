//! Wires the store, transport and workers into one set of shared services.

use crate::audit::Audit;
use crate::bus::{MessageBusPublisher, RedisBus};
use crate::core::bus::MessageBus;
use crate::core::config::AppConfig;
use crate::core::rate::Changeset;
use crate::core::source::RateSource;
use crate::core::store::RateStore;
use crate::hub::BroadcastHub;
use crate::notify::Notifier;
use crate::providers::ExchangeRateApiSource;
use crate::reconciler::Reconciler;
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::server;
use crate::store::{open_disk_store, seed_missing};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub struct Services {
    pub store: Arc<dyn RateStore>,
    pub hub: Arc<BroadcastHub>,
    pub publisher: Arc<MessageBusPublisher>,
    pub reconciler: Arc<Reconciler>,
    pub scheduler: Scheduler,
}

impl Services {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn RateStore>,
        source: Arc<dyn RateSource>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new(
            Arc::clone(&store),
            config.broadcast.send_timeout(),
        ));
        let publisher = Arc::new(MessageBusPublisher::new(
            bus,
            &config.bus.channel,
            config.bus.timeout(),
            Audit::new(Arc::clone(&store)),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Notifier::new(Arc::clone(&store), Arc::clone(&hub), Arc::clone(&publisher)),
        ));
        let scheduler = Scheduler::new(
            source,
            Arc::clone(&reconciler),
            SchedulerSettings {
                base_currency: config.source.base_currency.clone(),
                interval: config.scheduler.interval(),
                fetch_timeout: config.source.timeout(),
            },
        );
        Services {
            store,
            hub,
            publisher,
            reconciler,
            scheduler,
        }
    }

    /// Production wiring: fjall store, HTTP source and Redis bus.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let store = open_disk_store(config)?;
        let source = Arc::new(ExchangeRateApiSource::from_config(&config.source)?);
        let bus = Arc::new(RedisBus::new(&config.bus.url)?);
        Ok(Self::new(config, store, source, bus))
    }
}

/// Runs the scheduler and the HTTP/WebSocket surface until Ctrl-C.
pub async fn serve(config: &AppConfig) -> Result<()> {
    let services = Arc::new(Services::open(config)?);

    let seeded = seed_missing(services.store.as_ref(), config).await?;
    if seeded > 0 {
        info!("Seeded {seeded} default rates");
    }
    services.publisher.connect().await;

    let scheduler = services.scheduler.clone();
    let worker = tokio::spawn(async move { scheduler.run().await });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let result = server::serve(Arc::clone(&services), addr).await;

    services.scheduler.stop();
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "Scheduler task ended abnormally");
    }
    services.publisher.close().await;
    info!("Shutdown complete");
    result
}

/// One audited fetch and reconcile pass against the persistent store.
pub async fn sync_once(config: &AppConfig) -> Result<Changeset> {
    let services = Services::open(config)?;
    let changes = services.scheduler.run_once().await?;
    services.publisher.close().await;
    Ok(changes)
}
