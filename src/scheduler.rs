//! Periodic fetch-and-reconcile loop with single-flight manual triggering.

use crate::audit::{Audit, TASK_CURRENCY_UPDATE};
use crate::core::error::RateError;
use crate::core::rate::Changeset;
use crate::core::source::RateSource;
use crate::core::store::TaskStatus;
use crate::reconciler::{Reconciler, fetch_or_fallback};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::Idle,
            1 => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }
}

impl Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SchedulerState::Idle => "idle",
                SchedulerState::Running => "running",
                SchedulerState::Stopped => "stopped",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Accepted,
    Rejected,
}

pub struct SchedulerSettings {
    pub base_currency: String,
    pub interval: Duration,
    pub fetch_timeout: Duration,
}

struct Inner {
    source: Arc<dyn RateSource>,
    reconciler: Arc<Reconciler>,
    audit: Audit,
    settings: SchedulerSettings,
    state: AtomicU8,
    cancel: CancellationToken,
}

/// Held for the duration of one tick. Dropping it returns the scheduler to
/// idle unless it was stopped meanwhile.
struct RunGuard {
    inner: Arc<Inner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = self.inner.state.compare_exchange(
            SchedulerState::Running as u8,
            SchedulerState::Idle as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn RateSource>,
        reconciler: Arc<Reconciler>,
        settings: SchedulerSettings,
    ) -> Self {
        let audit = Audit::new(Arc::clone(reconciler.store()));
        Scheduler {
            inner: Arc::new(Inner {
                source,
                reconciler,
                audit,
                settings,
                state: AtomicU8::new(SchedulerState::Idle as u8),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    fn try_begin(&self) -> Option<RunGuard> {
        self.inner
            .state
            .compare_exchange(
                SchedulerState::Idle as u8,
                SchedulerState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| RunGuard {
                inner: Arc::clone(&self.inner),
            })
    }

    /// Runs one tick now, or fails if one is already in flight.
    pub async fn run_once(&self) -> Result<Changeset, RateError> {
        let guard = self.try_begin().ok_or(RateError::ConcurrentTrigger)?;
        self.tick(guard).await
    }

    /// Starts a tick in the background. Rejected while a tick is in flight or
    /// after [`Scheduler::stop`].
    pub async fn trigger(&self) -> TriggerOutcome {
        let Some(guard) = self.try_begin() else {
            info!(state = %self.state(), "Manual trigger rejected");
            return TriggerOutcome::Rejected;
        };

        self.inner
            .audit
            .record(
                TASK_CURRENCY_UPDATE,
                TaskStatus::ManualStart,
                "Currency update task manually triggered",
            )
            .await;

        let scheduler = self.clone();
        tokio::spawn(async move {
            // Failures are already audited by the tick itself.
            let _ = scheduler.tick(guard).await;
        });
        TriggerOutcome::Accepted
    }

    /// Ticks immediately, then every interval, until stopped. A failed tick
    /// never ends the loop.
    pub async fn run(&self) {
        info!(
            interval = ?self.inner.settings.interval,
            base = %self.inner.settings.base_currency,
            "Scheduler started"
        );
        loop {
            if self.inner.cancel.is_cancelled() {
                break;
            }
            match self.try_begin() {
                Some(guard) => {
                    let _ = self.tick(guard).await;
                }
                None => debug!("Tick skipped, previous run still in flight"),
            }

            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.inner.settings.interval) => {}
            }
        }
        self.inner
            .state
            .store(SchedulerState::Stopped as u8, Ordering::SeqCst);
        info!("Scheduler stopped");
    }

    /// Ends the loop after the current tick, if any, completes.
    pub fn stop(&self) {
        self.inner
            .state
            .store(SchedulerState::Stopped as u8, Ordering::SeqCst);
        self.inner.cancel.cancel();
    }

    async fn tick(&self, _guard: RunGuard) -> Result<Changeset, RateError> {
        let inner = &self.inner;
        let base = &inner.settings.base_currency;
        inner
            .audit
            .record(
                TASK_CURRENCY_UPDATE,
                TaskStatus::Started,
                "Fetching currency rates",
            )
            .await;

        let snapshot =
            fetch_or_fallback(inner.source.as_ref(), base, inner.settings.fetch_timeout).await;

        match inner.reconciler.reconcile(&snapshot).await {
            Ok(changes) => {
                let details = format!(
                    "Fetched {} rates for base currency {} ({} data); {} records changed",
                    snapshot.rates.len(),
                    snapshot.base_currency,
                    snapshot.origin,
                    changes.len()
                );
                info!("{details}");
                inner
                    .audit
                    .record(TASK_CURRENCY_UPDATE, TaskStatus::Success, &details)
                    .await;
                Ok(changes)
            }
            Err(e) => {
                let details = format!("Currency update failed: {e:#}");
                error!("{details}");
                inner
                    .audit
                    .record(TASK_CURRENCY_UPDATE, TaskStatus::Failed, &details)
                    .await;
                warn!("Next attempt in {:?}", inner.settings.interval);
                Err(RateError::Store(e))
            }
        }
    }
}
