//! Change detection and transactional apply for fetched snapshots and for
//! direct create/update/delete requests.

use crate::audit::{Audit, TASK_RATE_MUTATION};
use crate::core::error::RateError;
use crate::core::rate::{
    Changeset, RateChange, RatePair, RateRecord, RateSnapshot, is_valid_rate,
};
use crate::core::source::RateSource;
use crate::core::store::{RateStore, RateWrite};
use crate::notify::Notifier;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// A mutation requested from outside the reconciliation loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ManualOp {
    Create { pair: RatePair, rate: f64 },
    Update { pair: RatePair, rate: f64 },
    Delete { pair: RatePair },
}

impl ManualOp {
    pub fn pair(&self) -> &RatePair {
        match self {
            ManualOp::Create { pair, .. }
            | ManualOp::Update { pair, .. }
            | ManualOp::Delete { pair } => pair,
        }
    }
}

/// Compares a snapshot with the stored records. Absent pairs are created,
/// pairs whose rate differs (exact comparison) are updated, everything else
/// is left alone. Pairs missing from the snapshot are never deleted.
pub fn diff_snapshot(
    snapshot: &RateSnapshot,
    existing: &HashMap<RatePair, RateRecord>,
    now: DateTime<Utc>,
) -> Changeset {
    let mut changes = Vec::new();
    for (target, &rate) in &snapshot.rates {
        let pair = RatePair::new(&snapshot.base_currency, target);
        if !is_valid_rate(rate) {
            warn!(%pair, rate, "Skipping invalid rate from source");
            continue;
        }
        match existing.get(&pair) {
            None => changes.push(RateChange::created(RateRecord::new(&pair, rate, now))),
            Some(current) if current.rate != rate => {
                changes.push(RateChange::updated(
                    current.clone(),
                    current.with_rate(rate, now),
                ));
            }
            Some(_) => {}
        }
    }
    changes
}

/// Runs the source fetch within `timeout`; any failure yields the fallback table.
#[instrument(name = "FetchRates", skip(source))]
pub async fn fetch_or_fallback(
    source: &dyn RateSource,
    base: &str,
    timeout: Duration,
) -> RateSnapshot {
    match tokio::time::timeout(timeout, source.fetch(base)).await {
        Ok(Ok(snapshot)) => {
            info!(
                "Fetched {} rates for base currency {}",
                snapshot.rates.len(),
                snapshot.base_currency
            );
            snapshot
        }
        Ok(Err(e)) => {
            warn!(error = %format!("{e:#}"), "Rate fetch failed, using fallback rates");
            RateSnapshot::fallback()
        }
        Err(_) => {
            warn!(?timeout, "Rate fetch timed out, using fallback rates");
            RateSnapshot::fallback()
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn RateStore>,
    notifier: Notifier,
    audit: Audit,
    // Serializes every read-diff-commit sequence, ticks and manual ops alike.
    writer: Mutex<()>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RateStore>, notifier: Notifier) -> Self {
        Reconciler {
            audit: Audit::new(Arc::clone(&store)),
            store,
            notifier,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RateStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Applies a snapshot in one commit and notifies subscribers of the
    /// resulting changes. On error nothing was written and nobody is notified.
    pub async fn reconcile(&self, snapshot: &RateSnapshot) -> Result<Changeset> {
        let changes = {
            let _writer = self.writer.lock().await;
            let existing: HashMap<RatePair, RateRecord> = self
                .store
                .list_all()
                .await
                .context("Failed to load stored rates")?
                .into_iter()
                .map(|record| (record.pair(), record))
                .collect();

            let changes = diff_snapshot(snapshot, &existing, Utc::now());
            if !changes.is_empty() {
                let writes = changes
                    .iter()
                    .filter_map(|change| change.after.clone())
                    .map(RateWrite::Put)
                    .collect();
                self.store
                    .commit(writes)
                    .await
                    .context("Failed to commit reconciled rates")?;
            }
            changes
        };

        info!(
            base = %snapshot.base_currency,
            origin = %snapshot.origin,
            "Rates saved to store. {} of {} records changed",
            changes.len(),
            snapshot.rates.len()
        );
        self.notifier.notify(&changes).await;
        Ok(changes)
    }

    /// Applies one externally issued mutation. Exactly one notification
    /// follows a successful write; a failed write notifies nobody.
    pub async fn apply_manual(&self, op: ManualOp) -> Result<RateChange, RateError> {
        if let ManualOp::Create { pair, rate } | ManualOp::Update { pair, rate } = &op {
            if !is_valid_rate(*rate) {
                return Err(RateError::InvalidRate {
                    pair: pair.clone(),
                    rate: *rate,
                });
            }
        }

        let change = {
            let _writer = self.writer.lock().await;
            let existing = self.store.get(op.pair()).await.map_err(RateError::Store)?;
            let now = Utc::now();

            let (change, write) = match (op, existing) {
                (ManualOp::Create { pair, .. }, Some(_)) => {
                    return Err(RateError::AlreadyExists(pair));
                }
                (ManualOp::Create { pair, rate }, None) => {
                    let record = RateRecord::new(&pair, rate, now);
                    (RateChange::created(record.clone()), RateWrite::Put(record))
                }
                (ManualOp::Update { pair, rate }, Some(before)) => {
                    // Same value: the write is still honored but the stamp stays.
                    let after = if before.rate == rate {
                        debug!(%pair, "Manual update with unchanged rate");
                        before.clone()
                    } else {
                        before.with_rate(rate, now)
                    };
                    (
                        RateChange::updated(before, after.clone()),
                        RateWrite::Put(after),
                    )
                }
                (ManualOp::Delete { pair }, Some(before)) => {
                    (RateChange::deleted(before), RateWrite::Delete(pair))
                }
                (ManualOp::Update { pair, .. } | ManualOp::Delete { pair }, None) => {
                    return Err(RateError::NotFound(pair));
                }
            };

            let key = op_key(&change);
            if let Err(e) = self.store.commit(vec![write]).await {
                warn!(pair = %key, error = %e, "Manual {} failed", change.action);
                self.audit
                    .failure(
                        TASK_RATE_MUTATION,
                        &change.action.to_string(),
                        &key,
                        &format!("{e:#}"),
                    )
                    .await;
                return Err(RateError::Store(e));
            }
            change
        };

        info!(action = %change.action, pair = %op_key(&change), "Manual rate change applied");
        self.notifier.notify(std::slice::from_ref(&change)).await;
        Ok(change)
    }
}

fn op_key(change: &RateChange) -> String {
    change
        .pair()
        .map(|pair| pair.to_string())
        .unwrap_or_default()
}
