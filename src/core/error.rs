//! Errors callers are expected to branch on

use crate::core::rate::RatePair;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateError {
    #[error("Currency rate not found: {0}")]
    NotFound(RatePair),

    #[error("Currency rate already exists: {0}")]
    AlreadyExists(RatePair),

    #[error("Invalid rate {rate} for {pair}: must be a positive number")]
    InvalidRate { pair: RatePair, rate: f64 },

    #[error("Task is already running")]
    ConcurrentTrigger,

    #[error("Store write failed: {0:#}")]
    Store(#[source] anyhow::Error),
}
