//! Core business logic abstractions

pub mod bus;
pub mod config;
pub mod error;
pub mod log;
pub mod rate;
pub mod source;
pub mod store;

// Re-export main types for cleaner imports
pub use bus::MessageBus;
pub use error::RateError;
pub use rate::{
    ChangeAction, Changeset, RateChange, RatePair, RateRecord, RateSnapshot, SnapshotOrigin,
};
pub use source::RateSource;
pub use store::{RateStore, RateWrite, TaskLogEntry, TaskStatus};
