#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod registry;
pub mod submitter;
pub mod telemetry;
pub mod waiter;

#[cfg(test)]
mod tests;

pub use client::WhisprClient;
pub use config::{ResultSource, WhisprClientConfig};
pub use correlator::{EventSubscription, MatchKey, ResultCorrelator};
pub use error::WhisprClientError;
pub use registry::ComputationDefinitionRegistry;
pub use submitter::{PendingComputation, RequestSubmitter};
pub use waiter::FinalizationWaiter;
