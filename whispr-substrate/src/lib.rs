#![allow(clippy::module_name_repetitions)]

pub mod circuits;
pub mod client;
pub mod config;
pub mod events;
pub mod listeners;
pub mod local;
pub mod types;

pub use client::{ExecutionSubstrate, SubstrateError};
pub use config::LocalClusterConfig;
pub use events::{ComputationNotification, FinalizationRecord, FinalizationStatus};
pub use listeners::ListenerId;
pub use local::LocalCluster;
