use std::{path::Path, time::Duration};

use config::{Config as RustConfig, ConfigError};
use serde::{Deserialize, Serialize};

/// Program id the local cluster publishes its key under, when none is configured
pub const DEFAULT_PROGRAM_ID: &str = "whispr-local";

/// Configuration for the in-process execution cluster.
///
/// Every knob here exists to reproduce a behaviour of a real deployment: a key that shows up
/// late, computations that finalize only when told to, notifications that do not echo the
/// correlation id.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LocalClusterConfig {
    /// Program the cluster key is published for
    program_id: String,

    /// Number of key fetches answered with "not published yet" before the key shows up
    key_published_after_attempts: u32,

    /// Whether submitted computations execute right away, or wait for `LocalCluster::finalize`
    auto_finalize: bool,

    /// Whether completion notifications carry the request's correlation id
    include_correlation_ids: bool,

    /// Whether completion notifications are emitted at all
    emit_notifications: bool,

    /// Simulated delay between submission and execution, when auto finalizing
    execution_latency: Duration,
}

impl LocalClusterConfig {
    /// Getter for `program_id`
    #[must_use]
    pub fn program_id(&self) -> &str {
        &self.program_id
    }

    /// Getter for `key_published_after_attempts`
    #[must_use]
    pub const fn key_published_after_attempts(&self) -> u32 {
        self.key_published_after_attempts
    }

    /// Getter for `auto_finalize`
    #[must_use]
    pub const fn auto_finalize(&self) -> bool {
        self.auto_finalize
    }

    /// Getter for `include_correlation_ids`
    #[must_use]
    pub const fn include_correlation_ids(&self) -> bool {
        self.include_correlation_ids
    }

    /// Getter for `emit_notifications`
    #[must_use]
    pub const fn emit_notifications(&self) -> bool {
        self.emit_notifications
    }

    /// Getter for `execution_latency`
    #[must_use]
    pub const fn execution_latency(&self) -> Duration {
        self.execution_latency
    }

    /// Constructs a new `LocalClusterConfig` from the `whispr_local_cluster` section of a
    /// configuration file, overlaid with `WHISPR_LOCAL_CLUSTER__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the section is missing or
    /// malformed.
    pub fn from_file_path<P: AsRef<Path>>(config_file_path: P) -> Result<Self, ConfigError> {
        let builder = RustConfig::builder()
            .add_source(config::File::from(config_file_path.as_ref()))
            .add_source(
                config::Environment::with_prefix("WHISPR_LOCAL_CLUSTER")
                    .keep_prefix(true)
                    .separator("__"),
            );
        builder.build()?.get::<Self>("whispr_local_cluster")
    }
}

impl Default for LocalClusterConfig {
    fn default() -> Self {
        Builder::new().build()
    }
}

/// Builder for `LocalClusterConfig`. Unset fields fall back to an immediately available key,
/// automatic finalization and full notifications.
///
/// # Example
///
/// ```rust,ignore
/// let config = Builder::new()
///     .key_published_after_attempts(3)
///     .auto_finalize(false)
///     .build();
/// ```
pub struct Builder {
    program_id: Option<String>,
    key_published_after_attempts: Option<u32>,
    auto_finalize: Option<bool>,
    include_correlation_ids: Option<bool>,
    emit_notifications: Option<bool>,
    execution_latency: Option<Duration>,
}

impl Builder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            program_id: None,
            key_published_after_attempts: None,
            auto_finalize: None,
            include_correlation_ids: None,
            emit_notifications: None,
            execution_latency: None,
        }
    }

    #[must_use]
    pub fn program_id(mut self, program_id: String) -> Self {
        self.program_id = Some(program_id);
        self
    }

    #[must_use]
    pub const fn key_published_after_attempts(mut self, attempts: u32) -> Self {
        self.key_published_after_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub const fn auto_finalize(mut self, auto_finalize: bool) -> Self {
        self.auto_finalize = Some(auto_finalize);
        self
    }

    #[must_use]
    pub const fn include_correlation_ids(mut self, include: bool) -> Self {
        self.include_correlation_ids = Some(include);
        self
    }

    #[must_use]
    pub const fn emit_notifications(mut self, emit: bool) -> Self {
        self.emit_notifications = Some(emit);
        self
    }

    #[must_use]
    pub const fn execution_latency(mut self, latency: Duration) -> Self {
        self.execution_latency = Some(latency);
        self
    }

    /// Builds the final `LocalClusterConfig` from the builder
    #[must_use]
    pub fn build(self) -> LocalClusterConfig {
        LocalClusterConfig {
            program_id: self
                .program_id
                .unwrap_or_else(|| DEFAULT_PROGRAM_ID.to_string()),
            key_published_after_attempts: self.key_published_after_attempts.unwrap_or(0),
            auto_finalize: self.auto_finalize.unwrap_or(true),
            include_correlation_ids: self.include_correlation_ids.unwrap_or(true),
            emit_notifications: self.emit_notifications.unwrap_or(true),
            execution_latency: self.execution_latency.unwrap_or(Duration::ZERO),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
