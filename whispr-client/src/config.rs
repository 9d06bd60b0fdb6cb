use std::{path::Path, time::Duration};

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use whispr_utils::RetryPolicy;

/// Where decrypted results are read from once a computation finalizes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// The cluster's completion notification, matched by correlation id
    #[default]
    Notification,
    /// The outputs stored on the finalization record
    FinalizationRecord,
}

/// Configuration for the confidential computation client
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WhisprClientConfig {
    /// Program whose cluster key the client fetches
    pub program_id: String,

    /// Attempts at reading the cluster key before giving up
    pub key_fetch_attempts: u32,

    /// Fixed delay between two cluster key reads
    pub key_fetch_delay: Duration,

    /// Upper bound on the wait for a finalization, and separately for its notification
    pub finalization_timeout: Duration,

    /// Delay between two finalization status queries
    pub poll_interval: Duration,

    /// Attempts per status query (or definition call) while the substrate reports itself
    /// unavailable
    pub substrate_call_attempts: u32,

    /// Requests allowed in flight at once
    pub max_in_flight_requests: usize,

    /// Submissions tried, each under a fresh correlation id, before a collision is reported
    pub max_correlation_attempts: u32,

    /// Activate new computation definitions by uploading their raw circuit instead of finalizing
    pub upload_raw_circuit: bool,

    pub result_source: ResultSource,
}

impl Default for WhisprClientConfig {
    fn default() -> Self {
        Self {
            program_id: "whispr-local".to_string(),
            key_fetch_attempts: 10,
            key_fetch_delay: Duration::from_millis(500),
            finalization_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            substrate_call_attempts: 3,
            max_in_flight_requests: 16,
            max_correlation_attempts: 3,
            upload_raw_circuit: false,
            result_source: ResultSource::Notification,
        }
    }
}

impl WhisprClientConfig {
    /// Creates a new `WhisprClientConfig` from the `whispr_client` section of a configuration
    /// file, overlaid with `WHISPR_CLIENT__*` environment variables. Missing keys keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the section is malformed.
    pub fn from_file_path<P: AsRef<Path>>(config_file_path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::from(config_file_path.as_ref()))
            .add_source(
                config::Environment::with_prefix("WHISPR_CLIENT")
                    .keep_prefix(true)
                    .separator("__"),
            );
        builder.build()?.get::<Self>("whispr_client")
    }

    /// Retry policy for reading the cluster key
    #[must_use]
    pub const fn key_fetch_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.key_fetch_attempts, self.key_fetch_delay)
    }

    /// Retry policy for single substrate calls failing with a transient error
    #[must_use]
    pub const fn substrate_call_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.substrate_call_attempts,
            self.poll_interval,
            self.finalization_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_match_key_fetch_contract() {
        let config = WhisprClientConfig::default();
        assert_eq!(
            config.key_fetch_policy(),
            RetryPolicy::fixed(10, Duration::from_millis(500))
        );
        assert_eq!(config.result_source, ResultSource::Notification);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            "[whispr_client]\nprogram_id = \"swap-program\"\nmax_in_flight_requests = 2\nupload_raw_circuit = true\nresult_source = \"finalization_record\"\n"
        )
        .unwrap();

        let config = WhisprClientConfig::from_file_path(file.path()).unwrap();
        assert_eq!(config.program_id, "swap-program");
        assert_eq!(config.max_in_flight_requests, 2);
        assert!(config.upload_raw_circuit);
        assert_eq!(config.result_source, ResultSource::FinalizationRecord);
        assert_eq!(config.key_fetch_attempts, 10);
        assert_eq!(config.key_fetch_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let config = WhisprClientConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: WhisprClientConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
