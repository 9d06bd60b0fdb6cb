use std::{sync::Arc, time::Duration};

use tracing::{debug, instrument, warn};
use whispr_substrate::{
    types::CorrelationId, ExecutionSubstrate, FinalizationRecord, SubstrateError,
};
use whispr_utils::{RetryError, RetryPolicy};

use crate::error::{Result, WhisprClientError};

/// Polls the substrate until a computation reaches a terminal status
pub struct FinalizationWaiter {
    substrate: Arc<dyn ExecutionSubstrate>,
    poll_interval: Duration,
    /// Applied to each status query, so a brief outage does not cost a whole poll interval
    query_policy: RetryPolicy,
}

impl FinalizationWaiter {
    #[must_use]
    pub fn new(
        substrate: Arc<dyn ExecutionSubstrate>,
        poll_interval: Duration,
        query_policy: RetryPolicy,
    ) -> Self {
        Self {
            substrate,
            poll_interval,
            query_policy,
        }
    }

    /// Waits for the computation's `Finalized` or `Failed` record.
    ///
    /// Nothing keeps running past `timeout`, and waiting again for the same id afterwards is
    /// fine. Transient substrate errors are logged and the status is polled again.
    ///
    /// # Errors
    /// - `WhisprClientError::FinalizationTimeout` if no terminal status shows up in time;
    ///   `attempts` counts the status queries made
    /// - `WhisprClientError::StatusQueryFailed` on a non transient substrate error
    #[instrument(
        level = "info",
        skip_all,
        fields(correlation_id = %correlation_id, timeout = ?timeout)
    )]
    pub async fn await_finalization(
        &self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Result<FinalizationRecord> {
        let mut attempts = 0u32;
        let outcome =
            tokio::time::timeout(timeout, self.poll(correlation_id, &mut attempts)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target = "whispr-client",
                    event = "finalization_timeout",
                    correlation_id = %correlation_id,
                    attempts,
                    "Computation did not finalize in time"
                );
                Err(WhisprClientError::FinalizationTimeout {
                    correlation_id,
                    timeout,
                    attempts,
                })
            }
        }
    }

    async fn poll(
        &self,
        correlation_id: CorrelationId,
        attempts: &mut u32,
    ) -> Result<FinalizationRecord> {
        let substrate = &self.substrate;
        loop {
            let status = self
                .query_policy
                .run("finalization_status", |_| {
                    *attempts += 1;
                    async move {
                        substrate
                            .finalization_status(correlation_id)
                            .await
                            .map(Some)
                    }
                })
                .await;
            match status {
                Ok(record) if record.is_terminal() => return Ok(record),
                Ok(_) => {
                    debug!(
                        target = "whispr-client",
                        event = "finalization_pending",
                        correlation_id = %correlation_id,
                        "Computation still pending"
                    );
                }
                Err(RetryError::Exhausted { last_error, .. }) => {
                    warn!(
                        target = "whispr-client",
                        event = "finalization_status_unavailable",
                        correlation_id = %correlation_id,
                        error = ?last_error,
                        "Status query kept failing, polling again"
                    );
                }
                Err(RetryError::Permanent { error, .. }) => {
                    return Err(permanent_error(correlation_id, error))
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn permanent_error(correlation_id: CorrelationId, error: SubstrateError) -> WhisprClientError {
    warn!(
        target = "whispr-client",
        event = "finalization_status_failed",
        correlation_id = %correlation_id,
        error = %error,
        "Status query failed"
    );
    WhisprClientError::StatusQueryFailed {
        correlation_id,
        source: error,
    }
}
