use std::sync::Arc;

use tokio::time::Instant;

use tracing::{info, instrument, warn};
use whispr_confidential::KeyExchangeSession;
use whispr_substrate::{
    types::{ComputationDefinition, ProgramContext, SubmitterIdentity},
    ExecutionSubstrate, FinalizationStatus,
};
use whispr_utils::FieldElement;

use crate::{
    config::{ResultSource, WhisprClientConfig},
    correlator::ResultCorrelator,
    error::{Result, WhisprClientError},
    registry::ComputationDefinitionRegistry,
    submitter::{PendingComputation, RequestSubmitter},
    waiter::FinalizationWaiter,
};

/// Confidential computation client bound to one execution cluster.
///
/// Holds one key exchange session for its whole lifetime; every request it submits is
/// encrypted under that session's shared secret and a nonce of its own.
pub struct WhisprClient {
    config: WhisprClientConfig,
    session: Arc<KeyExchangeSession>,
    registry: Arc<ComputationDefinitionRegistry>,
    submitter: RequestSubmitter,
    waiter: FinalizationWaiter,
    correlator: ResultCorrelator,
}

impl WhisprClient {
    /// Establishes the key exchange session and wires the protocol components together
    ///
    /// # Errors
    /// - `WhisprClientError::KeyUnavailable` if the cluster key is not published in time
    /// - `WhisprClientError::InvalidPeerKey` if the published key is unusable
    #[instrument(level = "info", skip_all, fields(program_id = %config.program_id))]
    pub async fn connect(
        substrate: Arc<dyn ExecutionSubstrate>,
        config: WhisprClientConfig,
    ) -> Result<Self> {
        let session = Arc::new(
            KeyExchangeSession::establish(
                substrate.as_ref(),
                &ProgramContext::new(config.program_id.clone()),
                &config.key_fetch_policy(),
            )
            .await?,
        );
        let registry = Arc::new(ComputationDefinitionRegistry::new(
            substrate.clone(),
            config.substrate_call_policy(),
        ));
        let submitter = RequestSubmitter::new(
            substrate.clone(),
            session.clone(),
            registry.clone(),
            config.max_in_flight_requests,
        );
        let waiter = FinalizationWaiter::new(
            substrate.clone(),
            config.poll_interval,
            config.substrate_call_policy(),
        );
        let correlator = ResultCorrelator::new(substrate);
        info!(
            target = "whispr-client",
            event = "client_connected",
            program_id = %config.program_id,
            "Connected to the execution cluster"
        );
        Ok(Self {
            config,
            session,
            registry,
            submitter,
            waiter,
            correlator,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &WhisprClientConfig {
        &self.config
    }

    #[must_use]
    pub const fn session(&self) -> &Arc<KeyExchangeSession> {
        &self.session
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ComputationDefinitionRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn submitter(&self) -> &RequestSubmitter {
        &self.submitter
    }

    #[must_use]
    pub const fn waiter(&self) -> &FinalizationWaiter {
        &self.waiter
    }

    #[must_use]
    pub const fn correlator(&self) -> &ResultCorrelator {
        &self.correlator
    }

    /// Runs one confidential computation end to end and returns its decrypted outputs.
    ///
    /// Activates the kind if needed, subscribes to its completion notification, submits the
    /// encrypted inputs (under a fresh correlation id on each collision, up to the configured
    /// bound), waits for finalization, then decrypts the outputs taken from the configured
    /// result source. Dropping the returned future abandons the request locally and releases
    /// its subscription and in-flight slot.
    ///
    /// # Errors
    /// Any `WhisprClientError`; in particular `ComputationFailed` when the cluster reports the
    /// computation as failed, and `FinalizationTimeout` when the finalization and its
    /// notification do not both show up within the configured timeout.
    #[instrument(
        level = "info",
        skip_all,
        fields(name = %definition.name(), submitter = %submitter)
    )]
    pub async fn run_confidential_computation(
        &self,
        definition: &ComputationDefinition,
        plaintexts: &[FieldElement],
        submitter: &SubmitterIdentity,
    ) -> Result<Vec<FieldElement>> {
        self.registry
            .ensure_active(definition, self.config.upload_raw_circuit)
            .await?;

        let subscription = self.correlator.subscribe(definition);
        let pending = self.submit_regenerating(definition, plaintexts, submitter).await?;
        let correlation_id = pending.correlation_id();
        // Finalization and its notification share one window
        let timeout = self.config.finalization_timeout;
        let deadline = Instant::now() + timeout;

        let record = self
            .waiter
            .await_finalization(correlation_id, timeout)
            .await?;
        if record.status == FinalizationStatus::Failed {
            return Err(WhisprClientError::ComputationFailed {
                correlation_id,
                reason: record.failure_reason.unwrap_or_default(),
            });
        }

        let outputs = match self.config.result_source {
            ResultSource::Notification => {
                let notification = self
                    .correlator
                    .await_notification(
                        subscription,
                        pending.match_key(),
                        deadline.saturating_duration_since(Instant::now()),
                    )
                    .await
                    .map_err(|e| match e {
                        WhisprClientError::FinalizationTimeout {
                            correlation_id,
                            attempts,
                            ..
                        } => WhisprClientError::FinalizationTimeout {
                            correlation_id,
                            timeout,
                            attempts,
                        },
                        e => e,
                    })?;
                self.correlator.decrypt_outputs(
                    &self.session,
                    correlation_id,
                    &notification.result_nonce,
                    &notification.ciphertext_outputs,
                )?
            }
            ResultSource::FinalizationRecord => {
                drop(subscription);
                let Some(result_nonce) = record.result_nonce else {
                    return Err(WhisprClientError::DecryptionMismatch {
                        correlation_id: Some(correlation_id),
                        index: None,
                    });
                };
                self.correlator.decrypt_outputs(
                    &self.session,
                    correlation_id,
                    &result_nonce,
                    &record.ciphertext_outputs,
                )?
            }
        };

        info!(
            target = "whispr-client",
            event = "computation_completed",
            correlation_id = %correlation_id,
            outputs = outputs.len(),
            "Confidential computation completed"
        );
        Ok(outputs)
    }

    /// Submits under fresh correlation ids until one is accepted or the bound is reached
    async fn submit_regenerating(
        &self,
        definition: &ComputationDefinition,
        plaintexts: &[FieldElement],
        submitter: &SubmitterIdentity,
    ) -> Result<PendingComputation> {
        let max_attempts = self.config.max_correlation_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.submitter.submit(definition, plaintexts, submitter).await {
                Err(WhisprClientError::DuplicateCorrelation { correlation_id, .. })
                    if attempt < max_attempts =>
                {
                    warn!(
                        target = "whispr-client",
                        event = "correlation_id_collision",
                        correlation_id = %correlation_id,
                        attempt,
                        "Correlation id already in use, regenerating"
                    );
                    attempt += 1;
                }
                Err(WhisprClientError::DuplicateCorrelation { correlation_id, .. }) => {
                    return Err(WhisprClientError::DuplicateCorrelation {
                        correlation_id,
                        attempts: attempt,
                    })
                }
                result => return result,
            }
        }
    }
}
