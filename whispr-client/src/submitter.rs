use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, instrument};
use whispr_confidential::KeyExchangeSession;
use whispr_substrate::{
    types::{ComputationDefinition, ComputationRequest, CorrelationId, Nonce, SubmitterIdentity},
    ExecutionSubstrate, SubstrateError,
};
use whispr_utils::FieldElement;

use crate::{
    correlator::MatchKey,
    error::{Result, WhisprClientError},
    registry::ComputationDefinitionRegistry,
};

/// A submitted computation that has not been resolved yet.
///
/// Holds one of the client's in-flight slots until dropped.
#[derive(Debug)]
pub struct PendingComputation {
    correlation_id: CorrelationId,
    sequence: u64,
    request_nonce: Nonce,
    computation_name: String,
    _permit: OwnedSemaphorePermit,
}

impl PendingComputation {
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Position the substrate assigned to the request
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub const fn request_nonce(&self) -> Nonce {
        self.request_nonce
    }

    #[must_use]
    pub fn computation_name(&self) -> &str {
        &self.computation_name
    }

    /// Key the completion notification of this computation is matched with
    #[must_use]
    pub const fn match_key(&self) -> MatchKey {
        MatchKey {
            correlation_id: self.correlation_id,
            sequence: self.sequence,
        }
    }
}

/// Encrypts inputs and queues them as one confidential computation request
pub struct RequestSubmitter {
    substrate: Arc<dyn ExecutionSubstrate>,
    session: Arc<KeyExchangeSession>,
    registry: Arc<ComputationDefinitionRegistry>,
    in_flight: Arc<Semaphore>,
}

impl RequestSubmitter {
    #[must_use]
    pub fn new(
        substrate: Arc<dyn ExecutionSubstrate>,
        session: Arc<KeyExchangeSession>,
        registry: Arc<ComputationDefinitionRegistry>,
        max_in_flight_requests: usize,
    ) -> Self {
        Self {
            substrate,
            session,
            registry,
            in_flight: Arc::new(Semaphore::new(max_in_flight_requests)),
        }
    }

    /// Free in-flight slots
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Submits `plaintexts` under a fresh random correlation id
    ///
    /// # Errors
    /// See [`Self::submit_with_correlation_id`]
    pub async fn submit(
        &self,
        definition: &ComputationDefinition,
        plaintexts: &[FieldElement],
        submitter: &SubmitterIdentity,
    ) -> Result<PendingComputation> {
        self.submit_with_correlation_id(CorrelationId::random(), definition, plaintexts, submitter)
            .await
    }

    /// Encrypts all of `plaintexts` under one fresh nonce and submits them as a single request.
    ///
    /// Waits for a free in-flight slot first.
    ///
    /// # Errors
    /// - `WhisprClientError::DefinitionNotActive` if the registry has not activated the kind
    /// - `WhisprClientError::DuplicateCorrelation` if the correlation id is already taken
    /// - `WhisprClientError::SubmissionRejected` if the substrate refuses the request
    #[instrument(
        level = "info",
        skip_all,
        fields(correlation_id = %correlation_id, name = %definition.name())
    )]
    pub async fn submit_with_correlation_id(
        &self,
        correlation_id: CorrelationId,
        definition: &ComputationDefinition,
        plaintexts: &[FieldElement],
        submitter: &SubmitterIdentity,
    ) -> Result<PendingComputation> {
        if !self.registry.is_active(definition.offset()) {
            return Err(WhisprClientError::DefinitionNotActive(
                definition.name().to_string(),
            ));
        }
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WhisprClientError::InFlightLimiterClosed)?;

        let nonce = self.session.next_nonce()?;
        let ciphertexts = self.session.codec().encrypt_fields(&nonce, plaintexts)?;
        let request = ComputationRequest {
            correlation_id,
            computation_name: definition.name().to_string(),
            computation_offset: definition.offset(),
            ephemeral_public_key: self.session.ephemeral_public_key(),
            nonce,
            ciphertexts,
            submitter: submitter.clone(),
        };

        let receipt = self
            .substrate
            .submit_computation(&request)
            .await
            .map_err(|e| match e {
                SubstrateError::DuplicateCorrelation(correlation_id) => {
                    WhisprClientError::DuplicateCorrelation {
                        correlation_id,
                        attempts: 1,
                    }
                }
                SubstrateError::Rejected(reason) => WhisprClientError::SubmissionRejected {
                    correlation_id,
                    reason,
                },
                SubstrateError::DefinitionNotActive(name) => {
                    WhisprClientError::DefinitionNotActive(name)
                }
                e => WhisprClientError::Substrate(e),
            })?;

        info!(
            target = "whispr-client",
            event = "computation_submitted",
            correlation_id = %correlation_id,
            sequence = receipt.sequence,
            digest = %receipt.digest,
            inputs = plaintexts.len(),
            "Submitted confidential computation"
        );
        Ok(PendingComputation {
            correlation_id,
            sequence: receipt.sequence,
            request_nonce: nonce,
            computation_name: request.computation_name,
            _permit: permit,
        })
    }
}
