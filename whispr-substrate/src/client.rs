use async_trait::async_trait;
use thiserror::Error;
use whispr_utils::retry::Transient;

use crate::{
    events::{ComputationNotification, FinalizationRecord},
    listeners::ListenerId,
    types::{
        ClusterPublicKey, ComputationDefinition, ComputationRequest, CorrelationId,
        DefinitionReceipt, DefinitionState, ProgramContext, SubmissionReceipt,
    },
};

pub type Result<T> = std::result::Result<T, SubstrateError>;

/// The ledger and execution cluster, seen from the client.
///
/// Implementations own transport, signing and fee payment. Everything that crosses this
/// boundary is either public (keys, offsets, receipts) or already encrypted.
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    /// Returns the cluster key for `context`, or `None` if it is not published yet
    async fn fetch_cluster_public_key(
        &self,
        context: &ProgramContext,
    ) -> Result<Option<ClusterPublicKey>>;

    async fn computation_definition_state(&self, offset: u32) -> Result<DefinitionState>;

    /// Registers a computation kind.
    ///
    /// # Errors
    /// `SubstrateError::DefinitionAlreadyExists` if the kind is already registered
    async fn init_computation_definition(
        &self,
        definition: &ComputationDefinition,
    ) -> Result<DefinitionReceipt>;

    /// Activates an initializing kind by uploading its precompiled circuit
    async fn upload_circuit(&self, offset: u32, raw_circuit: &[u8]) -> Result<DefinitionReceipt>;

    /// Activates an initializing kind whose circuit the cluster already knows
    async fn finalize_computation_definition(&self, offset: u32) -> Result<DefinitionReceipt>;

    /// Queues a confidential computation.
    ///
    /// # Errors
    /// - `SubstrateError::DuplicateCorrelation` if the correlation id is taken
    /// - `SubstrateError::DefinitionNotActive` if the kind cannot be executed yet
    /// - `SubstrateError::Rejected` if the request fails validation
    async fn submit_computation(&self, request: &ComputationRequest) -> Result<SubmissionReceipt>;

    async fn finalization_status(&self, correlation_id: CorrelationId)
        -> Result<FinalizationRecord>;

    /// Registers a listener for notifications named `event_name`
    fn add_event_listener(
        &self,
        event_name: &str,
    ) -> (ListenerId, flume::Receiver<ComputationNotification>);

    /// Deregisters a listener, returning `false` if it was already gone
    fn remove_event_listener(&self, listener_id: ListenerId) -> bool;

    fn listener_count(&self) -> usize;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubstrateError {
    #[error("Substrate unavailable: `{0}`")]
    Unavailable(String),
    #[error("Correlation id {0} is already in use")]
    DuplicateCorrelation(CorrelationId),
    #[error("Request rejected: `{0}`")]
    Rejected(String),
    #[error("Computation definition `{0}` already exists")]
    DefinitionAlreadyExists(String),
    #[error("Computation definition `{0}` is already active")]
    DefinitionAlreadyActive(String),
    #[error("Computation definition `{0}` is not active")]
    DefinitionNotActive(String),
    #[error("Computation definition `{0}` not found")]
    DefinitionNotFound(String),
    #[error("No computation with correlation id {0}")]
    UnknownComputation(CorrelationId),
}

impl Transient for SubstrateError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailability_is_transient() {
        assert!(SubstrateError::Unavailable("rpc timeout".to_string()).is_transient());
        assert!(!SubstrateError::Rejected("bad payload".to_string()).is_transient());
        assert!(!SubstrateError::DuplicateCorrelation(CorrelationId::random()).is_transient());
    }
}
