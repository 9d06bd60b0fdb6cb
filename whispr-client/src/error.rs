use std::time::Duration;

use thiserror::Error;
use whispr_confidential::ConfidentialError;
use whispr_substrate::{types::CorrelationId, SubstrateError};

pub type Result<T> = std::result::Result<T, WhisprClientError>;

#[derive(Debug, Error)]
pub enum WhisprClientError {
    #[error("Cluster public key unavailable after {attempts} attempts")]
    KeyUnavailable {
        attempts: u32,
        #[source]
        last_error: Option<SubstrateError>,
    },
    #[error("Invalid cluster public key: `{0}`")]
    InvalidPeerKey(String),
    #[error("Correlation id {correlation_id} already in use, after {attempts} attempts")]
    DuplicateCorrelation {
        correlation_id: CorrelationId,
        attempts: u32,
    },
    #[error("Submission {correlation_id} rejected: `{reason}`")]
    SubmissionRejected {
        correlation_id: CorrelationId,
        reason: String,
    },
    #[error("Computation {correlation_id} did not finalize within {timeout:?} ({attempts} attempts)")]
    FinalizationTimeout {
        correlation_id: CorrelationId,
        timeout: Duration,
        attempts: u32,
    },
    #[error("Computation {correlation_id} failed: `{reason}`")]
    ComputationFailed {
        correlation_id: CorrelationId,
        reason: String,
    },
    #[error("Failed to decrypt outputs of {correlation_id:?} at block {index:?}")]
    DecryptionMismatch {
        correlation_id: Option<CorrelationId>,
        index: Option<usize>,
    },
    #[error("Failed to encrypt inputs: `{0}`")]
    EncryptionFailed(String),
    #[error("Session has issued all of its nonces")]
    NoncesExhausted,
    #[error("Computation definition `{0}` is not active")]
    DefinitionNotActive(String),
    #[error("Computation definition `{0}` has no raw circuit to upload")]
    MissingRawCircuit(String),
    #[error("Failed to activate computation definition `{name}`: `{source}`")]
    RegistrationFailed {
        name: String,
        #[source]
        source: SubstrateError,
    },
    #[error("Status query for {correlation_id} failed: `{source}`")]
    StatusQueryFailed {
        correlation_id: CorrelationId,
        #[source]
        source: SubstrateError,
    },
    #[error("Event listener for {correlation_id} closed before a match")]
    ListenerClosed { correlation_id: CorrelationId },
    #[error("In-flight request limiter closed")]
    InFlightLimiterClosed,
    #[error("Substrate error: `{0}`")]
    Substrate(#[from] SubstrateError),
}

impl From<ConfidentialError> for WhisprClientError {
    fn from(error: ConfidentialError) -> Self {
        match error {
            ConfidentialError::KeyUnavailable {
                attempts,
                last_error,
            } => Self::KeyUnavailable {
                attempts,
                last_error,
            },
            ConfidentialError::InvalidPeerKey(reason) => Self::InvalidPeerKey(reason),
            ConfidentialError::EncryptionFailed(e) => Self::EncryptionFailed(e.to_string()),
            ConfidentialError::DecryptionMismatch { index, .. } => Self::DecryptionMismatch {
                correlation_id: None,
                index,
            },
            ConfidentialError::NoncesExhausted => Self::NoncesExhausted,
            ConfidentialError::Substrate(e) => Self::Substrate(e),
        }
    }
}

impl WhisprClientError {
    /// Correlation id of the request this error belongs to, if any
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::DuplicateCorrelation { correlation_id, .. }
            | Self::SubmissionRejected { correlation_id, .. }
            | Self::FinalizationTimeout { correlation_id, .. }
            | Self::ComputationFailed { correlation_id, .. }
            | Self::StatusQueryFailed { correlation_id, .. }
            | Self::ListenerClosed { correlation_id } => Some(*correlation_id),
            Self::DecryptionMismatch { correlation_id, .. } => *correlation_id,
            _ => None,
        }
    }
}
