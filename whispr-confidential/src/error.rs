use thiserror::Error;
use whispr_substrate::{types::InvalidKeyLength, SubstrateError};
use whispr_utils::encryption;

pub type Result<T> = std::result::Result<T, ConfidentialError>;

#[derive(Debug, Error)]
pub enum ConfidentialError {
    #[error("Cluster public key unavailable after {attempts} attempts")]
    KeyUnavailable {
        attempts: u32,
        last_error: Option<SubstrateError>,
    },
    #[error("Invalid cluster public key: `{0}`")]
    InvalidPeerKey(String),
    #[error("Failed to encrypt inputs: `{0}`")]
    EncryptionFailed(#[source] encryption::Error),
    #[error("Decryption mismatch at block {index:?}: `{source}`")]
    DecryptionMismatch {
        index: Option<usize>,
        #[source]
        source: encryption::Error,
    },
    #[error("Every nonce of this session has been issued")]
    NoncesExhausted,
    #[error("Substrate error while fetching the cluster key: `{0}`")]
    Substrate(#[from] SubstrateError),
}

impl From<InvalidKeyLength> for ConfidentialError {
    fn from(error: InvalidKeyLength) -> Self {
        Self::InvalidPeerKey(error.to_string())
    }
}
