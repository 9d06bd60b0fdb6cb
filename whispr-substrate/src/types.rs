use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use whispr_utils::{
    constants::{CORRELATION_ID_SIZE, NONCE_SIZE, X25519_PUBLIC_KEY_SIZE},
    encryption::CiphertextBlock,
    hashing::computation_definition_offset,
};

/// Client-chosen token identifying one computation request until it finalizes
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId([u8; CORRELATION_ID_SIZE]);

impl CorrelationId {
    /// Draws a fresh id from the operating system's CSPRNG
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; CORRELATION_ID_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; CORRELATION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CORRELATION_ID_SIZE] {
        &self.0
    }

    /// The id read as a little-endian `u64`, which is how the ledger addresses it
    #[must_use]
    pub const fn to_u64(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({self})")
    }
}

/// 16 byte encryption nonce, carried in the clear next to the ciphertexts it was used for
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Draws a fresh nonce from the operating system's CSPRNG
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Wire representation: the nonce bytes read as a little-endian `u128`
    #[must_use]
    pub const fn to_u128(&self) -> u128 {
        u128::from_le_bytes(self.0)
    }

    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_le_bytes())
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

/// The x25519 public key an execution cluster publishes for a program
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPublicKey([u8; X25519_PUBLIC_KEY_SIZE]);

impl ClusterPublicKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; X25519_PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; X25519_PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl TryFrom<&[u8]> for ClusterPublicKey {
    type Error = InvalidKeyLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| InvalidKeyLength(bytes.len()))
    }
}

impl fmt::Debug for ClusterPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterPublicKey({})", hex::encode(self.0))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Expected a {X25519_PUBLIC_KEY_SIZE} byte public key, got {0} bytes")]
pub struct InvalidKeyLength(pub usize);

/// Opaque identity of whoever pays for and signs the submission.
///
/// Account derivation and signing live with the ledger collaborator; the protocol only passes
/// this value through.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmitterIdentity(String);

impl SubmitterIdentity {
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmitterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The program (and so the cluster key) a client talks to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramContext {
    pub program_id: String,
}

impl ProgramContext {
    #[must_use]
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }
}

/// Lifecycle of a computation definition on the substrate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefinitionState {
    #[default]
    Uninitialized,
    /// Registration landed, waiting for the circuit upload or the finalize call
    Initializing,
    Active,
}

/// A named, addressable kind of confidential computation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputationDefinition {
    name: String,
    offset: u32,
    raw_circuit: Option<Vec<u8>>,
}

impl ComputationDefinition {
    /// Constructor, the offset is derived from the name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let offset = computation_definition_offset(&name);
        Self {
            name,
            offset,
            raw_circuit: None,
        }
    }

    /// Attaches the precompiled circuit body, for activation through a direct upload
    #[must_use]
    pub fn with_raw_circuit(mut self, raw_circuit: Vec<u8>) -> Self {
        self.raw_circuit = Some(raw_circuit);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    #[must_use]
    pub fn raw_circuit(&self) -> Option<&[u8]> {
        self.raw_circuit.as_deref()
    }

    /// Name of the notification the cluster emits when a computation of this kind finishes
    #[must_use]
    pub fn executed_event_name(&self) -> String {
        crate::events::executed_event_name(&self.name)
    }
}

/// Everything the substrate needs to queue one confidential computation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputationRequest {
    pub correlation_id: CorrelationId,
    pub computation_name: String,
    pub computation_offset: u32,
    /// The client's ephemeral x25519 public key, for the cluster side of the key exchange
    pub ephemeral_public_key: [u8; X25519_PUBLIC_KEY_SIZE],
    pub nonce: Nonce,
    pub ciphertexts: Vec<CiphertextBlock>,
    pub submitter: SubmitterIdentity,
}

/// Acknowledgement that a request was queued
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub correlation_id: CorrelationId,
    /// Position assigned by the substrate, echoed back on notifications
    pub sequence: u64,
    pub digest: String,
}

/// Acknowledgement of a computation definition call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionReceipt {
    pub offset: u32,
    pub state: DefinitionState,
    pub digest: String,
}
