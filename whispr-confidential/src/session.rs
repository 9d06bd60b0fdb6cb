use tracing::{info, instrument};
use whispr_substrate::{
    types::{ClusterPublicKey, Nonce, ProgramContext},
    ExecutionSubstrate,
};
use whispr_utils::{constants::X25519_PUBLIC_KEY_SIZE, RetryError, RetryPolicy};
use x25519_dalek::SharedSecret;

use crate::{
    cipher::CipherCodec,
    error::{ConfidentialError, Result},
    key_management::EphemeralKeyPair,
    nonce::NonceManager,
};

/// Key agreement between one client session and the execution cluster.
///
/// Owns the ephemeral key pair, the derived shared secret and the nonces issued under it. The
/// secret is never serialized; share the session behind an `Arc` to encrypt concurrent requests.
pub struct KeyExchangeSession {
    key_pair: EphemeralKeyPair,
    cluster_key: ClusterPublicKey,
    shared_secret: SharedSecret,
    nonces: NonceManager,
}

impl KeyExchangeSession {
    /// Fetches the cluster key, generates a fresh key pair and derives the shared secret
    ///
    /// # Errors
    /// - `ConfidentialError::KeyUnavailable` if the key is not published within the policy
    /// - `ConfidentialError::InvalidPeerKey` if the published key is unusable
    /// - `ConfidentialError::Substrate` on a non transient substrate error
    #[instrument(level = "info", skip_all, fields(program_id = %context.program_id))]
    pub async fn establish<S>(
        substrate: &S,
        context: &ProgramContext,
        policy: &RetryPolicy,
    ) -> Result<Self>
    where
        S: ExecutionSubstrate + ?Sized,
    {
        let cluster_key = fetch_cluster_public_key(substrate, context, policy).await?;
        let session = Self::from_parts(EphemeralKeyPair::new(), cluster_key)?;
        info!(
            target = "whispr-confidential",
            event = "session_established",
            program_id = %context.program_id,
            "Established key exchange session with the execution cluster"
        );
        Ok(session)
    }

    /// Builds a session from an already known cluster key
    ///
    /// # Errors
    /// Returns `ConfidentialError::InvalidPeerKey` if the key is a low order point
    pub fn from_parts(key_pair: EphemeralKeyPair, cluster_key: ClusterPublicKey) -> Result<Self> {
        let shared_secret = derive_shared_secret(&key_pair, &cluster_key)?;
        Ok(Self {
            key_pair,
            cluster_key,
            shared_secret,
            nonces: NonceManager::new(),
        })
    }

    /// The public half of the ephemeral key pair, carried in every request
    #[must_use]
    pub fn ephemeral_public_key(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.key_pair.public_key_bytes()
    }

    #[must_use]
    pub const fn cluster_public_key(&self) -> &ClusterPublicKey {
        &self.cluster_key
    }

    /// A nonce never issued before in this session
    ///
    /// # Errors
    /// `ConfidentialError::NoncesExhausted` if the session has used up its nonces
    pub fn next_nonce(&self) -> Result<Nonce> {
        self.nonces.next_nonce()
    }

    #[must_use]
    pub const fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    #[must_use]
    pub const fn codec(&self) -> CipherCodec<'_> {
        CipherCodec::new(&self.shared_secret)
    }
}

/// Reads the cluster's published key, retrying while it is absent or the substrate is flaky.
///
/// Each attempt is an independent read; the policy sleeps between attempts only.
///
/// # Errors
/// - `ConfidentialError::KeyUnavailable` once the attempts run out
/// - `ConfidentialError::Substrate` on the first non transient error
pub async fn fetch_cluster_public_key<S>(
    substrate: &S,
    context: &ProgramContext,
    policy: &RetryPolicy,
) -> Result<ClusterPublicKey>
where
    S: ExecutionSubstrate + ?Sized,
{
    policy
        .run("fetch_cluster_public_key", |_| {
            substrate.fetch_cluster_public_key(context)
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted {
                attempts,
                last_error,
                ..
            } => ConfidentialError::KeyUnavailable {
                attempts,
                last_error,
            },
            RetryError::Permanent { error, .. } => ConfidentialError::Substrate(error),
        })
}

/// Pure key agreement between the client's key pair and the cluster key
///
/// # Errors
/// Returns `ConfidentialError::InvalidPeerKey` if the exchange is not contributory
pub fn derive_shared_secret(
    key_pair: &EphemeralKeyPair,
    cluster_key: &ClusterPublicKey,
) -> Result<SharedSecret> {
    key_pair.compute_shared_secret(cluster_key)
}
