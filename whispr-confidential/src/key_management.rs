use whispr_substrate::types::ClusterPublicKey;
use whispr_utils::constants::X25519_PUBLIC_KEY_SIZE;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

use crate::error::{ConfidentialError, Result};

/// A client-side x25519 key pair, generated fresh for each session.
///
/// The secret scalar never leaves this struct and is zeroized when it is dropped. Only the
/// public half travels, inside every request encrypted under the resulting shared secret.
pub struct EphemeralKeyPair {
    secret_key: StaticSecret,
}

impl EphemeralKeyPair {
    /// Constructor
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let secret_key = StaticSecret::random_from_rng(&mut rng);
        Self { secret_key }
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret_key)
    }

    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.public_key().to_bytes()
    }

    /// Computes the shared secret with the cluster's published key.
    ///
    /// # Errors
    /// Returns `ConfidentialError::InvalidPeerKey` if the key is a low order point, in which case
    /// the exchange is not contributory and the output would be the all-zero secret.
    pub fn compute_shared_secret(&self, cluster_key: &ClusterPublicKey) -> Result<SharedSecret> {
        let shared_secret = self
            .secret_key
            .diffie_hellman(&PublicKey::from(*cluster_key.as_bytes()));
        if !shared_secret.was_contributory() {
            return Err(ConfidentialError::InvalidPeerKey(
                "low order point, the exchange is not contributory".to_string(),
            ));
        }
        Ok(shared_secret)
    }
}

impl Default for EphemeralKeyPair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_agree() {
        let client = EphemeralKeyPair::new();
        let cluster = EphemeralKeyPair::new();

        let client_secret = client
            .compute_shared_secret(&ClusterPublicKey::from_bytes(cluster.public_key_bytes()))
            .unwrap();
        let cluster_secret = cluster
            .compute_shared_secret(&ClusterPublicKey::from_bytes(client.public_key_bytes()))
            .unwrap();
        assert_eq!(client_secret.as_bytes(), cluster_secret.as_bytes());
    }

    #[test]
    fn test_fresh_pairs_differ() {
        assert_ne!(
            EphemeralKeyPair::new().public_key_bytes(),
            EphemeralKeyPair::new().public_key_bytes()
        );
    }

    #[test]
    fn test_low_order_keys_are_rejected() {
        let client = EphemeralKeyPair::new();
        // u = 0 and u = 1 are both small order
        let mut small_order = [0u8; 32];
        small_order[0] = 1;
        for key in [[0u8; 32], small_order] {
            assert!(matches!(
                client.compute_shared_secret(&ClusterPublicKey::from_bytes(key)),
                Err(ConfidentialError::InvalidPeerKey(_))
            ));
        }
    }
}
