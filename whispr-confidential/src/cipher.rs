use whispr_substrate::types::Nonce;
use whispr_utils::{
    encryption::{self, CiphertextBlock},
    FieldElement,
};
use x25519_dalek::SharedSecret;

use crate::error::{ConfidentialError, Result};

/// Field encryption under a borrowed session secret
#[derive(Clone, Copy)]
pub struct CipherCodec<'a> {
    shared_secret: &'a SharedSecret,
}

impl<'a> CipherCodec<'a> {
    #[must_use]
    pub const fn new(shared_secret: &'a SharedSecret) -> Self {
        Self { shared_secret }
    }

    /// Encrypts `plaintexts` in order under `nonce`, one 48 byte block per field
    ///
    /// # Errors
    /// Returns `ConfidentialError::EncryptionFailed` if key derivation or sealing fails
    pub fn encrypt_fields(
        &self,
        nonce: &Nonce,
        plaintexts: &[FieldElement],
    ) -> Result<Vec<CiphertextBlock>> {
        encryption::encrypt_fields(self.shared_secret, nonce.as_bytes(), plaintexts)
            .map_err(ConfidentialError::EncryptionFailed)
    }

    /// Decrypts blocks produced under `nonce`.
    ///
    /// # Errors
    /// Returns `ConfidentialError::DecryptionMismatch` if any block fails to authenticate or
    /// does not decode to a field element
    pub fn decrypt_fields(
        &self,
        nonce: &Nonce,
        ciphertexts: &[CiphertextBlock],
    ) -> Result<Vec<FieldElement>> {
        encryption::decrypt_fields(self.shared_secret, nonce.as_bytes(), ciphertexts).map_err(
            |source| ConfidentialError::DecryptionMismatch {
                index: source.block_index(),
                source,
            },
        )
    }
}
