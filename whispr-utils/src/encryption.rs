use aes_gcm::{aead::Aead, Aes256Gcm, Error as AesError, KeyInit};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;

use crate::{
    constants::{BLOCK_NONCE_SIZE, CIPHERTEXT_BLOCK_SIZE, NONCE_SIZE},
    field::{FieldElement, FieldError},
};

/// HKDF info label binding derived keys to field encryption
const FIELD_KEY_INFO: &[u8] = b"whispr/field-encryption/v1";

/// One encrypted field element: 32 bytes of ciphertext followed by the 16 byte tag
pub type CiphertextBlock = [u8; CIPHERTEXT_BLOCK_SIZE];

type Result<T> = std::result::Result<T, Error>;

/// Derives the symmetric key used for every field of one request.
///
/// The request nonce is the HKDF salt, so two requests under the same shared secret only share
/// a key if they share a nonce. Nonce uniqueness per shared secret is therefore what keeps
/// distinct requests from reusing keystream.
///
/// # Errors
/// Returns `Error::KeyExpansionFailed` if HKDF cannot produce 32 bytes
pub fn derive_field_key(
    shared_secret: &SharedSecret,
    nonce: &[u8; NONCE_SIZE],
) -> Result<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(nonce.as_slice()), shared_secret.as_bytes());
    let mut symmetric_key = [0u8; 32];
    hkdf.expand(FIELD_KEY_INFO, &mut symmetric_key)
        .map_err(Error::KeyExpansionFailed)?;
    Ok(symmetric_key)
}

/// AES-GCM nonce for the field at `index`.
///
/// Fields of one request share the request nonce (and so the derived key) but never an
/// AES-GCM nonce, which is what makes reusing the request nonce across fields safe.
fn block_nonce(index: usize) -> [u8; BLOCK_NONCE_SIZE] {
    let mut nonce = [0u8; BLOCK_NONCE_SIZE];
    nonce[..8].copy_from_slice(&(index as u64).to_le_bytes());
    nonce
}

/// Encrypts an ordered sequence of field elements under one request nonce.
///
/// # Arguments
/// * `shared_secret` - The x25519 shared secret between client and cluster
/// * `nonce` - The request nonce, used once per shared secret
/// * `plaintexts` - Field elements, encrypted in order; block `i` is bound to index `i`
///
/// # Returns
/// One fixed-size ciphertext block per plaintext, in the same order
///
/// # Errors
/// Returns an error if:
/// - Key derivation fails
/// - The AEAD encryption fails
pub fn encrypt_fields(
    shared_secret: &SharedSecret,
    nonce: &[u8; NONCE_SIZE],
    plaintexts: &[FieldElement],
) -> Result<Vec<CiphertextBlock>> {
    let symmetric_key = derive_field_key(shared_secret, nonce)?;
    let cipher = Aes256Gcm::new(&symmetric_key.into());
    plaintexts
        .iter()
        .enumerate()
        .map(|(index, plaintext)| {
            let ciphertext = cipher
                .encrypt(&block_nonce(index).into(), plaintext.to_le_bytes().as_slice())
                .map_err(Error::EncryptionFailed)?;
            CiphertextBlock::try_from(ciphertext.as_slice())
                .map_err(|_| Error::InvalidBlockLength(ciphertext.len()))
        })
        .collect()
}

/// Decrypts an ordered sequence of ciphertext blocks produced by [`encrypt_fields`].
///
/// Every block carries an authentication tag, so a wrong shared secret, a wrong nonce, a
/// tampered block or a block moved to another position fails here instead of yielding a
/// plausible looking value.
///
/// # Errors
/// Returns an error if:
/// - Key derivation fails
/// - Any block fails authentication (`Error::DecryptionFailed` with the block index)
/// - A decrypted value is not a canonical field element
pub fn decrypt_fields(
    shared_secret: &SharedSecret,
    nonce: &[u8; NONCE_SIZE],
    ciphertexts: &[CiphertextBlock],
) -> Result<Vec<FieldElement>> {
    let symmetric_key = derive_field_key(shared_secret, nonce)?;
    let cipher = Aes256Gcm::new(&symmetric_key.into());
    ciphertexts
        .iter()
        .enumerate()
        .map(|(index, ciphertext)| {
            let plaintext = cipher
                .decrypt(&block_nonce(index).into(), ciphertext.as_slice())
                .map_err(|error| Error::DecryptionFailed { index, error })?;
            let bytes = plaintext
                .as_slice()
                .try_into()
                .map_err(|_| Error::InvalidBlockLength(plaintext.len()))?;
            FieldElement::from_le_bytes(bytes)
                .map_err(|source| Error::InvalidField { index, source })
        })
        .collect()
}

/// Errors that can occur during field encryption/decryption operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to decrypt ciphertext block {index}, with error: `{error}`")]
    DecryptionFailed { index: usize, error: AesError },
    #[error("Failed to encrypt plaintext, with error: `{0}`")]
    EncryptionFailed(AesError),
    #[error("Failed to expand key, with error: `{0}`")]
    KeyExpansionFailed(hkdf::InvalidLength),
    #[error("Unexpected block length: {0}")]
    InvalidBlockLength(usize),
    #[error("Decrypted block {index} is not a field element: `{source}`")]
    InvalidField { index: usize, source: FieldError },
}

impl Error {
    /// Index of the offending block, when the failure is tied to one
    #[must_use]
    pub const fn block_index(&self) -> Option<usize> {
        match self {
            Self::DecryptionFailed { index, .. } | Self::InvalidField { index, .. } => Some(*index),
            _ => None,
        }
    }
}
