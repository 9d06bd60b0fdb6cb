use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;
use whispr_substrate::types::Nonce;

use crate::error::{ConfidentialError, Result};

const PREFIX_SIZE: usize = 8;

/// Issues request nonces for one session, never the same one twice.
///
/// Each nonce is a random per-session prefix followed by a little endian request counter, so
/// uniqueness within the session costs one counter no matter how many requests go through it.
/// Nonces of different sessions may coincide without harm, since each session has its own
/// shared secret and the per-request key is derived from both.
#[derive(Debug)]
pub struct NonceManager {
    prefix: [u8; PREFIX_SIZE],
    next: AtomicU64,
}

impl NonceManager {
    /// Starts a session with a prefix drawn from the operating system's CSPRNG
    #[must_use]
    pub fn new() -> Self {
        let mut prefix = [0u8; PREFIX_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut prefix);
        Self::with_prefix(prefix, 0)
    }

    const fn with_prefix(prefix: [u8; PREFIX_SIZE], next: u64) -> Self {
        Self {
            prefix,
            next: AtomicU64::new(next),
        }
    }

    /// Issues the next 16 byte nonce of the session
    ///
    /// # Errors
    /// `ConfidentialError::NoncesExhausted` once all 2^64 counter values are used; the session
    /// has to be replaced then
    pub fn next_nonce(&self) -> Result<Nonce> {
        let counter = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(1))
            .map_err(|_| ConfidentialError::NoncesExhausted)?;
        let mut bytes = [0u8; PREFIX_SIZE * 2];
        bytes[..PREFIX_SIZE].copy_from_slice(&self.prefix);
        bytes[PREFIX_SIZE..].copy_from_slice(&counter.to_le_bytes());
        Ok(Nonce::from_bytes(bytes))
    }

    /// Number of nonces issued so far
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}
