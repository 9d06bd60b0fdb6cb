/// Size in bytes of the per-request encryption nonce
pub const NONCE_SIZE: usize = 16;

/// Size in bytes of a client-chosen correlation id
pub const CORRELATION_ID_SIZE: usize = 8;

/// Size in bytes of an x25519 public key
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size in bytes of a serialized field element
pub const FIELD_ELEMENT_SIZE: usize = 32;

/// Size in bytes of the AES-GCM authentication tag appended to every block
pub const TAG_SIZE: usize = 16;

/// Size in bytes of one encrypted field element (ciphertext followed by its tag)
pub const CIPHERTEXT_BLOCK_SIZE: usize = FIELD_ELEMENT_SIZE + TAG_SIZE;

/// Size in bytes of the AES-GCM nonce derived for each field index
pub const BLOCK_NONCE_SIZE: usize = 12;
