#![allow(clippy::module_name_repetitions)]

pub mod cipher;
pub mod error;
pub mod key_management;
pub mod nonce;
pub mod session;

pub use cipher::CipherCodec;
pub use error::ConfidentialError;
pub use key_management::EphemeralKeyPair;
pub use nonce::NonceManager;
pub use session::KeyExchangeSession;
