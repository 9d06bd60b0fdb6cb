use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::FIELD_ELEMENT_SIZE;

/// Little-endian bytes of the field modulus `p = 2^255 - 19`
const MODULUS_LE: [u8; FIELD_ELEMENT_SIZE] = [
    0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f,
];

/// An unsigned integer strictly below the field modulus `2^255 - 19`.
///
/// This is the unit of plaintext the execution cluster computes over. Values are stored as
/// 32 little-endian bytes, which is also their encrypted-block layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FieldElement([u8; FIELD_ELEMENT_SIZE]);

impl FieldElement {
    pub const ZERO: Self = Self([0u8; FIELD_ELEMENT_SIZE]);

    /// Builds a field element from its little-endian representation.
    ///
    /// # Errors
    ///
    /// Returns `FieldError::NotCanonical` if the value is greater than or equal to the modulus.
    pub fn from_le_bytes(bytes: [u8; FIELD_ELEMENT_SIZE]) -> Result<Self, FieldError> {
        if is_below_modulus(&bytes) {
            Ok(Self(bytes))
        } else {
            Err(FieldError::NotCanonical(hex::encode(bytes)))
        }
    }

    /// Little-endian byte representation
    #[must_use]
    pub const fn to_le_bytes(&self) -> [u8; FIELD_ELEMENT_SIZE] {
        self.0
    }

    /// Returns the value as a `u64`, if it fits
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[8..].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[..8]);
        Some(u64::from_le_bytes(low))
    }

    /// Returns the value as a `u128`, if it fits
    #[must_use]
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[16..].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[..16]);
        Some(u128::from_le_bytes(low))
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; FIELD_ELEMENT_SIZE];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self(bytes)
    }
}

impl From<u128> for FieldElement {
    fn from(value: u128) -> Self {
        let mut bytes = [0u8; FIELD_ELEMENT_SIZE];
        bytes[..16].copy_from_slice(&value.to_le_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u128() {
            Some(value) => write!(f, "FieldElement({value})"),
            None => write!(f, "FieldElement(0x{})", hex::encode(self.0)),
        }
    }
}

/// Compares from the most significant byte down
fn is_below_modulus(bytes: &[u8; FIELD_ELEMENT_SIZE]) -> bool {
    for (byte, modulus_byte) in bytes.iter().rev().zip(MODULUS_LE.iter().rev()) {
        if byte != modulus_byte {
            return byte < modulus_byte;
        }
    }
    false
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("Value `0x{0}` is not a canonical field element")]
    NotCanonical(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_round_trip_through_integers() {
        let amount = FieldElement::from(10_000_000u64);
        assert_eq!(amount.to_u64(), Some(10_000_000));
        assert_eq!(amount.to_u128(), Some(10_000_000));

        let wide = FieldElement::from(u128::MAX);
        assert_eq!(wide.to_u64(), None);
        assert_eq!(wide.to_u128(), Some(u128::MAX));
    }

    #[test]
    fn test_modulus_is_rejected() {
        assert!(FieldElement::from_le_bytes(MODULUS_LE).is_err());

        let mut above = MODULUS_LE;
        above[0] = 0xee;
        assert!(FieldElement::from_le_bytes(above).is_err());
        assert!(FieldElement::from_le_bytes([0xff; FIELD_ELEMENT_SIZE]).is_err());
    }

    #[test]
    fn test_largest_canonical_value_is_accepted() {
        let mut largest = MODULUS_LE;
        largest[0] = 0xec;
        let element = FieldElement::from_le_bytes(largest).unwrap();
        assert_eq!(element.to_le_bytes(), largest);
    }
}
